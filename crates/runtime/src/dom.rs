//! Minimal DOM contract for widget containers.
//!
//! A container is the element a binding is attached to. Views render into
//! it as child elements, identified by [`ElementId`].

/// Opaque identifier of a child element inside a container.
pub type ElementId = u64;

/// A host element that holds rendered widget views.
pub trait Container: Send + Sync {
	/// Element id (the binding's input/output name).
	fn id(&self) -> &str;

	fn has_class(&self, class: &str) -> bool;

	fn add_class(&self, class: &str);

	/// Reads a `data-*` style attribute.
	fn attribute(&self, name: &str) -> Option<String>;

	/// Creates an empty child element at the end of the container.
	fn append_child(&self) -> ElementId;

	/// Removes a child element. Returns false if it was already gone.
	fn remove_child(&self, child: ElementId) -> bool;

	/// Child elements, in document order.
	fn children(&self) -> Vec<ElementId>;

	fn add_child_class(&self, child: ElementId, class: &str);

	fn set_hidden(&self, hidden: bool);

	fn is_hidden(&self) -> bool;

	/// Shows (or clears, with `None`) a bound-output error message.
	fn set_error(&self, message: Option<String>);
}
