use std::io::Write;

use commbridge::BridgeConfig;

use crate::cli::OutputFormat;
use crate::error::Result;

/// Prints the effective configuration.
pub fn run<W: Write>(config: &BridgeConfig, format: OutputFormat, out: &mut W) -> Result<()> {
	match format {
		OutputFormat::Json => serde_json::to_writer(&mut *out, config)?,
		OutputFormat::Text => serde_json::to_writer_pretty(&mut *out, config)?,
	}
	writeln!(out)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use serde_json::Value;

	use super::*;

	#[test]
	fn prints_defaults_as_json() {
		let mut out = Vec::new();
		run(&BridgeConfig::default(), OutputFormat::Json, &mut out).unwrap();

		let printed: Value = serde_json::from_slice(&out).unwrap();
		assert_eq!(printed["namespace"], "shinywidgets");
		assert_eq!(printed["throttle_ms"], 100);
		assert_eq!(printed["default_rate_policy"]["mode"], "debounce");
	}
}
