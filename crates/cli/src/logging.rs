use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the stderr subscriber. `RUST_LOG` overrides the verbosity.
pub fn init_logging(verbosity: u8) {
	// 0 = errors only
	// 1 (-v) = info for the bridge, warn for session internals
	// 2 (-vv) = debug everywhere (per-message protocol traffic)
	// 3+ (-vvv) = trace, including raw envelope text
	let filter = match verbosity {
		0 => "error",
		1 => "info,commbridge_runtime=warn",
		2 => "debug",
		_ => "trace",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
