//! Subcommand implementations.

pub mod config;
pub mod decode;
pub mod replay;

use std::io::{self, Read};
use std::path::Path;

use commbridge::BridgeConfig;

use crate::cli::{BridgeArgs, Cli, Commands};
use crate::error::{CliError, Result};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = resolve_config(&cli.bridge)?;
	let mut out = io::stdout().lock();

	match &cli.command {
		Commands::Replay(args) => replay::run(args, config, cli.format, &mut out).await,
		Commands::Decode(args) => decode::run(args, cli.format, &mut out),
		Commands::Config => config::run(&config, cli.format, &mut out),
	}
}

/// Config file (if any) with command-line overrides applied, validated.
pub fn resolve_config(args: &BridgeArgs) -> Result<BridgeConfig> {
	let mut config = match &args.config {
		Some(path) => BridgeConfig::from_json_file(path)?,
		None => BridgeConfig::default(),
	};
	if let Some(namespace) = &args.namespace {
		config = config.with_namespace(namespace.clone());
	}
	if let Some(throttle_ms) = args.throttle_ms {
		config = config.with_throttle_ms(throttle_ms);
	}
	config.validate()?;
	Ok(config)
}

/// Reads a whole file, or stdin for `-`.
pub(crate) fn read_input(path: &Path) -> Result<String> {
	if path == Path::new("-") {
		let mut text = String::new();
		io::stdin().read_to_string(&mut text)?;
		return Ok(text);
	}
	std::fs::read_to_string(path).map_err(|source| CliError::Read {
		path: path.to_path_buf(),
		source,
	})
}
