
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Replay and inspect widget comm traffic.
#[derive(Parser, Debug)]
#[command(name = "commbridge")]
#[command(about = "Drive the widget bridge from recorded host traffic")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format
	#[arg(short = 'f', long, global = true, value_enum, default_value = "json")]
	pub format: OutputFormat,

	#[command(flatten)]
	pub bridge: BridgeArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// Overrides applied on top of the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct BridgeArgs {
	/// JSON bridge config file
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Channel namespace (`<NS>_comm_open`, ...)
	#[arg(long, global = true, value_name = "NS")]
	pub namespace: Option<String>,

	/// Pointer-move coalescing window in milliseconds
	#[arg(long, global = true, value_name = "MS", allow_negative_numbers = true)]
	pub throttle_ms: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run a JSON-lines script of host messages and page actions, printing
	/// every value the bridge publishes back to the host.
	Replay(ReplayArgs),
	/// Decode one envelope and summarize it.
	Decode(DecodeArgs),
	/// Print the effective bridge configuration.
	Config,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
	/// Script file, or `-` for stdin
	#[arg(value_name = "SCRIPT", default_value = "-")]
	pub script: PathBuf,

	/// Delay every model construction by this many milliseconds
	#[arg(long, value_name = "MS", default_value_t = 0)]
	pub open_delay_ms: u64,

	/// Keep going after a step fails
	#[arg(long)]
	pub keep_going: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
	/// File holding the envelope text, or `-` for stdin
	#[arg(value_name = "FILE", default_value = "-")]
	pub input: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// One JSON object per line
	Json,
	/// Human-readable lines
	Text,
}
