use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use commbridge_cli::cli::{Cli, Commands};
use commbridge_cli::{commands, logging};

// Single-threaded so replay output follows script order.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::FAILURE
		}
	}
}

async fn run(cli: Cli) -> anyhow::Result<()> {
	let command = match &cli.command {
		Commands::Replay(_) => "replay",
		Commands::Decode(_) => "decode",
		Commands::Config => "config",
	};
	commands::dispatch(cli)
		.await
		.with_context(|| format!("{command} failed"))
}
