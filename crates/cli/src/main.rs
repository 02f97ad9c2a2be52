use std::io::IsTerminal;

use booker_cli::cli::Cli;
use booker_cli::output::{OutputFormat, print_failure};
use booker_cli::{commands, logging};
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);
	if !std::io::stdout().is_terminal() {
		colored::control::set_override(false);
	}

	let format = cli.format;
	let command = commands::name(&cli.command);
	if let Err(err) = commands::dispatch(cli).await {
		error!(target = "booker", error = %err, "command failed");
		if format != OutputFormat::Text {
			print_failure(command, err.code(), &err.to_string(), format);
		}
		std::process::exit(1);
	}
}
