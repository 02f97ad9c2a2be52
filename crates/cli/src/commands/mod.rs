mod check;
mod run;

use crate::cli::{Cli, Commands};
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Run(args) => run::execute(args, cli.config.as_deref(), cli.format).await,
		Commands::Check(args) => check::execute(args, cli.config.as_deref(), cli.format),
	}
}

/// Command name used in result envelopes.
pub fn name(command: &Commands) -> &'static str {
	match command {
		Commands::Run(_) => "run",
		Commands::Check(_) => "check",
	}
}
