use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "booker")]
#[command(about = "Book appointments for a queue of clients the moment a portal's booking window opens")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v debug, -vv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format
	#[arg(short = 'f', long, global = true, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	/// Config file (defaults to ./booker.json when present)
	#[arg(long, global = true, value_name = "FILE", env = "BOOKER_CONFIG")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Warm sessions, wait for the window and book every client
	Run(RunArgs),

	/// Load and validate the client file (and flow file) without booking
	Check(CheckArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
	/// Client CSV file
	#[arg(long, value_name = "FILE")]
	pub csv: Option<PathBuf>,

	/// Booking window opening instant: RFC 3339, "YYYY-MM-DD HH:MM[:SS]" or "HH:MM[:SS]" (local)
	#[arg(long, value_name = "TIME")]
	pub target_time: Option<String>,

	/// Open and authenticate sessions ahead of the window
	#[arg(long, overrides_with = "no_warmup")]
	pub warmup: bool,

	#[arg(long, hide = true, overrides_with = "warmup")]
	pub no_warmup: bool,

	/// Run browsers without a visible window
	#[arg(long, overrides_with = "headed")]
	pub headless: bool,

	/// Run browsers with a visible window
	#[arg(long, overrides_with = "headless")]
	pub headed: bool,

	/// Book one client at a time
	#[arg(long, conflicts_with = "parallel")]
	pub sequential: bool,

	/// Maximum concurrent sessions
	#[arg(long, value_name = "N")]
	pub parallel: Option<usize>,

	/// Process at most N clients
	#[arg(long, value_name = "N")]
	pub max_clients: Option<usize>,

	/// Attempts per client, including the first
	#[arg(long, value_name = "N")]
	pub max_attempts: Option<u32>,

	/// Seed for backoff jitter
	#[arg(long, value_name = "SEED")]
	pub seed: Option<u64>,

	/// Browser driver daemon endpoint
	#[arg(long, value_name = "URL", env = "BOOKER_DRIVER")]
	pub driver: Option<String>,

	/// Portal flow definition
	#[arg(long, value_name = "FILE")]
	pub flow: Option<PathBuf>,

	/// Directory for booking_results_<timestamp>.json
	#[arg(long, value_name = "DIR")]
	pub results_dir: Option<PathBuf>,

	/// Do not write a results file
	#[arg(long)]
	pub no_results: bool,

	/// Use the in-memory simulator instead of a browser and portal
	#[arg(long)]
	pub dry_run: bool,
}

impl RunArgs {
	pub fn warmup_flag(&self) -> Option<bool> {
		flag(self.warmup, self.no_warmup)
	}

	pub fn headless_flag(&self) -> Option<bool> {
		flag(self.headless, self.headed)
	}
}

fn flag(on: bool, off: bool) -> Option<bool> {
	match (on, off) {
		(true, _) => Some(true),
		(_, true) => Some(false),
		_ => None,
	}
}

#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
	/// Client CSV file
	#[arg(long, value_name = "FILE")]
	pub csv: Option<PathBuf>,

	/// Report at most N clients
	#[arg(long, value_name = "N")]
	pub max_clients: Option<usize>,

	/// Also validate this portal flow definition
	#[arg(long, value_name = "FILE")]
	pub flow: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_run_with_window_flags() {
		let cli = Cli::try_parse_from([
			"booker",
			"run",
			"--csv",
			"clients.csv",
			"--target-time",
			"09:00",
			"--warmup",
			"--sequential",
			"--max-clients",
			"3",
		])
		.unwrap();

		match cli.command {
			Commands::Run(args) => {
				assert_eq!(args.csv, Some(PathBuf::from("clients.csv")));
				assert_eq!(args.target_time.as_deref(), Some("09:00"));
				assert_eq!(args.warmup_flag(), Some(true));
				assert_eq!(args.headless_flag(), None);
				assert!(args.sequential);
				assert_eq!(args.max_clients, Some(3));
			}
			_ => panic!("Expected Run command"),
		}
	}

	#[test]
	fn later_toggle_wins() {
		let cli = Cli::try_parse_from(["booker", "run", "--headless", "--headed", "--warmup", "--no-warmup"]).unwrap();
		let Commands::Run(args) = cli.command else {
			panic!("Expected Run command");
		};
		assert_eq!(args.headless_flag(), Some(false));
		assert_eq!(args.warmup_flag(), Some(false));
	}

	#[test]
	fn sequential_conflicts_with_parallel() {
		assert!(Cli::try_parse_from(["booker", "run", "--sequential", "--parallel", "2"]).is_err());
	}

	#[test]
	fn global_flags_after_subcommand() {
		let cli = Cli::try_parse_from(["booker", "check", "-vv", "-f", "json"]).unwrap();
		assert_eq!(cli.verbose, 2);
		assert_eq!(cli.format, OutputFormat::Json);
		assert!(matches!(cli.command, Commands::Check(_)));
	}

	#[test]
	fn invalid_command_fails() {
		assert!(Cli::try_parse_from(["booker", "book-everything"]).is_err());
	}
}
