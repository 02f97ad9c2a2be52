//! Human-readable rendering of command data.

use std::io::{self, Write};

use booker::{AttemptResult, ClientReport, DispatchKind};
use colored::Colorize;

use crate::output::model::{CheckData, RunData};

/// Data that knows how to print itself for `-f text`.
pub trait TextOutput {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl TextOutput for () {
	fn write_text(&self, _out: &mut dyn Write) -> io::Result<()> {
		Ok(())
	}
}

impl TextOutput for RunData {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		let plan = &self.plan;
		let target = plan.target.map_or_else(|| "now".to_string(), |t| t.to_rfc3339());
		write!(out, "{} {} | window {} | warmup {}", "Run".bold(), plan.mode, target, if plan.warmup { "on" } else { "off" })?;
		if plan.dry_run {
			write!(out, " | {}", "dry run".yellow())?;
		}
		writeln!(out)?;

		let width = self.summary.clients.iter().map(|r| r.client_id.as_str().len()).max().unwrap_or(0).max(6);
		for report in &self.summary.clients {
			writeln!(out, "  {}", client_line(report, width))?;
		}

		let counts = &self.summary.counts;
		writeln!(
			out,
			"{} clients: {} succeeded, {} failed, {} abandoned in {:.1}s",
			counts.total(),
			counts.succeeded.to_string().green(),
			counts.failed_terminal.to_string().red(),
			counts.abandoned.to_string().yellow(),
			self.summary.elapsed_ms as f64 / 1000.0
		)?;
		for warning in &self.summary.load_warnings {
			writeln!(out, "  {} {warning}", "skipped".dimmed())?;
		}
		Ok(())
	}
}

fn client_line(report: &ClientReport, width: usize) -> String {
	let status = match &report.result {
		AttemptResult::Succeeded { .. } => format!("{:<9}", "booked").green(),
		AttemptResult::FailedTerminal { .. } | AttemptResult::FailedRetryable { .. } => format!("{:<9}", "failed").red(),
		AttemptResult::Abandoned { .. } => format!("{:<9}", "abandoned").yellow(),
	};
	let detail = match &report.result {
		AttemptResult::Succeeded { confirmation_ref } => confirmation_ref.clone(),
		other => other.to_string(),
	};
	let dispatch = match report.dispatch {
		DispatchKind::Warm => "warm",
		DispatchKind::Cold => "cold",
		DispatchKind::ColdAtRisk => "cold, at risk",
		DispatchKind::NotDispatched => "-",
	};
	format!(
		"{status} {:<width$}  {:<20}  {} attempt(s)  {:<13}  {detail}",
		report.client_id.as_str(),
		report.name,
		report.attempts,
		dispatch
	)
}

impl TextOutput for CheckData {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		writeln!(out, "{} {} ({} client(s))", "Clients from".bold(), self.source, self.clients.len())?;
		for (position, client) in self.clients.iter().enumerate() {
			write!(
				out,
				"  {:>2}. {}  {}  {} @ {}",
				position + 1,
				client.id,
				client.name,
				client.visa_type,
				client.application_center
			)?;
			if let Some(priority) = client.priority {
				write!(out, "  priority {priority}")?;
			}
			writeln!(out)?;
		}
		for warning in &self.warnings {
			writeln!(out, "  {} {warning}", "skipped".yellow())?;
		}
		if let Some(flow) = &self.flow {
			writeln!(out, "{} {flow}", "Flow OK:".green())?;
		}
		Ok(())
	}
}
