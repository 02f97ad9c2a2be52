use std::io::{self, Write};
use std::time::Instant;

use serde::Serialize;

use crate::output::format::OutputFormat;
use crate::output::model::{Artifact, ArtifactType, CommandError, CommandResult, Diagnostic, DiagnosticLevel, ErrorCode, SCHEMA_VERSION};
use crate::output::text::TextOutput;

/// Builder for constructing command results.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
	duration_ms: Option<u64>,
	artifacts: Vec<Artifact>,
	diagnostics: Vec<Diagnostic>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
			duration_ms: None,
			artifacts: Vec::new(),
			diagnostics: Vec::new(),
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
		});
		self
	}

	pub fn artifact(mut self, artifact_type: ArtifactType, path: impl Into<std::path::PathBuf>) -> Self {
		self.artifacts.push(Artifact {
			artifact_type,
			path: path.into(),
		});
		self
	}

	pub fn diagnostic(mut self, level: DiagnosticLevel, message: impl Into<String>) -> Self {
		self.diagnostics.push(Diagnostic {
			level,
			message: message.into(),
		});
		self
	}

	pub fn duration_ms(mut self, duration_ms: u64) -> Self {
		self.duration_ms = Some(duration_ms);
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		let duration_ms = self.duration_ms.unwrap_or_else(|| self.start_time.elapsed().as_millis() as u64);

		CommandResult {
			schema_version: SCHEMA_VERSION,
			ok,
			command: self.command,
			data: self.data,
			error: self.error,
			duration_ms: Some(duration_ms),
			artifacts: self.artifacts,
			diagnostics: self.diagnostics,
		}
	}
}

/// Print a command result to stdout in the specified format.
pub fn print_result<T: Serialize + TextOutput>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Ndjson => {
			if let Ok(json) = serde_json::to_string(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => {
			let mut stdout = io::stdout().lock();
			let _ = print_result_text(result, &mut stdout);
		}
	}
}

fn print_result_text<T: Serialize + TextOutput>(result: &CommandResult<T>, out: &mut dyn Write) -> io::Result<()> {
	if let Some(ref data) = result.data {
		data.write_text(out)?;
	}
	if let Some(ref error) = result.error {
		writeln!(out, "Error [{}]: {}", error.code, error.message)?;
	}

	for diag in &result.diagnostics {
		let prefix = match diag.level {
			DiagnosticLevel::Info => "info",
			DiagnosticLevel::Warning => "warning",
			DiagnosticLevel::Error => "error",
		};
		writeln!(out, "[{prefix}] {}", diag.message)?;
	}

	for artifact in &result.artifacts {
		writeln!(out, "Saved {:?}: {}", artifact.artifact_type, artifact.path.display())?;
	}

	if let Some(duration_ms) = result.duration_ms {
		writeln!(out, "Completed in {duration_ms}ms")?;
	}
	Ok(())
}

/// Print a failed command. Text goes to stderr, JSON envelopes to stdout.
pub fn print_failure(command: &str, code: ErrorCode, message: &str, format: OutputFormat) {
	match format {
		OutputFormat::Text => eprintln!("Error [{code}]: {message}"),
		_ => {
			let result: CommandResult<()> = ResultBuilder::new(command).error(code, message).build();
			print_result(&result, format);
		}
	}
}
