use std::path::Path;

use booker::ClientQueue;
use booker::queue::ClientDataSource;
use booker_runtime::{CsvClientSource, FlowPortal};
use tracing::info;

use crate::cli::CheckArgs;
use crate::config::Settings;
use crate::error::Result;
use crate::output::{CheckData, ClientLine, DiagnosticLevel, OutputFormat, ResultBuilder, print_result};

pub fn execute(args: CheckArgs, config: Option<&Path>, format: OutputFormat) -> Result<()> {
	let builder = ResultBuilder::new("check");
	let settings = Settings::load(config)?.merge_check(&args);

	let source = CsvClientSource::new(settings.csv_path());
	let queue = ClientQueue::load(&source, settings.max_clients())?;
	let flow = match settings.flow.as_deref() {
		Some(path) => Some(FlowPortal::load(path)?.flow().display_name().to_string()),
		None => None,
	};
	info!(target = "booker.cli", clients = queue.len(), warnings = queue.warnings().len(), "client file checked");

	let data = CheckData {
		source: source.describe(),
		clients: queue
			.clients()
			.iter()
			.map(|client| ClientLine {
				id: client.id.to_string(),
				name: client.display_name(),
				visa_type: client.category.visa_type.clone(),
				application_center: client.category.application_center.clone(),
				priority: client.priority,
			})
			.collect(),
		warnings: queue.warnings().iter().map(ToString::to_string).collect(),
		flow,
	};

	let mut builder = builder.data(data);
	if queue.is_empty() {
		builder = builder.diagnostic(DiagnosticLevel::Warning, "no valid clients");
	}
	print_result(&builder.build(), format);
	Ok(())
}
