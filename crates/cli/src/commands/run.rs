use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use booker::report::ReporterSet;
use booker::sim::{SimDriver, SimPortal};
use booker::{BrowserDriver, ClientQueue, ConcurrencyScheduler, PortalAdapter, RunPlan};
use booker_runtime::{CsvClientSource, FlowPortal, ResultsFileReporter, RpcDriver};
use chrono::Local;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::config::Settings;
use crate::error::{CliError, Result};
use crate::output::{ArtifactType, DiagnosticLevel, OutputFormat, PlanView, ResultBuilder, RunData, print_result};

const DRY_RUN_PREPARE: Duration = Duration::from_millis(20);
const DRY_RUN_BOOK: Duration = Duration::from_millis(50);

pub async fn execute(args: RunArgs, config: Option<&Path>, format: OutputFormat) -> Result<()> {
	let builder = ResultBuilder::new("run");
	let settings = Settings::load(config)?.merge_run(&args);
	let plan = settings.plan(Local::now())?;

	let source = CsvClientSource::new(settings.csv_path());
	let queue = ClientQueue::load(&source, plan.max_clients)?;
	let (driver, portal) = collaborators(&settings, args.dry_run)?;

	let scheduler = ConcurrencyScheduler::new(plan.clone(), queue, driver, portal);
	let cancel = scheduler.cancel_token();
	let signal = tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!(target = "booker.cli", "interrupt received, cancelling run");
			cancel.cancel();
		}
	});

	let mut reporters = ReporterSet::new();
	let results = (!args.no_results).then(|| ResultsFileReporter::new(settings.results_dir()));
	if let Some(results) = &results {
		reporters.push(Box::new(results.clone()));
	}
	let summary = scheduler.run_reported(&reporters).await;
	signal.abort();

	let mut builder = builder.duration_ms(summary.elapsed_ms);
	if let Some(results) = &results {
		match results.written() {
			Some(path) => builder = builder.artifact(ArtifactType::Results, path),
			None => {
				let path = results.file_for(&summary);
				builder = builder.diagnostic(DiagnosticLevel::Warning, format!("results file {} was not written", path.display()));
			}
		}
	}
	for report in summary.clients.iter().filter(|report| report.at_risk()) {
		builder = builder.diagnostic(DiagnosticLevel::Warning, format!("{} was dispatched cold after warmup failed", report.client_id));
	}

	let data = RunData {
		plan: plan_view(&plan, args.dry_run),
		summary,
	};
	print_result(&builder.data(data).build(), format);
	Ok(())
}

type Collaborators = (Arc<dyn BrowserDriver>, Arc<dyn PortalAdapter>);

fn collaborators(settings: &Settings, dry_run: bool) -> Result<Collaborators> {
	if dry_run {
		info!(target = "booker.cli", "dry run: simulated driver and portal");
		return Ok((Arc::new(SimDriver::new()), Arc::new(SimPortal::new().with_delays(DRY_RUN_PREPARE, DRY_RUN_BOOK))));
	}
	let flow = settings.flow.as_deref().ok_or(CliError::MissingFlow)?;
	let portal = FlowPortal::load(flow)?;
	let driver = RpcDriver::connect(settings.driver_endpoint(), settings.driver_timeout())
		.with_context(|| format!("cannot set up driver client for {}", settings.driver_endpoint()))?;
	Ok((Arc::new(driver), Arc::new(portal)))
}

fn plan_view(plan: &RunPlan, dry_run: bool) -> PlanView {
	PlanView {
		mode: plan.mode.to_string(),
		target: plan.target,
		warmup: plan.warmup,
		headless: plan.headless,
		max_clients: plan.max_clients,
		max_attempts: plan.retry.max_attempts,
		dry_run,
	}
}
