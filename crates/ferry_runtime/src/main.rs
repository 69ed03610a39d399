//! Ferry Runtime
//!
//! Runs one script on the main thread. Host calls run on worker threads;
//! each worker unparks the main thread when it ends, and the main thread
//! pumps until no work is left.

mod bindings;

use anyhow::{Context as _, Result};
use clap::Parser;
use ferry_core::Settings;
use ferry_executor::{PumpReport, ScriptHost};
use ferry_script::{QuickJsEngine, QuickJsHost};
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Upper bound on a park, so workers that die without ending get reaped.
const REAP_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a script with host calls offloaded to worker threads")]
struct Cli {
    /// Script file to run
    script: PathBuf,

    /// JSON settings file
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("Ferry v{}", ferry_core::VERSION);

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let main_thread = thread::current();
    let engine = QuickJsEngine::new().context("failed to start script engine")?;
    let host = Rc::new(
        ScriptHost::builder(engine)
            .settings(settings)
            .on_worker_end(move |_| main_thread.unpark())
            .build(),
    );
    bindings::install(&host).context("failed to install host bindings")?;

    host.engine()
        .execute_file(&cli.script)
        .with_context(|| format!("script {} failed", cli.script.display()))?;

    let report = run(&host);
    tracing::info!(
        settled = report.settled,
        fulfilled = report.fulfilled,
        rejected = report.rejected,
        build_failures = report.build_failures,
        engine_errors = report.engine_errors,
        "script finished"
    );
    for failure in &report.worker_failures {
        tracing::warn!(task = %failure.task, message = %failure.message, "task never settled");
    }
    if !report.notifier_failures.is_empty() {
        tracing::warn!(
            count = report.notifier_failures.len(),
            "end notifier panicked; the pump loop fell back to timed wake-ups"
        );
    }

    let stats = host.run_reclamation_sweep();
    tracing::debug!(
        released = stats.released,
        remaining = host.registry().tracked_count(),
        "swept"
    );
    Ok(())
}

/// Pump whenever a worker signals, until nothing is running or unsettled.
fn run(host: &QuickJsHost) -> PumpReport {
    let mut total = host.pump_default();
    while host.has_pending_work() {
        thread::park_timeout(REAP_INTERVAL);
        total.absorb(host.pump_default());
    }
    total
}
