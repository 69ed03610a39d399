//! Promise bridge
//!
//! `pump` is the only place where worker results cross back into the engine.
//! It runs on the script thread, settles every task that ended since the
//! last call in the order they ended, and optionally drains the engine's job
//! queue so `.then` handlers run before it returns.

use crate::executor::{Resolution, Settlement, TaskExecutor};
use crate::task::{panic_message, FailureStage, TaskId, WorkerFailure};
use ferry_core::ScriptEngine;
use std::panic::{self, AssertUnwindSafe};

/// What one `pump` did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PumpReport {
    /// Promises the engine accepted a settlement for.
    pub settled: usize,
    /// Accepted fulfilments. A settlement the engine refused is not counted.
    pub fulfilled: usize,
    /// Accepted rejections, including those for failed builders and panics.
    pub rejected: usize,
    /// Result builders that failed or panicked. Their promises are rejected
    /// with a diagnostic error value.
    pub build_failures: usize,
    /// Work closures that panicked under the reject policy.
    pub worker_panics: usize,
    /// Settlements or jobs the engine reported an error for.
    pub engine_errors: usize,
    pub jobs_executed: usize,
    /// Workers whose work panic escaped. Their promises stay pending.
    pub worker_failures: Vec<WorkerFailure>,
    /// Workers whose end notifier panicked. Their tasks had already ended,
    /// so their promises are settled as usual.
    pub notifier_failures: Vec<WorkerFailure>,
}

impl PumpReport {
    /// Fold a later report into this one.
    pub fn absorb(&mut self, other: PumpReport) {
        self.settled += other.settled;
        self.fulfilled += other.fulfilled;
        self.rejected += other.rejected;
        self.build_failures += other.build_failures;
        self.worker_panics += other.worker_panics;
        self.engine_errors += other.engine_errors;
        self.jobs_executed += other.jobs_executed;
        self.worker_failures.extend(other.worker_failures);
        self.notifier_failures.extend(other.notifier_failures);
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Settle every ended task, then drain engine jobs if asked to.
///
/// A failing result builder never aborts the drain: its promise is rejected
/// with an error value and the remaining tasks are still settled.
///
/// # Panics
///
/// When called off the script thread.
pub fn pump<E>(
    executor: &TaskExecutor<E>,
    engine: &E,
    run_pending_engine_jobs: bool,
) -> PumpReport
where
    E: ScriptEngine + 'static,
{
    executor.script_thread().assert_current("pump");
    let mut report = PumpReport::default();

    // Reap first: a notifier panic is only seen here, and the task it
    // belongs to is already on the ended list.
    for failure in executor.reap_workers() {
        match failure.stage {
            FailureStage::Work => {
                tracing::error!(
                    task = %failure.task,
                    message = %failure.message,
                    "worker thread panicked; promise left pending"
                );
                report.worker_failures.push(failure);
            }
            FailureStage::Notifier => {
                tracing::error!(
                    task = %failure.task,
                    message = %failure.message,
                    "end notifier panicked; task result still settles"
                );
                report.notifier_failures.push(failure);
            }
        }
    }

    for task in executor.take_ended() {
        let Some(settlement) = executor.take_settlement(task) else {
            tracing::warn!(task = %task, "ended task has no pending settlement");
            continue;
        };
        settle(engine, task, settlement, &mut report);
    }

    if run_pending_engine_jobs {
        let (executed, failed) = drain_engine_jobs(engine);
        report.jobs_executed = executed;
        report.engine_errors += failed;
    }

    if report.settled > 0 {
        tracing::debug!(
            settled = report.settled,
            fulfilled = report.fulfilled,
            rejected = report.rejected,
            jobs = report.jobs_executed,
            "pump finished"
        );
    }
    report
}

fn settle<E: ScriptEngine>(
    engine: &E,
    task: TaskId,
    settlement: Settlement<E>,
    report: &mut PumpReport,
) {
    let Settlement { promise, resolve } = settlement;
    let handle = promise.handle();

    let resolution = panic::catch_unwind(AssertUnwindSafe(|| resolve(engine)))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            Resolution::BuildFailed(format!("result builder panicked: {message}"))
        });

    let (fulfilled, result) = match resolution {
        Resolution::Fulfill(value) => (true, engine.fulfill(handle, value)),
        Resolution::Reject(value) => (false, engine.reject(handle, value)),
        Resolution::BuildFailed(diagnostic) => {
            report.build_failures += 1;
            tracing::error!(task = %task, %diagnostic, "could not build task result; rejecting");
            let result = engine
                .error_value(&diagnostic)
                .and_then(|value| engine.reject(handle, value));
            (false, result)
        }
        Resolution::WorkerPanicked(diagnostic) => {
            report.worker_panics += 1;
            let result = engine
                .error_value(&diagnostic)
                .and_then(|value| engine.reject(handle, value));
            (false, result)
        }
    };

    match result {
        Ok(()) => {
            report.settled += 1;
            if fulfilled {
                report.fulfilled += 1;
            } else {
                report.rejected += 1;
            }
            tracing::trace!(task = %task, promise = %handle, "settled promise");
        }
        Err(err) => {
            report.engine_errors += 1;
            tracing::error!(
                task = %task,
                promise = %handle,
                error = %err,
                "engine refused settlement"
            );
        }
    }
}

/// Run engine jobs until the queue is empty. Returns `(executed, failed)`.
///
/// A job that throws still counts as executed; the drain carries on.
pub fn drain_engine_jobs<E: ScriptEngine + ?Sized>(engine: &E) -> (usize, usize) {
    let mut executed = 0;
    let mut failed = 0;
    while engine.has_pending_job() {
        match engine.execute_pending_job() {
            Ok(true) => executed += 1,
            Ok(false) => break,
            Err(err) => {
                executed += 1;
                failed += 1;
                tracing::warn!(error = %err, "pending engine job failed");
            }
        }
    }
    (executed, failed)
}
