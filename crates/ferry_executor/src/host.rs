//! Script host
//!
//! One engine instance with everything attached to it: the handle registry,
//! the reclamation sweeper and the task executor. Drop order releases the
//! bookkeeping before the engine.

use crate::bridge::{self, PumpReport};
use crate::executor::{ExecutorError, TaskExecutor, WorkerEndNotifier};
use crate::task::{Outcome, TaskHandle, TaskId};
use ferry_core::{
    HandleRegistry, NativeHandle, Proxy, ReclamationSweeper, ScriptEngine, ScriptThread, Settings,
    SweepStats,
};
use ferry_metrics::{Counter, SystemProfiler};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

/// Counter names recorded by [`ScriptHost`].
pub mod metric {
    pub const TASKS_SUBMITTED: &str = "tasks.submitted";
    pub const TASKS_SETTLED: &str = "tasks.settled";
    pub const TASKS_REJECTED: &str = "tasks.rejected";
    pub const BUILD_FAILURES: &str = "tasks.build_failures";
    pub const ENGINE_JOBS: &str = "engine.jobs";
    pub const HANDLES_RELEASED: &str = "handles.released";

    /// Timings recorded by the profiler.
    pub const PUMP: &str = "pump";
    pub const SWEEP: &str = "sweep";
}

pub struct ScriptHostBuilder<E: ScriptEngine + 'static> {
    engine: E,
    settings: Settings,
    script_thread: Option<ScriptThread>,
    notifier: Option<WorkerEndNotifier>,
}

impl<E: ScriptEngine + 'static> ScriptHostBuilder<E> {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Bind to a thread other than the one calling `build`.
    pub fn script_thread(mut self, script_thread: ScriptThread) -> Self {
        self.script_thread = Some(script_thread);
        self
    }

    /// Called on each worker thread once its task has ended.
    pub fn on_worker_end<F>(mut self, notify: F) -> Self
    where
        F: Fn(TaskId) + Send + Sync + 'static,
    {
        self.notifier = Some(Arc::new(notify));
        self
    }

    pub fn build(self) -> ScriptHost<E> {
        let script_thread = self.script_thread.unwrap_or_else(ScriptThread::current);
        tracing::info!(
            script_thread = ?script_thread.id(),
            probe = ?self.settings.reclamation.probe,
            on_worker_panic = ?self.settings.executor.on_worker_panic,
            "script host created"
        );
        ScriptHost {
            executor: TaskExecutor::new(
                script_thread,
                self.settings.executor.clone(),
                self.notifier,
            ),
            registry: HandleRegistry::new(),
            sweeper: ReclamationSweeper::new(self.settings.reclamation.probe),
            settings: self.settings,
            counters: RefCell::new(Counter::new()),
            profiler: RefCell::new(SystemProfiler::new()),
            engine: self.engine,
        }
    }
}

/// The engine-instance object.
pub struct ScriptHost<E: ScriptEngine + 'static> {
    executor: TaskExecutor<E>,
    registry: HandleRegistry,
    sweeper: ReclamationSweeper,
    settings: Settings,
    counters: RefCell<Counter>,
    profiler: RefCell<SystemProfiler>,
    // Last: everything above may still refer to engine state when dropped.
    engine: E,
}

impl<E: ScriptEngine + 'static> ScriptHost<E> {
    /// Host bound to the calling thread, with default settings.
    pub fn new(engine: E) -> Self {
        Self::builder(engine).build()
    }

    pub fn builder(engine: E) -> ScriptHostBuilder<E> {
        ScriptHostBuilder {
            engine,
            settings: Settings::default(),
            script_thread: None,
            notifier: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &TaskExecutor<E> {
        &self.executor
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn script_thread(&self) -> &ScriptThread {
        self.executor.script_thread()
    }

    /// Wrap a native handle in a proxy tracked by this host's registry.
    pub fn register(&self, handle: NativeHandle, is_heap_value: bool) -> Proxy {
        self.registry.register(handle, is_heap_value)
    }

    /// Create a promise and start `work` on a worker thread.
    ///
    /// # Panics
    ///
    /// When called off the script thread.
    pub fn submit<P, W, B>(&self, work: W, build: B) -> Result<TaskHandle, ExecutorError>
    where
        P: Send + 'static,
        W: FnOnce() -> Outcome<P> + Send + 'static,
        B: FnOnce(&E, Outcome<P>) -> anyhow::Result<E::Value> + 'static,
    {
        self.script_thread().assert_current("submit");
        let promise = self.engine.create_promise()?;
        let proxy = self.registry.register(promise, true);
        self.submit_with_promise(proxy, work, build)
    }

    /// Like [`Self::submit`] for a promise that already exists, e.g. one
    /// created by script code that is still running.
    pub fn submit_with_promise<P, W, B>(
        &self,
        promise: Proxy,
        work: W,
        build: B,
    ) -> Result<TaskHandle, ExecutorError>
    where
        P: Send + 'static,
        W: FnOnce() -> Outcome<P> + Send + 'static,
        B: FnOnce(&E, Outcome<P>) -> anyhow::Result<E::Value> + 'static,
    {
        let task = self.executor.submit(promise, work, build)?;
        self.counters.borrow_mut().increment(metric::TASKS_SUBMITTED, 1);
        Ok(task)
    }

    /// Settle ended tasks and optionally drain engine jobs.
    pub fn pump(&self, run_pending_engine_jobs: bool) -> PumpReport {
        let report = self.profiler.borrow_mut().time_system(metric::PUMP, || {
            bridge::pump(&self.executor, &self.engine, run_pending_engine_jobs)
        });

        {
            let mut counters = self.counters.borrow_mut();
            counters.increment(metric::TASKS_SETTLED, report.settled as u64);
            counters.increment(metric::TASKS_REJECTED, report.rejected as u64);
            counters.increment(metric::BUILD_FAILURES, report.build_failures as u64);
            counters.increment(metric::ENGINE_JOBS, report.jobs_executed as u64);
        }

        if self.settings.reclamation.sweep_after_pump {
            self.run_reclamation_sweep();
        }
        report
    }

    /// [`Self::pump`] with the configured job-drain setting.
    pub fn pump_default(&self) -> PumpReport {
        self.pump(self.settings.executor.drain_engine_jobs)
    }

    pub fn has_pending_work(&self) -> bool {
        self.executor.has_pending_work()
    }

    pub fn wait_for_ended(&self, timeout: Duration) -> bool {
        self.executor.wait_for_ended(timeout)
    }

    /// Pump until no task is running or waiting to be settled.
    ///
    /// Sleeps on the ended signal between pumps, waking at least every
    /// `poll` to reap workers that died without ending.
    pub fn run_until_idle(&self, poll: Duration) -> PumpReport {
        let mut total = self.pump_default();
        while self.has_pending_work() {
            self.wait_for_ended(poll);
            total.absorb(self.pump_default());
        }
        total
    }

    /// Release the native handles of proxies that are no longer reachable.
    ///
    /// # Panics
    ///
    /// When called off the script thread.
    pub fn run_reclamation_sweep(&self) -> SweepStats {
        self.script_thread().assert_current("run_reclamation_sweep");
        if self.settings.reclamation.collect_before_sweep {
            self.engine.collect_garbage();
        }
        let stats = self
            .profiler
            .borrow_mut()
            .time_system(metric::SWEEP, || self.sweeper.sweep(&self.registry, &self.engine));
        self.counters
            .borrow_mut()
            .increment(metric::HANDLES_RELEASED, stats.released as u64);
        stats
    }

    /// Counter value, zero when metrics are compiled out.
    pub fn metric(&self, name: &str) -> u64 {
        self.counters.borrow().get(name)
    }

    pub fn time_spent(&self, name: &str) -> Duration {
        self.profiler.borrow().get_timing(name)
    }
}

impl<E: ScriptEngine + 'static> Drop for ScriptHost<E> {
    fn drop(&mut self) {
        let abandoned = self.executor.discard_pending();
        if abandoned > 0 {
            tracing::warn!(abandoned, "script host dropped with unsettled tasks");
        }

        if !self.settings.reclamation.sweep_on_drop {
            return;
        }
        if !self.script_thread().is_current() {
            tracing::warn!("script host dropped off its script thread; skipping final sweep");
            return;
        }
        let stats = self.sweeper.sweep(&self.registry, &self.engine);
        tracing::debug!(
            released = stats.released,
            leaked = self.registry.tracked_count(),
            "final reclamation sweep"
        );
    }
}
