//! Task executor
//!
//! Each submitted task runs its work closure on a dedicated worker thread.
//! When the closure returns, the worker stages the outcome, moves the task
//! from the active set to the ended list and calls the end notifier. Nothing
//! touches the engine off the script thread; settling is left to
//! [`crate::bridge::pump`].

use crate::task::{
    panic_message, FailureStage, Outcome, OutcomeSlot, Staged, TaskHandle, TaskId, WorkerFailure,
};
use ferry_core::{
    EngineError, ExecutorSettings, Proxy, ScriptEngine, ScriptThread, WorkerPanicPolicy,
};
use parking_lot::{Condvar, Mutex};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Called on the worker thread after its task has moved to the ended list.
///
/// This is how an embedder learns that it should schedule a `pump` on the
/// script thread. It must not touch the engine.
pub type WorkerEndNotifier = Arc<dyn Fn(TaskId) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to spawn worker for task {task}: {source}")]
    Spawn {
        task: TaskId,
        #[source]
        source: std::io::Error,
    },
}

/// State shared with the workers.
struct Shared {
    active: Mutex<HashSet<TaskId>>,
    ended: Mutex<Vec<TaskId>>,
    ended_signal: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
            ended: Mutex::new(Vec::new()),
            ended_signal: Condvar::new(),
        }
    }

    /// Move `task` from active to ended.
    ///
    /// The ended push comes first: a reader that checks active and then
    /// ended can never miss the task in between.
    fn finish(&self, task: TaskId) {
        self.ended.lock().push(task);
        self.active.lock().remove(&task);
        self.ended_signal.notify_all();
    }
}

/// How the script thread settles a task's promise.
pub(crate) enum Resolution<V> {
    Fulfill(V),
    Reject(V),
    BuildFailed(String),
    WorkerPanicked(String),
}

pub(crate) type Resolve<E> =
    Box<dyn FnOnce(&E) -> Resolution<<E as ScriptEngine>::Value>>;

/// Script-side half of a task. Never leaves the script thread.
pub(crate) struct Settlement<E: ScriptEngine> {
    pub(crate) promise: Proxy,
    pub(crate) resolve: Resolve<E>,
}

pub struct TaskExecutor<E: ScriptEngine> {
    script_thread: ScriptThread,
    settings: ExecutorSettings,
    notifier: Option<WorkerEndNotifier>,
    shared: Arc<Shared>,
    pending: RefCell<HashMap<TaskId, Settlement<E>>>,
    workers: RefCell<Vec<(TaskId, JoinHandle<()>)>>,
    next_task: Cell<u64>,
}

impl<E: ScriptEngine + 'static> TaskExecutor<E> {
    pub fn new(
        script_thread: ScriptThread,
        settings: ExecutorSettings,
        notifier: Option<WorkerEndNotifier>,
    ) -> Self {
        Self {
            script_thread,
            settings,
            notifier,
            shared: Arc::new(Shared::new()),
            pending: RefCell::new(HashMap::new()),
            workers: RefCell::new(Vec::new()),
            next_task: Cell::new(1),
        }
    }

    pub fn script_thread(&self) -> &ScriptThread {
        &self.script_thread
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Start `work` on a fresh worker thread.
    ///
    /// `promise` is settled by the next `pump` after the work finishes:
    /// `build` turns the outcome into a script value, then the promise is
    /// fulfilled or rejected according to the outcome's success flag.
    ///
    /// # Panics
    ///
    /// When called off the script thread.
    pub fn submit<P, W, B>(
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
        self.script_thread.assert_current("submit");

        let id = TaskId::new(self.next_task.get());
        self.next_task.set(id.index() + 1);

        let slot: OutcomeSlot<P> = Arc::new(Mutex::new(None));
        let resolve = resolver(id, Arc::clone(&slot), build);
        self.pending.borrow_mut().insert(
            id,
            Settlement {
                promise: promise.clone(),
                resolve,
            },
        );
        // Active before the thread exists, so `has_pending_work` is already
        // true when `submit` returns.
        self.shared.active.lock().insert(id);

        let shared = Arc::clone(&self.shared);
        let notifier = self.notifier.clone();
        let policy = self.settings.on_worker_panic;

        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.settings.worker_name_prefix, id));
        if let Some(stack_size) = self.settings.worker_stack_size {
            builder = builder.stack_size(stack_size);
        }

        match builder.spawn(move || run_worker(id, work, slot, &shared, notifier, policy)) {
            Ok(join) => self.workers.borrow_mut().push((id, join)),
            Err(source) => {
                self.shared.active.lock().remove(&id);
                self.pending.borrow_mut().remove(&id);
                tracing::error!(task = %id, error = %source, "failed to spawn worker thread");
                return Err(ExecutorError::Spawn { task: id, source });
            }
        }

        tracing::debug!(task = %id, promise = %promise.handle(), "submitted task");
        Ok(TaskHandle::new(id, promise))
    }

    /// True while any task is running or waiting to be settled.
    ///
    /// Reads only the lock-guarded active and ended sets, never the
    /// script-side bookkeeping.
    pub fn has_pending_work(&self) -> bool {
        // Active before ended; see `Shared::finish`.
        let running = !self.shared.active.lock().is_empty();
        running || !self.shared.ended.lock().is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.lock().len()
    }

    pub fn ended_count(&self) -> usize {
        self.shared.ended.lock().len()
    }

    /// Tasks submitted but not yet settled.
    pub fn unsettled_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Block until at least one task has ended or `timeout` passes.
    ///
    /// Returns `true` if the ended list is non-empty. Returns at once when
    /// nothing is running.
    pub fn wait_for_ended(&self, timeout: Duration) -> bool {
        let mut ended = self.shared.ended.lock();
        if ended.is_empty() && !self.shared.active.lock().is_empty() {
            self.shared.ended_signal.wait_for(&mut ended, timeout);
        }
        !ended.is_empty()
    }

    /// Swap out the ended list, in the order the tasks finished.
    pub(crate) fn take_ended(&self) -> Vec<TaskId> {
        std::mem::take(&mut *self.shared.ended.lock())
    }

    pub(crate) fn take_settlement(&self, task: TaskId) -> Option<Settlement<E>> {
        self.pending.borrow_mut().remove(&task)
    }

    /// Join worker threads that have exited.
    ///
    /// A worker whose work panic escaped never reaches the ended list. Its
    /// task leaves the active set here and its promise is dropped unsettled.
    /// A worker that panicked in the end notifier had already ended: its
    /// settlement is kept and the next `pump` settles it.
    pub fn reap_workers(&self) -> Vec<WorkerFailure> {
        let finished: Vec<_> = {
            let mut workers = self.workers.borrow_mut();
            let (finished, running): (Vec<_>, Vec<_>) = workers
                .drain(..)
                .partition(|(_, join)| join.is_finished());
            *workers = running;
            finished
        };

        let mut failures = Vec::new();
        for (task, join) in finished {
            let Err(payload) = join.join() else {
                continue;
            };
            let never_ended = self.shared.active.lock().remove(&task);
            let stage = if never_ended {
                self.pending.borrow_mut().remove(&task);
                FailureStage::Work
            } else {
                FailureStage::Notifier
            };
            failures.push(WorkerFailure {
                task,
                stage,
                message: panic_message(payload.as_ref()),
            });
        }
        failures
    }

    /// Forget every unsettled task. Their promises stay pending.
    pub(crate) fn discard_pending(&self) -> usize {
        let mut pending = self.pending.borrow_mut();
        let count = pending.len();
        pending.clear();
        count
    }
}

/// Script-thread closure that reads the staged outcome and builds the value.
fn resolver<E, P, B>(task: TaskId, slot: OutcomeSlot<P>, build: B) -> Resolve<E>
where
    E: ScriptEngine + 'static,
    P: 'static,
    B: FnOnce(&E, Outcome<P>) -> anyhow::Result<E::Value> + 'static,
{
    Box::new(move |engine: &E| {
        let staged = slot.lock().take();
        match staged {
            Some(Staged::Finished(outcome)) => {
                let successful = outcome.was_successful();
                match build(engine, outcome) {
                    Ok(value) if successful => Resolution::Fulfill(value),
                    Ok(value) => Resolution::Reject(value),
                    Err(err) => {
                        Resolution::BuildFailed(format!("result builder failed: {err:#}"))
                    }
                }
            }
            Some(Staged::Panicked(message)) => {
                Resolution::WorkerPanicked(format!("worker panicked: {message}"))
            }
            None => Resolution::BuildFailed(format!("task {task} ended without an outcome")),
        }
    })
}

fn run_worker<P, W>(
    task: TaskId,
    work: W,
    slot: OutcomeSlot<P>,
    shared: &Shared,
    notifier: Option<WorkerEndNotifier>,
    policy: WorkerPanicPolicy,
) where
    W: FnOnce() -> Outcome<P>,
{
    tracing::trace!(task = %task, "worker started");
    let staged = match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(outcome) => Staged::Finished(outcome),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            match policy {
                WorkerPanicPolicy::Reject => {
                    tracing::error!(task = %task, %message, "work panicked; rejecting its promise");
                    Staged::Panicked(message)
                }
                WorkerPanicPolicy::Propagate => {
                    tracing::error!(
                        task = %task,
                        %message,
                        "work panicked; its promise stays pending"
                    );
                    panic::resume_unwind(payload);
                }
            }
        }
    };

    *slot.lock() = Some(staged);
    shared.finish(task);
    tracing::trace!(task = %task, "worker ended");

    if let Some(notify) = notifier {
        notify(task);
    }
}
