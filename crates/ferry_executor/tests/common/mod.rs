//! In-memory engine that records every promise transition.

#![allow(dead_code)]

use ferry_core::{EngineError, NativeHandle, NativeRelease, ScriptEngine};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled(String),
    Rejected(String),
}

#[derive(Default)]
pub struct Journal {
    next_handle: Cell<u64>,
    promises: RefCell<HashMap<NativeHandle, PromiseState>>,
    settle_order: RefCell<Vec<NativeHandle>>,
    released: RefCell<Vec<NativeHandle>>,
    queued_jobs: Cell<usize>,
    jobs_run: Cell<usize>,
    gc_passes: Cell<usize>,
}

/// Clones share one journal, so a test can keep looking after the host
/// took ownership of its engine.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    journal: Rc<Journal>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, promise: NativeHandle) -> Option<PromiseState> {
        self.journal.promises.borrow().get(&promise).cloned()
    }

    pub fn settle_order(&self) -> Vec<NativeHandle> {
        self.journal.settle_order.borrow().clone()
    }

    pub fn released(&self) -> Vec<NativeHandle> {
        self.journal.released.borrow().clone()
    }

    pub fn jobs_run(&self) -> usize {
        self.journal.jobs_run.get()
    }

    pub fn gc_passes(&self) -> usize {
        self.journal.gc_passes.get()
    }

    fn settle(&self, promise: NativeHandle, state: PromiseState) -> Result<(), EngineError> {
        let mut promises = self.journal.promises.borrow_mut();
        match promises.get_mut(&promise) {
            None => Err(EngineError::UnknownHandle(promise)),
            Some(current) if *current != PromiseState::Pending => {
                Err(EngineError::AlreadySettled(promise))
            }
            Some(current) => {
                *current = state;
                self.journal.settle_order.borrow_mut().push(promise);
                // One reaction job per settlement.
                self.journal.queued_jobs.set(self.journal.queued_jobs.get() + 1);
                Ok(())
            }
        }
    }
}

impl NativeRelease for RecordingEngine {
    fn release_native_handle(&self, handle: NativeHandle) {
        self.journal.released.borrow_mut().push(handle);
    }
}

impl ScriptEngine for RecordingEngine {
    type Value = String;

    fn create_promise(&self) -> Result<NativeHandle, EngineError> {
        let handle = NativeHandle(0x1000 + self.journal.next_handle.get());
        self.journal.next_handle.set(self.journal.next_handle.get() + 1);
        self.journal.promises.borrow_mut().insert(handle, PromiseState::Pending);
        Ok(handle)
    }

    fn fulfill(&self, promise: NativeHandle, value: String) -> Result<(), EngineError> {
        self.settle(promise, PromiseState::Fulfilled(value))
    }

    fn reject(&self, promise: NativeHandle, value: String) -> Result<(), EngineError> {
        self.settle(promise, PromiseState::Rejected(value))
    }

    fn has_pending_job(&self) -> bool {
        self.journal.queued_jobs.get() > 0
    }

    fn execute_pending_job(&self) -> Result<bool, EngineError> {
        let queued = self.journal.queued_jobs.get();
        if queued == 0 {
            return Ok(false);
        }
        self.journal.queued_jobs.set(queued - 1);
        self.journal.jobs_run.set(self.journal.jobs_run.get() + 1);
        Ok(true)
    }

    fn error_value(&self, message: &str) -> Result<String, EngineError> {
        Ok(format!("Error: {message}"))
    }

    fn collect_garbage(&self) {
        self.journal.gc_passes.set(self.journal.gc_passes.get() + 1);
    }
}
