//! Script-thread affinity
//!
//! The engine is single-threaded by contract. Operations that touch script
//! state check the caller against the designated thread and treat a mismatch
//! as a programming error.

use std::thread::{self, ThreadId};

#[derive(Debug, Clone)]
pub struct ScriptThread {
    id: ThreadId,
    name: Option<String>,
}

impl ScriptThread {
    /// Designate the calling thread.
    pub fn current() -> Self {
        let current = thread::current();
        Self {
            id: current.id(),
            name: current.name().map(str::to_owned),
        }
    }

    /// Designate another thread, e.g. a run loop the host is handed to.
    pub fn from_id(id: ThreadId) -> Self {
        Self { id, name: None }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Panic unless called on the script thread.
    #[track_caller]
    pub fn assert_current(&self, operation: &str) {
        if self.is_current() {
            return;
        }
        let caller = thread::current();
        tracing::error!(
            operation,
            script_thread = ?self.id,
            script_thread_name = self.name.as_deref().unwrap_or("<unnamed>"),
            caller = ?caller.id(),
            "script-thread operation called from another thread"
        );
        panic!(
            "`{operation}` must be called on the script thread ({:?}), called from {:?}",
            self.id,
            caller.id()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_thread_passes() {
        let script = ScriptThread::current();
        assert!(script.is_current());
        script.assert_current("test");
    }

    #[test]
    fn other_thread_fails() {
        let script = ScriptThread::current();
        let result = thread::spawn(move || {
            assert!(!script.is_current());
            script.assert_current("pump");
        })
        .join();
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "must be called on the script thread")]
    fn foreign_designation_fails_here() {
        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        ScriptThread::from_id(other).assert_current("submit");
    }
}
