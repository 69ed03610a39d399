//! Task records and their outcomes

use ferry_core::Proxy;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Identifier of a submitted task, unique per executor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(index: u64) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a work closure hands back: a success flag and an opaque payload.
///
/// The flag decides whether the promise is fulfilled or rejected; the payload
/// is turned into the script value by the task's result builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    successful: bool,
    data: T,
}

impl<T> Outcome<T> {
    pub fn success(data: T) -> Self {
        Self {
            successful: true,
            data,
        }
    }

    pub fn failure(data: T) -> Self {
        Self {
            successful: false,
            data,
        }
    }

    pub fn from_result(result: Result<T, T>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(data) => Self::failure(data),
        }
    }

    pub fn was_successful(&self) -> bool {
        self.successful
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

/// Returned by `submit`: the task id and the promise to give to script code.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    promise: Proxy,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, promise: Proxy) -> Self {
        Self { id, promise }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn promise(&self) -> &Proxy {
        &self.promise
    }

    pub fn into_promise(self) -> Proxy {
        self.promise
    }
}

/// Where a worker thread's escaped panic came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureStage {
    /// The work closure. The task never ended and its promise stays pending.
    Work,
    /// The end notifier. The outcome was already staged and still settles.
    Notifier,
}

/// A worker thread that panicked and let the panic reach its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub task: TaskId,
    pub stage: FailureStage,
    pub message: String,
}

/// What the worker leaves in the outcome slot.
pub(crate) enum Staged<P> {
    Finished(Outcome<P>),
    Panicked(String),
}

/// Written once by the worker, taken once by the script thread.
pub(crate) type OutcomeSlot<P> = Arc<Mutex<Option<Staged<P>>>>;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_result() {
        let ok = Outcome::from_result(Ok::<_, String>("body".to_string()));
        assert!(ok.was_successful());
        assert_eq!(ok.data(), "body");

        let err = Outcome::from_result(Err::<String, _>("404".to_string()));
        assert!(!err.was_successful());
        assert_eq!(err.into_data(), "404");
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
