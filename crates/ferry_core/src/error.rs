use crate::handle::NativeHandle;
use thiserror::Error;

/// Errors reported by a [`ScriptEngine`](crate::ScriptEngine) implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown native handle {0}")]
    UnknownHandle(NativeHandle),

    #[error("native handle {0} does not refer to a promise")]
    NotAPromise(NativeHandle),

    #[error("promise {0} was already settled")]
    AlreadySettled(NativeHandle),

    #[error("script exception: {0}")]
    Exception(String),

    #[error("engine failure: {0}")]
    Internal(String),
}
