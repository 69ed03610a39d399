//! Engine boundary
//!
//! The script engine itself is an external collaborator. These traits are
//! everything the bridge and the reclamation layer need from it. All methods
//! are called on the script thread only.

use crate::error::EngineError;
use crate::handle::NativeHandle;

/// Single release entry point for native handles.
pub trait NativeRelease {
    /// Called once per handle, after no live proxy can observe it.
    fn release_native_handle(&self, handle: NativeHandle);
}

/// Promise and job-queue primitives of a single-threaded script engine.
pub trait ScriptEngine: NativeRelease {
    /// Script value produced by result builders.
    type Value;

    /// Create a pending promise and return the handle that identifies it.
    fn create_promise(&self) -> Result<NativeHandle, EngineError>;

    fn fulfill(&self, promise: NativeHandle, value: Self::Value) -> Result<(), EngineError>;

    fn reject(&self, promise: NativeHandle, value: Self::Value) -> Result<(), EngineError>;

    fn has_pending_job(&self) -> bool;

    /// Run one pending job. Returns `false` if the queue was empty.
    fn execute_pending_job(&self) -> Result<bool, EngineError>;

    /// Build the value a promise is rejected with when its result could not
    /// be constructed.
    fn error_value(&self, message: &str) -> Result<Self::Value, EngineError>;

    /// Ask the engine's collector for a reachability pass.
    fn collect_garbage(&self) {}
}
