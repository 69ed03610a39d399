//! Ferry Core
//!
//! Bookkeeping shared by every engine instance:
//! - Native handles and the managed proxies that stand in for them
//! - Deferred reclamation of handles once their proxies are unreachable
//! - The engine boundary the promise bridge drives
//! - Script-thread affinity checks and settings

pub mod engine;
pub mod error;
pub mod handle;
pub mod registry;
pub mod settings;
pub mod sweep;
pub mod thread;

pub use engine::{NativeRelease, ScriptEngine};
pub use error::EngineError;
pub use handle::{NativeHandle, Proxy, RecordId};
pub use registry::HandleRegistry;
pub use settings::{
    ExecutorSettings, ReclamationSettings, Settings, SettingsError, WorkerPanicPolicy,
};
pub use sweep::{ReachabilityProbe, ReclamationSweeper, SweepStats};
pub use thread::ScriptThread;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
