//! Ferry Executor
//!
//! Runs blocking work off the script thread and settles the resulting
//! promises back on it.
//!
//! ## Architecture
//!
//! - **Task executor:** one worker thread per submitted task; outcomes are
//!   staged in an ended list guarded by its own lock
//! - **Promise bridge:** `pump` drains the ended list on the script thread,
//!   builds script values and fulfils or rejects each promise
//! - **Script host:** the engine-instance object that owns the engine, the
//!   handle registry, the sweeper and the executor
//!
//! ```ignore
//! let host = ScriptHost::new(engine);
//! let task = host.submit(
//!     || {
//!         let text = std::fs::read_to_string("data.txt").map_err(|e| e.to_string());
//!         Outcome::from_result(text)
//!     },
//!     |engine, outcome| Ok(engine.string_value(outcome.data())?),
//! )?;
//! // ... hand task.promise() to script code ...
//! host.run_until_idle(Duration::from_millis(10));
//! ```

pub mod bridge;
pub mod executor;
pub mod host;
pub mod task;

pub use bridge::PumpReport;
pub use executor::{ExecutorError, TaskExecutor, WorkerEndNotifier};
pub use host::{metric, ScriptHost, ScriptHostBuilder};
pub use task::{FailureStage, Outcome, TaskHandle, TaskId, WorkerFailure};
