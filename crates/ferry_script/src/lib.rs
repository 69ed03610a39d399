//! Ferry Scripting
//!
//! QuickJS behind the engine boundary. Promises created here, or adopted
//! from running script code, are addressed by native handle so the bridge
//! can settle them and the sweeper can release them.
//!
//! ## Re-entrancy
//!
//! Every engine method enters the context on its own. None of them may be
//! called while script code is running; functions exposed to scripts use
//! [`offload`] instead, which only touches the `Ctx` they were handed.

pub mod engine;
pub mod error;
pub mod offload;

pub use engine::{JsValue, QuickJsEngine};
pub use error::ScriptError;
pub use offload::{offload, QuickJsHost};

pub use rquickjs;
