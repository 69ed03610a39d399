//! QuickJS engine
//!
//! Script values that outlive a context entry are kept as `Persistent`
//! roots. Each promise the host creates or adopts lives in a slot keyed by
//! its native handle until the sweeper releases it.

use crate::error::ScriptError;
use ferry_core::{EngineError, NativeHandle, NativeRelease, ScriptEngine};
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Exception, Function, Persistent, Promise, Runtime, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;

/// A script value rooted outside any context entry.
pub type JsValue = Persistent<Value<'static>>;

enum Slot {
    Promise {
        promise: JsValue,
        resolve: Persistent<Function<'static>>,
        reject: Persistent<Function<'static>>,
        settled: bool,
    },
    Value(JsValue),
}

/// Single-threaded QuickJS instance.
pub struct QuickJsEngine {
    // Field order is drop order: roots go before the context and runtime.
    slots: RefCell<HashMap<NativeHandle, Slot>>,
    next_handle: Cell<u64>,
    context: Context,
    runtime: Runtime,
}

impl QuickJsEngine {
    pub fn new() -> Result<Self, EngineError> {
        let runtime = Runtime::new().map_err(|err| EngineError::Internal(err.to_string()))?;
        let context =
            Context::full(&runtime).map_err(|err| EngineError::Internal(err.to_string()))?;

        Ok(Self {
            slots: RefCell::new(HashMap::new()),
            next_handle: Cell::new(1),
            context,
            runtime,
        })
    }

    /// Enter the context. Thrown exceptions come back as
    /// [`EngineError::Exception`] with the script's message.
    pub fn with<F, R>(&self, f: F) -> Result<R, EngineError>
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<R>,
    {
        self.context.with(|ctx| f(&ctx).map_err(|err| script_error(&ctx, err)))
    }

    pub fn execute(&self, source: &str) -> Result<(), EngineError> {
        self.with(|ctx| ctx.eval::<(), _>(source))
    }

    pub fn execute_file(&self, path: &Path) -> Result<(), ScriptError> {
        let source = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = source.len(), "executing script");
        self.execute(&source)?;
        Ok(())
    }

    /// Call a global function by name.
    pub fn call_function(&self, name: &str, args: &[JsValue]) -> Result<JsValue, EngineError> {
        self.with(|ctx| {
            let func: Function = ctx.globals().get(name)?;
            let args = args
                .iter()
                .map(|arg| arg.clone().restore(ctx))
                .collect::<rquickjs::Result<Vec<_>>>()?;
            let result: Value = func.call((Rest(args),))?;
            Ok(Persistent::save(ctx, result))
        })
    }

    pub fn set_global(&self, name: &str, value: JsValue) -> Result<(), EngineError> {
        self.with(|ctx| ctx.globals().set(name, value.restore(ctx)?))
    }

    /// Evaluate an expression and read it back through `JSON.stringify`.
    pub fn eval_json(&self, source: &str) -> Result<serde_json::Value, ScriptError> {
        let text = self.with(|ctx| {
            let value: Value = ctx.eval(source)?;
            match ctx.json_stringify(value)? {
                Some(text) => text.to_string(),
                None => Ok("null".to_string()),
            }
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn string_value(&self, text: &str) -> Result<JsValue, EngineError> {
        self.with(|ctx| {
            let value = rquickjs::String::from_str(ctx.clone(), text)?.into_value();
            Ok(Persistent::save(ctx, value))
        })
    }

    pub fn json_value(&self, json: &serde_json::Value) -> Result<JsValue, EngineError> {
        let text = json.to_string();
        self.with(|ctx| {
            let value = ctx.json_parse(text)?;
            Ok(Persistent::save(ctx, value))
        })
    }

    /// The promise object behind `handle`.
    pub fn promise_value(&self, handle: NativeHandle) -> Result<JsValue, EngineError> {
        match self.slots.borrow().get(&handle) {
            Some(Slot::Promise { promise, .. }) => Ok(promise.clone()),
            Some(Slot::Value(_)) => Err(EngineError::NotAPromise(handle)),
            None => Err(EngineError::UnknownHandle(handle)),
        }
    }

    /// Root an arbitrary value under a fresh handle.
    pub fn store_value(&self, value: JsValue) -> NativeHandle {
        self.insert(Slot::Value(value))
    }

    pub fn value(&self, handle: NativeHandle) -> Result<JsValue, EngineError> {
        match self.slots.borrow().get(&handle) {
            Some(Slot::Promise { promise, .. }) => Ok(promise.clone()),
            Some(Slot::Value(value)) => Ok(value.clone()),
            None => Err(EngineError::UnknownHandle(handle)),
        }
    }

    /// Take ownership of a promise created by running script code.
    ///
    /// Only touches `ctx`, so it is safe inside a function called from a
    /// script.
    pub fn adopt_promise<'js>(
        &self,
        ctx: &Ctx<'js>,
        promise: Promise<'js>,
        resolve: Function<'js>,
        reject: Function<'js>,
    ) -> NativeHandle {
        self.insert(Slot::Promise {
            promise: Persistent::save(ctx, promise.into_value()),
            resolve: Persistent::save(ctx, resolve),
            reject: Persistent::save(ctx, reject),
            settled: false,
        })
    }

    /// Create and adopt a promise from inside a script call.
    pub fn new_promise<'js>(
        &self,
        ctx: &Ctx<'js>,
    ) -> rquickjs::Result<(NativeHandle, Promise<'js>)> {
        let (promise, resolve, reject) = Promise::new(ctx)?;
        let handle = self.adopt_promise(ctx, promise.clone(), resolve, reject);
        Ok((handle, promise))
    }

    /// Number of rooted slots, promises included.
    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }

    fn insert(&self, slot: Slot) -> NativeHandle {
        let handle = NativeHandle(self.next_handle.get());
        self.next_handle.set(handle.raw() + 1);
        self.slots.borrow_mut().insert(handle, slot);
        handle
    }

    /// Call the promise's resolving function. The slot counts as settled
    /// only once the call went through; a value from another runtime leaves
    /// the promise pending and settleable.
    fn settle(
        &self,
        handle: NativeHandle,
        value: JsValue,
        fulfil: bool,
    ) -> Result<(), EngineError> {
        let callback = match self.slots.borrow().get(&handle) {
            None => return Err(EngineError::UnknownHandle(handle)),
            Some(Slot::Value(_)) => return Err(EngineError::NotAPromise(handle)),
            Some(Slot::Promise { settled: true, .. }) => {
                return Err(EngineError::AlreadySettled(handle));
            }
            Some(Slot::Promise { resolve, reject, .. }) => {
                if fulfil {
                    resolve.clone()
                } else {
                    reject.clone()
                }
            }
        };

        self.with(|ctx| {
            let callback = callback.restore(ctx)?;
            callback.call::<_, ()>((value.restore(ctx)?,))
        })?;

        if let Some(Slot::Promise { settled, .. }) = self.slots.borrow_mut().get_mut(&handle) {
            *settled = true;
        }
        Ok(())
    }
}

impl NativeRelease for QuickJsEngine {
    fn release_native_handle(&self, handle: NativeHandle) {
        let slot = self.slots.borrow_mut().remove(&handle);
        match slot {
            Some(slot) => {
                tracing::trace!(handle = %handle, "dropped script root");
                drop(slot);
            }
            None => tracing::warn!(handle = %handle, "release of unknown native handle"),
        }
    }
}

impl ScriptEngine for QuickJsEngine {
    type Value = JsValue;

    fn create_promise(&self) -> Result<NativeHandle, EngineError> {
        let (promise, resolve, reject) = self.with(|ctx| {
            let (promise, resolve, reject) = Promise::new(ctx)?;
            Ok((
                Persistent::save(ctx, promise.into_value()),
                Persistent::save(ctx, resolve),
                Persistent::save(ctx, reject),
            ))
        })?;
        Ok(self.insert(Slot::Promise {
            promise,
            resolve,
            reject,
            settled: false,
        }))
    }

    fn fulfill(&self, promise: NativeHandle, value: JsValue) -> Result<(), EngineError> {
        self.settle(promise, value, true)
    }

    fn reject(&self, promise: NativeHandle, value: JsValue) -> Result<(), EngineError> {
        self.settle(promise, value, false)
    }

    fn has_pending_job(&self) -> bool {
        self.runtime.is_job_pending()
    }

    fn execute_pending_job(&self) -> Result<bool, EngineError> {
        match self.runtime.execute_pending_job() {
            Ok(ran) => Ok(ran),
            Err(_) => {
                let message = self.context.with(|ctx| describe(&ctx.catch()));
                Err(EngineError::Exception(message))
            }
        }
    }

    fn error_value(&self, message: &str) -> Result<JsValue, EngineError> {
        self.with(|ctx| {
            let error = Exception::from_message(ctx.clone(), message)?;
            Ok(Persistent::save(ctx, error.into_value()))
        })
    }

    fn collect_garbage(&self) {
        self.runtime.run_gc();
    }
}

fn script_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> EngineError {
    if err.is_exception() {
        EngineError::Exception(describe(&ctx.catch()))
    } else {
        EngineError::Internal(err.to_string())
    }
}

/// Human-readable form of a thrown value.
fn describe(value: &Value<'_>) -> String {
    if let Some(exception) = value.as_exception() {
        return exception.message().unwrap_or_else(|| "exception without message".to_string());
    }
    if let Some(text) = value.as_string().and_then(|text| text.to_string().ok()) {
        return text;
    }
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_released_once() {
        let engine = QuickJsEngine::new().unwrap();
        let handle = engine.create_promise().unwrap();
        assert_eq!(engine.slot_count(), 1);

        engine.release_native_handle(handle);
        assert_eq!(engine.slot_count(), 0);
        assert!(matches!(
            engine.promise_value(handle),
            Err(EngineError::UnknownHandle(_))
        ));
    }

    #[test]
    fn promise_settles_only_once() {
        let engine = QuickJsEngine::new().unwrap();
        let handle = engine.create_promise().unwrap();

        let value = engine.string_value("done").unwrap();
        engine.fulfill(handle, value.clone()).unwrap();
        assert!(matches!(
            engine.reject(handle, value),
            Err(EngineError::AlreadySettled(_))
        ));
    }

    #[test]
    fn stored_values_are_not_promises() {
        let engine = QuickJsEngine::new().unwrap();
        let value = engine.json_value(&serde_json::json!({ "a": 1 })).unwrap();
        let handle = engine.store_value(value);

        let value = engine.string_value("x").unwrap();
        assert!(matches!(
            engine.fulfill(handle, value),
            Err(EngineError::NotAPromise(_))
        ));
    }

    #[test]
    fn exceptions_carry_the_script_message() {
        let engine = QuickJsEngine::new().unwrap();
        match engine.execute("throw new Error('bad input')") {
            Err(EngineError::Exception(message)) => assert_eq!(message, "bad input"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn eval_json_round_trips_structures() {
        let engine = QuickJsEngine::new().unwrap();
        engine.execute("globalThis.answer = { items: [1, 2, 3], ok: true };").unwrap();
        assert_eq!(
            engine.eval_json("answer").unwrap(),
            serde_json::json!({ "items": [1, 2, 3], "ok": true })
        );
    }

    #[test]
    fn settled_promise_runs_reactions_as_jobs() {
        let engine = QuickJsEngine::new().unwrap();
        let handle = engine.create_promise().unwrap();
        engine.set_global("pending", engine.promise_value(handle).unwrap()).unwrap();
        engine.execute("globalThis.seen = null; pending.then(v => { seen = v; });").unwrap();

        engine.fulfill(handle, engine.string_value("hello").unwrap()).unwrap();
        assert!(engine.has_pending_job());
        assert_eq!(engine.eval_json("seen").unwrap(), serde_json::Value::Null);

        while engine.execute_pending_job().unwrap() {}
        assert_eq!(engine.eval_json("seen").unwrap(), "hello");
    }

    #[test]
    fn value_from_another_engine_leaves_the_promise_pending() {
        let engine = QuickJsEngine::new().unwrap();
        let other = QuickJsEngine::new().unwrap();
        let handle = engine.create_promise().unwrap();
        engine.set_global("pending", engine.promise_value(handle).unwrap()).unwrap();
        engine.execute("globalThis.seen = null; pending.then(v => { seen = v; });").unwrap();

        let foreign = other.string_value("elsewhere").unwrap();
        assert!(matches!(
            engine.fulfill(handle, foreign),
            Err(EngineError::Internal(_))
        ));

        engine.fulfill(handle, engine.string_value("here").unwrap()).unwrap();
        while engine.execute_pending_job().unwrap() {}
        assert_eq!(engine.eval_json("seen").unwrap(), "here");
    }

    #[test]
    fn call_function_passes_arguments() {
        let engine = QuickJsEngine::new().unwrap();
        engine.execute("function join(a, b) { return a + '-' + b; }").unwrap();
        let args = [engine.string_value("x").unwrap(), engine.string_value("y").unwrap()];
        let result = engine.call_function("join", &args).unwrap();
        engine.set_global("joined", result).unwrap();
        assert_eq!(engine.eval_json("joined").unwrap(), "x-y");
    }
}
