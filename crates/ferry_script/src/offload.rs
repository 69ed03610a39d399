//! Starting tasks from functions that scripts call

use crate::engine::{JsValue, QuickJsEngine};
use ferry_executor::{Outcome, ScriptHost};
use rquickjs::{Ctx, Exception, Promise};

pub type QuickJsHost = ScriptHost<QuickJsEngine>;

/// Run `work` on a worker thread and return a promise to the calling script.
///
/// Meant for the body of a native function: the promise is created on `ctx`
/// and adopted by the host, so nothing re-enters the running context. The
/// promise settles on a later `pump`.
pub fn offload<'js, P, W, B>(
    ctx: &Ctx<'js>,
    host: &QuickJsHost,
    work: W,
    build: B,
) -> rquickjs::Result<Promise<'js>>
where
    P: Send + 'static,
    W: FnOnce() -> Outcome<P> + Send + 'static,
    B: FnOnce(&QuickJsEngine, Outcome<P>) -> anyhow::Result<JsValue> + 'static,
{
    let (handle, promise) = host.engine().new_promise(ctx)?;
    let proxy = host.register(handle, true);
    host.submit_with_promise(proxy, work, build)
        .map_err(|err| Exception::throw_message(ctx, &err.to_string()))?;
    Ok(promise)
}
