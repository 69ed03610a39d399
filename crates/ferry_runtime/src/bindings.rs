//! The `host` object scripts see
//!
//! - `host.readFile(path)`: promise of the file's text, read on a worker
//! - `host.sleep(ms)`: promise that fulfils with `ms` after a worker slept
//! - `host.log(message)`: synchronous, goes to the `script` tracing target

use ferry_core::{EngineError, ScriptEngine};
use ferry_executor::Outcome;
use ferry_script::rquickjs::function::Func;
use ferry_script::rquickjs::{self, Ctx, Exception, Object, Promise};
use ferry_script::{offload, JsValue, QuickJsEngine, QuickJsHost};
use std::rc::{Rc, Weak};
use std::thread;
use std::time::Duration;

pub fn install(host: &Rc<QuickJsHost>) -> Result<(), EngineError> {
    let read_file = read_file_binding(Rc::downgrade(host));
    let sleep = sleep_binding(Rc::downgrade(host));

    host.engine().with(move |ctx| {
        let object = Object::new(ctx.clone())?;
        object.set("readFile", Func::from(read_file))?;
        object.set("sleep", Func::from(sleep))?;
        object.set(
            "log",
            Func::from(|message: String| {
                tracing::info!(target: "script", "{message}");
            }),
        )?;

        ctx.globals().set("host", object)?;
        Ok(())
    })
}

fn read_file_binding(
    host: Weak<QuickJsHost>,
) -> impl for<'js> Fn(Ctx<'js>, String) -> rquickjs::Result<Promise<'js>> {
    move |ctx, path| {
        let host = upgrade(&ctx, &host)?;
        offload(&ctx, &host, move || read_file(&path), text_or_error)
    }
}

fn sleep_binding(
    host: Weak<QuickJsHost>,
) -> impl for<'js> Fn(Ctx<'js>, f64) -> rquickjs::Result<Promise<'js>> {
    move |ctx, millis| {
        let host = upgrade(&ctx, &host)?;
        let millis = millis.max(0.0);
        offload(
            &ctx,
            &host,
            move || {
                thread::sleep(Duration::from_secs_f64(millis / 1000.0));
                Outcome::success(millis)
            },
            slept_for,
        )
    }
}

fn upgrade(ctx: &Ctx<'_>, host: &Weak<QuickJsHost>) -> rquickjs::Result<Rc<QuickJsHost>> {
    host.upgrade()
        .ok_or_else(|| Exception::throw_message(ctx, "script host has shut down"))
}

fn read_file(path: &str) -> Outcome<String> {
    Outcome::from_result(std::fs::read_to_string(path).map_err(|err| format!("{path}: {err}")))
}

fn slept_for(engine: &QuickJsEngine, outcome: Outcome<f64>) -> anyhow::Result<JsValue> {
    Ok(engine.json_value(&serde_json::json!(outcome.data()))?)
}

/// Fulfil with the text, or reject with an `Error` carrying it.
fn text_or_error(engine: &QuickJsEngine, outcome: Outcome<String>) -> anyhow::Result<JsValue> {
    if outcome.was_successful() {
        Ok(engine.string_value(outcome.data())?)
    } else {
        Ok(engine.error_value(outcome.data())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_executor::ScriptHost;
    use std::io::Write;

    fn host() -> Rc<QuickJsHost> {
        let host = Rc::new(ScriptHost::new(QuickJsEngine::new().unwrap()));
        install(&host).unwrap();
        host
    }

    #[test]
    fn read_file_fulfils_with_contents() {
        let host = host();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "line one\nline two").unwrap();
        let path = serde_json::to_string(file.path().to_str().unwrap()).unwrap();

        host.engine()
            .execute(&format!(
                "globalThis.text = null; host.readFile({path}).then(t => {{ text = t; }});"
            ))
            .unwrap();
        host.run_until_idle(Duration::from_millis(5));

        assert_eq!(host.engine().eval_json("text").unwrap(), "line one\nline two");
    }

    #[test]
    fn missing_file_rejects_with_an_error() {
        let host = host();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let path = serde_json::to_string(missing.to_str().unwrap()).unwrap();

        host.engine()
            .execute(&format!(
                "globalThis.failure = null;
                 host.readFile({path}).catch(e => {{ failure = e instanceof Error; }});"
            ))
            .unwrap();
        host.run_until_idle(Duration::from_millis(5));

        assert_eq!(host.engine().eval_json("failure").unwrap(), true);
    }

    #[test]
    fn sleep_fulfils_with_its_duration() {
        let host = host();
        host.engine()
            .execute(
                "globalThis.slept = [];
                 for (const ms of [3, 1]) host.sleep(ms).then(v => slept.push(v));",
            )
            .unwrap();
        let report = host.run_until_idle(Duration::from_millis(5));

        assert_eq!(report.fulfilled, 2);
        let mut slept: Vec<f64> =
            serde_json::from_value(host.engine().eval_json("slept").unwrap()).unwrap();
        slept.sort_by(f64::total_cmp);
        assert_eq!(slept, vec![1.0, 3.0]);
    }
}
