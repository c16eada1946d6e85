//! Script runtime for template functions.
//!
//! Template code is ECMAScript, run by `boa_engine`. A `boa_engine::Context`
//! is `!Send + !Sync`, so every engine owns one dedicated runtime thread that
//! holds its `Context`; callers send commands over a channel and wait for the
//! reply. Runtime includes are the exception: they already execute on that
//! thread and render directly on the context their native callback is handed.
//!
//! Server templates receive three native functions:
//! - `escape`, which applies the engine-side [`Escaper`]
//! - `include`, which renders another file in place
//! - `rethrow`, which adds template line context to an error
//!
//! They find the state of the render in progress on a per-thread frame stack.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Weak};
use std::thread;

use boa_engine::object::builtins::JsFunction;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction, Source,
};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use crate::engine::EngineInner;
use crate::error::RenderError;
use crate::escape::Escaper;
use crate::options::Options;
use crate::rethrow;

/// Stack of the runtime thread; the script parser recurses per nesting level
const STACK_SIZE: usize = 32 * 1024 * 1024;

/// Pending commands before callers block
const QUEUE_DEPTH: usize = 16;

/// Evaluated functions kept per runtime thread, oldest dropped first
const FUNCTION_SLOTS: usize = 512;

const UNAVAILABLE: &str = "script runtime thread is not available";

/// Wraps the per-call `include` native so extra locals merge over the caller's
const INCLUDE_FACTORY: &str = r#"(function (render, locals) {
  return function include(name, extra) {
    return render(name, Object.assign({}, locals, extra));
  };
})"#;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static WORKER: RefCell<Worker> = RefCell::new(Worker::default());
    /// Identity of the runtime this thread serves, 0 elsewhere
    static OWNER: Cell<usize> = const { Cell::new(0) };
}

/// `function anonymous(locals, escape, include, rethrow) { <body> }`
pub fn function_source(body: &str) -> String {
    format!(
        "function anonymous(locals, escape, include, rethrow) {{\n{}}}",
        body
    )
}

/// A synthesized template function: its slot on the runtime thread and the
/// source it is rebuilt from after eviction
#[derive(Debug)]
pub struct ScriptFunction {
    id: u64,
    source: String,
}

impl ScriptFunction {
    fn new(body: &str) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            source: format!("({})", function_source(body)),
        }
    }
}

/// Engine-side state of one server template call
#[derive(Clone)]
pub(crate) struct Frame {
    pub escape: Escaper,
    pub include: IncludeScope,
}

/// What a runtime `include` resolves against
#[derive(Clone)]
pub(crate) struct IncludeScope {
    pub engine: Weak<EngineInner>,
    pub options: Options,
    /// Files currently being rendered, outermost first
    pub chain: Vec<PathBuf>,
}

struct Call {
    function: Arc<ScriptFunction>,
    locals: serde_json::Value,
    this: Option<serde_json::Value>,
    /// `None` for client functions: every helper is left undefined
    frame: Option<Frame>,
}

enum Command {
    Synthesize {
        function: Arc<ScriptFunction>,
        reply: mpsc::Sender<Result<(), String>>,
    },
    Call {
        call: Call,
        reply: mpsc::Sender<Result<String, RenderError>>,
    },
}

#[derive(Default)]
struct Worker {
    functions: IndexMap<u64, JsFunction>,
    frames: Vec<Frame>,
    include_factory: Option<JsFunction>,
}

/// Handle to a runtime thread, started on first use.
/// The thread stops once every handle is dropped.
#[derive(Clone, Default, Debug)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

#[derive(Default, Debug)]
struct RuntimeInner {
    commands: OnceCell<SyncSender<Command>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn on_own_thread(&self) -> bool {
        OWNER.with(Cell::get) == self.identity()
    }

    fn commands(&self) -> Result<&SyncSender<Command>, String> {
        let owner = self.identity();
        self.inner.commands.get_or_try_init(|| {
            let (command_tx, command_rx) = mpsc::sync_channel(QUEUE_DEPTH);
            thread::Builder::new()
                .name("ejs-runtime".to_string())
                .stack_size(STACK_SIZE)
                .spawn(move || runtime_thread_main(owner, command_rx))
                .map_err(|e| format!("could not start script runtime: {}", e))?;
            tracing::debug!("script runtime thread started");
            Ok(command_tx)
        })
    }

    /// Build the function for a body, failing with the script's syntax error
    pub fn synthesize(&self, body: &str) -> Result<Arc<ScriptFunction>, String> {
        let function = Arc::new(ScriptFunction::new(body));
        if self.on_own_thread() {
            // nested compile during a runtime include; the owning context is mid-call
            let mut context = Context::default();
            evaluate(&function.source, &mut context).map_err(|e| error_text(&e, &mut context))?;
            return Ok(function);
        }
        let (reply, response) = mpsc::channel();
        self.commands()?
            .send(Command::Synthesize {
                function: function.clone(),
                reply,
            })
            .map_err(|_| UNAVAILABLE.to_string())?;
        response.recv().map_err(|_| UNAVAILABLE.to_string())??;
        Ok(function)
    }

    /// Run a template function to its output string
    pub(crate) fn call(
        &self,
        function: &Arc<ScriptFunction>,
        locals: &serde_json::Value,
        this: Option<&serde_json::Value>,
        frame: Option<Frame>,
    ) -> Result<String, RenderError> {
        if self.on_own_thread() {
            return Err(RenderError::new(
                "Error",
                "a template cannot start a new render from inside a running template",
            ));
        }
        let unavailable = || RenderError::new("Error", UNAVAILABLE);
        let call = Call {
            function: function.clone(),
            locals: locals.clone(),
            this: this.cloned(),
            frame,
        };
        let (reply, response) = mpsc::channel();
        self.commands()
            .map_err(|e| RenderError::new("Error", e))?
            .send(Command::Call { call, reply })
            .map_err(|_| unavailable())?;
        response.recv().map_err(|_| unavailable())?
    }
}

/// Owns the `Context` and serves commands until every sender is gone
fn runtime_thread_main(owner: usize, command_rx: Receiver<Command>) {
    OWNER.with(|o| o.set(owner));
    let mut context = Context::default();

    while let Ok(command) = command_rx.recv() {
        match command {
            Command::Synthesize { function, reply } => {
                let result = function_for(&function, &mut context)
                    .map(|_| ())
                    .map_err(|e| error_text(&e, &mut context));
                let _ = reply.send(result);
            }
            Command::Call { call, reply } => {
                let result = run(&call, &mut context).map_err(|e| render_error(&e, &mut context));
                let _ = reply.send(result);
            }
        }
    }

    // script objects must go before the context does
    WORKER.with(|w| *w.borrow_mut() = Worker::default());
    tracing::debug!("script runtime thread stopped");
}

fn run(call: &Call, context: &mut Context) -> JsResult<String> {
    let locals = JsValue::from_json(&call.locals, context)?;
    let this = match &call.this {
        Some(this) => JsValue::from_json(this, context)?,
        None => JsValue::undefined(),
    };
    let out = invoke(&call.function, locals, this, call.frame.clone(), context)?;
    text(&out, context)
}

/// Evaluated function for `function`, from the slot table or rebuilt
fn function_for(function: &ScriptFunction, context: &mut Context) -> JsResult<JsFunction> {
    let cached = WORKER.with(|w| w.borrow().functions.get(&function.id).cloned());
    if let Some(f) = cached {
        return Ok(f);
    }
    let f = evaluate(&function.source, context)?;
    WORKER.with(|w| {
        let mut worker = w.borrow_mut();
        if worker.functions.len() >= FUNCTION_SLOTS {
            worker.functions.shift_remove_index(0);
        }
        worker.functions.insert(function.id, f.clone());
    });
    Ok(f)
}

/// Evaluate a parenthesized function expression
fn evaluate(source: &str, context: &mut Context) -> JsResult<JsFunction> {
    let value = context.eval(Source::from_bytes(source))?;
    value
        .as_object()
        .and_then(|object| JsFunction::from_object(object.clone()))
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message("template source did not evaluate to a function")
                .into()
        })
}

/// Call a template function; a frame supplies the native helpers
fn invoke(
    function: &ScriptFunction,
    locals: JsValue,
    this: JsValue,
    frame: Option<Frame>,
    context: &mut Context,
) -> JsResult<JsValue> {
    let f = function_for(function, context)?;
    let Some(frame) = frame else {
        let args = [locals, JsValue::undefined(), JsValue::undefined(), JsValue::undefined()];
        return f.call(&this, &args, context);
    };

    let escape = native(context, "escape", 1, escape_native);
    let rethrow = native(context, "rethrow", 4, rethrow::native);
    let include = include_for(&locals, context)?;

    WORKER.with(|w| w.borrow_mut().frames.push(frame));
    let result = f.call(&this, &[locals, escape, include, rethrow], context);
    WORKER.with(|w| w.borrow_mut().frames.pop());
    result
}

fn native(
    context: &mut Context,
    name: &str,
    length: usize,
    f: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>,
) -> JsValue {
    FunctionObjectBuilder::new(context.realm(), NativeFunction::from_fn_ptr(f))
        .name(JsString::from(name))
        .length(length)
        .build()
        .into()
}

fn include_for(locals: &JsValue, context: &mut Context) -> JsResult<JsValue> {
    let cached = WORKER.with(|w| w.borrow().include_factory.clone());
    let factory = match cached {
        Some(factory) => factory,
        None => {
            let factory = evaluate(INCLUDE_FACTORY, context)?;
            WORKER.with(|w| w.borrow_mut().include_factory = Some(factory.clone()));
            factory
        }
    };
    let render = native(context, "include", 2, include_native);
    factory.call(&JsValue::undefined(), &[render, locals.clone()], context)
}

fn current_frame() -> Option<Frame> {
    WORKER.with(|w| w.borrow().frames.last().cloned())
}

fn escape_native(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let value = args.first().cloned().unwrap_or_else(JsValue::undefined);
    if value.is_null_or_undefined() {
        return Ok(JsValue::from(js_string!()));
    }
    let raw = text(&value, context)?;
    let escaper = current_frame().map(|f| f.escape).unwrap_or_default();
    Ok(JsValue::from(JsString::from(escaper.escape(&raw).as_str())))
}

/// `include(name, locals)` with locals already merged by the factory wrapper
fn include_native(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let name = match args.first() {
        Some(name) => text(name, context)?,
        None => String::new(),
    };
    let locals = args.get(1).cloned().unwrap_or_else(JsValue::undefined);

    let scope = current_frame().map(|f| f.include);
    let engine = scope.as_ref().and_then(|s| s.engine.upgrade());
    let (Some(scope), Some(engine)) = (scope, engine) else {
        return Err(JsNativeError::error()
            .with_message("`include` is not available once the engine is dropped")
            .into());
    };

    let (template, chain) = engine
        .include(&scope, &name)
        .map_err(|err| JsError::from_native(JsNativeError::error().with_message(err.message)))?;
    let this = match template.options().receiver() {
        Some(this) => JsValue::from_json(this, context)?,
        None => JsValue::undefined(),
    };
    invoke(template.function(), locals, this, Some(template.frame(chain)), context)
}

fn text(value: &JsValue, context: &mut Context) -> JsResult<String> {
    Ok(value.to_string(context)?.to_std_string_escaped())
}

/// `Name: message` of an error, for compile diagnostics
fn error_text(error: &JsError, context: &mut Context) -> String {
    error
        .to_opaque(context)
        .to_string(context)
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|_| "unknown script error".to_string())
}

fn render_error(error: &JsError, context: &mut Context) -> RenderError {
    let value = error.to_opaque(context);
    describe(&value, context)
        .unwrap_or_else(|_| RenderError::new("Error", error_text(error, context)))
}

/// Read `{name, message, path, line}` off a thrown value.
/// Anything that is not an object becomes a plain `Error`.
fn describe(value: &JsValue, context: &mut Context) -> JsResult<RenderError> {
    let Some(object) = value.as_object() else {
        return Ok(RenderError::new("Error", text(value, context)?));
    };
    let name = match field(&object, js_string!("name"), context)? {
        Some(name) => text(&name, context)?,
        None => "Error".to_string(),
    };
    let message = match field(&object, js_string!("message"), context)? {
        Some(message) => text(&message, context)?,
        None => String::new(),
    };
    let path = match field(&object, js_string!("path"), context)? {
        Some(path) => Some(text(&path, context)?),
        None => None,
    };
    let line = field(&object, js_string!("line"), context)?
        .and_then(|line| line.as_number())
        .filter(|n| n.is_finite() && *n >= 1.0)
        .map(|n| n as usize);
    Ok(RenderError {
        name,
        message,
        path,
        line,
    })
}

fn field(object: &JsObject, key: JsString, context: &mut Context) -> JsResult<Option<JsValue>> {
    let value = object.get(key, context)?;
    Ok((!value.is_null_or_undefined()).then_some(value))
}
