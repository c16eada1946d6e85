//! Compiled template functions.
//!
//! A [`Template`] is the server-side form: calling it supplies the escape
//! routine, an `include` callback and the rethrow routine. A
//! [`ClientFunction`] carries those routines in its own source and can be
//! shipped to any ECMAScript host.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::compiler::Synthesized;
use crate::engine::EngineInner;
use crate::error::RenderError;
use crate::loader;
use crate::options::Options;
use crate::runtime::{self, Frame, IncludeScope, Runtime, ScriptFunction};

pub type Locals = serde_json::Value;

/// A compile result, as stored in the cache
#[derive(Clone)]
pub enum Compiled {
    Template(Arc<Template>),
    Client(Arc<ClientFunction>),
}

impl Compiled {
    /// Render with the receiver chosen at compile time
    pub fn render(&self, locals: &Locals) -> Result<String, RenderError> {
        match self {
            Compiled::Template(t) => t.render(locals),
            Compiled::Client(c) => c.call(locals),
        }
    }

    /// Render with an explicit `this`
    pub fn call(&self, locals: &Locals, this: Option<&Locals>) -> Result<String, RenderError> {
        match self {
            Compiled::Template(t) => t.call(locals, this),
            Compiled::Client(c) => c.call_with(locals, this),
        }
    }

    /// Generated function body
    pub fn body(&self) -> &str {
        match self {
            Compiled::Template(t) => &t.body,
            Compiled::Client(c) => &c.body,
        }
    }

    pub fn as_client(&self) -> Option<&ClientFunction> {
        match self {
            Compiled::Client(c) => Some(c),
            Compiled::Template(_) => None,
        }
    }
}

impl fmt::Debug for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compiled::Template(t) => f
                .debug_struct("Template")
                .field("filename", &t.options.filename)
                .finish_non_exhaustive(),
            Compiled::Client(c) => f
                .debug_struct("ClientFunction")
                .field("filename", &c.filename)
                .finish_non_exhaustive(),
        }
    }
}

/// Server-side template function
pub struct Template {
    function: Arc<ScriptFunction>,
    body: String,
    options: Options,
    runtime: Runtime,
    engine: Weak<EngineInner>,
}

impl Template {
    pub(crate) fn new(synthesized: Synthesized, options: Options, engine: Weak<EngineInner>) -> Self {
        Self {
            function: synthesized.function,
            body: synthesized.body,
            options,
            runtime: synthesized.runtime,
            engine,
        }
    }

    pub fn filename(&self) -> Option<&std::path::Path> {
        self.options.filename.as_deref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn function(&self) -> &ScriptFunction {
        &self.function
    }

    pub fn render(&self, locals: &Locals) -> Result<String, RenderError> {
        self.call(locals, self.options.receiver())
    }

    pub fn call(&self, locals: &Locals, this: Option<&Locals>) -> Result<String, RenderError> {
        let chain = self.options.filename.iter().map(|f| loader::normalize(f)).collect();
        self.runtime
            .call(&self.function, locals, this, Some(self.frame(chain)))
    }

    /// Helpers for one call, with `chain` the files being rendered
    pub(crate) fn frame(&self, chain: Vec<PathBuf>) -> Frame {
        Frame {
            escape: self.options.escape.clone(),
            include: IncludeScope {
                engine: self.engine.clone(),
                options: self.options.clone(),
                chain,
            },
        }
    }
}

/// Self-contained template function
pub struct ClientFunction {
    function: Arc<ScriptFunction>,
    body: String,
    filename: Option<PathBuf>,
    context: Option<Locals>,
    runtime: Runtime,
}

impl ClientFunction {
    pub(crate) fn new(synthesized: Synthesized, options: &Options) -> Self {
        Self {
            function: synthesized.function,
            body: synthesized.body,
            filename: options.filename.clone(),
            context: options.receiver().cloned(),
            runtime: synthesized.runtime,
        }
    }

    /// `function anonymous(locals, escape, include, rethrow) { ... }`
    pub fn source(&self) -> String {
        runtime::function_source(&self.body)
    }

    /// `module.exports = <source>;`
    pub fn module_source(&self) -> String {
        loader::module_source(&self.source())
    }

    /// Call with every helper left to the inlined defaults.
    /// `include` stays undefined.
    pub fn call(&self, locals: &Locals) -> Result<String, RenderError> {
        self.call_with(locals, self.context.as_ref())
    }

    pub fn call_with(&self, locals: &Locals, this: Option<&Locals>) -> Result<String, RenderError> {
        self.runtime.call(&self.function, locals, this, None)
    }
}
