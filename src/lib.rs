//! Embedded templates: `<% %>` tags compiled into render functions.
//!
//! A template is scanned into an instruction list ([`ast::Program`]), the
//! list is emitted as ECMAScript program text, and the text is synthesized
//! into a function taking `(locals, escape, include, rethrow)` on the
//! engine's script [`runtime`]. [`Engine`] ties this together with a file reader and a cache;
//! the free functions below use a process-wide default engine.
//!
//! ```
//! use serde_json::json;
//!
//! let out = ejs::render("<p><%= user.name %></p>", &json!({"user": {"name": "<Ann>"}}), &ejs::Options::default())
//!     .unwrap();
//! assert_eq!(out, "<p>&lt;Ann&gt;</p>");
//! ```

pub mod ast;
pub mod cache;
pub mod compiler;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod escape;
pub mod loader;
pub mod options;
pub mod parser;
pub mod rethrow;
pub mod runtime;
pub mod template;

use std::path::Path;

use once_cell::sync::Lazy;

pub use cache::{MemoryCache, TemplateCache};
pub use engine::{Engine, EngineBuilder, WarnPolicy};
pub use error::{CompileError, Error, ParseError, RenderError};
pub use escape::Escaper;
pub use loader::{FileReader, FsReader, MemoryReader};
pub use options::Options;
pub use template::{ClientFunction, Compiled, Locals, Template};

static DEFAULT_ENGINE: Lazy<Engine> = Lazy::new(Engine::new);

/// The engine behind the free functions
pub fn default_engine() -> &'static Engine {
    &DEFAULT_ENGINE
}

pub fn compile(source: &str, options: &Options) -> Result<Compiled, Error> {
    DEFAULT_ENGINE.compile(source, options)
}

pub fn render(source: &str, locals: &Locals, options: &Options) -> Result<String, Error> {
    DEFAULT_ENGINE.render(source, locals, options)
}

pub fn render_file(path: impl AsRef<Path>, locals: &Locals, options: &Options) -> Result<String, Error> {
    DEFAULT_ENGINE.render_file(path, locals, options)
}

pub fn clear_cache() {
    DEFAULT_ENGINE.clear_cache()
}
