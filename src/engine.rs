// Main Engine

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::cache::{MemoryCache, TemplateCache};
use crate::compiler::Compiler;
use crate::emitter::emit_body;
use crate::error::{Error, RenderError};
use crate::loader::{resolve_include, strip_bom, FileReader, FsReader, DEFAULT_EXTENSION};
use crate::options::Options;
use crate::parser::include;
use crate::runtime::IncludeScope;
use crate::template::{ClientFunction, Compiled, Locals, Template};

/// How often a deprecation warning is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarnPolicy {
    /// First occurrence per engine
    #[default]
    Once,
    Always,
    Silent,
}

#[derive(Debug, Default)]
struct Warnings {
    policy: WarnPolicy,
    scope_warned: AtomicBool,
    legacy_warned: AtomicBool,
    issued: AtomicUsize,
}

impl Warnings {
    fn should_warn(&self, flag: &AtomicBool) -> bool {
        let warn = match self.policy {
            WarnPolicy::Silent => false,
            WarnPolicy::Always => true,
            WarnPolicy::Once => !flag.swap(true, Ordering::Relaxed),
        };
        if warn {
            self.issued.fetch_add(1, Ordering::Relaxed);
        }
        warn
    }

    fn scope_option(&self) {
        if self.should_warn(&self.scope_warned) {
            tracing::warn!("`scope` option is deprecated and will be removed, use `context`");
        }
    }

    fn legacy_locals(&self, keys: &[&str]) {
        if self.should_warn(&self.legacy_warned) {
            tracing::warn!(
                keys = ?keys,
                "options found in locals; pass them as options instead (set allowLegacyLocals to silence)"
            );
        }
    }
}

pub(crate) struct EngineInner {
    me: Weak<EngineInner>,
    reader: Arc<dyn FileReader>,
    cache: Arc<dyn TemplateCache>,
    warnings: Warnings,
    extensions: Vec<String>,
    compiler: Compiler,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    reader: Arc<dyn FileReader>,
    cache: Arc<dyn TemplateCache>,
    policy: WarnPolicy,
    extensions: Vec<String>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            reader: Arc::new(FsReader::new()),
            cache: Arc::new(MemoryCache::new()),
            policy: WarnPolicy::default(),
            extensions: vec![DEFAULT_EXTENSION.to_string()],
        }
    }
}

impl EngineBuilder {
    pub fn reader(mut self, reader: Arc<dyn FileReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn TemplateCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn warn_policy(mut self, policy: WarnPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register another file extension for [`Engine::require`]
    pub fn extension(mut self, ext: &str) -> Self {
        self.extensions.push(ext.trim_start_matches('.').to_string());
        self
    }

    pub fn build(self) -> Engine {
        let inner = Arc::new_cyclic(|me| EngineInner {
            me: me.clone(),
            reader: self.reader,
            cache: self.cache,
            warnings: Warnings {
                policy: self.policy,
                ..Warnings::default()
            },
            extensions: self.extensions,
            compiler: Compiler::new(),
        });
        Engine { inner }
    }
}

/// Template engine: compiles, caches and renders templates
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// File-system reader, in-memory cache, warn once
    pub fn new() -> Self {
        EngineBuilder::default().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Program text for a template, without the line-tracking wrapper
    pub fn parse(&self, source: &str, options: &Options) -> Result<String, Error> {
        let program = self
            .inner
            .compiler
            .parse(source, options, self.inner.reader.as_ref())?;
        Ok(emit_body(&program, options.compile_debug))
    }

    /// Compile without consulting the cache
    pub fn compile(&self, source: &str, options: &Options) -> Result<Compiled, Error> {
        self.inner.compile(source, options)
    }

    pub fn render(&self, source: &str, locals: &Locals, options: &Options) -> Result<String, Error> {
        let options = self.inner.prepare(locals, options);
        let compiled = if options.cache {
            let key = options.cache_key().ok_or(Error::CacheWithoutFilename)?;
            self.inner.cached(&key, || self.inner.compile(source, &options))?
        } else {
            self.inner.compile(source, &options)?
        };
        Ok(compiled.call(locals, options.receiver())?)
    }

    /// Read, compile and render the template at `path`.
    /// With `cache` on, a cached compile skips the read entirely.
    pub fn render_file(
        &self,
        path: impl AsRef<Path>,
        locals: &Locals,
        options: &Options,
    ) -> Result<String, Error> {
        let mut options = self.inner.prepare(locals, options);
        options.filename = Some(path.as_ref().to_path_buf());
        let compiled = self.inner.load(&options)?;
        Ok(compiled.call(locals, options.receiver())?)
    }

    /// [`Engine::render_file`], delivering the outcome to a callback
    pub fn render_file_with<F>(&self, path: impl AsRef<Path>, locals: &Locals, options: &Options, callback: F)
    where
        F: FnOnce(Result<String, Error>),
    {
        callback(self.render_file(path, locals, options));
    }

    /// Web framework view shim: one object carries both settings and locals
    pub fn express<F>(&self, path: impl AsRef<Path>, options: &Locals, callback: F)
    where
        F: FnOnce(Result<String, Error>),
    {
        let base = Options {
            allow_legacy_locals: true,
            ..Options::default()
        };
        self.render_file_with(path, options, &base, callback);
    }

    pub fn clear_cache(&self) {
        tracing::debug!("clearing template cache");
        self.inner.cache.reset();
    }

    /// Loader hook: compile a template file into `module.exports = function ...;`
    pub fn require(&self, path: impl AsRef<Path>) -> Result<String, Error> {
        let path = path.as_ref();
        let registered = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.inner.extensions.iter().any(|x| x == e));
        if !registered {
            return Err(Error::UnregisteredExtension {
                path: path.to_path_buf(),
            });
        }
        let options = Options::new().filename(path).client(true);
        let source = self.inner.read(path)?;
        let compiled = self.inner.compile(&source, &options)?;
        let client = compiled
            .as_client()
            .map(ClientFunction::module_source)
            .unwrap_or_default();
        Ok(client)
    }

    /// Deprecation warnings logged so far
    pub fn deprecation_warnings(&self) -> usize {
        self.inner.warnings.issued.load(Ordering::Relaxed)
    }
}

impl EngineInner {
    /// Options for one render call: legacy keys lifted out of locals,
    /// deprecations reported
    fn prepare(&self, locals: &Locals, options: &Options) -> Options {
        let mut options = options.clone();
        let taken = options.absorb_locals(locals);
        if !taken.is_empty() && !options.allow_legacy_locals {
            self.warnings.legacy_locals(&taken);
        }
        if options.scope.is_some() {
            self.warnings.scope_option();
        }
        options
    }

    fn read(&self, path: &Path) -> Result<String, Error> {
        let content = self.reader.read(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(strip_bom(&content).to_string())
    }

    fn compile(&self, source: &str, options: &Options) -> Result<Compiled, Error> {
        let synthesized = self
            .compiler
            .compile(source, options, self.reader.as_ref())?;
        Ok(if options.client {
            Compiled::Client(Arc::new(ClientFunction::new(synthesized, options)))
        } else {
            Compiled::Template(Arc::new(Template::new(
                synthesized,
                options.clone(),
                self.me.clone(),
            )))
        })
    }

    fn cached<F>(&self, key: &str, compile: F) -> Result<Compiled, Error>
    where
        F: FnOnce() -> Result<Compiled, Error>,
    {
        if let Some(hit) = self.cache.get(key) {
            tracing::trace!(key, "template cache hit");
            return Ok(hit);
        }
        tracing::debug!(key, "template cache miss");
        let compiled = compile()?;
        self.cache.set(key, compiled.clone());
        Ok(compiled)
    }

    /// Compiled template for `options.filename`, through the cache when enabled
    fn load(&self, options: &Options) -> Result<Compiled, Error> {
        let path = options
            .filename
            .as_deref()
            .ok_or(Error::CacheWithoutFilename)?;
        if options.cache {
            let key = options.cache_key().ok_or(Error::CacheWithoutFilename)?;
            self.cached(&key, || {
                let source = self.read(path)?;
                self.compile(&source, options)
            })
        } else {
            let source = self.read(path)?;
            self.compile(&source, options)
        }
    }

    /// Resolve and load a runtime `include(name)` made from `scope`.
    /// Returns the template with the include chain it renders under.
    pub(crate) fn include(
        &self,
        scope: &IncludeScope,
        name: &str,
    ) -> Result<(Arc<Template>, Vec<PathBuf>), RenderError> {
        let parent = &scope.options;
        let filename = parent.filename.as_deref().ok_or_else(|| {
            RenderError::new("Error", "`include` requires the 'filename' option.")
        })?;
        let path = resolve_include(name, filename);
        if let Some(cycle) = include::cycle(&scope.chain, &path) {
            return Err(RenderError::new(
                "Error",
                format!("include cycle detected: {}", cycle),
            ));
        }
        tracing::debug!(path = %path.display(), "rendering runtime include");

        let options = Options {
            filename: Some(path.clone()),
            client: false,
            with_locals: true,
            ..parent.clone()
        };
        let template = match self.load(&options) {
            Ok(Compiled::Template(t)) => t,
            Ok(Compiled::Client(_)) => {
                return Err(RenderError::new("Error", "include resolved to a client function"))
            }
            Err(Error::Render(err)) => return Err(err),
            Err(err) => return Err(RenderError::new("Error", err.to_string())),
        };

        let mut chain = scope.chain.clone();
        chain.push(path);
        Ok((template, chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryReader;
    use serde_json::json;

    fn engine_with(reader: Arc<MemoryReader>) -> Engine {
        Engine::builder().reader(reader).build()
    }

    #[test]
    fn test_render_escapes_and_raws() {
        let engine = engine_with(Arc::new(MemoryReader::new()));
        let out = engine
            .render("<%= a %>|<%- a %>", &json!({"a": "<i>"}), &Options::default())
            .unwrap();
        assert_eq!(out, "&lt;i&gt;|<i>");
    }

    #[test]
    fn test_parse_returns_program_text() {
        let engine = engine_with(Arc::new(MemoryReader::new()));
        let text = engine
            .parse("hi <%= x %>", &Options::new().compile_debug(false))
            .unwrap();
        assert!(text.contains("__output.push(escape((x)));"), "got: {}", text);
        assert!(!text.contains("__line"), "no line tracking without compileDebug");
    }

    #[test]
    fn test_runtime_include_merges_locals() {
        let reader = Arc::new(
            MemoryReader::new()
                .with_file("views/page.ejs", "<%- include('item', {n: 2}) %>/<%= n %>")
                .with_file("views/item.ejs", "[<%= n %>:<%= tag %>]"),
        );
        let engine = engine_with(reader);
        let out = engine
            .render_file("views/page.ejs", &json!({"n": 1, "tag": "t"}), &Options::default())
            .unwrap();
        assert_eq!(out, "[2:t]/1");
    }

    #[test]
    fn test_runtime_include_without_extra_locals() {
        let reader = Arc::new(
            MemoryReader::new()
                .with_file("views/page.ejs", "<%- include('item') %>")
                .with_file("views/item.ejs", "<%= `n=${n}` %>"),
        );
        let engine = engine_with(reader);
        let out = engine
            .render_file("views/page.ejs", &json!({"n": 5}), &Options::default())
            .unwrap();
        assert_eq!(out, "n=5");
    }

    #[test]
    fn test_runtime_include_cycle_fails() {
        let reader = Arc::new(
            MemoryReader::new()
                .with_file("a.ejs", "<%- include('b') %>")
                .with_file("b.ejs", "<%- include('a') %>"),
        );
        let engine = engine_with(reader);
        let err = engine
            .render_file("a.ejs", &json!({}), &Options::new().compile_debug(false))
            .unwrap_err();
        assert!(
            err.to_string().contains("include cycle detected: a.ejs -> b.ejs -> a.ejs"),
            "got: {}",
            err
        );
    }

    #[test]
    fn test_scope_warning_once_per_engine() {
        let engine = engine_with(Arc::new(MemoryReader::new()));
        let mut options = Options::default();
        options.scope = Some(json!({"v": "s"}));
        for _ in 0..3 {
            let out = engine.render("<%= this.v %>", &json!({}), &options).unwrap();
            assert_eq!(out, "s");
        }
        assert_eq!(engine.deprecation_warnings(), 1);

        let other = engine_with(Arc::new(MemoryReader::new()));
        other.render("x", &json!({}), &options).unwrap();
        assert_eq!(other.deprecation_warnings(), 1, "state is per engine");
    }

    #[test]
    fn test_legacy_locals_respect_policy() {
        let engine = Engine::builder()
            .reader(Arc::new(MemoryReader::new()))
            .warn_policy(WarnPolicy::Always)
            .build();
        let locals = json!({"debug": false, "x": 1});
        engine.render("<%= x %>", &locals, &Options::default()).unwrap();
        engine.render("<%= x %>", &locals, &Options::default()).unwrap();
        assert_eq!(engine.deprecation_warnings(), 2);

        let allowed = Options {
            allow_legacy_locals: true,
            ..Options::default()
        };
        engine.render("<%= x %>", &locals, &allowed).unwrap();
        assert_eq!(engine.deprecation_warnings(), 2, "shim flag silences the warning");
    }

    #[test]
    fn test_require_needs_registered_extension() {
        let reader = Arc::new(
            MemoryReader::new()
                .with_file("t.ejs", "<%= x %>")
                .with_file("t.tpl", "<%= x %>"),
        );
        let engine = engine_with(reader.clone());
        let module = engine.require("t.ejs").unwrap();
        assert!(module.starts_with("module.exports = function anonymous("), "got: {}", module);
        assert!(matches!(
            engine.require("t.tpl"),
            Err(Error::UnregisteredExtension { .. })
        ));

        let extended = Engine::builder().reader(reader).extension(".tpl").build();
        assert!(extended.require("t.tpl").is_ok());
    }

    #[test]
    fn test_express_reads_settings_from_locals() {
        let reader = Arc::new(MemoryReader::new().with_file("v.ejs", "<%= title %>"));
        let engine = engine_with(reader.clone());
        let mut result = None;
        engine.express("v.ejs", &json!({"title": "Home", "cache": true}), |r| result = Some(r));
        assert_eq!(result.unwrap().unwrap(), "Home");
        engine.express("v.ejs", &json!({"title": "Again", "cache": true}), |_| {});
        assert_eq!(reader.reads(), 1, "second render is served from the cache");
        assert_eq!(engine.deprecation_warnings(), 0);
    }
}
