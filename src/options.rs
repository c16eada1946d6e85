//! Compile and render options.
//!
//! Options deserialize from the same camelCase keys the template API has
//! always accepted, which is also how legacy callers smuggle them in through
//! the locals record.

use std::path::PathBuf;

use serde::Deserialize;

use crate::escape::Escaper;
use crate::parser::DEFAULT_DELIMITER;

/// Option keys recognised when they appear inside a locals record
pub const LEGACY_KEYS: [&str; 8] = [
    "delimiter",
    "filename",
    "compileDebug",
    "client",
    "cache",
    "debug",
    "context",
    "scope",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Tag delimiter: `<%` ... `%>`
    pub delimiter: char,
    /// Template path, for includes, caching and error messages
    pub filename: Option<PathBuf>,
    /// Track lines and enrich render errors with source context
    pub compile_debug: bool,
    /// Produce a self-contained client function
    pub client: bool,
    /// Cache the compiled function under `filename`
    pub cache: bool,
    /// Log the generated program text
    pub debug: bool,
    /// `this` inside the template
    pub context: Option<serde_json::Value>,
    /// Deprecated alias of `context`
    pub scope: Option<serde_json::Value>,
    /// Bind locals fields as bare names; off for nested includes
    #[serde(rename = "_with")]
    pub with_locals: bool,
    /// Accept option keys inside locals without a deprecation warning
    pub allow_legacy_locals: bool,
    #[serde(skip)]
    pub escape: Escaper,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            filename: None,
            compile_debug: true,
            client: false,
            cache: false,
            debug: false,
            context: None,
            scope: None,
            with_locals: true,
            allow_legacy_locals: false,
            escape: Escaper::default(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn compile_debug(mut self, on: bool) -> Self {
        self.compile_debug = on;
        self
    }

    pub fn client(mut self, on: bool) -> Self {
        self.client = on;
        self
    }

    pub fn cache(mut self, on: bool) -> Self {
        self.cache = on;
        self
    }

    pub fn debug(mut self, on: bool) -> Self {
        self.debug = on;
        self
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn escape(mut self, escape: Escaper) -> Self {
        self.escape = escape;
        self
    }

    /// `context`, falling back to the deprecated `scope`
    pub fn receiver(&self) -> Option<&serde_json::Value> {
        self.context.as_ref().or(self.scope.as_ref())
    }

    /// Cache key: client builds never share an entry with server builds
    pub fn cache_key(&self) -> Option<String> {
        let filename = self.filename.as_ref()?.display().to_string();
        Some(if self.client {
            format!("{}:client", filename)
        } else {
            filename
        })
    }

    /// Copy option keys found in a locals record into these options.
    /// Returns the keys that were taken; values of the wrong type are skipped.
    pub fn absorb_locals(&mut self, locals: &serde_json::Value) -> Vec<&'static str> {
        let Some(map) = locals.as_object() else {
            return Vec::new();
        };
        let mut taken = Vec::new();
        for key in LEGACY_KEYS {
            let Some(value) = map.get(key) else { continue };
            let applied = match key {
                "delimiter" => set(&mut self.delimiter, value),
                "filename" => set(&mut self.filename, value),
                "compileDebug" => set(&mut self.compile_debug, value),
                "client" => set(&mut self.client, value),
                "cache" => set(&mut self.cache, value),
                "debug" => set(&mut self.debug, value),
                "context" => set(&mut self.context, value),
                _ => set(&mut self.scope, value),
            };
            if applied {
                taken.push(key);
            }
        }
        taken
    }
}

fn set<T: serde::de::DeserializeOwned>(slot: &mut T, value: &serde_json::Value) -> bool {
    match T::deserialize(value) {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed legacy option");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.delimiter, '%');
        assert!(options.compile_debug, "line tracking is on by default");
        assert!(options.with_locals);
        assert!(!options.client && !options.cache && !options.debug);
    }

    #[test]
    fn test_deserialize_camel_case() {
        let options: Options = serde_json::from_value(json!({
            "delimiter": "?",
            "compileDebug": false,
            "filename": "views/a.ejs",
            "_with": false,
        }))
        .unwrap();
        assert_eq!(options.delimiter, '?');
        assert!(!options.compile_debug);
        assert!(!options.with_locals);
        assert_eq!(options.filename, Some(PathBuf::from("views/a.ejs")));
    }

    #[test]
    fn test_cache_key_separates_client_builds() {
        let server = Options::new().filename("t.ejs");
        assert_eq!(server.cache_key().as_deref(), Some("t.ejs"));
        let client = server.clone().client(true);
        assert_eq!(client.cache_key().as_deref(), Some("t.ejs:client"));
        assert_eq!(Options::new().cache_key(), None);
    }

    #[test]
    fn test_scope_is_context_alias() {
        let mut options = Options::new();
        options.scope = Some(json!({"a": 1}));
        assert_eq!(options.receiver(), Some(&json!({"a": 1})));
        options.context = Some(json!({"b": 2}));
        assert_eq!(options.receiver(), Some(&json!({"b": 2})), "context wins over scope");
    }

    #[test]
    fn test_absorb_locals() {
        let mut options = Options::new();
        let taken = options.absorb_locals(&json!({
            "name": "x",
            "cache": true,
            "filename": "f.ejs",
            "debug": "yes",
        }));
        assert_eq!(taken, vec!["filename", "cache"]);
        assert!(options.cache);
        assert_eq!(options.filename, Some(PathBuf::from("f.ejs")));
        assert!(!options.debug, "malformed values are ignored");
    }
}
