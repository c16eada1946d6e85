//! HTML escaping for `<%= %>` output.
//!
//! Escaped characters:
//! - `&` → `&amp;`
//! - `<` → `&lt;`
//! - `>` → `&gt;`
//! - `"` → `&quot;`
//! - `'` → `&#x27;`

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Script source of the default escaper, inlined into client functions
pub const ESCAPE_SOURCE: &str = r#"function (markup) {
  if (markup == null) return '';
  return String(markup)
    .replaceAll('&', '&amp;')
    .replaceAll('<', '&lt;')
    .replaceAll('>', '&gt;')
    .replaceAll('"', '&quot;')
    .replaceAll("'", '&#x27;');
}"#;

/// Escape HTML special characters
///
/// ```
/// use ejs::escape::escape_html;
///
/// assert_eq!(escape_html("<b>Tom & 'Jerry'</b>"),
///            "&lt;b&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/b&gt;");
/// assert_eq!(escape_html("plain"), "plain");
/// ```
pub fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Escape function applied to interpolated values.
///
/// Client functions cannot call back into Rust, so an escaper used for a
/// client build also needs a script form; see [`Escaper::with_source`].
#[derive(Clone)]
pub struct Escaper {
    escape: Arc<dyn Fn(&str) -> String + Send + Sync>,
    source: Option<Arc<str>>,
}

impl Escaper {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            escape: Arc::new(f),
            source: None,
        }
    }

    pub fn html() -> Self {
        Self::new(|s| escape_html(s).into_owned()).with_source(ESCAPE_SOURCE)
    }

    /// Script function expression doing the same escaping, inlined into
    /// client functions
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn escape(&self, s: &str) -> String {
        (self.escape)(s)
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl Default for Escaper {
    fn default() -> Self {
        Self::html()
    }
}

impl fmt::Debug for Escaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Escaper")
            .field("source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}
