// Error types

use std::io;
use std::path::PathBuf;

/// Errors raised while scanning a template, before anything is synthesized
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Could not find matching close tag for \"{open}\".")]
    UnmatchedTag { open: String, line: usize },

    #[error("`include` requires the 'filename' option.")]
    IncludeWithoutFilename,

    #[error("include cycle detected: {chain}")]
    IncludeCycle { chain: String },

    #[error("could not read include '{}': {source}", path.display())]
    IncludeRead { path: PathBuf, source: io::Error },
}

/// The assembled program is not valid script syntax
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub filename: Option<PathBuf>,
}

impl CompileError {
    /// `cause` is the script engine's `SyntaxError: ...` text
    pub fn new(cause: impl Into<String>, filename: Option<PathBuf>) -> Self {
        let mut message = cause.into();
        if let Some(name) = &filename {
            message.push_str(&format!(" in {}", name.display()));
        }
        message.push_str(" while compiling ejs");
        Self { message, filename }
    }
}

/// A value thrown while the template function was running
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RenderError {
    pub name: String,
    pub message: String,
    /// Template the error was attributed to, once enriched with line context
    pub path: Option<String>,
    pub line: Option<usize>,
}

impl RenderError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            path: None,
            line: None,
        }
    }
}

/// Top-level engine errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("\"cache\" option requires \"filename\".")]
    CacheWithoutFilename,

    #[error("could not read '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("no loader registered for '{}'", path.display())]
    UnregisteredExtension { path: PathBuf },

    #[error("client functions need an escaper with a script source; use `Escaper::with_source`")]
    ClientEscaperWithoutSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_message_names_file() {
        let cause = "SyntaxError: unexpected token ')' at line 3, col 7";
        let err = CompileError::new(cause, Some(PathBuf::from("views/a.ejs")));
        assert_eq!(
            err.to_string(),
            "SyntaxError: unexpected token ')' at line 3, col 7 in views/a.ejs while compiling ejs"
        );
        assert_eq!(err.filename, Some(PathBuf::from("views/a.ejs")));

        let anonymous = CompileError::new(cause, None);
        assert!(
            anonymous.to_string().ends_with("col 7 while compiling ejs"),
            "anonymous templates omit the filename, got: {}",
            anonymous
        );
    }

    #[test]
    fn test_compile_error_converts_into_error() {
        let err: Error = CompileError::new("SyntaxError: x", None).into();
        assert!(matches!(err, Error::Compile(_)), "got {:?}", err);
        assert_eq!(err.to_string(), "SyntaxError: x while compiling ejs");
    }

    #[test]
    fn test_render_error_display() {
        let err = RenderError::new("Error", "oops");
        assert_eq!(err.to_string(), "Error: oops");
        assert_eq!((err.path, err.line), (None, None));
    }
}
