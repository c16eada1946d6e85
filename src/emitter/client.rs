// Client emitter

use super::{EmitSettings, ProgramEmitter, Target};
use crate::escape::ESCAPE_SOURCE;
use crate::rethrow::RETHROW_SOURCE;

/// Emitter for self-contained client functions.
/// Inlines the escape routine, and the rethrow routine when line tracking is on,
/// each used only when the caller passes nothing for that parameter.
pub struct ClientEmitter;

impl ClientEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClientEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramEmitter for ClientEmitter {
    fn target(&self) -> Target {
        Target::Client
    }

    fn preamble(&self, settings: &EmitSettings<'_>) -> String {
        let escape = settings.escape_source.unwrap_or(ESCAPE_SOURCE);
        let mut preamble = format!("escape = escape || {};\n", escape);
        if settings.compile_debug {
            preamble.push_str(&format!("rethrow = rethrow || {};\n", RETHROW_SOURCE));
        }
        preamble
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Program;

    #[test]
    fn test_rethrow_inlined_only_with_debug() {
        let program = Program::new(false);
        let mut settings = EmitSettings {
            compile_debug: true,
            source: "",
            filename: None,
            escape_source: None,
        };
        let emitter = ClientEmitter::new();
        let debug = emitter.emit(&program, &settings);
        assert!(debug.starts_with("escape = escape || function (markup)"), "got: {}", debug);
        assert!(debug.contains("rethrow = rethrow || function (err, str, filename, lineno)"));

        settings.compile_debug = false;
        let plain = emitter.emit(&program, &settings);
        assert!(!plain.contains("rethrow"), "no rethrow without line tracking, got: {}", plain);
    }

    #[test]
    fn test_custom_escape_source_is_inlined() {
        let settings = EmitSettings {
            compile_debug: false,
            source: "",
            filename: None,
            escape_source: Some("function (s) { return s; }"),
        };
        let text = ClientEmitter::new().emit(&Program::new(false), &settings);
        assert!(
            text.starts_with("escape = escape || function (s) { return s; };\n"),
            "got: {}",
            text
        );
    }
}
