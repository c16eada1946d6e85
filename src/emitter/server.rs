// Server emitter

use super::{ProgramEmitter, Target};

/// Emitter for functions run through the engine.
/// The engine passes escape, include and rethrow at call time, so no preamble.
pub struct ServerEmitter;

impl ServerEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ServerEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramEmitter for ServerEmitter {
    fn target(&self) -> Target {
        Target::Server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Instruction, Program};
    use crate::emitter::EmitSettings;

    #[test]
    fn test_server_output_starts_with_program() {
        let mut program = Program::new(true);
        program.push(Instruction::Literal("x".to_string()));
        let settings = EmitSettings {
            compile_debug: false,
            source: "x",
            filename: None,
            escape_source: None,
        };
        let text = ServerEmitter::new().emit(&program, &settings);
        assert!(text.starts_with("var __output = [];"), "got: {}", text);
        assert!(!text.contains("escape = escape ||"), "server output has no inlined helpers");
    }
}
