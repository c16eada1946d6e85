// ProgramEmitter trait and implementations

pub mod client;
pub mod server;

use std::fmt::Write;
use std::path::Path;

use crate::ast::{Instruction, Program};

/// Parameter list of every synthesized template function
pub const PARAMS: [&str; 4] = ["locals", "escape", "include", "rethrow"];

/// Which kind of function the program text is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Called through the engine, which supplies escape/include/rethrow
    Server,
    /// Self-contained, callable without the engine
    Client,
}

/// Per-compile inputs to code generation
#[derive(Debug, Clone, Copy)]
pub struct EmitSettings<'a> {
    pub compile_debug: bool,
    /// Original template text, embedded for rethrow context
    pub source: &'a str,
    pub filename: Option<&'a Path>,
    /// Escape function expression inlined by client builds; HTML escaping when unset
    pub escape_source: Option<&'a str>,
}

/// Trait for rendering a scanned template into function body text
pub trait ProgramEmitter: Send + Sync {
    /// Full function body
    fn emit(&self, program: &Program, settings: &EmitSettings<'_>) -> String {
        let mut out = self.preamble(settings);
        out.push_str(&wrap_debug(program, settings));
        out
    }

    /// What kind of function does this emitter produce?
    fn target(&self) -> Target;

    /// Definitions placed before the program
    fn preamble(&self, _settings: &EmitSettings<'_>) -> String {
        String::new()
    }
}

/// Single-quoted script literal for template text
pub fn quote_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Double-quoted JSON string literal, also valid script
pub fn json_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn filename_literal(filename: Option<&Path>) -> String {
    filename
        .map(|f| json_string(&f.to_string_lossy()))
        .unwrap_or_else(|| "undefined".to_string())
}

/// Program, wrapped in line tracking and rethrow when `compile_debug` is on
pub fn wrap_debug(program: &Program, settings: &EmitSettings<'_>) -> String {
    let body = emit_body(program, settings.compile_debug);
    if !settings.compile_debug {
        return body;
    }
    format!(
        "var __line = 1, __lines = {}, __filename = {};\ntry {{\n{}}} catch (err) {{\nrethrow(err, __lines, __filename, __line);\n}}\n",
        json_string(settings.source),
        filename_literal(settings.filename),
        body
    )
}

/// Scope object for the `with` block: locals fields minus `__` names and the
/// function parameters, which must keep resolving to the arguments
fn locals_scope() -> String {
    let params = PARAMS
        .iter()
        .map(|p| format!("'{}'", p))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "var __locals = Object.create(null);\n\
         Object.keys(locals || {{}}).forEach(function (__key) {{\n\
         if (__key.slice(0, 2) !== '__' && [{}].indexOf(__key) === -1) __locals[__key] = locals[__key];\n\
         }});\n\
         with (__locals) {{\n",
        params
    )
}

/// Output buffer setup, instructions, and the final join
pub fn emit_body(program: &Program, compile_debug: bool) -> String {
    let mut out = String::from("var __output = [];\n");
    if program.with_locals {
        out.push_str(&locals_scope());
    }
    for instruction in &program.instructions {
        emit_instruction(&mut out, instruction, compile_debug);
    }
    if program.with_locals {
        out.push_str("}\n");
    }
    out.push_str("return __output.join('');\n");
    out
}

fn emit_line(out: &mut String, line: usize, compile_debug: bool) {
    if compile_debug {
        let _ = writeln!(out, "__line = {};", line);
    }
}

fn emit_instruction(out: &mut String, instruction: &Instruction, compile_debug: bool) {
    // writing into a String cannot fail
    let _ = match instruction {
        Instruction::Literal(text) => writeln!(out, "__output.push({});", quote_literal(text)),
        Instruction::Escaped { code, line } => {
            emit_line(out, *line, compile_debug);
            writeln!(out, "__output.push(escape(({})));", code)
        }
        Instruction::Raw { code, line } => {
            emit_line(out, *line, compile_debug);
            writeln!(out, "__output.push(({}));", code)
        }
        Instruction::Statement { code, line } => {
            emit_line(out, *line, compile_debug);
            writeln!(out, "{};", code)
        }
        Instruction::Include(block) => {
            emit_line(out, block.line, compile_debug);
            let nested = EmitSettings {
                compile_debug,
                source: &block.source,
                filename: Some(&block.path),
                escape_source: None,
            };
            writeln!(
                out,
                "__output.push((function () {{\n{}}})());",
                wrap_debug(&block.program, &nested)
            )
        }
    };
}
