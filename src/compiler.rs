// Template compiler: scan, generate program text, synthesize

use std::sync::Arc;

use crate::ast::Program;
use crate::emitter::client::ClientEmitter;
use crate::emitter::server::ServerEmitter;
use crate::emitter::{EmitSettings, ProgramEmitter, Target};
use crate::error::{CompileError, Error, ParseError};
use crate::loader::FileReader;
use crate::options::Options;
use crate::parser::TemplateParser;
use crate::runtime::{Runtime, ScriptFunction};

/// Bracket nesting accepted in generated program text
pub const MAX_NESTING: usize = 256;

/// A synthesized template function and the text it was built from
#[derive(Clone, Debug)]
pub struct Synthesized {
    pub function: Arc<ScriptFunction>,
    /// Function body text
    pub body: String,
    pub target: Target,
    /// Runtime the function was synthesized on and must be called on
    pub runtime: Runtime,
}

pub struct Compiler {
    server: ServerEmitter,
    client: ClientEmitter,
    runtime: Runtime,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            server: ServerEmitter::new(),
            client: ClientEmitter::new(),
            runtime: Runtime::new(),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn emitter(&self, target: Target) -> &dyn ProgramEmitter {
        match target {
            Target::Server => &self.server,
            Target::Client => &self.client,
        }
    }

    /// Scan a template into its instruction list
    pub fn parse(
        &self,
        source: &str,
        options: &Options,
        reader: &dyn FileReader,
    ) -> Result<Program, ParseError> {
        TemplateParser::new(reader)
            .with_delimiter(options.delimiter)
            .parse(source, options.filename.as_deref(), options.with_locals)
    }

    /// Function body text for a scanned template
    pub fn generate(&self, program: &Program, source: &str, options: &Options) -> String {
        let target = if options.client {
            Target::Client
        } else {
            Target::Server
        };
        let settings = EmitSettings {
            compile_debug: options.compile_debug,
            source,
            filename: options.filename.as_deref(),
            escape_source: options.escape.source(),
        };
        self.emitter(target).emit(program, &settings)
    }

    pub fn compile(
        &self,
        source: &str,
        options: &Options,
        reader: &dyn FileReader,
    ) -> Result<Synthesized, Error> {
        if options.client && options.escape.source().is_none() {
            return Err(Error::ClientEscaperWithoutSource);
        }

        // 1. Template text -> instruction list
        let program = self.parse(source, options, reader)?;

        // 2. Instruction list -> function body
        let body = self.generate(&program, source, options);
        if options.debug {
            tracing::info!(
                target: "ejs::compile",
                filename = ?options.filename,
                "generated program:\n{}",
                body
            );
        }

        // 3. Function body -> callable function
        let depth = nesting_depth(&body);
        if depth > MAX_NESTING {
            return Err(CompileError::new(
                format!(
                    "SyntaxError: too deeply nested ({} levels, at most {})",
                    depth, MAX_NESTING
                ),
                options.filename.clone(),
            )
            .into());
        }
        let function = self
            .runtime
            .synthesize(&body)
            .map_err(|err| CompileError::new(err, options.filename.clone()))?;

        Ok(Synthesized {
            function,
            body,
            target: if options.client {
                Target::Client
            } else {
                Target::Server
            },
            runtime: self.runtime.clone(),
        })
    }
}

/// Deepest `(`/`[`/`{` nesting in program text, skipping string literals
/// and comments. Regex literals are not recognised, so this can overcount.
fn nesting_depth(text: &str) -> usize {
    let mut chars = text.chars().peekable();
    let (mut depth, mut deepest) = (0usize, 0usize);
    while let Some(c) = chars.next() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '\'' | '"' | '`' => {
                while let Some(next) = chars.next() {
                    if next == '\\' {
                        chars.next();
                    } else if next == c {
                        break;
                    }
                }
            }
            '/' => match chars.peek() {
                Some('/') => {
                    for next in chars.by_ref() {
                        if next == '\n' {
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut star = false;
                    for next in chars.by_ref() {
                        if star && next == '/' {
                            break;
                        }
                        star = next == '*';
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    deepest
}
