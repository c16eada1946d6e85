// Template scanner

pub mod include;
pub mod tag;

use std::path::{Path, PathBuf};

use crate::ast::{IncludeBlock, Instruction, Program};
use crate::error::ParseError;
use crate::loader::{normalize, resolve_include, strip_bom, FileReader};
use tag::{TagBody, TagKind};

pub const DEFAULT_DELIMITER: char = '%';

/// Scans template text into a [`Program`], expanding include directives
/// through the given reader.
pub struct TemplateParser<'a> {
    reader: &'a dyn FileReader,
    delimiter: char,
}

impl<'a> TemplateParser<'a> {
    pub fn new(reader: &'a dyn FileReader) -> Self {
        Self {
            reader,
            delimiter: DEFAULT_DELIMITER,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Parse a whole template. `filename` is needed to resolve includes.
    pub fn parse(
        &self,
        source: &str,
        filename: Option<&Path>,
        with_locals: bool,
    ) -> Result<Program, ParseError> {
        let mut chain: Vec<PathBuf> = filename.map(normalize).into_iter().collect();
        self.scan(source, filename, with_locals, &mut chain)
    }

    fn scan(
        &self,
        source: &str,
        filename: Option<&Path>,
        with_locals: bool,
        chain: &mut Vec<PathBuf>,
    ) -> Result<Program, ParseError> {
        let open = format!("<{}", self.delimiter);
        let close = format!("{}>", self.delimiter);

        let mut program = Program::new(with_locals);
        let mut literal = String::new();
        let mut line = 1;
        let mut consume_eol = false;
        let mut i = 0;

        while let Some(rest) = source.get(i..).filter(|r| !r.is_empty()) {
            if rest.starts_with(&open) {
                consume_eol = false;
                let after = i + open.len();

                // `<%%` is a literal open sequence
                if source[after..].starts_with(self.delimiter) {
                    literal.push_str(&open);
                    i = after + self.delimiter.len_utf8();
                    continue;
                }

                let kind = TagKind::from_marker(source[after..].chars().next());
                let body_start = after + kind.marker().len();
                let Some(len) = source[body_start..].find(&close) else {
                    return Err(ParseError::UnmatchedTag {
                        open: format!("{}{}", open, kind.marker()),
                        line,
                    });
                };
                let raw = &source[body_start..body_start + len];
                let tag_line = line;
                line += raw.matches('\n').count();

                let body = tag::clean(kind, raw);
                consume_eol = body.trim_newline;
                program.push_literal(&literal);
                literal.clear();
                self.push_tag(&mut program, kind, body, tag_line, filename, chain)?;

                i = body_start + len + close.len();
                continue;
            }

            let Some(c) = rest.chars().next() else { break };
            i += c.len_utf8();
            match c {
                '\r' => {}
                '\n' => {
                    line += 1;
                    if consume_eol {
                        consume_eol = false;
                    } else {
                        literal.push('\n');
                    }
                }
                _ => {
                    consume_eol = false;
                    literal.push(c);
                }
            }
        }

        program.push_literal(&literal);
        Ok(program)
    }

    fn push_tag(
        &self,
        program: &mut Program,
        kind: TagKind,
        body: TagBody,
        line: usize,
        filename: Option<&Path>,
        chain: &mut Vec<PathBuf>,
    ) -> Result<(), ParseError> {
        if kind == TagKind::Comment {
            return Ok(());
        }
        if let Some(name) = include::directive_target(&body.content) {
            let block = self.expand_include(name, line, filename, chain)?;
            program.push(Instruction::Include(block));
            return Ok(());
        }
        if body.content.is_empty() {
            return Ok(());
        }
        let code = body.content;
        program.push(match kind {
            TagKind::Escaped => Instruction::Escaped { code, line },
            TagKind::Raw => Instruction::Raw { code, line },
            _ => Instruction::Statement { code, line },
        });
        Ok(())
    }

    fn expand_include(
        &self,
        name: &str,
        line: usize,
        filename: Option<&Path>,
        chain: &mut Vec<PathBuf>,
    ) -> Result<IncludeBlock, ParseError> {
        let current = filename.ok_or(ParseError::IncludeWithoutFilename)?;
        let path = resolve_include(name, current);
        if let Some(cycle) = include::cycle(chain, &path) {
            return Err(ParseError::IncludeCycle { chain: cycle });
        }

        let content = self
            .reader
            .read(&path)
            .map_err(|source| ParseError::IncludeRead {
                path: path.clone(),
                source,
            })?;
        let source = strip_bom(&content).to_string();
        tracing::debug!(path = %path.display(), line, "expanding include");

        chain.push(path.clone());
        let nested = self.scan(&source, Some(&path), false, chain);
        chain.pop();

        Ok(IncludeBlock {
            path,
            source,
            program: nested?,
            line,
        })
    }
}
