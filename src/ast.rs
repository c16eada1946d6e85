// Template instruction list

use std::path::PathBuf;

/// Scanned template, ready for code generation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    /// Expose the locals record's fields as bare names
    pub with_locals: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Template text, unescaped
    Literal(String),
    /// `<%= code %>`: value is escaped before output
    Escaped { code: String, line: usize },
    /// `<%- code %>`: value is output as is
    Raw { code: String, line: usize },
    /// `<% code %>`: run for side effects
    Statement { code: String, line: usize },
    /// `<% include name %>`, expanded at parse time
    Include(IncludeBlock),
}

/// A directive-expanded include
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeBlock {
    pub path: PathBuf,
    /// Included template text, after BOM stripping
    pub source: String,
    pub program: Program,
    /// Line of the directive in the including template
    pub line: usize,
}

impl Program {
    pub fn new(with_locals: bool) -> Self {
        Self {
            instructions: Vec::new(),
            with_locals,
        }
    }

    /// Append template text, merging with a preceding literal
    pub fn push_literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.instructions.last_mut() {
            Some(Instruction::Literal(existing)) => existing.push_str(text),
            _ => self.instructions.push(Instruction::Literal(text.to_string())),
        }
    }

    pub fn push(&mut self, instruction: Instruction) {
        match instruction {
            Instruction::Literal(text) => self.push_literal(&text),
            other => self.instructions.push(other),
        }
    }

    /// Every file spliced in by directive expansion, depth first
    pub fn included_paths(&self) -> Vec<&PathBuf> {
        let mut paths = Vec::new();
        for instruction in &self.instructions {
            if let Instruction::Include(block) = instruction {
                paths.push(&block.path);
                paths.extend(block.program.included_paths());
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_literals_merge() {
        let mut program = Program::new(true);
        program.push_literal("a");
        program.push_literal("");
        program.push(Instruction::Literal("b".to_string()));
        program.push(Instruction::Escaped {
            code: "x".to_string(),
            line: 1,
        });
        program.push_literal("c");
        assert_eq!(
            program.instructions,
            vec![
                Instruction::Literal("ab".to_string()),
                Instruction::Escaped {
                    code: "x".to_string(),
                    line: 1
                },
                Instruction::Literal("c".to_string()),
            ],
            "literals separated only by empty text should merge"
        );
    }
}
