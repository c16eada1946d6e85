// Include directive detection and cycle tracking

use std::path::{Path, PathBuf};

const DIRECTIVE: &str = "include";

/// Target of an `include name` directive.
/// `include(...)` and `include (...)` are calls to the runtime callback, not directives.
pub fn directive_target(content: &str) -> Option<&str> {
    let rest = content.strip_prefix(DIRECTIVE)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let name = rest.trim();
    if name.is_empty() || name.starts_with('(') {
        return None;
    }
    Some(name)
}

/// `a -> b -> a` when `next` is already being expanded
pub fn cycle(chain: &[PathBuf], next: &Path) -> Option<String> {
    if !chain.iter().any(|p| p == next) {
        return None;
    }
    let mut names: Vec<String> = chain.iter().map(|p| p.display().to_string()).collect();
    names.push(next.display().to_string());
    Some(names.join(" -> "))
}
