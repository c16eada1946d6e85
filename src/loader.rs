// Template sources and include resolution

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

/// Extension appended to include names that have none
pub const DEFAULT_EXTENSION: &str = "ejs";

/// Synchronous template reader
pub trait FileReader: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads templates from the file system
#[derive(Debug, Default, Clone, Copy)]
pub struct FsReader;

impl FsReader {
    pub fn new() -> Self {
        Self
    }
}

impl FileReader for FsReader {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// In-memory template set keyed by path
#[derive(Debug, Default)]
pub struct MemoryReader {
    files: DashMap<PathBuf, String>,
    reads: AtomicUsize,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(normalize(&path.into()), content.into());
    }

    /// Number of successful reads so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl FileReader for MemoryReader {
    fn read(&self, path: &Path) -> io::Result<String> {
        let content = self
            .files
            .get(&normalize(path))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such template: {}", path.display()),
                )
            })?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(content)
    }
}

pub fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

/// Resolve `name` against the directory of the including file
pub fn resolve_include(name: &str, filename: &Path) -> PathBuf {
    let dir = filename.parent().unwrap_or_else(|| Path::new(""));
    let mut path = dir.join(name).into_os_string();
    if Path::new(name).extension().is_none() {
        path.push(".");
        path.push(DEFAULT_EXTENSION);
    }
    normalize(Path::new(&path))
}

/// Lexically fold `.` and `..` components
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `module.exports = <function>;` wrapper used by the loader hook
pub fn module_source(function_source: &str) -> String {
    format!("module.exports = {};", function_source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_include_appends_extension() {
        let path = resolve_include("partials/header", Path::new("views/index.ejs"));
        assert_eq!(path, PathBuf::from("views/partials/header.ejs"));
    }

    #[test]
    fn test_resolve_include_keeps_explicit_extension() {
        let path = resolve_include("../shared/footer.html", Path::new("views/pages/index.ejs"));
        assert_eq!(path, PathBuf::from("views/shared/footer.html"));
    }

    #[test]
    fn test_normalize_keeps_leading_parent() {
        assert_eq!(normalize(Path::new("../a/./b/../c")), PathBuf::from("../a/c"));
        assert_eq!(normalize(Path::new("/x/../../y")), PathBuf::from("/y"));
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom("\u{feff}<p>"), "<p>");
        assert_eq!(strip_bom("<p>"), "<p>");
    }

    #[test]
    fn test_memory_reader_counts_reads() {
        let reader = MemoryReader::new().with_file("a/./b.ejs", "hi");
        assert_eq!(reader.read(Path::new("a/b.ejs")).unwrap(), "hi");
        assert!(reader.read(Path::new("missing.ejs")).is_err());
        assert_eq!(reader.reads(), 1, "failed reads are not counted");
    }
}
