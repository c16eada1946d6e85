// Tag classification and content cleanup

/// What a tag does with its content, from the character after the open sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// `<%=`
    Escaped,
    /// `<%-`
    Raw,
    /// `<%#`
    Comment,
    /// `<%`
    Statement,
}

impl TagKind {
    pub fn from_marker(c: Option<char>) -> Self {
        match c {
            Some('=') => TagKind::Escaped,
            Some('-') => TagKind::Raw,
            Some('#') => TagKind::Comment,
            _ => TagKind::Statement,
        }
    }

    /// Characters consumed after the open sequence
    pub fn marker(&self) -> &'static str {
        match self {
            TagKind::Escaped => "=",
            TagKind::Raw => "-",
            TagKind::Comment => "#",
            TagKind::Statement => "",
        }
    }

    fn is_output(&self) -> bool {
        matches!(self, TagKind::Escaped | TagKind::Raw)
    }
}

/// Tag content ready for code generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBody {
    pub content: String,
    /// `-%>`: drop the newline right after the tag
    pub trim_newline: bool,
}

/// Trim the raw text between the delimiters.
/// A `-` right before the close sequence is the trim marker; output tags
/// also lose one trailing `;`. A trailing `//` comment gets a newline so it
/// cannot swallow the code generated after it.
pub fn clean(kind: TagKind, raw: &str) -> TagBody {
    let trim_newline = raw.ends_with('-');
    let mut content = if trim_newline {
        raw[..raw.len() - 1].trim()
    } else {
        raw.trim()
    };
    if kind.is_output() {
        if let Some(stripped) = content.strip_suffix(';') {
            content = stripped.trim_end();
        }
    }
    let mut content = content.to_string();
    if content.rfind("//") > content.rfind('\n') {
        content.push('\n');
    }
    TagBody {
        content,
        trim_newline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_selects_kind() {
        assert_eq!(TagKind::from_marker(Some('=')), TagKind::Escaped);
        assert_eq!(TagKind::from_marker(Some('-')), TagKind::Raw);
        assert_eq!(TagKind::from_marker(Some('#')), TagKind::Comment);
        assert_eq!(TagKind::from_marker(Some(' ')), TagKind::Statement);
        assert_eq!(TagKind::from_marker(None), TagKind::Statement);
    }

    #[test]
    fn test_trim_marker_must_touch_close() {
        let marked = clean(TagKind::Statement, " } -");
        assert_eq!(marked.content, "}");
        assert!(marked.trim_newline);

        let spaced = clean(TagKind::Escaped, " a - b ");
        assert_eq!(spaced.content, "a - b");
        assert!(!spaced.trim_newline, "a minus followed by space is not a trim marker");
    }

    #[test]
    fn test_output_tags_drop_one_semicolon() {
        assert_eq!(clean(TagKind::Escaped, " name; ").content, "name");
        assert_eq!(clean(TagKind::Raw, " html ;").content, "html");
        assert_eq!(clean(TagKind::Statement, " x++; ").content, "x++;");
    }

    #[test]
    fn test_trailing_line_comment_gets_newline() {
        assert_eq!(clean(TagKind::Statement, " x = 1 // note ").content, "x = 1 // note\n");
        assert_eq!(
            clean(TagKind::Statement, " // note\n x = 1 ").content,
            "// note\n x = 1",
            "comment on an earlier line needs nothing"
        );
    }
}
