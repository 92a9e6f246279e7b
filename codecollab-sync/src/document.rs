//! Local mirror of the shared document text.
//!
//! Single-writer cell: local edits and inbound sync/relay messages both
//! overwrite it. No merge, no versioning; the last value written wins.

/// Session-owned copy of the room's document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMirror {
    code: String,
}

impl DocumentMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite with `code`. Returns `true` if the content changed.
    pub fn overwrite(&mut self, code: impl Into<String>) -> bool {
        let code = code.into();
        if self.code == code {
            return false;
        }
        self.code = code;
        true
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }

    /// An empty mirror means this session holds nothing worth syncing.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mirror_is_empty() {
        let doc = DocumentMirror::new();
        assert!(doc.is_empty());
        assert_eq!(doc.as_str(), "");
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let mut doc = DocumentMirror::new();
        assert!(doc.overwrite("let x = 1;"));
        assert!(doc.overwrite("let y = 2;"));
        assert_eq!(doc.as_str(), "let y = 2;");
        assert_eq!(doc.len(), 10);
    }

    #[test]
    fn test_duplicate_overwrite_is_idempotent() {
        let mut once = DocumentMirror::new();
        once.overwrite("shared");

        let mut twice = DocumentMirror::new();
        assert!(twice.overwrite("shared"));
        assert!(!twice.overwrite("shared"));

        assert_eq!(once, twice);
    }

    #[test]
    fn test_overwrite_with_empty_clears() {
        let mut doc = DocumentMirror::new();
        doc.overwrite("text");
        doc.overwrite("");
        assert!(doc.is_empty());
    }
}
