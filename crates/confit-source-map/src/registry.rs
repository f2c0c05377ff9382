//! Registry of loaded source files
//!
//! The registry owns the text of every document the pipeline has parsed so
//! far, keyed by [`FileId`]. It is what error rendering uses to turn a
//! [`SourceInfo`] back into a path, a line/column pair, and a one-line
//! excerpt.

use crate::source_info::SourceInfo;
use crate::types::FileId;
use serde::{Deserialize, Serialize};

/// A source file with content and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// File path or identifier (e.g. `<string>` for in-memory documents)
    pub path: String,
    /// File content, when retained for excerpting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Byte offsets of each newline, built once for O(log n) lookups
    #[serde(skip)]
    line_breaks: Vec<usize>,
}

/// Registry of source files seen during a load
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRegistry {
    files: Vec<SourceFile>,
}

impl SourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        SourceRegistry { files: Vec::new() }
    }

    /// Add a file and return its id.
    ///
    /// When `content` is `None` the path is recorded but no excerpting is
    /// possible for locations in this file.
    pub fn add_file(&mut self, path: String, content: Option<String>) -> FileId {
        let id = FileId(self.files.len());
        let line_breaks = content
            .as_deref()
            .map(|c| {
                c.char_indices()
                    .filter_map(|(idx, ch)| if ch == '\n' { Some(idx) } else { None })
                    .collect()
            })
            .unwrap_or_default();
        self.files.push(SourceFile {
            path,
            content,
            line_breaks,
        });
        id
    }

    /// Get a file by id.
    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0)
    }

    /// The path recorded for a file id, if known.
    pub fn path(&self, id: FileId) -> Option<&str> {
        self.get(id).map(|f| f.path.as_str())
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The full text of the line containing `info`'s start location.
    pub fn excerpt(&self, info: &SourceInfo) -> Option<String> {
        let file = self.get(info.file?)?;
        let content = file.content.as_deref()?;
        let row = info.range.start.row;

        let line_start = if row == 0 {
            0
        } else {
            *file.line_breaks.get(row - 1)? + 1
        };
        let line_end = file
            .line_breaks
            .get(row)
            .copied()
            .unwrap_or(content.len());
        Some(content[line_start..line_end].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut registry = SourceRegistry::new();
        let id = registry.add_file("a.yaml".into(), Some("x: 1".into()));
        assert_eq!(registry.path(id), Some("a.yaml"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_excerpt_lines() {
        let mut registry = SourceRegistry::new();
        let id = registry.add_file("a.yaml".into(), Some("first: 1\nsecond: 2\nthird: 3".into()));

        let info = SourceInfo::at(Some(id), 9, 1, 0, 6);
        assert_eq!(registry.excerpt(&info).as_deref(), Some("second: 2"));

        let info = SourceInfo::at(Some(id), 0, 0, 0, 5);
        assert_eq!(registry.excerpt(&info).as_deref(), Some("first: 1"));

        let info = SourceInfo::at(Some(id), 19, 2, 0, 5);
        assert_eq!(registry.excerpt(&info).as_deref(), Some("third: 3"));
    }

    #[test]
    fn test_excerpt_without_content() {
        let mut registry = SourceRegistry::new();
        let id = registry.add_file("a.yaml".into(), None);
        let info = SourceInfo::at(Some(id), 0, 0, 0, 1);
        assert!(registry.excerpt(&info).is_none());
    }
}
