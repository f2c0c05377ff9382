//! Source information attached to composed nodes

use crate::types::{FileId, Location, Range};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source information for a node: the file it came from and its range.
///
/// `file` is `None` for nodes that were synthesized during composition
/// (merge results, generated duplicates) rather than parsed from text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// The file this range points into, if any
    pub file: Option<FileId>,
    /// The range in that file's text
    pub range: Range,
}

impl SourceInfo {
    /// Create source info at a specific position.
    pub fn at(file: Option<FileId>, offset: usize, row: usize, column: usize, len: usize) -> Self {
        SourceInfo {
            file,
            range: Range::from_start_len(
                Location {
                    offset,
                    row,
                    column,
                },
                len,
            ),
        }
    }

    /// Create source info spanning two locations in the same file.
    pub fn spanning(file: Option<FileId>, start: Location, end: Location) -> Self {
        SourceInfo {
            file,
            range: Range { start, end },
        }
    }

    /// Replace the file id, keeping the range.
    pub fn with_file(mut self, file: FileId) -> Self {
        self.file = Some(file);
        self
    }

    /// 1-indexed line number, for display.
    pub fn line(&self) -> usize {
        self.range.start.row + 1
    }

    /// 1-indexed column number, for display.
    pub fn column(&self) -> usize {
        self.range.start.column + 1
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file {
            Some(id) => write!(f, "file#{}:{}:{}", id.0, self.line(), self.column()),
            None => write!(f, "<synthesized>:{}:{}", self.line(), self.column()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_info_at() {
        let info = SourceInfo::at(Some(FileId(0)), 10, 2, 4, 5);
        assert_eq!(info.range.start.offset, 10);
        assert_eq!(info.range.end.offset, 15);
        assert_eq!(info.line(), 3);
        assert_eq!(info.column(), 5);
    }

    #[test]
    fn test_source_info_serialization() {
        let info = SourceInfo::at(Some(FileId(3)), 0, 0, 0, 7);
        let json = serde_json::to_string(&info).unwrap();
        let deserialized: SourceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, deserialized);
    }

    #[test]
    fn test_synthesized_display() {
        let info = SourceInfo::default();
        assert!(info.to_string().starts_with("<synthesized>"));
    }
}
