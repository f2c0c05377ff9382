//! Include traces
//!
//! When a document pulls in another document through an include, errors
//! raised inside the included content should point at the whole chain of
//! include sites, not just the innermost location. An [`IncludeTrace`] is
//! that chain, outermost first.

use crate::source_info::SourceInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step in an include chain: the include string and where it appeared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeFrame {
    /// The include string as written (e.g. `file:params.yaml@model`)
    pub include_str: String,
    /// Where the include appeared
    pub site: SourceInfo,
}

/// A chain of include sites, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncludeTrace {
    frames: Vec<IncludeFrame>,
}

impl IncludeTrace {
    /// An empty trace (a top-level document).
    pub fn new() -> Self {
        IncludeTrace::default()
    }

    /// Extend the trace with one more include site, returning the new trace.
    pub fn pushed(&self, include_str: impl Into<String>, site: SourceInfo) -> Self {
        let mut frames = self.frames.clone();
        frames.push(IncludeFrame {
            include_str: include_str.into(),
            site,
        });
        IncludeTrace { frames }
    }

    /// The frames, outermost first.
    pub fn frames(&self) -> &[IncludeFrame] {
        &self.frames
    }

    /// Depth of the chain.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether this is a top-level (no includes) trace.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for IncludeTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{}included from `{}` at {}",
                "  ".repeat(i),
                frame.include_str,
                frame.site
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileId;

    #[test]
    fn test_pushed_does_not_mutate() {
        let trace = IncludeTrace::new();
        let child = trace.pushed("file:a.yaml", SourceInfo::at(Some(FileId(0)), 0, 0, 0, 1));
        assert!(trace.is_empty());
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn test_display_chain() {
        let trace = IncludeTrace::new()
            .pushed("file:a.yaml", SourceInfo::at(Some(FileId(0)), 0, 0, 0, 1))
            .pushed("file:b.yaml", SourceInfo::at(Some(FileId(1)), 4, 1, 2, 1));
        let rendered = trace.to_string();
        assert!(rendered.contains("file:a.yaml"));
        assert!(rendered.contains("file:b.yaml"));
    }
}
