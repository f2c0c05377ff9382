//! Error types for composition with source locations.

use confit_source_map::{IncludeTrace, SourceInfo};
use thiserror::Error;

/// Result type alias for confit-yaml operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while composing a document.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// YAML syntax error from the underlying scanner.
    #[error("parse error: {message}")]
    Parse {
        message: String,
        location: Option<SourceInfo>,
    },

    /// No document found in the input.
    #[error("no YAML document found")]
    EmptyStream,

    /// Duplicate key in a mapping.
    #[error("duplicate mapping key `{key}`")]
    DuplicateKey { key: String, location: SourceInfo },

    /// Structural invariant violated while editing the tree.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        message: String,
        location: Option<SourceInfo>,
    },

    /// A keypath failed to resolve against the composition.
    #[error(transparent)]
    KeyPath(#[from] confit_keypath::KeyPathError),
}

impl Error {
    /// The source location the error points at, if any.
    pub fn location(&self) -> Option<&SourceInfo> {
        match self {
            Error::Parse { location, .. } => location.as_ref(),
            Error::DuplicateKey { location, .. } => Some(location),
            Error::InvalidStructure { location, .. } => location.as_ref(),
            _ => None,
        }
    }
}

/// An error annotated with the include chain that led to it.
#[derive(Debug, Clone, Error)]
#[error("{error}\n{trace}")]
pub struct TracedError {
    pub error: Error,
    pub trace: IncludeTrace,
}
