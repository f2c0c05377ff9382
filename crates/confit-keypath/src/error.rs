//! Error types for keypath operations.

use thiserror::Error;

/// Result type alias for keypath operations.
pub type Result<T> = std::result::Result<T, KeyPathError>;

/// Errors that can occur while dereferencing a keypath.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyPathError {
    /// A segment could not be found in the object being traversed.
    #[error("key `{segment}` not found while resolving `{path}`")]
    NotFound { path: String, segment: String },

    /// The path still contains up-tokens that could not be cancelled.
    #[error("cannot dereference unresolvable path `{path}` (dangling up-token)")]
    Unresolvable { path: String },

    /// Wildcards are only valid in patterns, not in concrete lookups.
    #[error("cannot dereference path with wildcards: `{path}`")]
    WildcardInConcrete { path: String },

    /// A mapping-key token must be the second-to-last part.
    #[error("invalid mapping-key position in `{path}`")]
    InvalidMappingKey { path: String },

    /// A path ending in a mapping-key token cannot be dereferenced.
    #[error("keypath cannot end with a mapping-key token: `{path}`")]
    EndsWithMappingKey { path: String },
}
