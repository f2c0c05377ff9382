//! Error taxonomy for the composition pipeline.
//!
//! Four families: composition errors (structural, from parsing and
//! includes), merge errors, evaluation errors, and construction errors
//! surfaced from the type registry. Every error can carry a source
//! location and the include trace that led to it; structural errors abort
//! the composition of the current document and are never retried.

use confit_source_map::{IncludeTrace, SourceInfo};
use std::fmt;
use thiserror::Error;

/// Result type alias for composition operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong.
#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    /// Parsing or structural composition error.
    #[error(transparent)]
    Composition(#[from] confit_yaml::Error),

    /// Malformed merge-key grammar.
    #[error("invalid merge key `{raw}`: {message}")]
    InvalidMergeKey { raw: String, message: String },

    /// A merge instruction in an invalid position.
    #[error("invalid merge: {message}")]
    MergeTarget { message: String },

    /// An include string that matches no recognized form.
    #[error("invalid include `{include_str}`: {message}")]
    InvalidInclude {
        include_str: String,
        message: String,
    },

    /// Include dispatched to a loader name nobody registered.
    #[error("unknown loader `{name}`")]
    UnknownLoader { name: String },

    /// A loader failed to produce content.
    #[error("include target not found: {message}")]
    IncludeNotFound { message: String },

    /// Expression evaluation failed.
    #[error("evaluation error: {message}")]
    Evaluation { message: String },

    /// A symbol referenced in an expression is not defined.
    #[error("undefined variable `{name}` in expression `{expr}`")]
    UndefinedVariable { name: String, expr: String },

    /// Lazy resolution hit its pass bound with values still unresolved.
    #[error("recursion bound exceeded with {remaining} value(s) still unresolved")]
    RecursionExceeded { remaining: usize },

    /// An instruction was used in an invalid position or shape.
    #[error("invalid instruction: {message}")]
    Instruction { message: String },

    /// The construction layer rejected a value.
    #[error("construction error: {message}")]
    Construction { message: String },

    /// A keypath failed to resolve.
    #[error(transparent)]
    KeyPath(#[from] confit_keypath::KeyPathError),
}

/// An error with its source location and include trace.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub location: Option<SourceInfo>,
    pub trace: IncludeTrace,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            location: None,
            trace: IncludeTrace::new(),
        }
    }

    /// Attach a source location (keeps an existing one).
    pub fn at(mut self, location: &SourceInfo) -> Self {
        if self.location.is_none() {
            self.location = Some(location.clone());
        }
        self
    }

    /// Attach the include trace (keeps an existing non-empty one).
    pub fn traced(mut self, trace: &IncludeTrace) -> Self {
        if self.trace.is_empty() {
            self.trace = trace.clone();
        }
        self
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Evaluation {
            message: message.into(),
        })
    }

    pub fn instruction(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Instruction {
            message: message.into(),
        })
    }

    pub fn construction(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Construction {
            message: message.into(),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        if !self.trace.is_empty() {
            write!(f, "\n{}", self.trace)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<confit_yaml::Error> for Error {
    fn from(err: confit_yaml::Error) -> Self {
        let location = err.location().cloned();
        Error {
            kind: ErrorKind::Composition(err),
            location,
            trace: IncludeTrace::new(),
        }
    }
}

impl From<confit_keypath::KeyPathError> for Error {
    fn from(err: confit_keypath::KeyPathError) -> Self {
        Error::new(ErrorKind::KeyPath(err))
    }
}
