//! Source mapping for confit
//!
//! This crate provides source location tracking for the composition
//! pipeline. Every node in a composed document carries a [`SourceInfo`]
//! pointing back into the text it was parsed from, and errors raised while
//! resolving includes carry an [`IncludeTrace`]: the chain of include sites
//! from the top-level document down to the failing one.
//!
//! # Example
//!
//! ```rust
//! use confit_source_map::*;
//!
//! let mut registry = SourceRegistry::new();
//! let file_id = registry.add_file("main.yaml".into(), Some("a: 1\nb: 2".into()));
//!
//! let info = SourceInfo::at(Some(file_id), 5, 1, 0, 4);
//! assert_eq!(registry.excerpt(&info).as_deref(), Some("b: 2"));
//! ```

pub mod registry;
pub mod source_info;
pub mod trace;
pub mod types;

pub use registry::{SourceFile, SourceRegistry};
pub use source_info::SourceInfo;
pub use trace::{IncludeFrame, IncludeTrace};
pub use types::{FileId, Location, Range};
