//! # confit-keypath
//!
//! Keypath addressing for confit document trees.
//!
//! A [`KeyPath`] is an ordered sequence of parts: string keys (list indices
//! are keys that happen to be integers) plus the special tokens root, up,
//! mapping-key and the two glob wildcards. Keypaths address nodes inside a
//! composed document, patterns of keypaths select subtrees (for deferral),
//! and relative keypaths appear inside interpolation expressions.
//!
//! Paths are written with `.` between segments, `/` as an absolute-root
//! marker, and extra dots for up-tokens (`..` is one level up). `\.`, `\/`
//! and `\\` escape the separator characters inside a segment.
//!
//! ```rust
//! use confit_keypath::KeyPath;
//!
//! let path = KeyPath::parse("/a.b..c");
//! assert_eq!(path.to_string(), "/a.c");
//! ```

mod addressable;
mod error;
mod keypath;
mod pattern;

pub use addressable::{Addressable, AddressableMut};
pub use error::{KeyPathError, Result};
pub use keypath::{KeyPath, KeyPathPart, ROOT_PATH};
