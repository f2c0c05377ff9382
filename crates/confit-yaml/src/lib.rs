//! # confit-yaml
//!
//! YAML composition with source tracking: the node model, the composer
//! that turns a `yaml-rust2` event stream into a composed tree, and the
//! [`CompositionResult`] indices later pipeline stages work from.
//!
//! This crate stops where composition semantics begin: includes, merges,
//! interpolation evaluation and deferral live in `confit-compose`. What it
//! guarantees is that every merge key, include reference, alias,
//! interpolable scalar and deferral tag has been recognized, indexed and
//! located back to its source text.
//!
//! ## Example
//!
//! ```rust
//! use confit_yaml::compose_str;
//!
//! let comp = compose_str("name: demo\nvalue: ${1 + 2}", None).unwrap();
//! assert_eq!(comp.special.interpolables.len(), 1);
//! ```

mod composer;
mod composition;
mod error;
pub mod interp;
mod node;
mod value;

pub use composer::{compose_str, compose_str_with, ComposeOptions};
pub use composition::{delete_unset_nodes, CompositionResult, SpecialNodes};
pub use error::{Error, Result, TracedError};
pub use node::{
    is_instruction_tag, ClearCtx, DeferredNode, IncludeNode, InterpolableNode, MappingNode,
    MergeNode, Node, ScalarNode, SequenceNode, BOOL_TAG, DEFAULT_MAP_TAG, DEFAULT_SEQ_TAG,
    DEFAULT_STR_TAG, DEFERRED_TAG_PREFIX, FLOAT_TAG, INCLUDE_TAG, INT_TAG, NULL_TAG, UNSET_VALUE,
};
pub use value::{Context, LazyValue, Validator, Value};
