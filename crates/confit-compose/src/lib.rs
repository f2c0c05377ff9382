//! # confit-compose
//!
//! The composition pipeline over `confit-yaml` trees: the merge algebra
//! and its `<<` mini-language, include resolution with pluggable loader
//! backends, composition-time instructions, interpolation and lazy
//! evaluation, deferred subtrees, and the [`Loader`] that ties the stages
//! together.
//!
//! ## Example
//!
//! ```rust
//! use confit_compose::Loader;
//!
//! let mut loader = Loader::new();
//! let value = loader
//!     .load_source("a: 1\nb: 2\n<<{+<}: {b: 3, c: 4}", "<demo>")
//!     .unwrap();
//! let map = value.as_mapping().unwrap();
//! assert_eq!(map["b"].as_i64(), Some(3));
//! assert_eq!(map["c"].as_i64(), Some(4));
//! ```

mod api;
mod construct;
mod context;
mod deferred;
mod error;
mod eval;
mod generator;
mod include;
mod instructions;
mod interpolation;
mod lazy;
mod loaders;
mod merge;

pub use api::{merge_compositions, Loader};
pub use construct::{construct_simple, value_to_node, Constructor, NullRegistry, TypeRegistry};
pub use context::{add_context_to_tree, add_context_to_tree_with, add_to_context, context_add};
pub use deferred::{
    compose_deferred, construct_deferred, deserialize_deferred, process_deferred,
    serialize_deferred, ForcedDeferral,
};
pub use error::{Error, ErrorKind, Result};
pub use eval::{ExprEngine, SimpleEngine};
pub use generator::process_generators;
pub use include::{parse_include_str, IncludeComponents};
pub use interpolation::{
    evaluate_expression, preprocess_references, resolve_lazy, EvalScope, DEFAULT_EVAL_RECURSION,
};
pub use lazy::{resolve_all_lazy, resolve_lazy_in_place, MAX_RESOLVE_PASSES};
pub use loaders::{
    register_pkg_root, LoaderContent, LoaderEnv, LoaderFn, LoaderRegistry, LoaderResult,
};
pub use merge::{
    add_to_context_key, cli_override_key, merge_values, merged, process_merges, MergeKey,
    MergeMode, MergePriority,
};

// the data model is re-exported so most callers need only this crate
pub use confit_yaml::{CompositionResult, Context, LazyValue, Node, Value};
