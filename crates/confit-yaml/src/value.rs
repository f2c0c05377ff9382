//! Constructed values and contexts.
//!
//! [`Value`] is what the construction layer produces from a resolved node
//! tree: plain data plus two composition-aware leaves: a lazy
//! interpolation awaiting evaluation, and a deferred subtree whose
//! construction was paused. Contexts (the symbols visible to expressions)
//! are ordered maps of values.

use crate::interp::InterpolationSpan;
use crate::node::{DeferredNode, Node};
use confit_keypath::{Addressable, AddressableMut, KeyPath};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Symbols visible to interpolation expressions at some point in the tree.
pub type Context = IndexMap<String, Value>;

/// A post-evaluation validator, reattached by the owner after
/// deserialization (callbacks are never part of the wire form).
pub type Validator = Arc<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;

/// A constructed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(IndexMap<String, Value>),
    /// A composed subtree carried as data (in-memory includes, anchor
    /// references)
    Node(Box<Node>),
    /// An interpolation awaiting evaluation
    Lazy(Box<LazyValue>),
    /// A paused subtree surfaced to the caller
    Deferred(Box<DeferredNode>),
}

/// A lazy interpolable value: raw text plus everything needed to evaluate
/// it later against the live tree.
#[derive(Clone, Serialize, Deserialize)]
pub struct LazyValue {
    /// The raw interpolable text
    pub raw: String,
    /// Pre-parsed outermost spans, if the composer already found them
    pub spans: Option<Vec<InterpolationSpan>>,
    /// Where this value sits in its tree; relative references resolve
    /// against the parent of this path
    pub current_path: KeyPath,
    /// Symbols captured from the surrounding composition
    pub context: Context,
    /// Snapshot root for `&` references
    pub ref_root: Option<Box<Node>>,
    /// Memoized result: set on first resolution, reused afterwards
    pub resolved: Option<Box<Value>>,
    /// Post-evaluation validator; excluded from serialization
    #[serde(skip)]
    pub validator: Option<Validator>,
}

impl LazyValue {
    pub fn new(raw: impl Into<String>) -> Self {
        LazyValue {
            raw: raw.into(),
            spans: None,
            current_path: KeyPath::root(),
            context: Context::new(),
            ref_root: None,
            resolved: None,
            validator: None,
        }
    }

    /// Reattach a validator after deserialization.
    pub fn reattach_validator(&mut self, validator: Validator) {
        self.validator = Some(validator);
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyValue")
            .field("raw", &self.raw)
            .field("current_path", &self.current_path)
            .field("resolved", &self.resolved)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl PartialEq for LazyValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
            && self.current_path == other.current_path
            && self.context == other.context
            && self.resolved == other.resolved
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Value::Lazy(_))
    }

    /// Truthiness for `!if` conditions: null, false, zero, empty string
    /// and empty containers are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Sequence(items) => !items.is_empty(),
            Value::Mapping(map) => !map.is_empty(),
            Value::Node(_) | Value::Lazy(_) | Value::Deferred(_) => true,
        }
    }

    /// The string form used when a value is spliced into surrounding text.
    pub fn coerce_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            other => serde_json::to_string(&other.to_json_lossy()).unwrap_or_default(),
        }
    }

    /// Convert to JSON for output. Lazy values render as their raw text,
    /// deferred subtrees and nodes as placeholders.
    pub fn to_json_lossy(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json_lossy).collect())
            }
            Value::Mapping(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_lossy()))
                    .collect(),
            ),
            Value::Lazy(lazy) => serde_json::Value::String(lazy.raw.clone()),
            Value::Node(_) => serde_json::Value::String("<node>".to_string()),
            Value::Deferred(_) => serde_json::Value::String("<deferred>".to_string()),
        }
    }

    /// A short name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Node(_) => "node",
            Value::Lazy(_) => "lazy",
            Value::Deferred(_) => "deferred",
        }
    }
}

impl Addressable for Value {
    fn get_child(&self, key: &str) -> Option<&Self> {
        match self {
            Value::Mapping(map) => map.get(key),
            Value::Sequence(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    fn passthrough(&self) -> Option<&Self> {
        match self {
            // a memoized lazy value is transparent to traversal
            Value::Lazy(lazy) => lazy.resolved.as_deref(),
            _ => None,
        }
    }
}

impl AddressableMut for Value {
    fn get_child_mut(&mut self, key: &str) -> Option<&mut Self> {
        match self {
            Value::Mapping(map) => map.get_mut(key),
            Value::Sequence(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        }
    }

    fn ensure_child(&mut self, key: &str) -> Option<&mut Self> {
        match self {
            Value::Mapping(map) => Some(
                map.entry(key.to_string())
                    .or_insert_with(|| Value::Mapping(IndexMap::new())),
            ),
            _ => self.get_child_mut(key),
        }
    }

    fn passthrough_mut(&mut self) -> Option<&mut Self> {
        match self {
            Value::Lazy(lazy) => lazy.resolved.as_deref_mut(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
