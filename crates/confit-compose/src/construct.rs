//! Construction: resolved nodes → values.
//!
//! Construction is a pure fold over the node tree. Scalars become typed
//! values according to their tags, interpolable scalars become lazy
//! values (evaluation happens later, see `lazy`), deferred nodes surface
//! as-is. Tag-to-type refinement goes through a caller-supplied
//! [`TypeRegistry`]; the composition pipeline itself never depends on one.

use crate::error::{Error, Result};
use crate::eval::{ExprEngine, SimpleEngine};
use crate::interpolation::{evaluate_expression, EvalScope};
use crate::merge::add_to_context_key;
use confit_keypath::KeyPath;
use confit_source_map::SourceInfo;
use confit_yaml::{
    Context, LazyValue, Node, Value, BOOL_TAG, FLOAT_TAG, INT_TAG, NULL_TAG,
};
use confit_yaml::interp::unescape_interpolation;
use indexmap::IndexMap;
use std::sync::Arc;

/// Tag-driven refinement of constructed values.
///
/// The registry sees every user-tagged (`!...`) value after its base shape
/// has been constructed, and may replace it, validate it, or reject it.
pub trait TypeRegistry: Send + Sync {
    fn construct(&self, tag: &str, value: Value, source: &SourceInfo) -> Result<Value>;
}

/// A registry that passes every value through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRegistry;

impl TypeRegistry for NullRegistry {
    fn construct(&self, _tag: &str, value: Value, _source: &SourceInfo) -> Result<Value> {
        Ok(value)
    }
}

/// Node → value construction.
pub struct Constructor<'a> {
    pub registry: Arc<dyn TypeRegistry>,
    pub engine: &'a dyn ExprEngine,
    /// The composition root, for eagerly evaluated mapping keys
    pub root: Option<&'a Node>,
    /// Loader-level symbols, under any node-local context
    pub context: &'a Context,
}

impl<'a> Constructor<'a> {
    pub fn construct(&self, node: &Node, path: &KeyPath) -> Result<Value> {
        match node {
            Node::Scalar(scalar) => {
                if scalar.is_unset() {
                    return Ok(Value::Null);
                }
                let value = scalar_value(&scalar.tag, &scalar.value, &scalar.source)?;
                if scalar.tag.starts_with('!') {
                    self.registry.construct(&scalar.tag, value, &scalar.source)
                } else {
                    Ok(value)
                }
            }

            Node::Mapping(mapping) => {
                let mut out = IndexMap::with_capacity(mapping.len());
                for (key_node, value_node) in mapping.iter() {
                    let key = self.construct_key(key_node, path)?;
                    let value = self.construct(value_node, &path.child(&key))?;
                    out.insert(key, value);
                }
                let value = Value::Mapping(out);
                if mapping.tag.starts_with('!') {
                    self.registry.construct(&mapping.tag, value, &mapping.source)
                } else {
                    Ok(value)
                }
            }

            Node::Sequence(sequence) => {
                let mut out = Vec::with_capacity(sequence.len());
                for (i, item) in sequence.items.iter().enumerate() {
                    out.push(self.construct(item, &path.child_index(i))?);
                }
                let value = Value::Sequence(out);
                if sequence.tag.starts_with('!') {
                    self.registry
                        .construct(&sequence.tag, value, &sequence.source)
                } else {
                    Ok(value)
                }
            }

            Node::Interpolable(interpolable) => {
                // node-local bindings shadow loader-level ones
                let context = if self.context.is_empty() {
                    interpolable.context.clone()
                } else {
                    crate::context::context_add(
                        self.context,
                        &interpolable.context,
                        &add_to_context_key(),
                    )
                };

                // an interpolable tag is evaluated now; the value stays lazy
                let tag = if confit_yaml::interp::has_interpolation(&interpolable.tag) {
                    let scope = EvalScope {
                        current_path: path.clone(),
                        node_root: self.root,
                        value_root: None,
                        ref_root: interpolable.ref_root.as_deref(),
                        context: &context,
                        engine: self.engine,
                    };
                    evaluate_expression(&interpolable.tag, None, &scope)?.coerce_string()
                } else {
                    interpolable.tag.clone()
                };

                let mut lazy = LazyValue::new(interpolable.raw.clone());
                lazy.spans = interpolable.spans.clone();
                lazy.current_path = path.clone();
                lazy.context = context;
                lazy.ref_root = interpolable.ref_root.clone();
                if tag.starts_with('!') {
                    let registry = Arc::clone(&self.registry);
                    let source = interpolable.source.clone();
                    lazy.validator = Some(Arc::new(move |value| {
                        registry
                            .construct(&tag, value, &source)
                            .map_err(|e| e.to_string())
                    }));
                }
                Ok(Value::Lazy(Box::new(lazy)))
            }

            Node::Deferred(deferred) => Ok(Value::Deferred(Box::new(deferred.clone()))),

            Node::Merge(merge) => Err(Error::construction(format!(
                "unprocessed merge instruction `{}` reached construction",
                merge.raw
            ))
            .at(&merge.source)),

            Node::Include(include) => Err(Error::construction(format!(
                "unresolved include `{}` reached construction",
                include.reference
            ))
            .at(&include.source)),
        }
    }

    /// Mapping keys are evaluated eagerly: an interpolable key must
    /// produce a concrete key string at construction time.
    fn construct_key(&self, key_node: &Node, parent_path: &KeyPath) -> Result<String> {
        match key_node {
            Node::Interpolable(interpolable) => {
                let context = crate::context::context_add(
                    self.context,
                    &interpolable.context,
                    &add_to_context_key(),
                );
                let scope = EvalScope {
                    current_path: parent_path.clone(),
                    node_root: self.root,
                    value_root: None,
                    ref_root: interpolable.ref_root.as_deref(),
                    context: &context,
                    engine: self.engine,
                };
                Ok(evaluate_expression(&interpolable.raw, interpolable.spans.as_deref(), &scope)?
                    .coerce_string())
            }
            other => Ok(unescape_interpolation(other.key_repr())),
        }
    }
}

/// Construct with no registry, no roots, and an empty context. Used for
/// referenced subtrees and instruction values.
pub fn construct_simple(node: &Node) -> Result<Value> {
    let context = Context::new();
    let constructor = Constructor {
        registry: Arc::new(NullRegistry),
        engine: &SimpleEngine,
        root: None,
        context: &context,
    };
    constructor.construct(node, &KeyPath::root())
}

fn scalar_value(tag: &str, text: &str, source: &SourceInfo) -> Result<Value> {
    match tag {
        NULL_TAG => Ok(Value::Null),
        BOOL_TAG => match text {
            "true" | "True" | "TRUE" => Ok(Value::Bool(true)),
            "false" | "False" | "FALSE" => Ok(Value::Bool(false)),
            _ => Err(Error::construction(format!("invalid bool `{text}`")).at(source)),
        },
        INT_TAG => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::construction(format!("invalid int `{text}`")).at(source)),
        FLOAT_TAG => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::construction(format!("invalid float `{text}`")).at(source)),
        _ => Ok(Value::String(unescape_interpolation(text))),
    }
}

/// Turn a value back into a composable node, for in-memory includes and
/// generated documents.
pub fn value_to_node(value: &Value) -> Node {
    use confit_yaml::{
        InterpolableNode, MappingNode, ScalarNode, SequenceNode, DEFAULT_STR_TAG,
    };
    match value {
        Value::Null => Node::Scalar(ScalarNode::new(NULL_TAG, "null")),
        Value::Bool(b) => Node::Scalar(ScalarNode::new(BOOL_TAG, b.to_string())),
        Value::Int(i) => Node::Scalar(ScalarNode::new(INT_TAG, i.to_string())),
        Value::Float(f) => Node::Scalar(ScalarNode::new(FLOAT_TAG, f.to_string())),
        Value::String(s) => Node::Scalar(ScalarNode::new(DEFAULT_STR_TAG, s.clone())),
        Value::Sequence(items) => {
            Node::Sequence(SequenceNode::new(items.iter().map(value_to_node).collect()))
        }
        Value::Mapping(map) => {
            let pairs = map
                .iter()
                .map(|(k, v)| {
                    (
                        Node::Scalar(ScalarNode::new(DEFAULT_STR_TAG, k.clone())),
                        value_to_node(v),
                    )
                })
                .collect();
            Node::Mapping(
                MappingNode::with_pairs(confit_yaml::DEFAULT_MAP_TAG, pairs)
                    .expect("value mapping keys are unique"),
            )
        }
        Value::Node(node) => (**node).clone(),
        Value::Lazy(lazy) => Node::Interpolable(InterpolableNode {
            raw: lazy.raw.clone(),
            tag: DEFAULT_STR_TAG.to_string(),
            source: SourceInfo::default(),
            anchor: None,
            context: lazy.context.clone(),
            spans: lazy.spans.clone(),
            ref_root: lazy.ref_root.clone(),
        }),
        Value::Deferred(deferred) => Node::Deferred((**deferred).clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confit_yaml::compose_str;

    #[test]
    fn test_construct_scalars() {
        let comp = compose_str("a: 1\nb: true\nc: hello\nd: 2.5\ne: null", None).unwrap();
        let value = construct_simple(&comp.root).unwrap();
        let map = value.as_mapping().unwrap();
        assert_eq!(map["a"].as_i64(), Some(1));
        assert_eq!(map["b"].as_bool(), Some(true));
        assert_eq!(map["c"].as_str(), Some("hello"));
        assert_eq!(map["d"].as_f64(), Some(2.5));
        assert_eq!(map["e"], Value::Null);
    }

    #[test]
    fn test_construct_nested() {
        let comp = compose_str("outer:\n  items: [1, 2, 3]", None).unwrap();
        let value = construct_simple(&comp.root).unwrap();
        let items = value.as_mapping().unwrap()["outer"].as_mapping().unwrap()["items"]
            .as_sequence()
            .unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_interpolable_becomes_lazy() {
        let comp = compose_str("v: ${1 + 2}", None).unwrap();
        let value = construct_simple(&comp.root).unwrap();
        assert!(value.as_mapping().unwrap()["v"].is_lazy());
    }

    #[test]
    fn test_escaped_interpolation_unescaped_at_construction() {
        let comp = compose_str("v: \"\\\\${literal}\"", None).unwrap();
        let value = construct_simple(&comp.root).unwrap();
        assert_eq!(value.as_mapping().unwrap()["v"].as_str(), Some("${literal}"));
    }

    #[test]
    fn test_value_node_roundtrip() {
        let comp = compose_str("a: 1\nb: [x, y]", None).unwrap();
        let value = construct_simple(&comp.root).unwrap();
        let node = value_to_node(&value);
        let back = construct_simple(&node).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn test_registry_sees_user_tags() {
        struct UpperRegistry;
        impl TypeRegistry for UpperRegistry {
            fn construct(&self, tag: &str, value: Value, _s: &SourceInfo) -> Result<Value> {
                assert_eq!(tag, "!upper");
                Ok(Value::String(
                    value.as_str().unwrap_or_default().to_uppercase(),
                ))
            }
        }
        let comp = compose_str("v: !upper hello", None).unwrap();
        let context = Context::new();
        let constructor = Constructor {
            registry: Arc::new(UpperRegistry),
            engine: &SimpleEngine,
            root: None,
            context: &context,
        };
        let value = constructor.construct(&comp.root, &KeyPath::root()).unwrap();
        assert_eq!(value.as_mapping().unwrap()["v"].as_str(), Some("HELLO"));
    }
}
