//! The composed-document node model.
//!
//! A document is a tree of tagged [`Node`]s. Beyond the three YAML shapes
//! (scalar, mapping, sequence) the model has variants for the composition
//! machinery: merge instructions, unresolved includes, interpolable
//! scalars, and deferred subtrees. Every node carries its tag and source
//! location; the context-carrying variants (include, interpolable,
//! deferred) also hold the symbols visible to expressions inside them.
//!
//! Nodes own their children; `Clone` is the deep copy, so two includes of
//! the same anchor can never alias each other.

use crate::composition::CompositionResult;
use crate::error::{Error, Result};
use crate::interp::InterpolationSpan;
use crate::value::Context;
use confit_keypath::{Addressable, AddressableMut, KeyPath, KeyPathPart};
use confit_source_map::SourceInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MAP_TAG: &str = "tag:yaml.org,2002:map";
pub const DEFAULT_SEQ_TAG: &str = "tag:yaml.org,2002:seq";
pub const DEFAULT_STR_TAG: &str = "tag:yaml.org,2002:str";
pub const INT_TAG: &str = "tag:yaml.org,2002:int";
pub const FLOAT_TAG: &str = "tag:yaml.org,2002:float";
pub const BOOL_TAG: &str = "tag:yaml.org,2002:bool";
pub const NULL_TAG: &str = "tag:yaml.org,2002:null";

/// Scalar value marking an entry for deletion by `delete_unset_nodes`.
pub const UNSET_VALUE: &str = "__!UNSET!__";

pub const INCLUDE_TAG: &str = "!include";
pub const DEFERRED_TAG_PREFIX: &str = "!deferred";

/// Whether a tag names a composition-time instruction.
pub fn is_instruction_tag(tag: &str) -> bool {
    tag == "!define"
        || tag == "!set_default"
        || tag == "!if"
        || tag.starts_with("!each")
        || tag.starts_with("!generate")
}

/// A node in a composed document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Scalar(ScalarNode),
    Mapping(MappingNode),
    Sequence(SequenceNode),
    Merge(MergeNode),
    Include(IncludeNode),
    Interpolable(InterpolableNode),
    Deferred(DeferredNode),
}

/// A plain scalar leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarNode {
    pub tag: String,
    pub value: String,
    pub source: SourceInfo,
    pub anchor: Option<String>,
}

/// An ordered mapping with a key→index lookup kept consistent with the
/// pair list. Duplicate keys are a hard error at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingNode {
    pub tag: String,
    pairs: Vec<(Node, Node)>,
    index: HashMap<String, usize>,
    pub source: SourceInfo,
    pub anchor: Option<String>,
}

/// An ordered sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceNode {
    pub tag: String,
    pub items: Vec<Node>,
    pub source: SourceInfo,
    pub anchor: Option<String>,
}

/// A merge instruction in mapping-key position, holding the raw merge key
/// text (e.g. `<<{+<}[~]@sub.path`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeNode {
    pub raw: String,
    pub source: SourceInfo,
    pub anchor: Option<String>,
}

/// An unresolved include reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeNode {
    /// The include string as written (`file:params.yaml@sub`, `$name`,
    /// `/abs.path`, `.rel`, an anchor name, …)
    pub reference: String,
    pub source: SourceInfo,
    pub anchor: Option<String>,
    /// Symbols visible to expressions inside the include string and the
    /// included content.
    pub context: Context,
}

/// A scalar whose value (or tag) contains interpolation syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolableNode {
    /// The raw text, with `$VAR` shorthands already normalized to `${VAR}`
    pub raw: String,
    pub tag: String,
    pub source: SourceInfo,
    pub anchor: Option<String>,
    pub context: Context,
    /// Outermost spans found at compose time, kept to skip a re-scan
    pub spans: Option<Vec<InterpolationSpan>>,
    /// Snapshot of the composition root, captured when the value contains
    /// `&` references so they stay resolvable after extraction
    pub ref_root: Option<Box<Node>>,
}

/// Which context keys a deferred node clears on resume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ClearCtx {
    #[default]
    None,
    All,
    Keys(Vec<String>),
}

/// A paused subtree: the wrapped node plus everything needed to resume
/// its composition later, possibly in another process.
///
/// Tree walks treat a deferred node as a leaf; keypath traversal passes
/// through to the wrapped value. The captured composition snapshot keeps
/// sibling references (`&/some/other/node`) resolvable after extraction.
/// Process-local handles (the loader) are never stored; they are supplied
/// again at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredNode {
    pub inner: Box<Node>,
    pub path: KeyPath,
    pub context: Context,
    pub clear_ctx: ClearCtx,
    /// Target type name from `!deferred:TypeName`, if any
    pub type_tag: Option<String>,
    /// The enclosing composition at the time deferral was decided
    pub snapshot: Option<Box<CompositionResult>>,
}

impl ScalarNode {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        ScalarNode {
            tag: tag.into(),
            value: value.into(),
            source: SourceInfo::default(),
            anchor: None,
        }
    }

    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = source;
        self
    }

    /// The unset sentinel.
    pub fn unset() -> Self {
        ScalarNode::new(DEFAULT_STR_TAG, UNSET_VALUE)
    }

    pub fn is_unset(&self) -> bool {
        self.value == UNSET_VALUE
    }
}

impl MappingNode {
    /// Build a mapping, checking for duplicate keys.
    pub fn with_pairs(tag: impl Into<String>, pairs: Vec<(Node, Node)>) -> Result<Self> {
        let mut node = MappingNode {
            tag: tag.into(),
            pairs,
            index: HashMap::new(),
            source: SourceInfo::default(),
            anchor: None,
        };
        node.recompute_index()?;
        Ok(node)
    }

    /// An empty mapping with the default tag.
    pub fn empty() -> Self {
        MappingNode {
            tag: DEFAULT_MAP_TAG.to_string(),
            pairs: Vec::new(),
            index: HashMap::new(),
            source: SourceInfo::default(),
            anchor: None,
        }
    }

    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = source;
        self
    }

    fn recompute_index(&mut self) -> Result<()> {
        self.index.clear();
        for (idx, (key, _)) in self.pairs.iter().enumerate() {
            let key_str = key.key_repr().to_string();
            if self.index.insert(key_str.clone(), idx).is_some() {
                return Err(Error::DuplicateKey {
                    key: key_str,
                    location: key.source().clone(),
                });
            }
        }
        Ok(())
    }

    /// Rebuild the index after key nodes were mutated in place (e.g. an
    /// interpolable key was evaluated).
    pub fn refresh_index(&mut self) -> Result<()> {
        self.recompute_index()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.index.get(key).map(|&i| &self.pairs[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        let i = *self.index.get(key)?;
        Some(&mut self.pairs[i].1)
    }

    /// The key *node* for an entry.
    pub fn key_node(&self, key: &str) -> Option<&Node> {
        self.index.get(key).map(|&i| &self.pairs[i].0)
    }

    pub fn key_node_mut(&mut self, key: &str) -> Option<&mut Node> {
        let i = *self.index.get(key)?;
        Some(&mut self.pairs[i].0)
    }

    /// Insert or replace. Replacing keeps the original key node.
    pub fn insert(&mut self, key: Node, value: Node) {
        let key_str = key.key_repr().to_string();
        match self.index.get(&key_str) {
            Some(&i) => self.pairs[i].1 = value,
            None => {
                self.pairs.push((key, value));
                self.index.insert(key_str, self.pairs.len() - 1);
            }
        }
    }

    /// Insert with a plain string key.
    pub fn insert_str(&mut self, key: &str, value: Node) {
        self.insert(Node::Scalar(ScalarNode::new(DEFAULT_STR_TAG, key)), value);
    }

    /// Remove an entry, returning the (key, value) pair.
    pub fn remove(&mut self, key: &str) -> Option<(Node, Node)> {
        let i = *self.index.get(key)?;
        let pair = self.pairs.remove(i);
        // indices after the removal point shift down
        self.index.clear();
        for (idx, (k, _)) in self.pairs.iter().enumerate() {
            self.index.insert(k.key_repr().to_string(), idx);
        }
        Some(pair)
    }

    pub fn pairs(&self) -> &[(Node, Node)] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut Vec<(Node, Node)> {
        &mut self.pairs
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.key_repr())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Node, &Node)> {
        self.pairs.iter().map(|(k, v)| (k, v))
    }
}

impl SequenceNode {
    pub fn new(items: Vec<Node>) -> Self {
        SequenceNode {
            tag: DEFAULT_SEQ_TAG.to_string(),
            items,
            source: SourceInfo::default(),
            anchor: None,
        }
    }

    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = source;
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, node: Node) {
        self.items.push(node);
    }

    /// An empty sequence inheriting a mapping's location and anchor, used
    /// when an instruction turns a mapping into a sequence.
    pub fn from_mapping_shell(mapping: &MappingNode) -> Self {
        let tag = if mapping.tag == DEFAULT_MAP_TAG {
            DEFAULT_SEQ_TAG.to_string()
        } else {
            mapping.tag.clone()
        };
        SequenceNode {
            tag,
            items: Vec::new(),
            source: mapping.source.clone(),
            anchor: mapping.anchor.clone(),
        }
    }
}

impl Node {
    /// The node's tag.
    pub fn tag(&self) -> &str {
        match self {
            Node::Scalar(n) => &n.tag,
            Node::Mapping(n) => &n.tag,
            Node::Sequence(n) => &n.tag,
            Node::Merge(_) => DEFAULT_STR_TAG,
            Node::Include(_) => INCLUDE_TAG,
            Node::Interpolable(n) => &n.tag,
            Node::Deferred(n) => n.inner.tag(),
        }
    }

    /// Set the tag where the variant carries one.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        match self {
            Node::Scalar(n) => n.tag = tag,
            Node::Mapping(n) => n.tag = tag,
            Node::Sequence(n) => n.tag = tag,
            Node::Interpolable(n) => n.tag = tag,
            Node::Deferred(n) => n.inner.set_tag(tag),
            Node::Merge(_) | Node::Include(_) => {}
        }
    }

    /// Reset the tag to the default for the node's shape.
    pub fn reset_tag(&mut self) {
        match self {
            Node::Mapping(n) => n.tag = DEFAULT_MAP_TAG.to_string(),
            Node::Sequence(n) => n.tag = DEFAULT_SEQ_TAG.to_string(),
            Node::Scalar(n) => n.tag = DEFAULT_STR_TAG.to_string(),
            Node::Interpolable(n) => n.tag = DEFAULT_STR_TAG.to_string(),
            Node::Deferred(n) => n.inner.reset_tag(),
            Node::Merge(_) | Node::Include(_) => {}
        }
    }

    /// Whether the tag was written by the user (starts with `!`).
    pub fn has_user_tag(&self) -> bool {
        self.tag().starts_with('!')
    }

    pub fn source(&self) -> &SourceInfo {
        match self {
            Node::Scalar(n) => &n.source,
            Node::Mapping(n) => &n.source,
            Node::Sequence(n) => &n.source,
            Node::Merge(n) => &n.source,
            Node::Include(n) => &n.source,
            Node::Interpolable(n) => &n.source,
            Node::Deferred(n) => n.inner.source(),
        }
    }

    pub fn anchor(&self) -> Option<&str> {
        match self {
            Node::Scalar(n) => n.anchor.as_deref(),
            Node::Mapping(n) => n.anchor.as_deref(),
            Node::Sequence(n) => n.anchor.as_deref(),
            Node::Merge(n) => n.anchor.as_deref(),
            Node::Include(n) => n.anchor.as_deref(),
            Node::Interpolable(n) => n.anchor.as_deref(),
            Node::Deferred(_) => None,
        }
    }

    /// The scalar text used when this node appears in key position.
    pub fn key_repr(&self) -> &str {
        match self {
            Node::Scalar(n) => &n.value,
            Node::Merge(n) => &n.raw,
            Node::Include(n) => &n.reference,
            Node::Interpolable(n) => &n.raw,
            Node::Deferred(n) => n.inner.key_repr(),
            Node::Mapping(_) | Node::Sequence(_) => "",
        }
    }

    /// The context attached to this node, for the variants that carry one.
    pub fn context(&self) -> Option<&Context> {
        match self {
            Node::Include(n) => Some(&n.context),
            Node::Interpolable(n) => Some(&n.context),
            Node::Deferred(n) => Some(&n.context),
            _ => None,
        }
    }

    pub fn context_mut(&mut self) -> Option<&mut Context> {
        match self {
            Node::Include(n) => Some(&mut n.context),
            Node::Interpolable(n) => Some(&mut n.context),
            Node::Deferred(n) => Some(&mut n.context),
            _ => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Node::Scalar(n) if n.is_unset())
    }

    pub fn as_mapping(&self) -> Option<&MappingNode> {
        match self {
            Node::Mapping(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut MappingNode> {
        match self {
            Node::Mapping(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceNode> {
        match self {
            Node::Sequence(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarNode> {
        match self {
            Node::Scalar(n) => Some(n),
            _ => None,
        }
    }

    /// Visit this node and its descendants with their keypaths. Mapping
    /// keys are visited at mapping-key paths; deferred nodes are leaves.
    pub fn walk<F: FnMut(&Node, &KeyPath)>(&self, start: &KeyPath, f: &mut F) {
        f(self, start);
        let base = start.removed_mapping_key();
        match self {
            Node::Mapping(mapping) => {
                for (key, value) in mapping.pairs() {
                    let key_str = key.key_repr().to_string();
                    let mut key_path = base.clone();
                    key_path
                        .down_part(KeyPathPart::MappingKey)
                        .down_key(&key_str);
                    key.walk(&key_path, f);
                    value.walk(&base.child(&key_str), f);
                }
            }
            Node::Sequence(sequence) => {
                for (i, item) in sequence.items.iter().enumerate() {
                    item.walk(&base.child_index(i), f);
                }
            }
            _ => {}
        }
    }

    /// Mutable walk. Visits the node before its children.
    pub fn walk_mut<F: FnMut(&mut Node, &KeyPath)>(&mut self, start: &KeyPath, f: &mut F) {
        f(self, start);
        let base = start.removed_mapping_key();
        match self {
            Node::Mapping(mapping) => {
                for (key, value) in mapping.pairs_mut() {
                    let key_str = key.key_repr().to_string();
                    let mut key_path = base.clone();
                    key_path
                        .down_part(KeyPathPart::MappingKey)
                        .down_key(&key_str);
                    key.walk_mut(&key_path, f);
                    value.walk_mut(&base.child(&key_str), f);
                }
            }
            Node::Sequence(sequence) => {
                for (i, item) in sequence.items.iter_mut().enumerate() {
                    item.walk_mut(&base.child_index(i), f);
                }
            }
            _ => {}
        }
    }
}

impl Addressable for Node {
    fn get_child(&self, key: &str) -> Option<&Self> {
        match self {
            Node::Mapping(mapping) => mapping.get(key),
            Node::Sequence(sequence) => key.parse::<usize>().ok().and_then(|i| sequence.items.get(i)),
            _ => None,
        }
    }

    fn get_key_node(&self, key: &str) -> Option<&Self> {
        match self {
            Node::Mapping(mapping) => mapping.key_node(key),
            _ => None,
        }
    }

    fn passthrough(&self) -> Option<&Self> {
        match self {
            Node::Deferred(deferred) => Some(&deferred.inner),
            _ => None,
        }
    }
}

impl AddressableMut for Node {
    fn get_child_mut(&mut self, key: &str) -> Option<&mut Self> {
        match self {
            Node::Mapping(mapping) => mapping.get_mut(key),
            Node::Sequence(sequence) => {
                key.parse::<usize>().ok().and_then(|i| sequence.items.get_mut(i))
            }
            _ => None,
        }
    }

    fn ensure_child(&mut self, key: &str) -> Option<&mut Self> {
        match self {
            Node::Mapping(mapping) => {
                if !mapping.contains_key(key) {
                    mapping.insert_str(key, Node::Mapping(MappingNode::empty()));
                }
                mapping.get_mut(key)
            }
            _ => self.get_child_mut(key),
        }
    }

    fn passthrough_mut(&mut self) -> Option<&mut Self> {
        match self {
            Node::Deferred(deferred) => Some(&mut deferred.inner),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(value: &str) -> Node {
        Node::Scalar(ScalarNode::new(DEFAULT_STR_TAG, value))
    }

    #[test]
    fn test_mapping_duplicate_key_rejected() {
        let pairs = vec![
            (scalar("a"), scalar("1")),
            (scalar("a"), scalar("2")),
        ];
        assert!(MappingNode::with_pairs(DEFAULT_MAP_TAG, pairs).is_err());
    }

    #[test]
    fn test_mapping_insert_and_remove_keep_index() {
        let mut mapping = MappingNode::empty();
        mapping.insert_str("a", scalar("1"));
        mapping.insert_str("b", scalar("2"));
        mapping.insert_str("c", scalar("3"));
        assert_eq!(mapping.len(), 3);

        mapping.remove("b");
        assert_eq!(mapping.len(), 2);
        assert!(mapping.get("b").is_none());
        // index for keys after the removal point stays correct
        assert!(matches!(mapping.get("c"), Some(Node::Scalar(s)) if s.value == "3"));
    }

    #[test]
    fn test_mapping_replace_keeps_key_node() {
        let mut mapping = MappingNode::empty();
        mapping.insert_str("a", scalar("1"));
        mapping.insert_str("a", scalar("2"));
        assert_eq!(mapping.len(), 1);
        assert!(matches!(mapping.get("a"), Some(Node::Scalar(s)) if s.value == "2"));
    }

    #[test]
    fn test_keypath_traversal_over_nodes() {
        let inner = MappingNode::with_pairs(
            DEFAULT_MAP_TAG,
            vec![(scalar("x"), scalar("42"))],
        )
        .unwrap();
        let root = MappingNode::with_pairs(
            DEFAULT_MAP_TAG,
            vec![(scalar("outer"), Node::Mapping(inner))],
        )
        .unwrap();
        let root = Node::Mapping(root);

        let node = KeyPath::parse("/outer.x").get_obj(&root).unwrap();
        assert!(matches!(node, Node::Scalar(s) if s.value == "42"));
    }

    #[test]
    fn test_keypath_through_deferred_passthrough() {
        let inner = MappingNode::with_pairs(
            DEFAULT_MAP_TAG,
            vec![(scalar("x"), scalar("1"))],
        )
        .unwrap();
        let deferred = Node::Deferred(DeferredNode {
            inner: Box::new(Node::Mapping(inner)),
            path: KeyPath::root(),
            context: Context::new(),
            clear_ctx: ClearCtx::None,
            type_tag: None,
            snapshot: None,
        });
        let root = Node::Mapping(
            MappingNode::with_pairs(DEFAULT_MAP_TAG, vec![(scalar("d"), deferred)]).unwrap(),
        );
        let node = KeyPath::parse("/d.x").get_obj(&root).unwrap();
        assert!(matches!(node, Node::Scalar(s) if s.value == "1"));
    }

    #[test]
    fn test_mapping_key_lookup() {
        let root = Node::Mapping(
            MappingNode::with_pairs(DEFAULT_MAP_TAG, vec![(scalar("a"), scalar("1"))]).unwrap(),
        );
        let mut path = KeyPath::root();
        path.down_part(KeyPathPart::MappingKey).down_key("a");
        let key_node = path.get_obj(&root).unwrap();
        assert!(matches!(key_node, Node::Scalar(s) if s.value == "a"));
    }

    #[test]
    fn test_walk_paths() {
        let root = Node::Mapping(
            MappingNode::with_pairs(
                DEFAULT_MAP_TAG,
                vec![(
                    scalar("a"),
                    Node::Sequence(SequenceNode::new(vec![scalar("x"), scalar("y")])),
                )],
            )
            .unwrap(),
        );
        let mut seen = Vec::new();
        root.walk(&KeyPath::root(), &mut |_, path| {
            seen.push(path.to_string());
        });
        assert!(seen.contains(&"/".to_string()));
        assert!(seen.contains(&"/a".to_string()));
        assert!(seen.contains(&"/a.0".to_string()));
        assert!(seen.contains(&"/a.1".to_string()));
    }

    #[test]
    fn test_walk_does_not_enter_deferred() {
        let inner = Node::Mapping(
            MappingNode::with_pairs(DEFAULT_MAP_TAG, vec![(scalar("hidden"), scalar("1"))])
                .unwrap(),
        );
        let root = Node::Deferred(DeferredNode {
            inner: Box::new(inner),
            path: KeyPath::root(),
            context: Context::new(),
            clear_ctx: ClearCtx::None,
            type_tag: None,
            snapshot: None,
        });
        let mut count = 0;
        root.walk(&KeyPath::root(), &mut |_, _| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unset_detection() {
        assert!(Node::Scalar(ScalarNode::unset()).is_unset());
        assert!(!scalar("x").is_unset());
    }
}
