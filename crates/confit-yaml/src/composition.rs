//! Composition results: a tree root plus lookup indices.
//!
//! A [`CompositionResult`] bundles the composed root with everything later
//! pipeline stages need to find their work: keypaths of the "special"
//! nodes per category, and an anchor-name → keypath table. Structural
//! edits go through [`CompositionResult::set_at`], which keeps the indices
//! consistent by rebuilding them.

use crate::error::{Error, Result};
use crate::node::{is_instruction_tag, MappingNode, Node, ScalarNode, DEFERRED_TAG_PREFIX};
use confit_keypath::KeyPath;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Keypaths of special nodes, one list per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialNodes {
    pub includes: Vec<KeyPath>,
    pub merges: Vec<KeyPath>,
    pub interpolables: Vec<KeyPath>,
    pub instructions: Vec<KeyPath>,
    pub deferred: Vec<KeyPath>,
}

/// A composed document plus its lookup indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionResult {
    pub root: Node,
    pub anchor_paths: IndexMap<String, KeyPath>,
    pub special: SpecialNodes,
}

impl CompositionResult {
    /// Wrap a root node and build all indices.
    pub fn new(root: Node) -> Self {
        let mut result = CompositionResult {
            root,
            anchor_paths: IndexMap::new(),
            special: SpecialNodes::default(),
        };
        result.reindex();
        result
    }

    /// Rebuild the special-node lists and the anchor table from the tree.
    ///
    /// Special-node lists come out ordered deepest-first, the order every
    /// processing stage consumes them in.
    pub fn reindex(&mut self) {
        let mut special = SpecialNodes::default();
        let mut anchors = IndexMap::new();

        self.root.walk(&KeyPath::root(), &mut |node, path| {
            if let Some(anchor) = node.anchor() {
                anchors.insert(anchor.to_string(), path.clone());
            }
            match node {
                Node::Include(_) => special.includes.push(path.clone()),
                Node::Merge(_) => special.merges.push(path.clone()),
                Node::Interpolable(_) => special.interpolables.push(path.clone()),
                Node::Deferred(_) => special.deferred.push(path.clone()),
                _ => {}
            }
            if is_instruction_tag(node.tag()) {
                special.instructions.push(path.clone());
            }
            if node.tag().starts_with(DEFERRED_TAG_PREFIX) && !matches!(node, Node::Deferred(_)) {
                special.deferred.push(path.clone());
            }
        });

        sort_deepest_first(&mut special.includes);
        sort_deepest_first(&mut special.merges);
        sort_deepest_first(&mut special.interpolables);
        sort_deepest_first(&mut special.deferred);
        // instructions run shallowest-first
        special.instructions.sort_by_key(|p| p.depth());

        self.special = special;
        self.anchor_paths = anchors;
    }

    /// Resolve a keypath to a node.
    pub fn get(&self, path: &KeyPath) -> Result<&Node> {
        Ok(path.get_obj(&self.root)?)
    }

    /// Resolve a keypath to a node, mutably.
    pub fn get_mut(&mut self, path: &KeyPath) -> Result<&mut Node> {
        Ok(path.get_obj_mut(&mut self.root)?)
    }

    /// Replace the node at a path and rebuild the indices.
    pub fn set_at(&mut self, path: &KeyPath, new_node: Node) -> Result<()> {
        let simplified = path.simplified();
        if simplified == KeyPath::root() || simplified.is_empty() {
            self.root = new_node;
        } else {
            let parent_path = simplified.parent();
            let key = simplified
                .last_key()
                .ok_or_else(|| Error::InvalidStructure {
                    message: format!("cannot set at path `{simplified}`"),
                    location: None,
                })?
                .to_string();
            let parent = parent_path.get_obj_mut(&mut self.root)?;
            match parent {
                Node::Mapping(mapping) => {
                    if mapping.contains_key(&key) {
                        *mapping.get_mut(&key).expect("key present") = new_node;
                    } else {
                        mapping.insert(
                            Node::Scalar(ScalarNode::new(
                                crate::node::DEFAULT_STR_TAG,
                                key.as_str(),
                            )),
                            new_node,
                        );
                    }
                }
                Node::Sequence(sequence) => {
                    let idx: usize = key.parse().map_err(|_| Error::InvalidStructure {
                        message: format!("invalid sequence index `{key}`"),
                        location: None,
                    })?;
                    if idx >= sequence.items.len() {
                        return Err(Error::InvalidStructure {
                            message: format!("sequence index {idx} out of bounds"),
                            location: Some(sequence.source.clone()),
                        });
                    }
                    sequence.items[idx] = new_node;
                }
                other => {
                    return Err(Error::InvalidStructure {
                        message: format!(
                            "cannot set child of non-container node (tag `{}`)",
                            other.tag()
                        ),
                        location: Some(other.source().clone()),
                    })
                }
            }
        }
        self.reindex();
        Ok(())
    }

    /// A new composition rooted at a sub-path of this one. The subtree is
    /// cloned, so mutating the result never affects the original.
    pub fn rerooted(&self, new_root: &KeyPath) -> Result<CompositionResult> {
        let node = new_root.get_obj(&self.root)?.clone();
        Ok(CompositionResult::new(node))
    }

    /// Visit every node with its path.
    pub fn walk<F: FnMut(&Node, &KeyPath)>(&self, mut f: F) {
        self.root.walk(&KeyPath::root(), &mut f);
    }

    /// Visit every node mutably. Callers that change structure should
    /// [`CompositionResult::reindex`] afterwards.
    pub fn walk_mut<F: FnMut(&mut Node, &KeyPath)>(&mut self, mut f: F) {
        self.root.walk_mut(&KeyPath::root(), &mut f);
    }
}

fn sort_deepest_first(paths: &mut [KeyPath]) {
    paths.sort_by(|a, b| b.depth().cmp(&a.depth()));
}

/// Remove unset entries from mappings and sequences.
///
/// A mapping emptied by the removal (and not carrying a user tag) becomes
/// unset itself, cascading upward; the pass repeats until nothing changes.
/// Returns whether anything changed.
pub fn delete_unset_nodes(comp: &mut CompositionResult) -> bool {
    let mut any = false;
    loop {
        let mut changed = false;
        let root = std::mem::replace(&mut comp.root, Node::Mapping(MappingNode::empty()));
        comp.root = strip_unset(root, &mut changed);
        if !changed {
            break;
        }
        any = true;
    }
    if any {
        comp.reindex();
    }
    any
}

fn strip_unset(node: Node, changed: &mut bool) -> Node {
    match node {
        Node::Mapping(mapping) => {
            let tag = mapping.tag.clone();
            let source = mapping.source.clone();
            let anchor = mapping.anchor.clone();
            let mut pairs = Vec::new();
            for (key, value) in mapping.pairs().iter().cloned() {
                if value.is_unset() {
                    *changed = true;
                    continue;
                }
                pairs.push((key, strip_unset(value, changed)));
            }
            if pairs.is_empty() && !tag.starts_with('!') {
                *changed = true;
                return Node::Scalar(ScalarNode::unset());
            }
            let mut rebuilt = MappingNode::with_pairs(tag, pairs).expect("keys were unique");
            rebuilt.source = source;
            rebuilt.anchor = anchor;
            Node::Mapping(rebuilt)
        }
        Node::Sequence(mut sequence) => {
            let mut items = Vec::new();
            for item in sequence.items.drain(..) {
                if item.is_unset() {
                    *changed = true;
                    continue;
                }
                items.push(strip_unset(item, changed));
            }
            sequence.items = items;
            Node::Sequence(sequence)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{DEFAULT_MAP_TAG, DEFAULT_STR_TAG};

    fn scalar(value: &str) -> Node {
        Node::Scalar(ScalarNode::new(DEFAULT_STR_TAG, value))
    }

    fn mapping(pairs: Vec<(&str, Node)>) -> Node {
        Node::Mapping(
            MappingNode::with_pairs(
                DEFAULT_MAP_TAG,
                pairs
                    .into_iter()
                    .map(|(k, v)| (scalar(k), v))
                    .collect(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_set_at_replaces_and_reindexes() {
        let mut comp = CompositionResult::new(mapping(vec![("a", scalar("1"))]));
        comp.set_at(&KeyPath::parse("/a"), scalar("2")).unwrap();
        let node = comp.get(&KeyPath::parse("/a")).unwrap();
        assert!(matches!(node, Node::Scalar(s) if s.value == "2"));
    }

    #[test]
    fn test_set_at_inserts_new_key() {
        let mut comp = CompositionResult::new(mapping(vec![("a", scalar("1"))]));
        comp.set_at(&KeyPath::parse("/b"), scalar("2")).unwrap();
        assert!(comp.get(&KeyPath::parse("/b")).is_ok());
    }

    #[test]
    fn test_set_at_root() {
        let mut comp = CompositionResult::new(mapping(vec![("a", scalar("1"))]));
        comp.set_at(&KeyPath::root(), scalar("replaced")).unwrap();
        assert!(matches!(&comp.root, Node::Scalar(s) if s.value == "replaced"));
    }

    #[test]
    fn test_rerooted_is_a_deep_copy() {
        let comp =
            CompositionResult::new(mapping(vec![("sub", mapping(vec![("x", scalar("1"))]))]));
        let mut rerooted = comp.rerooted(&KeyPath::parse("/sub")).unwrap();
        rerooted.set_at(&KeyPath::parse("/x"), scalar("changed")).unwrap();

        // the original is untouched
        let original = comp.get(&KeyPath::parse("/sub.x")).unwrap();
        assert!(matches!(original, Node::Scalar(s) if s.value == "1"));
    }

    #[test]
    fn test_anchor_indexing() {
        let mut anchored = scalar("v");
        if let Node::Scalar(s) = &mut anchored {
            s.anchor = Some("my_anchor".to_string());
        }
        let comp = CompositionResult::new(mapping(vec![("a", anchored)]));
        assert_eq!(
            comp.anchor_paths.get("my_anchor"),
            Some(&KeyPath::parse("/a"))
        );
    }

    #[test]
    fn test_delete_unset_nodes_cascades() {
        let mut comp = CompositionResult::new(mapping(vec![
            ("keep", scalar("1")),
            ("gone", Node::Scalar(ScalarNode::unset())),
            (
                "empty_after",
                mapping(vec![("inner", Node::Scalar(ScalarNode::unset()))]),
            ),
        ]));
        assert!(delete_unset_nodes(&mut comp));
        let root = comp.root.as_mapping().unwrap();
        assert!(root.contains_key("keep"));
        assert!(!root.contains_key("gone"));
        assert!(!root.contains_key("empty_after"));
    }

    #[test]
    fn test_deepest_first_ordering() {
        let comp = CompositionResult::new(mapping(vec![
            (
                "outer",
                mapping(vec![(
                    "inner",
                    Node::Include(crate::node::IncludeNode {
                        reference: "file:x".into(),
                        source: Default::default(),
                        anchor: None,
                        context: Default::default(),
                    }),
                )]),
            ),
            (
                "top",
                Node::Include(crate::node::IncludeNode {
                    reference: "file:y".into(),
                    source: Default::default(),
                    anchor: None,
                    context: Default::default(),
                }),
            ),
        ]));
        assert_eq!(comp.special.includes.len(), 2);
        assert!(comp.special.includes[0].depth() >= comp.special.includes[1].depth());
    }
}
