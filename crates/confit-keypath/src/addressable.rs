//! The closed capability surface keypath traversal dispatches over.
//!
//! Rather than reflecting over arbitrary container shapes, traversal only
//! knows about three capabilities: child lookup by key (mappings answer by
//! name, sequences by integer-valued key), key-node lookup (for
//! mapping-key paths), and passthrough (a wrapper that forwards traversal
//! to its inner value, e.g. a deferred node).

/// Read-only traversal capability.
pub trait Addressable: Sized {
    /// Look up a child by key. Sequence-like containers should accept
    /// integer-valued keys.
    fn get_child(&self, key: &str) -> Option<&Self>;

    /// Look up the *key node* of a mapping entry. Only mapping-like
    /// containers answer.
    fn get_key_node(&self, _key: &str) -> Option<&Self> {
        None
    }

    /// A wrapper forwarding traversal to its inner value, if this object
    /// is one.
    fn passthrough(&self) -> Option<&Self> {
        None
    }
}

/// Mutable traversal capability.
pub trait AddressableMut: Addressable {
    /// Mutable child lookup.
    fn get_child_mut(&mut self, key: &str) -> Option<&mut Self>;

    /// Look up a child, creating an empty mapping entry when missing.
    /// Containers that cannot create entries return `None` for missing
    /// keys.
    fn ensure_child(&mut self, key: &str) -> Option<&mut Self> {
        self.get_child_mut(key)
    }

    /// Mutable passthrough.
    fn passthrough_mut(&mut self) -> Option<&mut Self> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPath;

    // a minimal tree to exercise traversal
    #[derive(Debug, PartialEq)]
    enum Tree {
        Leaf(i64),
        Branch(Vec<(String, Tree)>),
        Wrapped(Box<Tree>),
    }

    impl Addressable for Tree {
        fn get_child(&self, key: &str) -> Option<&Self> {
            match self {
                Tree::Branch(children) => {
                    children.iter().find(|(k, _)| k == key).map(|(_, v)| v)
                }
                _ => None,
            }
        }

        fn passthrough(&self) -> Option<&Self> {
            match self {
                Tree::Wrapped(inner) => Some(inner),
                _ => None,
            }
        }
    }

    #[test]
    fn test_get_obj_walks_branches() {
        let tree = Tree::Branch(vec![(
            "a".into(),
            Tree::Branch(vec![("b".into(), Tree::Leaf(7))]),
        )]);
        let leaf = KeyPath::parse("/a.b").get_obj(&tree).unwrap();
        assert_eq!(*leaf, Tree::Leaf(7));
    }

    #[test]
    fn test_get_obj_through_passthrough() {
        let tree = Tree::Branch(vec![(
            "a".into(),
            Tree::Wrapped(Box::new(Tree::Branch(vec![("b".into(), Tree::Leaf(1))]))),
        )]);
        let leaf = KeyPath::parse("/a.b").get_obj(&tree).unwrap();
        assert_eq!(*leaf, Tree::Leaf(1));
    }

    #[test]
    fn test_get_obj_not_found() {
        let tree = Tree::Branch(vec![("a".into(), Tree::Leaf(1))]);
        assert!(KeyPath::parse("/missing").get_obj(&tree).is_err());
    }

    #[test]
    fn test_get_obj_dangling_up_fails() {
        let tree = Tree::Leaf(0);
        assert!(KeyPath::parse("..a").get_obj(&tree).is_err());
    }
}
