//! The `KeyPath` value type: parsing, simplification, arithmetic, display.

use crate::addressable::{Addressable, AddressableMut};
use crate::error::{KeyPathError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One part of a keypath.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPathPart {
    /// `/`: resets resolution to the document root
    Root,
    /// `..`: one level up
    Up,
    /// Marks that the path addresses the *key* node of a mapping entry
    /// rather than its value. Only valid as the second-to-last part.
    MappingKey,
    /// `*`: matches exactly one segment (patterns only)
    SingleWildcard,
    /// `**`: matches zero or more segments (patterns only)
    MultiWildcard,
    /// A concrete segment; sequence indices are integer-valued keys
    Key(String),
}

impl KeyPathPart {
    /// A concrete key part.
    pub fn key(s: impl Into<String>) -> Self {
        KeyPathPart::Key(s.into())
    }

    fn parse_segment(segment: &str) -> Self {
        match segment {
            "*" => KeyPathPart::SingleWildcard,
            "**" => KeyPathPart::MultiWildcard,
            _ => KeyPathPart::Key(segment.to_string()),
        }
    }
}

/// An ordered sequence of path parts addressing a node in a document tree.
///
/// Keypaths are value types: all arithmetic (`join`, `down_key`, `up`)
/// either mutates `self` consistently with a [`KeyPath::simplify`] pass or
/// returns a fresh path. Equality and hashing are structural over the
/// part sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPath {
    parts: Vec<KeyPathPart>,
}

/// The absolute root path `/`.
pub const ROOT_PATH: &str = "/";

impl KeyPath {
    /// The empty (relative) path.
    pub fn new() -> Self {
        KeyPath::default()
    }

    /// The absolute root path `/`.
    pub fn root() -> Self {
        KeyPath {
            parts: vec![KeyPathPart::Root],
        }
    }

    /// Build a path from parts, simplifying.
    pub fn from_parts(parts: Vec<KeyPathPart>) -> Self {
        let mut path = KeyPath { parts };
        path.simplify();
        path
    }

    /// Parse a path string.
    ///
    /// `/` resets to the root and clears prior segments (an absolute-path
    /// marker, not concatenation), `.` separates segments, and each dot
    /// beyond the first in a run encodes one up-token. `\.`, `\/` and `\\`
    /// escape the separator characters. Parsing never fails; the result is
    /// simplified.
    pub fn parse(path: &str) -> Self {
        KeyPath::from_parts(parse_parts(path))
    }

    /// The raw part sequence.
    pub fn parts(&self) -> &[KeyPathPart] {
        &self.parts
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the path has no parts.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Depth used for deepest-first ordering: the mapping-key marker does
    /// not add a level.
    pub fn depth(&self) -> usize {
        if self.is_mapping_key() {
            self.parts.len() - 1
        } else {
            self.parts.len()
        }
    }

    /// Normalize the path in place: up-tokens cancel the immediately
    /// preceding concrete segment (popping a preceding mapping-key marker
    /// with it), a root token clears everything before it, and dangling
    /// up-tokens at the front are preserved.
    pub fn simplify(&mut self) -> &mut Self {
        if self.parts.len() > 1 {
            let mut stack: Vec<KeyPathPart> = Vec::with_capacity(self.parts.len());
            for part in self.parts.drain(..) {
                match part {
                    KeyPathPart::Root => {
                        stack.clear();
                        stack.push(KeyPathPart::Root);
                    }
                    KeyPathPart::Up => match stack.last() {
                        None | Some(KeyPathPart::Up) => stack.push(KeyPathPart::Up),
                        Some(KeyPathPart::Root) => {}
                        Some(_) => {
                            stack.pop();
                            if stack.last() == Some(&KeyPathPart::MappingKey) {
                                stack.pop();
                            }
                        }
                    },
                    other => stack.push(other),
                }
            }
            self.parts = stack;
        }
        self
    }

    /// A simplified copy.
    pub fn simplified(&self) -> KeyPath {
        let mut copy = self.clone();
        copy.simplify();
        copy
    }

    /// Strip a leading root token, if present.
    pub fn rootless(&self) -> KeyPath {
        let mut simple = self.simplified();
        if simple.parts.first() == Some(&KeyPathPart::Root) {
            simple.parts.remove(0);
        }
        simple
    }

    /// Append one up-token and simplify.
    pub fn up(&mut self) -> &mut Self {
        self.parts.push(KeyPathPart::Up);
        self.simplify()
    }

    /// The parent path (one level up).
    pub fn parent(&self) -> KeyPath {
        let mut copy = self.clone();
        copy.up();
        copy
    }

    /// Append one literal key segment (separator characters in `key` are
    /// taken literally, not parsed).
    pub fn down_key(&mut self, key: &str) -> &mut Self {
        self.parts.push(KeyPathPart::Key(key.to_string()));
        self
    }

    /// Append a sequence index as a key segment.
    pub fn down_index(&mut self, index: usize) -> &mut Self {
        self.parts.push(KeyPathPart::Key(index.to_string()));
        self
    }

    /// Append a raw part.
    pub fn down_part(&mut self, part: KeyPathPart) -> &mut Self {
        self.parts.push(part);
        self
    }

    /// Append all parts of another path and simplify.
    pub fn join(&mut self, other: &KeyPath) -> &mut Self {
        self.parts.extend(other.parts.iter().cloned());
        self.simplify()
    }

    /// `self` extended with `other`, as a new path.
    pub fn joined(&self, other: &KeyPath) -> KeyPath {
        let mut copy = self.clone();
        copy.join(other);
        copy
    }

    /// `self` extended with one key segment, as a new path.
    pub fn child(&self, key: &str) -> KeyPath {
        let mut copy = self.clone();
        copy.down_key(key);
        copy
    }

    /// `self` extended with one index segment, as a new path.
    pub fn child_index(&self, index: usize) -> KeyPath {
        let mut copy = self.clone();
        copy.down_index(index);
        copy
    }

    /// Prefix containment test.
    pub fn starts_with(&self, other: &KeyPath) -> bool {
        other.parts.len() <= self.parts.len() && self.parts[..other.parts.len()] == other.parts
    }

    /// Whether the path addresses a mapping key (second-to-last part is
    /// the mapping-key marker).
    pub fn is_mapping_key(&self) -> bool {
        self.parts.len() >= 2 && self.parts[self.parts.len() - 2] == KeyPathPart::MappingKey
    }

    /// The same path with the mapping-key marker removed, addressing the
    /// entry's value instead of its key.
    pub fn removed_mapping_key(&self) -> KeyPath {
        if !self.is_mapping_key() {
            return self.clone();
        }
        let mut copy = self.clone();
        copy.parts.remove(copy.parts.len() - 2);
        copy
    }

    /// The final key segment, if the path ends with one.
    pub fn last_key(&self) -> Option<&str> {
        match self.parts.last() {
            Some(KeyPathPart::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// Whether any part is a wildcard.
    pub fn has_wildcards(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, KeyPathPart::SingleWildcard | KeyPathPart::MultiWildcard))
    }

    /// A dereferenceable path never ends with a mapping-key token.
    pub fn check_valid(&self) -> Result<()> {
        if self.parts.last() == Some(&KeyPathPart::MappingKey) {
            return Err(KeyPathError::EndsWithMappingKey {
                path: self.to_string(),
            });
        }
        Ok(())
    }

    /// Walk the path against a live object graph.
    ///
    /// Concrete segments resolve uniformly over mapping-like and
    /// sequence-like objects via [`Addressable`]; objects exposing a
    /// passthrough (deferred nodes) are traversed transparently. A
    /// mapping-key token as the second-to-last part switches the final
    /// lookup to the key node itself.
    pub fn get_obj<'a, T: Addressable>(&self, root: &'a T) -> Result<&'a T> {
        let path = self.simplified();
        path.check_valid()?;
        if path.has_wildcards() {
            return Err(KeyPathError::WildcardInConcrete {
                path: path.to_string(),
            });
        }

        let mut res = root;
        let mut i = 0;
        while i < path.parts.len() {
            match &path.parts[i] {
                KeyPathPart::Root => {}
                KeyPathPart::Up => {
                    return Err(KeyPathError::Unresolvable {
                        path: path.to_string(),
                    })
                }
                KeyPathPart::MappingKey => {
                    if i != path.parts.len() - 2 {
                        return Err(KeyPathError::InvalidMappingKey {
                            path: path.to_string(),
                        });
                    }
                    let key = match &path.parts[i + 1] {
                        KeyPathPart::Key(k) => k,
                        _ => {
                            return Err(KeyPathError::InvalidMappingKey {
                                path: path.to_string(),
                            })
                        }
                    };
                    let target = follow_passthrough(res);
                    return target.get_key_node(key).ok_or_else(|| KeyPathError::NotFound {
                        path: path.to_string(),
                        segment: key.clone(),
                    });
                }
                KeyPathPart::Key(k) => {
                    let target = follow_passthrough(res);
                    res = target.get_child(k).ok_or_else(|| KeyPathError::NotFound {
                        path: path.to_string(),
                        segment: k.clone(),
                    })?;
                }
                KeyPathPart::SingleWildcard | KeyPathPart::MultiWildcard => unreachable!(),
            }
            i += 1;
        }
        Ok(res)
    }

    /// Mutable variant of [`KeyPath::get_obj`]. Mapping-key lookups are not
    /// supported mutably.
    pub fn get_obj_mut<'a, T: AddressableMut>(&self, root: &'a mut T) -> Result<&'a mut T> {
        self.get_obj_mut_impl(root, false)
    }

    /// Like [`KeyPath::get_obj_mut`] but creates missing intermediate
    /// entries where the container supports it (used by CLI overrides).
    pub fn get_obj_mut_or_create<'a, T: AddressableMut>(
        &self,
        root: &'a mut T,
    ) -> Result<&'a mut T> {
        self.get_obj_mut_impl(root, true)
    }

    fn get_obj_mut_impl<'a, T: AddressableMut>(
        &self,
        root: &'a mut T,
        create: bool,
    ) -> Result<&'a mut T> {
        let path = self.simplified();
        path.check_valid()?;
        if path.has_wildcards() {
            return Err(KeyPathError::WildcardInConcrete {
                path: path.to_string(),
            });
        }

        let mut res = root;
        for part in &path.parts {
            match part {
                KeyPathPart::Root => {}
                KeyPathPart::Up => {
                    return Err(KeyPathError::Unresolvable {
                        path: path.to_string(),
                    })
                }
                KeyPathPart::MappingKey => {
                    return Err(KeyPathError::InvalidMappingKey {
                        path: path.to_string(),
                    })
                }
                KeyPathPart::Key(k) => {
                    let target = follow_passthrough_mut(res);
                    let found = if create {
                        target.ensure_child(k)
                    } else {
                        target.get_child_mut(k)
                    };
                    res = found.ok_or_else(|| KeyPathError::NotFound {
                        path: path.to_string(),
                        segment: k.clone(),
                    })?;
                }
                KeyPathPart::SingleWildcard | KeyPathPart::MultiWildcard => unreachable!(),
            }
        }
        Ok(res)
    }
}

fn follow_passthrough<T: Addressable>(mut obj: &T) -> &T {
    while let Some(inner) = obj.passthrough() {
        obj = inner;
    }
    obj
}

fn follow_passthrough_mut<T: AddressableMut>(obj: &mut T) -> &mut T {
    // immutable probe first, to keep the borrow checker satisfied
    if obj.passthrough().is_some() {
        return follow_passthrough_mut(obj.passthrough_mut().expect("passthrough went away"));
    }
    obj
}

fn parse_parts(path: &str) -> Vec<KeyPathPart> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut dot_count = 0usize;
    let mut escaped = false;

    for ch in path.chars() {
        if ch == '\\' && !escaped {
            escaped = true;
            continue;
        }
        if ch == '/' && !escaped {
            if !current.is_empty() {
                parts.push(KeyPathPart::parse_segment(&current));
                current.clear();
            }
            parts.push(KeyPathPart::Root);
            dot_count = 0;
        } else if ch == '.' && !escaped {
            if !current.is_empty() {
                parts.push(KeyPathPart::parse_segment(&current));
                current.clear();
            }
            dot_count += 1;
            if dot_count > 1 {
                parts.push(KeyPathPart::Up);
            }
        } else {
            current.push(ch);
            dot_count = 0;
        }
        escaped = false;
    }
    if !current.is_empty() {
        parts.push(KeyPathPart::parse_segment(&current));
    }
    parts
}

fn escape_segment(segment: &str) -> String {
    segment
        .replace('\\', "\\\\")
        .replace('.', "\\.")
        .replace('/', "\\/")
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut prev: Option<&KeyPathPart> = None;
        for part in &self.parts {
            let needs_sep = !matches!(
                prev,
                None | Some(KeyPathPart::Root | KeyPathPart::Up | KeyPathPart::MappingKey)
            );
            match part {
                KeyPathPart::Root => write!(f, "/")?,
                KeyPathPart::Up => {
                    if matches!(prev, Some(KeyPathPart::Up)) {
                        write!(f, ".")?;
                    } else {
                        write!(f, "..")?;
                    }
                }
                KeyPathPart::MappingKey => {
                    if needs_sep {
                        write!(f, ".")?;
                    }
                    write!(f, "[key]:")?;
                }
                KeyPathPart::SingleWildcard => {
                    if needs_sep {
                        write!(f, ".")?;
                    }
                    write!(f, "*")?;
                }
                KeyPathPart::MultiWildcard => {
                    if needs_sep {
                        write!(f, ".")?;
                    }
                    write!(f, "**")?;
                }
                KeyPathPart::Key(k) => {
                    if needs_sep {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", escape_segment(k))?;
                }
            }
            prev = Some(part);
        }
        Ok(())
    }
}

impl From<&str> for KeyPath {
    fn from(s: &str) -> Self {
        KeyPath::parse(s)
    }
}

impl std::str::FromStr for KeyPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(KeyPath::parse(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let path = KeyPath::parse("a.b.c");
        assert_eq!(
            path.parts(),
            &[
                KeyPathPart::key("a"),
                KeyPathPart::key("b"),
                KeyPathPart::key("c")
            ]
        );
    }

    #[test]
    fn test_parse_absolute() {
        let path = KeyPath::parse("/a.b");
        assert_eq!(path.parts()[0], KeyPathPart::Root);
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_mid_string_root_resets() {
        // a root marker mid-string behaves like an absolute path, not
        // concatenation
        let path = KeyPath::parse("a.b/c.d");
        assert_eq!(path, KeyPath::parse("/c.d"));
    }

    #[test]
    fn test_up_simplification() {
        assert_eq!(KeyPath::parse("a.b..c").to_string(), "a.c");
        assert_eq!(KeyPath::parse("/a.b....").to_string(), "/");
        assert_eq!(KeyPath::parse("..a.b").to_string(), "..a.b");
    }

    #[test]
    fn test_up_at_root_is_absorbed() {
        assert_eq!(KeyPath::parse("/..").to_string(), "/");
        assert_eq!(KeyPath::parse("/...a").to_string(), "/a");
    }

    #[test]
    fn test_dangling_up_stacks() {
        let path = KeyPath::parse("...a");
        assert_eq!(path.parts()[0], KeyPathPart::Up);
        assert_eq!(path.parts()[1], KeyPathPart::Up);
        assert_eq!(path.parts()[2], KeyPathPart::key("a"));
    }

    #[test]
    fn test_escapes() {
        let path = KeyPath::parse("a\\.b.c");
        assert_eq!(
            path.parts(),
            &[KeyPathPart::key("a.b"), KeyPathPart::key("c")]
        );
        assert_eq!(path.to_string(), "a\\.b.c");
    }

    #[test]
    fn test_roundtrip_idempotent() {
        for case in ["/a.b.c", "a.c", "..x.y", "/", "a\\.b", "a\\/b.c", "*.b.**"] {
            let once = KeyPath::parse(case);
            let twice = KeyPath::parse(&once.to_string());
            assert_eq!(once, twice, "round-trip failed for {case}");
        }
    }

    #[test]
    fn test_parent_and_child() {
        let path = KeyPath::parse("/a.b.c");
        assert_eq!(path.parent().to_string(), "/a.b");
        assert_eq!(path.parent().child("d").to_string(), "/a.b.d");
    }

    #[test]
    fn test_join_simplifies() {
        let base = KeyPath::parse("/a.b");
        assert_eq!(base.joined(&KeyPath::parse("..c")).to_string(), "/a.c");
    }

    #[test]
    fn test_child_key_is_literal() {
        // separator characters in a child key are not parsed
        let path = KeyPath::root().child("a.b");
        assert_eq!(path.len(), 2);
        assert_eq!(path.last_key(), Some("a.b"));
    }

    #[test]
    fn test_starts_with() {
        let path = KeyPath::parse("/a.b.c");
        assert!(path.starts_with(&KeyPath::parse("/a.b")));
        assert!(path.starts_with(&KeyPath::parse("/a.b.c")));
        assert!(!path.starts_with(&KeyPath::parse("/a.x")));
        assert!(!KeyPath::parse("/a").starts_with(&path));
    }

    #[test]
    fn test_mapping_key_detection() {
        let mut path = KeyPath::parse("/a");
        path.down_part(KeyPathPart::MappingKey).down_key("b");
        assert!(path.is_mapping_key());
        assert_eq!(path.removed_mapping_key(), KeyPath::parse("/a.b"));
        assert_eq!(path.depth(), KeyPath::parse("/a.b").depth());
    }

    #[test]
    fn test_mapping_key_cancelled_by_up() {
        let mut path = KeyPath::parse("/a");
        path.down_part(KeyPathPart::MappingKey).down_key("b");
        path.up();
        assert_eq!(path, KeyPath::parse("/a"));
    }

    #[test]
    fn test_ends_with_mapping_key_invalid() {
        let mut path = KeyPath::parse("/a");
        path.down_part(KeyPathPart::MappingKey);
        assert!(path.check_valid().is_err());
    }

    #[test]
    fn test_rootless() {
        assert_eq!(KeyPath::parse("/a.b").rootless(), KeyPath::parse("a.b"));
        assert_eq!(KeyPath::parse("a.b").rootless(), KeyPath::parse("a.b"));
    }

    #[test]
    fn test_structural_equality_and_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(KeyPath::parse("/a.b"));
        assert!(set.contains(&KeyPath::parse("/a.b")));
        assert!(!set.contains(&KeyPath::parse("/a.c")));
    }
}
