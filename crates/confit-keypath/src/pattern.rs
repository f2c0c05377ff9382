//! Glob-style matching of keypath patterns against concrete keypaths.
//!
//! Patterns support `*` (exactly one segment, with `*` also usable inside
//! a segment as a substring wildcard) and `**` (zero or more segments,
//! tried greedily with backtracking). Used to select subtrees for forced
//! deferral.

use crate::keypath::{KeyPath, KeyPathPart};

impl KeyPath {
    /// Match `self`, interpreted as a pattern, against a concrete target
    /// path. Both sides are simplified before matching.
    pub fn matches(&self, target: &KeyPath) -> bool {
        let pattern = self.simplified();
        let target = target.simplified();
        match_parts(pattern.parts(), target.parts())
    }
}

fn match_parts(pattern: &[KeyPathPart], target: &[KeyPathPart]) -> bool {
    match pattern.first() {
        None => target.is_empty(),
        Some(KeyPathPart::MultiWildcard) => {
            // try every split point, greedily from the shortest
            (0..=target.len()).any(|i| match_parts(&pattern[1..], &target[i..]))
        }
        Some(KeyPathPart::SingleWildcard) => {
            !target.is_empty() && match_parts(&pattern[1..], &target[1..])
        }
        Some(KeyPathPart::Key(p)) => match target.first() {
            Some(KeyPathPart::Key(t)) => {
                segment_matches(p, t) && match_parts(&pattern[1..], &target[1..])
            }
            _ => false,
        },
        Some(other) => {
            target.first() == Some(other) && match_parts(&pattern[1..], &target[1..])
        }
    }
}

/// In-segment glob: `*` matches any run of characters.
fn segment_matches(pattern: &str, target: &str) -> bool {
    fn inner(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('*') => (0..=t.len()).any(|i| inner(&p[1..], &t[i..])),
            Some(c) => t.first() == Some(c) && inner(&p[1..], &t[1..]),
        }
    }
    if !pattern.contains('*') {
        return pattern == target;
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = target.chars().collect();
    inner(&p, &t)
}
