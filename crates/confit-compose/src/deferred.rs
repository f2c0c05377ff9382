//! Deferred subtrees: pausing and resuming composition.
//!
//! `process_deferred` scans a finished composition for `!deferred` tags
//! and caller-forced path patterns, and wraps each outermost match in a
//! [`DeferredNode`] carrying its context and a snapshot of the whole
//! composition, so sibling references stay resolvable after the subtree
//! is extracted. Nested `!deferred` tags inside an already-deferred region
//! stay literal; they are re-discovered when that region is resumed.
//!
//! Resuming (`compose_deferred`) splices the wrapped node back into a copy
//! of the snapshot, applies context updates, and re-runs the composition
//! pipeline; `construct_deferred` then produces a value. Both take the
//! loader explicitly: process-local handles are never stored on the node,
//! which is what makes the serialized form portable across processes.

use crate::api::Loader;
use crate::context::{add_context_to_tree, context_add};
use crate::error::{Error, ErrorKind, Result};
use crate::lazy::resolve_all_lazy;
use crate::merge::add_to_context_key;
use confit_keypath::KeyPath;
use confit_yaml::{ClearCtx, CompositionResult, Context, DeferredNode, Node, Value, DEFERRED_TAG_PREFIX};

/// A caller-forced deferral: any node whose keypath matches the pattern is
/// wrapped, optionally carrying a target type for construction.
#[derive(Debug, Clone)]
pub struct ForcedDeferral {
    pub pattern: KeyPath,
    pub type_tag: Option<String>,
}

impl ForcedDeferral {
    pub fn new(pattern: impl Into<KeyPath>) -> Self {
        ForcedDeferral {
            pattern: pattern.into(),
            type_tag: None,
        }
    }
}

/// Options parsed from a `!deferred` tag suffix.
#[derive(Debug, Clone, Default, PartialEq)]
struct DeferredTagOptions {
    clear_ctx: ClearCtx,
    type_tag: Option<String>,
}

/// Parse a `!deferred` tag: `!deferred`, `!deferred:TypeName`,
/// `!deferred::clear_ctx=A,B`, `!deferred::clear_ctx=true:TypeName`.
fn parse_deferred_tag(tag: &str) -> Option<DeferredTagOptions> {
    let rest = tag.strip_prefix(DEFERRED_TAG_PREFIX)?;
    let mut options = DeferredTagOptions::default();

    if let Some(params) = rest.strip_prefix("::") {
        let (query, type_part) = match params.split_once(':') {
            Some((query, type_part)) => (query, Some(type_part)),
            None => (params, None),
        };
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                if key == "clear_ctx" {
                    options.clear_ctx = match value {
                        "true" | "True" => ClearCtx::All,
                        "false" | "False" => ClearCtx::None,
                        list => ClearCtx::Keys(
                            list.split(',').map(|s| s.trim().to_string()).collect(),
                        ),
                    };
                }
            }
        }
        options.type_tag = type_part.map(|t| t.to_string());
    } else if let Some(type_part) = rest.strip_prefix(':') {
        options.type_tag = Some(type_part.to_string());
    } else if !rest.is_empty() {
        // not actually a deferred tag (e.g. `!deferred_thing`)
        return None;
    }
    Some(options)
}

/// Wrap every deferral boundary in the composition.
///
/// Matches are tag-driven (`!deferred...`) or forced by pattern; only the
/// outermost boundary of a nested chain is wrapped now. A deferred marker
/// at the tree root is a configuration error: there must be a
/// construct-able parent to splice back into.
pub fn process_deferred(comp: &mut CompositionResult, forced: &[ForcedDeferral]) -> Result<()> {
    comp.reindex();

    let mut candidates: Vec<(KeyPath, Option<String>)> = Vec::new();
    comp.walk(|node, path| {
        if matches!(node, Node::Deferred(_)) || path.is_mapping_key() {
            return;
        }
        let tag_options = parse_deferred_tag(node.tag());
        let forced_match = forced.iter().find(|f| f.pattern.matches(path));
        if tag_options.is_none() && forced_match.is_none() {
            return;
        }
        // keep only the outermost boundary of a chain: the walk is
        // top-down, so an ancestor match is already recorded
        if candidates
            .iter()
            .any(|(existing, _)| path.starts_with(existing) && path != existing)
        {
            return;
        }
        let type_tag = tag_options
            .as_ref()
            .and_then(|o| o.type_tag.clone())
            .or_else(|| forced_match.and_then(|f| f.type_tag.clone()));
        candidates.push((path.clone(), type_tag));
    });

    if candidates.is_empty() {
        return Ok(());
    }
    if candidates.iter().any(|(path, _)| *path == KeyPath::root()) {
        return Err(Error::new(ErrorKind::Instruction {
            message: "cannot defer the document root".to_string(),
        }));
    }

    // wrap deepest-first so shallower candidate paths stay valid
    candidates.sort_by(|a, b| b.0.depth().cmp(&a.0.depth()));

    let mut wrapped_paths = Vec::new();
    for (path, forced_type) in candidates {
        let mut inner = comp.get(&path)?.clone();

        let mut clear_ctx = ClearCtx::None;
        let mut type_tag = forced_type;
        if let Some(options) = parse_deferred_tag(inner.tag()) {
            clear_ctx = options.clear_ctx;
            if type_tag.is_none() {
                type_tag = options.type_tag.clone();
            }
            // the wrapped node keeps the target type as its tag, or falls
            // back to its shape default
            match &options.type_tag {
                Some(t) => inner.set_tag(format!("!{t}")),
                None => inner.reset_tag(),
            }
        }

        let mut context = inner.context().cloned().unwrap_or_default();
        match &clear_ctx {
            ClearCtx::None => {}
            ClearCtx::All => {
                context.clear();
                inner.walk_mut(&KeyPath::root(), &mut |node, _| {
                    if let Some(ctx) = node.context_mut() {
                        ctx.clear();
                    }
                });
            }
            ClearCtx::Keys(keys) => {
                for key in keys {
                    context.shift_remove(key);
                }
                crate::context::remove_from_contexts(&mut inner, keys);
            }
        }

        let deferred = Node::Deferred(DeferredNode {
            inner: Box::new(inner),
            path: path.clone(),
            context,
            clear_ctx,
            type_tag,
            snapshot: None,
        });
        comp.set_at(&path, deferred)?;
        wrapped_paths.push(path);
    }

    // every wrapper shares the same post-wrap snapshot (without recursive
    // snapshots inside)
    let snapshot = Box::new(comp.clone());
    for path in wrapped_paths {
        if let Node::Deferred(deferred) = comp.get_mut(&path)? {
            deferred.snapshot = Some(snapshot.clone());
        }
    }
    comp.reindex();
    Ok(())
}

/// Resume composition of a deferred node.
///
/// The stored inner node is spliced into a copy of the captured snapshot
/// at the stored path, contexts are merged (`context_override` wins over
/// the node's accumulated context), and the composition pipeline re-runs.
/// `deferred_paths` marks nested sub-paths (relative to this node) as
/// newly deferred, supporting defer-again patterns.
pub fn compose_deferred(
    loader: &mut Loader,
    node: &DeferredNode,
    context_override: Option<&Context>,
    deferred_paths: &[KeyPath],
) -> Result<Node> {
    let (mut composition, work_path) = match &node.snapshot {
        Some(snapshot) => ((**snapshot).clone(), node.path.clone()),
        None => (
            CompositionResult::new((*node.inner).clone()),
            KeyPath::root(),
        ),
    };

    let merged_context = match context_override {
        Some(over) => context_add(&node.context, over, &add_to_context_key()),
        None => node.context.clone(),
    };

    // unwrap this node in the snapshot
    composition.set_at(&work_path, (*node.inner).clone())?;

    // loader context first, then this node's own accumulated context wins
    // within its subtree
    add_context_to_tree(&mut composition.root, &loader.context.clone());
    {
        let subtree = composition.get_mut(&work_path)?;
        let mut subtree_owned = subtree.clone();
        add_context_to_tree(&mut subtree_owned, &merged_context);
        *subtree = subtree_owned;
    }

    let forced: Vec<ForcedDeferral> = deferred_paths
        .iter()
        .map(|p| ForcedDeferral {
            pattern: work_path.joined(&p.rootless()),
            type_tag: node.type_tag.clone(),
        })
        .collect();

    let saved_patterns = std::mem::replace(&mut loader.deferred_patterns, forced);
    let processed = loader.post_process(composition);
    loader.deferred_patterns = saved_patterns;
    let processed = processed?;

    Ok(processed.get(&work_path)?.clone())
}

/// Resume and construct a deferred node to a value.
pub fn construct_deferred(
    loader: &mut Loader,
    node: &DeferredNode,
    context_override: Option<&Context>,
    deferred_paths: &[KeyPath],
) -> Result<Value> {
    let composed = compose_deferred(loader, node, context_override, deferred_paths)?;
    if let Some(over) = context_override {
        loader.context = context_add(&loader.context, over, &add_to_context_key());
    }
    let comp = CompositionResult::new(composed);
    let mut value = loader.construct(&comp)?;
    resolve_all_lazy(&mut value, &loader.context, loader.engine.as_ref())?;
    Ok(value)
}

/// Serialize a deferred node to its stable wire form.
pub fn serialize_deferred(node: &DeferredNode) -> Result<Vec<u8>> {
    serde_json::to_vec(node)
        .map_err(|e| Error::construction(format!("cannot serialize deferred node: {e}")))
}

/// Reattach a deferred node from its wire form. The loader is supplied at
/// construction time, never stored.
pub fn deserialize_deferred(bytes: &[u8]) -> Result<DeferredNode> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::construction(format!("cannot deserialize deferred node: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use confit_yaml::compose_str;

    #[test]
    fn test_parse_deferred_tag_forms() {
        assert_eq!(
            parse_deferred_tag("!deferred"),
            Some(DeferredTagOptions::default())
        );
        let typed = parse_deferred_tag("!deferred:Model").unwrap();
        assert_eq!(typed.type_tag.as_deref(), Some("Model"));

        let cleared = parse_deferred_tag("!deferred::clear_ctx=A,B").unwrap();
        assert_eq!(
            cleared.clear_ctx,
            ClearCtx::Keys(vec!["A".to_string(), "B".to_string()])
        );

        let all = parse_deferred_tag("!deferred::clear_ctx=true:Model").unwrap();
        assert_eq!(all.clear_ctx, ClearCtx::All);
        assert_eq!(all.type_tag.as_deref(), Some("Model"));

        assert_eq!(parse_deferred_tag("!deferred_thing"), None);
        assert_eq!(parse_deferred_tag("!other"), None);
    }

    #[test]
    fn test_process_deferred_wraps_tagged_subtree() {
        let mut comp = compose_str("keep: 1\npaused: !deferred\n  x: ${later}", None).unwrap();
        process_deferred(&mut comp, &[]).unwrap();
        let node = comp.get(&KeyPath::parse("/paused")).unwrap();
        match node {
            Node::Deferred(deferred) => {
                assert_eq!(deferred.path, KeyPath::parse("/paused"));
                assert!(deferred.snapshot.is_some());
            }
            other => panic!("expected deferred node, got {other:?}"),
        }
    }

    #[test]
    fn test_forced_deferral_by_pattern() {
        let mut comp = compose_str("a:\n  b: 1\nc: 2", None).unwrap();
        process_deferred(&mut comp, &[ForcedDeferral::new(KeyPath::parse("/a"))]).unwrap();
        assert!(matches!(
            comp.get(&KeyPath::parse("/a")).unwrap(),
            Node::Deferred(_)
        ));
        assert!(matches!(
            comp.get(&KeyPath::parse("/c")).unwrap(),
            Node::Scalar(_)
        ));
    }

    #[test]
    fn test_nested_deferred_keeps_outermost_only() {
        let doc = "\
outer: !deferred
  mid:
    inner: !deferred
      x: 1
";
        let mut comp = compose_str(doc, None).unwrap();
        process_deferred(&mut comp, &[]).unwrap();

        match comp.get(&KeyPath::parse("/outer")).unwrap() {
            Node::Deferred(deferred) => {
                // the nested tag stays literal inside the wrapped subtree
                let inner = KeyPath::parse("/mid.inner").get_obj(&*deferred.inner).unwrap();
                assert!(!matches!(inner, Node::Deferred(_)));
                assert!(inner.tag().starts_with("!deferred"));
            }
            other => panic!("expected deferred node, got {other:?}"),
        }
    }

    #[test]
    fn test_root_deferral_is_an_error() {
        let mut comp = compose_str("!deferred\na: 1", None).unwrap();
        // tag may attach to the root mapping depending on layout; force it
        comp.root.set_tag("!deferred");
        comp.reindex();
        assert!(process_deferred(&mut comp, &[]).is_err());
    }

    #[test]
    fn test_deferred_wire_roundtrip() {
        let mut comp = compose_str("paused: !deferred\n  x: 1", None).unwrap();
        process_deferred(&mut comp, &[]).unwrap();
        let node = match comp.get(&KeyPath::parse("/paused")).unwrap() {
            Node::Deferred(deferred) => deferred.clone(),
            other => panic!("expected deferred node, got {other:?}"),
        };
        let bytes = serialize_deferred(&node).unwrap();
        let back = deserialize_deferred(&bytes).unwrap();
        assert_eq!(node, back);
    }
}
