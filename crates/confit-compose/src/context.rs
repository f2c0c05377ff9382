//! Context propagation.
//!
//! Contexts are the symbol tables interpolation expressions see. They ride
//! on the context-carrying nodes (include, interpolable, deferred) and are
//! extended with the merge algebra rather than mutated in place by distant
//! call sites: `context_add` returns the merged map, and
//! `add_context_to_tree` walks a subtree applying it to every node that
//! carries a context.

use crate::merge::{add_to_context_key, merge_values, MergeKey};
use confit_yaml::{ClearCtx, Context, Node, Value};

/// Merge `new` bindings into `existing`, returning the result.
pub fn context_add(existing: &Context, new: &Context, key: &MergeKey) -> Context {
    let merged = merge_values(
        &Value::Mapping(existing.clone()),
        &Value::Mapping(new.clone()),
        key,
    );
    match merged {
        Value::Mapping(map) => map,
        _ => existing.clone(),
    }
}

/// Merge bindings into one node's context, if it carries one. A deferred
/// node's clear-list is applied after the merge.
pub fn add_to_context(node: &mut Node, bindings: &Context, key: &MergeKey) {
    if bindings.is_empty() {
        return;
    }
    if let Some(context) = node.context_mut() {
        *context = context_add(context, bindings, key);
    }
    if let Node::Deferred(deferred) = node {
        match &deferred.clear_ctx {
            ClearCtx::None => {}
            ClearCtx::All => deferred.context.clear(),
            ClearCtx::Keys(keys) => {
                for cleared in keys {
                    deferred.context.shift_remove(cleared);
                }
            }
        }
    }
}

/// Walk a subtree merging bindings into every context-carrying node, with
/// the default context-propagation key.
pub fn add_context_to_tree(root: &mut Node, bindings: &Context) {
    add_context_to_tree_with(root, bindings, &add_to_context_key());
}

/// Walk a subtree merging bindings into every context-carrying node.
pub fn add_context_to_tree_with(root: &mut Node, bindings: &Context, key: &MergeKey) {
    if bindings.is_empty() {
        return;
    }
    root.walk_mut(&confit_keypath::KeyPath::root(), &mut |node, _| {
        add_to_context(node, bindings, key);
    });
}

/// Remove named keys from every context in a subtree.
pub fn remove_from_contexts(root: &mut Node, keys: &[String]) {
    root.walk_mut(&confit_keypath::KeyPath::root(), &mut |node, _| {
        if let Some(context) = node.context_mut() {
            for key in keys {
                context.shift_remove(key);
            }
        }
    });
}
