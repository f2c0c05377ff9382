//! Bulk lazy resolution.
//!
//! After construction, a value tree may hold [`LazyValue`] leaves anywhere.
//! [`resolve_all_lazy`] finds and resolves them in passes, writing each
//! result back into its parent container and re-scanning, since a
//! resolution can surface new lazy values (an expression evaluating to a
//! referenced subtree that itself holds lazy values). The pass count is
//! bounded: a pathological chain fails instead of looping forever.

use crate::error::{Error, ErrorKind, Result};
use crate::eval::ExprEngine;
use crate::interpolation::{self, EvalScope};
use confit_keypath::KeyPath;
use confit_yaml::{Context, LazyValue, Value};

/// Upper bound on resolve passes over the tree.
pub const MAX_RESOLVE_PASSES: usize = 5;

/// Resolve one lazy value in place, memoizing the result. A second call
/// returns the stored value without touching the evaluator.
pub fn resolve_lazy_in_place(
    lazy: &mut LazyValue,
    scope: &EvalScope,
) -> Result<Value> {
    if let Some(resolved) = &lazy.resolved {
        return Ok((**resolved).clone());
    }
    let value = interpolation::resolve_lazy(lazy, scope)?;
    lazy.resolved = Some(Box::new(value.clone()));
    Ok(value)
}

/// Resolve every lazy value reachable from `root`.
///
/// `context` supplies extra symbols on top of each lazy value's own
/// captured context. Each value's `current_path` is rewired to its actual
/// position in `root` before resolving, so values constructed before their
/// final position was known still resolve relative references correctly.
pub fn resolve_all_lazy(
    root: &mut Value,
    context: &Context,
    engine: &dyn ExprEngine,
) -> Result<()> {
    // a lazy root is a value of its own
    if let Value::Lazy(_) = root {
        let resolved = {
            let scope = EvalScope {
                current_path: KeyPath::root(),
                node_root: None,
                value_root: None,
                ref_root: None,
                context,
                engine,
            };
            match root {
                Value::Lazy(lazy) => {
                    let mut adjusted = (**lazy).clone();
                    adjusted.current_path = KeyPath::root();
                    resolve_lazy_in_place(&mut adjusted, &scope)?
                }
                _ => unreachable!(),
            }
        };
        *root = resolved;
    }

    for pass in 0.. {
        let mut lazy_paths = Vec::new();
        collect_lazy_paths(root, &KeyPath::root(), &mut lazy_paths);
        if lazy_paths.is_empty() {
            return Ok(());
        }
        if pass >= MAX_RESOLVE_PASSES {
            return Err(Error::new(ErrorKind::RecursionExceeded {
                remaining: lazy_paths.len(),
            }));
        }

        let mut resolutions = Vec::with_capacity(lazy_paths.len());
        for path in &lazy_paths {
            let lazy = match path.get_obj(&*root) {
                Ok(Value::Lazy(lazy)) => (**lazy).clone(),
                _ => continue,
            };
            let mut adjusted = lazy;
            adjusted.current_path = path.clone();
            let scope = EvalScope {
                current_path: path.clone(),
                node_root: None,
                value_root: Some(&*root),
                ref_root: None,
                context,
                engine,
            };
            let value = resolve_lazy_in_place(&mut adjusted, &scope)?;
            resolutions.push((path.clone(), value));
        }

        for (path, value) in resolutions {
            if let Ok(slot) = path.get_obj_mut(root) {
                *slot = value;
            }
        }
    }
    Ok(())
}

fn collect_lazy_paths(value: &Value, path: &KeyPath, out: &mut Vec<KeyPath>) {
    match value {
        Value::Lazy(_) => out.push(path.clone()),
        Value::Mapping(map) => {
            for (key, child) in map {
                collect_lazy_paths(child, &path.child(key), out);
            }
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_lazy_paths(item, &path.child_index(i), out);
            }
        }
        // deferred subtrees resolve on their own later pass
        _ => {}
    }
}
