//! Interpolation evaluation.
//!
//! Two reference kinds share this machinery with expression spans:
//! `@some.path` resolves against the *live* tree (relative to the parent
//! of the interpolable's own path), `&anchor` against the composition
//! snapshot captured when the document was composed. References are bound
//! to synthetic symbols before the expression reaches the evaluator, so
//! the evaluator itself never sees path syntax.

use crate::construct::construct_simple;
use crate::error::{Error, ErrorKind, Result};
use crate::eval::ExprEngine;
use crate::merge::add_to_context_key;
use confit_keypath::KeyPath;
use confit_yaml::interp::{
    find_field_references, has_interpolation, outermost_interpolation_exprs, InterpolationSpan,
};
use confit_yaml::{CompositionResult, Context, LazyValue, Node, Value};

/// How many times an evaluated result that is itself interpolable text is
/// re-evaluated before we stop.
pub const DEFAULT_EVAL_RECURSION: u32 = 2;

/// Everything an evaluation needs to resolve references and symbols.
pub struct EvalScope<'a> {
    /// Path of the value being evaluated; `@` references resolve against
    /// its parent
    pub current_path: KeyPath,
    /// Live node tree (composition-time evaluation)
    pub node_root: Option<&'a Node>,
    /// Live value tree (resolution-time evaluation)
    pub value_root: Option<&'a Value>,
    /// Snapshot root for `&` references
    pub ref_root: Option<&'a Node>,
    pub context: &'a Context,
    pub engine: &'a dyn ExprEngine,
}

/// Evaluate interpolable text to a value.
///
/// A string that is exactly one interpolation span keeps the evaluated
/// value's type; spans mixed with literal text concatenate stringified
/// results. If the result is itself a string containing interpolation
/// syntax it is re-evaluated, up to [`DEFAULT_EVAL_RECURSION`] times.
pub fn evaluate_expression(
    raw: &str,
    spans: Option<&[InterpolationSpan]>,
    scope: &EvalScope,
) -> Result<Value> {
    evaluate_with_recursion(raw, spans, scope, DEFAULT_EVAL_RECURSION)
}

fn evaluate_with_recursion(
    raw: &str,
    spans: Option<&[InterpolationSpan]>,
    scope: &EvalScope,
    allow_recurse: u32,
) -> Result<Value> {
    let owned_spans;
    let spans = match spans {
        Some(spans) => spans,
        None => {
            owned_spans = outermost_interpolation_exprs(raw);
            &owned_spans
        }
    };
    if spans.is_empty() {
        return Ok(Value::String(raw.to_string()));
    }

    let result = if spans.len() == 1 && spans[0].start == 0 && spans[0].end == raw.len() {
        // a full-string span keeps the evaluated type
        let inner = evaluate_with_recursion(&spans[0].expr, None, scope, allow_recurse)?;
        let expr_text = inner.coerce_string();
        eval_one(&expr_text, scope)?
    } else {
        let mut out = String::new();
        let mut last = 0;
        for span in spans {
            out.push_str(&raw[last..span.start]);
            let inner = evaluate_with_recursion(&span.expr, None, scope, allow_recurse)?;
            let value = eval_one(&inner.coerce_string(), scope)?;
            let value = resolve_if_lazy(value, scope)?;
            out.push_str(&value.coerce_string());
            last = span.end;
        }
        out.push_str(&raw[last..]);
        Value::String(out)
    };

    let result = resolve_if_lazy(result, scope)?;

    if allow_recurse > 0 {
        if let Value::String(s) = &result {
            if has_interpolation(s) {
                return evaluate_with_recursion(s, None, scope, allow_recurse - 1);
            }
        }
    }
    Ok(result)
}

/// Evaluate one expression string: bind references, substitute `$CAPITAL`
/// variables, hand to the engine.
fn eval_one(expr: &str, scope: &EvalScope) -> Result<Value> {
    let references = find_field_references(expr);
    let mut symbols = scope.context.clone();
    let mut rewritten = expr.to_string();

    // replace back-to-front so earlier spans keep their offsets
    for (i, reference) in references.iter().enumerate().rev() {
        let value = resolve_reference(reference.symbol, &reference.expr, scope)?;
        let name = format!("__ref_{i}");
        rewritten.replace_range(reference.start..reference.end, &name);
        symbols.insert(name, value);
    }

    let rewritten = substitute_context_vars(&rewritten, &symbols)?;
    scope.engine.eval(&rewritten, &symbols)
}

fn resolve_reference(symbol: char, path_text: &str, scope: &EvalScope) -> Result<Value> {
    match symbol {
        '@' => {
            let target = scope
                .current_path
                .parent()
                .joined(&KeyPath::parse(path_text));
            if let Some(value_root) = scope.value_root {
                let value = target.get_obj(value_root)?;
                resolve_if_lazy(value.clone(), scope)
            } else if let Some(node_root) = scope.node_root {
                let node = target.get_obj(node_root)?;
                let value = construct_simple(node)?;
                resolve_if_lazy(value, scope)
            } else {
                Err(Error::evaluation(format!(
                    "no root object to resolve `@{path_text}` against"
                )))
            }
        }
        '&' => {
            let root = scope.ref_root.or(scope.node_root).ok_or_else(|| {
                Error::evaluation(format!(
                    "no composition snapshot to resolve `&{path_text}` against"
                ))
            })?;
            let node = KeyPath::parse(path_text).get_obj(root)?;
            let value = construct_simple(node)?;
            resolve_if_lazy(value, scope)
        }
        other => Err(Error::evaluation(format!(
            "unknown reference symbol `{other}`"
        ))),
    }
}

/// Resolve a lazy value produced by a reference or an evaluation, reusing
/// the enclosing scope's roots but the lazy's own path and context.
pub fn resolve_if_lazy(value: Value, scope: &EvalScope) -> Result<Value> {
    match value {
        Value::Lazy(lazy) => resolve_lazy(&lazy, scope),
        other => Ok(other),
    }
}

thread_local! {
    static RESOLVE_DEPTH: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

const MAX_REFERENCE_DEPTH: usize = 32;

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<DepthGuard> {
        RESOLVE_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_REFERENCE_DEPTH {
                return Err(Error::new(ErrorKind::RecursionExceeded { remaining: 1 }));
            }
            depth.set(current + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        RESOLVE_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Resolve a [`LazyValue`] against the roots of `scope`. Memoized results
/// are returned as-is; the validator (if any) runs on fresh evaluations.
/// Reference chains deeper than a fixed bound (mutual `@` cycles) fail
/// rather than recursing forever.
pub fn resolve_lazy(lazy: &LazyValue, scope: &EvalScope) -> Result<Value> {
    if let Some(resolved) = &lazy.resolved {
        return Ok((**resolved).clone());
    }
    let _guard = DepthGuard::enter()?;
    // the value's own captured context shadows caller-supplied symbols
    let context = crate::context::context_add(scope.context, &lazy.context, &add_to_context_key());
    let inner_scope = EvalScope {
        current_path: lazy.current_path.clone(),
        node_root: scope.node_root,
        value_root: scope.value_root,
        ref_root: lazy.ref_root.as_deref().or(scope.ref_root),
        context: &context,
        engine: scope.engine,
    };
    let value = evaluate_expression(&lazy.raw, lazy.spans.as_deref(), &inner_scope)?;
    match &lazy.validator {
        Some(validator) => validator(value).map_err(|message| {
            Error::new(ErrorKind::Construction { message })
        }),
        None => Ok(value),
    }
}

/// Substitute `$CAPITAL` variables with their context values. These are
/// immediate textual substitutions (loader-provided variables like `$DIR`),
/// not deferred interpolations.
pub fn substitute_context_vars(expr: &str, symbols: &Context) -> Result<String> {
    let matches = confit_yaml::interp::find_context_vars(expr);
    if matches.is_empty() {
        return Ok(expr.to_string());
    }
    let mut out = expr.to_string();
    for var in matches.iter().rev() {
        let value = symbols.get(&var.name).ok_or_else(|| {
            Error::new(ErrorKind::UndefinedVariable {
                name: var.name.clone(),
                expr: expr.to_string(),
            })
        })?;
        out.replace_range(var.start..var.end, &value.coerce_string());
    }
    Ok(out)
}

/// Rewrite `&` references in every interpolable node to absolute paths and
/// capture the composition snapshot they resolve against.
///
/// Anchor names take precedence; a non-anchor `&` reference is taken as a
/// path relative to the node's parent and made absolute.
pub fn preprocess_references(comp: &mut CompositionResult) -> Result<()> {
    comp.reindex();
    let interpolable_paths = comp.special.interpolables.clone();
    let snapshot = comp.root.clone();
    let anchor_paths = comp.anchor_paths.clone();

    for path in interpolable_paths {
        let node = match comp.get_mut(&path) {
            Ok(Node::Interpolable(node)) => node,
            _ => continue,
        };
        let references = find_field_references(&node.raw);
        let spans = node
            .spans
            .clone()
            .unwrap_or_else(|| outermost_interpolation_exprs(&node.raw));

        let mut rewritten = node.raw.clone();
        let mut touched = false;
        for reference in references.iter().rev() {
            if reference.symbol != '&' {
                continue;
            }
            if !spans.iter().any(|s| s.contains(reference.start)) {
                continue;
            }
            let mut parts = reference.expr.splitn(2, '.');
            let head = parts.next().unwrap_or_default();
            let rest = parts.next();
            let target = match anchor_paths.get(head) {
                Some(anchor_path) => {
                    let mut target = anchor_path.clone();
                    if let Some(rest) = rest {
                        target.join(&KeyPath::parse(rest));
                    }
                    target
                }
                None => path.parent().joined(&KeyPath::parse(&reference.expr)),
            };
            let absolute = format!("&/{}", target.simplified().rootless());
            rewritten.replace_range(reference.start..reference.end, &absolute);
            touched = true;
        }

        if touched {
            node.raw = rewritten;
            node.spans = Some(outermost_interpolation_exprs(&node.raw));
            node.ref_root = Some(Box::new(snapshot.clone()));
        }
    }
    Ok(())
}
