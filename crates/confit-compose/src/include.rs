//! Include resolution.
//!
//! An include string is `loader:path[@subpath]`, or one of the special
//! forms resolved against the current composition: `$name` (in-memory,
//! from the including node's context), `/abs.path` (reroot within the same
//! document), `.rel` (relative to the including node), or a bare anchor
//! name. `@` separates the subpath unless escaped as `\@`.
//!
//! Targets inside an existing composition are always deep-copied before
//! splicing: two includes of the same anchor must never alias, or mutating
//! one would corrupt the other. The including scope's context is merged
//! onto every node of the resolved subtree so expressions inside included
//! content can see the includer's variables.

use crate::api::Loader;
use crate::construct::value_to_node;
use crate::context::{add_context_to_tree, context_add};
use crate::error::{Error, ErrorKind, Result};
use crate::interpolation::{evaluate_expression, EvalScope};
use crate::loaders::LoaderContent;
use crate::merge::add_to_context_key;
use confit_keypath::KeyPath;
use confit_yaml::interp::{find_context_vars, has_interpolation};
use confit_yaml::{CompositionResult, Context, IncludeNode, Node};

/// Parsed include string: the main path and the optional `@subpath`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeComponents {
    pub main_path: String,
    pub key_path: String,
}

/// Split an include string at the first unescaped `@`, unescaping `\@`.
pub fn parse_include_str(include_str: &str) -> IncludeComponents {
    let chars: Vec<char> = include_str.chars().collect();
    let mut split_at = None;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == '@' && i > 0 {
            split_at = Some(i);
            break;
        }
        i += 1;
    }
    let (main, key) = match split_at {
        Some(at) => (
            chars[..at].iter().collect::<String>(),
            chars[at + 1..].iter().collect::<String>(),
        ),
        None => (include_str.to_string(), String::new()),
    };
    IncludeComponents {
        main_path: main.replace("\\@", "@"),
        key_path: key.replace("\\@", "@"),
    }
}

/// Resolve one include string into a composition.
pub(crate) fn resolve_include(
    loader: &mut Loader,
    include_str: &str,
    include_node_path: &KeyPath,
    composition: Option<&CompositionResult>,
    node: Option<&IncludeNode>,
) -> Result<CompositionResult> {
    let context = match node {
        Some(node) => context_add(&loader.context, &node.context, &add_to_context_key()),
        None => loader.context.clone(),
    };

    // include strings may themselves contain `${...}` interpolation and
    // `$CAPITAL` loader variables
    let mut include_str = include_str.to_string();
    if has_interpolation(&include_str) {
        let scope = EvalScope {
            current_path: include_node_path.clone(),
            node_root: composition.map(|c| &c.root),
            value_root: None,
            ref_root: None,
            context: &context,
            engine: loader.engine.as_ref(),
        };
        include_str = evaluate_expression(&include_str, None, &scope)?.coerce_string();
    }
    include_str = substitute_known_vars(&include_str, &context);

    let components = parse_include_str(&include_str);
    let main = components.main_path.as_str();

    if let Some(composition) = composition {
        if let Some(name) = main.strip_prefix('$') {
            let result = in_memory_include(name, &components.key_path, &context, &include_str)?;
            return Ok(propagated(result, node, &Context::new()));
        }

        if main.starts_with('/') {
            require_no_keypath(&components, &include_str)?;
            let result = composition.rerooted(&KeyPath::parse(main))?;
            return Ok(propagated(result, node, &Context::new()));
        }

        if main.starts_with('.') || main.starts_with('@') {
            require_no_keypath(&components, &include_str)?;
            let rel = main.strip_prefix('@').unwrap_or(main);
            let target = include_node_path.parent().joined(&KeyPath::parse(rel));
            let result = composition.rerooted(&target)?;
            return Ok(propagated(result, node, &Context::new()));
        }

        if let Some(anchor_path) = composition.anchor_paths.get(main) {
            let target = anchor_path.joined(&KeyPath::parse(&components.key_path));
            let result = composition.rerooted(&target)?;
            return Ok(propagated(result, node, &Context::new()));
        }

        if !main.contains(':') {
            return Err(Error::new(ErrorKind::InvalidInclude {
                include_str: include_str.clone(),
                message: format!("anchor `{main}` not found in document"),
            }));
        }
    }

    let (loader_name, path) = main.split_once(':').ok_or_else(|| {
        Error::new(ErrorKind::InvalidInclude {
            include_str: include_str.clone(),
            message: "no loader specified".to_string(),
        })
    })?;

    let backend = loader
        .loaders
        .get(loader_name)
        .cloned()
        .ok_or_else(|| {
            Error::new(ErrorKind::UnknownLoader {
                name: loader_name.to_string(),
            })
        })?;

    let loaded = backend(path, &loader.env)?;
    let file_context = loaded.context;
    loader.context = context_add(&loader.context, &file_context, &add_to_context_key());

    let mut result = match loaded.content {
        LoaderContent::Composition(result) => result,
        LoaderContent::Text(text) => {
            // included files resolve their own relative includes first;
            // their directory joins the search path while they compose
            let pushed_dir = file_context
                .get("DIR")
                .and_then(|v| v.as_str())
                .map(std::path::PathBuf::from);
            if let Some(dir) = &pushed_dir {
                loader.env.search_paths.insert(0, dir.clone());
            }
            let composed = loader.compose_source(&text, main);
            if pushed_dir.is_some() {
                loader.env.search_paths.remove(0);
            }
            composed?
        }
    };

    if !components.key_path.is_empty() {
        result = result.rerooted(&KeyPath::parse(&components.key_path))?;
    }

    Ok(propagated(result, node, &file_context))
}

/// Merge the includer's context (plus any loader-provided variables) onto
/// every node of the resolved subtree.
fn propagated(
    mut result: CompositionResult,
    node: Option<&IncludeNode>,
    file_context: &Context,
) -> CompositionResult {
    let merged_context = match node {
        Some(node) => context_add(&node.context, file_context, &add_to_context_key()),
        None => file_context.clone(),
    };
    add_context_to_tree(&mut result.root, &merged_context);
    result
}

fn in_memory_include(
    name: &str,
    key_path: &str,
    context: &Context,
    include_str: &str,
) -> Result<CompositionResult> {
    let value = context.get(name).ok_or_else(|| {
        Error::new(ErrorKind::InvalidInclude {
            include_str: include_str.to_string(),
            message: format!("in-memory include `${name}` not found in context"),
        })
    })?;
    let mut node = value_to_node(value);
    if !key_path.is_empty() {
        node = KeyPath::parse(key_path).get_obj(&node)?.clone();
    }
    Ok(CompositionResult::new(node))
}

fn require_no_keypath(components: &IncludeComponents, include_str: &str) -> Result<()> {
    if components.key_path.is_empty() {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::InvalidInclude {
            include_str: include_str.to_string(),
            message: "a subpath is not valid on absolute or relative includes".to_string(),
        }))
    }
}

/// Substitute `$CAPITAL` variables that are present in the context, leaving
/// unknown ones untouched (they may be in-memory include names).
fn substitute_known_vars(include_str: &str, context: &Context) -> String {
    let vars = find_context_vars(include_str);
    if vars.is_empty() {
        return include_str.to_string();
    }
    let mut out = include_str.to_string();
    for var in vars.iter().rev() {
        if let Some(value) = context.get(&var.name) {
            out.replace_range(var.start..var.end, &value.coerce_string());
        }
    }
    out
}

const MAX_INCLUDE_ROUNDS: usize = 64;

/// Resolve every include node in the composition, bottom-up, until none
/// remain. Included content may itself contain includes; each round picks
/// up what the previous one spliced in.
pub(crate) fn process_includes(loader: &mut Loader, comp: &mut CompositionResult) -> Result<()> {
    for round in 0.. {
        comp.reindex();
        let include_paths = comp.special.includes.clone();
        if include_paths.is_empty() {
            return Ok(());
        }
        if round >= MAX_INCLUDE_ROUNDS {
            return Err(Error::new(ErrorKind::InvalidInclude {
                include_str: String::new(),
                message: "include resolution did not terminate (include cycle?)".to_string(),
            }));
        }

        for path in include_paths {
            let include = match comp.get(&path) {
                Ok(Node::Include(include)) => include.clone(),
                _ => continue,
            };

            let saved_trace = loader.trace.clone();
            loader.trace = loader
                .trace
                .pushed(include.reference.clone(), include.source.clone());

            let resolved =
                resolve_include(loader, &include.reference, &path, Some(comp), Some(&include))
                    .map_err(|e| e.at(&include.source).traced(&loader.trace));

            let result = match resolved {
                Ok(result) => result,
                Err(e) => return Err(e),
            };
            loader.trace = saved_trace;

            comp.set_at(&path, result.root)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_include_str_plain() {
        let components = parse_include_str("file:configs/params.yaml");
        assert_eq!(components.main_path, "file:configs/params.yaml");
        assert_eq!(components.key_path, "");
    }

    #[test]
    fn test_parse_include_str_subpath() {
        let components = parse_include_str("file:params.yaml@model.lr");
        assert_eq!(components.main_path, "file:params.yaml");
        assert_eq!(components.key_path, "model.lr");
    }

    #[test]
    fn test_parse_include_str_escaped_at() {
        let components = parse_include_str("file:odd\\@name.yaml@sub");
        assert_eq!(components.main_path, "file:odd@name.yaml");
        assert_eq!(components.key_path, "sub");
    }

    #[test]
    fn test_substitute_known_vars_lenient() {
        let mut context = Context::new();
        context.insert(
            "DIR".to_string(),
            confit_yaml::Value::String("/etc/app".into()),
        );
        assert_eq!(
            substitute_known_vars("file:$DIR/x.yaml", &context),
            "file:/etc/app/x.yaml"
        );
        // unknown names stay, they may be in-memory includes
        assert_eq!(substitute_known_vars("$CONF", &context), "$CONF");
    }
}
