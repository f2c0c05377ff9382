//! Composition-time instructions.
//!
//! Instructions are tag-driven tree transformations consumed during
//! composition, never surviving into the final tree:
//!
//! - `!define name: value`: remove the entry and bind the value into the
//!   context of the parent and its descendants;
//! - `!set_default name: value`: like `!define`, but existing bindings
//!   win;
//! - `!if cond: content`: keep or drop content by the condition's
//!   truthiness, with an optional `then:`/`else:` form;
//! - `!each(var) iterable: template`: duplicate the template once per
//!   item, binding `var` in each duplicate's context.

use crate::api::Loader;
use crate::construct::construct_simple;
use crate::context::{add_context_to_tree_with, add_to_context, context_add};
use crate::error::{Error, Result};
use crate::interpolation::{evaluate_expression, EvalScope};
use crate::merge::{add_to_context_key, MergeKey};
use confit_keypath::KeyPath;
use confit_yaml::{
    CompositionResult, Context, InterpolableNode, MappingNode, Node, SequenceNode, Value,
};

const MAX_INSTRUCTION_ROUNDS: usize = 10_000;

/// Process all instructions in the composition, shallowest first,
/// repeating until none remain. Returns the variables bound by `!define`,
/// so the loader can expose them to later evaluation.
pub(crate) fn process_instructions(
    loader: &mut Loader,
    comp: &mut CompositionResult,
) -> Result<Context> {
    let mut defined = Context::new();

    for round in 0.. {
        if round >= MAX_INSTRUCTION_ROUNDS {
            return Err(Error::instruction(
                "instruction processing did not terminate",
            ));
        }
        comp.reindex();
        // `!generate` markers belong to the document fan-out driver
        let next = comp
            .special
            .instructions
            .iter()
            .find(|&p| {
                comp.get(p)
                    .map(|n| !n.tag().starts_with("!generate"))
                    .unwrap_or(false)
            })
            .cloned();
        let Some(path) = next else {
            break;
        };

        let tag = comp.get(&path)?.tag().to_string();
        if tag == "!define" {
            run_define(loader, comp, &path, false, &mut defined)?;
        } else if tag == "!set_default" {
            run_define(loader, comp, &path, true, &mut defined)?;
        } else if tag == "!if" {
            run_if(loader, comp, &path)?;
        } else if tag.starts_with("!each") {
            run_each(loader, comp, &path)?;
        } else {
            return Err(Error::instruction(format!("unknown instruction tag `{tag}`"))
                .at(comp.get(&path)?.source()));
        }
    }
    Ok(defined)
}

fn require_mapping_key(path: &KeyPath, what: &str) -> Result<()> {
    if path.is_mapping_key() {
        Ok(())
    } else {
        Err(Error::instruction(format!(
            "instruction `{what}` must be a mapping key, but got `{path}`"
        )))
    }
}

fn instruction_scope_context(loader: &Loader, node_context: &Context) -> Context {
    context_add(&loader.context, node_context, &add_to_context_key())
}

fn run_define(
    loader: &mut Loader,
    comp: &mut CompositionResult,
    path: &KeyPath,
    only_default: bool,
    defined: &mut Context,
) -> Result<()> {
    let what = if only_default { "set_default" } else { "define" };
    require_mapping_key(path, what)?;

    let key_node = comp.get(path)?.clone();
    let value_path = path.removed_mapping_key();
    let value_node = comp.get(&value_path)?.clone();
    let parent_path = path.parent();

    let var_name = key_node.key_repr().to_string();
    let is_identifier = !var_name.is_empty()
        && !var_name.starts_with(|c: char| c.is_ascii_digit())
        && var_name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_identifier {
        return Err(Error::instruction(format!(
            "invalid variable name `{var_name}` in !{what}"
        ))
        .at(key_node.source()));
    }

    // an interpolable value triggers composition-time evaluation
    let value = match &value_node {
        Node::Interpolable(interpolable) => {
            let context = instruction_scope_context(loader, &interpolable.context);
            let scope = EvalScope {
                current_path: path.clone(),
                node_root: Some(&comp.root),
                value_root: None,
                ref_root: interpolable.ref_root.as_deref(),
                context: &context,
                engine: loader.engine.as_ref(),
            };
            evaluate_expression(&interpolable.raw, interpolable.spans.as_deref(), &scope)?
        }
        other => construct_simple(other)?,
    };

    {
        let parent = comp.get_mut(&parent_path)?;
        let mapping = parent.as_mapping_mut().ok_or_else(|| {
            Error::instruction(format!("!{what} must appear inside a mapping"))
        })?;
        mapping.remove(&var_name);
    }

    let mut binding = Context::new();
    binding.insert(var_name.clone(), value.clone());
    let merge_key = if only_default {
        MergeKey::parse("<<{~>}[~>]").expect("valid key")
    } else {
        add_to_context_key()
    };
    add_context_to_tree_with(comp.get_mut(&parent_path)?, &binding, &merge_key);

    if !only_default {
        defined.insert(var_name, value);
    }
    comp.reindex();
    Ok(())
}

fn scalar_truthiness(text: &str) -> Result<bool> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(i != 0);
    }
    match text.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" | "null" | "none" | "" => Ok(false),
        other => Err(Error::instruction(format!(
            "cannot interpret `{other}` as a condition"
        ))),
    }
}

fn run_if(loader: &mut Loader, comp: &mut CompositionResult, path: &KeyPath) -> Result<()> {
    require_mapping_key(path, "if")?;

    let key_node = comp.get(path)?.clone();
    let value_node = comp.get(&path.removed_mapping_key())?.clone();
    let parent_path = path.parent();

    let condition = match &key_node {
        Node::Interpolable(interpolable) => {
            let context = instruction_scope_context(loader, &interpolable.context);
            let scope = EvalScope {
                current_path: path.clone(),
                node_root: Some(&comp.root),
                value_root: None,
                ref_root: interpolable.ref_root.as_deref(),
                context: &context,
                engine: loader.engine.as_ref(),
            };
            evaluate_expression(&interpolable.raw, interpolable.spans.as_deref(), &scope)?
                .is_truthy()
        }
        other => scalar_truthiness(other.key_repr()).map_err(|e| e.at(other.source()))?,
    };

    // then/else form?
    let (then_node, else_node, is_then_else) = match value_node.as_mapping() {
        Some(mapping) if mapping.contains_key("then") || mapping.contains_key("else") => (
            mapping.get("then").cloned(),
            mapping.get("else").cloned(),
            true,
        ),
        _ => (None, None, false),
    };

    // drop the instruction entry first
    {
        let parent = comp.get_mut(&parent_path)?;
        let mapping = parent
            .as_mapping_mut()
            .ok_or_else(|| Error::instruction("!if must appear inside a mapping"))?;
        mapping.remove(key_node.key_repr());
    }

    let selected = if is_then_else {
        if condition {
            then_node
        } else {
            else_node
        }
    } else if condition {
        Some(value_node)
    } else {
        None
    };

    if let Some(content) = selected {
        match content {
            Node::Mapping(content_mapping) => {
                let parent = comp.get_mut(&parent_path)?;
                let mapping = parent
                    .as_mapping_mut()
                    .ok_or_else(|| Error::instruction("!if must appear inside a mapping"))?;
                for (key, value) in content_mapping.pairs().iter().cloned() {
                    mapping.insert(key, value);
                }
            }
            other => {
                comp.set_at(&parent_path, other)?;
            }
        }
    }
    comp.reindex();
    Ok(())
}

fn each_var_name(tag: &str) -> Result<String> {
    let rest = tag.strip_prefix("!each").unwrap_or_default();
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| {
            Error::instruction(format!("expected `!each(var)`, got `{tag}`"))
        })?;
    let valid = !inner.is_empty()
        && !inner.starts_with(|c: char| c.is_ascii_digit())
        && inner.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::instruction(format!(
            "invalid loop variable `{inner}` in `{tag}`"
        )));
    }
    Ok(inner.to_string())
}

fn run_each(loader: &mut Loader, comp: &mut CompositionResult, path: &KeyPath) -> Result<()> {
    require_mapping_key(path, "each")?;

    let key_node = match comp.get(path)?.clone() {
        Node::Interpolable(interpolable) => interpolable,
        other => {
            return Err(Error::instruction(
                "the iterable of !each must be an interpolation expression",
            )
            .at(other.source()))
        }
    };
    let var = each_var_name(&key_node.tag)?;
    let value_node = comp.get(&path.removed_mapping_key())?.clone();
    let parent_path = path.parent();
    let parent = comp
        .get(&parent_path)?
        .as_mapping()
        .ok_or_else(|| Error::instruction("!each must appear inside a mapping"))?
        .clone();

    let items = {
        let context = instruction_scope_context(loader, &key_node.context);
        let scope = EvalScope {
            current_path: path.clone(),
            node_root: Some(&comp.root),
            value_root: None,
            ref_root: key_node.ref_root.as_deref(),
            context: &context,
            engine: loader.engine.as_ref(),
        };
        match evaluate_expression(&key_node.raw, key_node.spans.as_deref(), &scope)? {
            Value::Sequence(items) => items,
            other => {
                return Err(Error::instruction(format!(
                    "!each iterable must evaluate to a sequence, got a {}",
                    other.type_name()
                ))
                .at(&key_node.source))
            }
        }
    };

    // single-key mapping sitting inside a sequence gets auto-spliced
    let grandparent_path = parent_path.parent();
    let splice_index = if parent.len() == 1 && parent_path != KeyPath::root() {
        match comp.get(&grandparent_path) {
            Ok(Node::Sequence(_)) => parent_path.last_key().and_then(|k| k.parse::<usize>().ok()),
            _ => None,
        }
    } else {
        None
    };

    match &value_node {
        Node::Sequence(template) => {
            let expanded = expand_sequence_items(&items, template, &var);
            if let Some(index) = splice_index {
                let mut grandparent = comp
                    .get(&grandparent_path)?
                    .as_sequence()
                    .expect("checked above")
                    .clone();
                grandparent.items.splice(index..=index, expanded);
                comp.set_at(&grandparent_path, Node::Sequence(grandparent))?;
            } else {
                if parent.len() != 1 {
                    return Err(Error::instruction(
                        "!each with a sequence template must be the mapping's only key",
                    )
                    .at(&key_node.source));
                }
                let mut sequence = SequenceNode::from_mapping_shell(&parent);
                sequence.items = expanded;
                comp.set_at(&parent_path, Node::Sequence(sequence))?;
            }
        }

        Node::Mapping(template) => {
            let single_instruction = template.pairs().len() == 1
                && confit_yaml::is_instruction_tag(template.pairs()[0].0.tag());

            if single_instruction {
                let results = expand_inner_instruction(loader, &items, template, &var)?;
                apply_inner_results(comp, &parent_path, &parent, &key_node, splice_index, results)?;
            } else {
                let mut new_parent = parent.clone();
                new_parent.remove(key_node.raw.as_str());
                for item in &items {
                    let mut binding = Context::new();
                    binding.insert(var.clone(), item.clone());
                    for (template_key, template_value) in template.iter() {
                        let mut value = template_value.clone();
                        add_context_to_tree_with(&mut value, &binding, &add_to_context_key());
                        let key_str =
                            expanded_key(loader, template_key, &binding, path, &comp.root)?;
                        new_parent.insert_str(&key_str, value);
                    }
                }
                comp.set_at(&parent_path, Node::Mapping(new_parent))?;
            }
        }

        other => {
            return Err(Error::instruction(format!(
                "invalid !each template of shape {}",
                other.tag()
            ))
            .at(other.source()))
        }
    }
    comp.reindex();
    Ok(())
}

/// Duplicate a sequence template once per item with the loop variable
/// bound in each duplicate's context.
fn expand_sequence_items(items: &[Value], template: &SequenceNode, var: &str) -> Vec<Node> {
    let mut expanded = Vec::with_capacity(items.len() * template.len());
    for item in items {
        let mut binding = Context::new();
        binding.insert(var.to_string(), item.clone());
        for element in &template.items {
            let mut duplicate = element.clone();
            add_context_to_tree_with(&mut duplicate, &binding, &add_to_context_key());
            expanded.push(duplicate);
        }
    }
    expanded
}

/// `!each` whose template is a single nested instruction: run the inner
/// instruction once per item on a temporary single-entry document.
fn expand_inner_instruction(
    loader: &mut Loader,
    items: &[Value],
    template: &MappingNode,
    var: &str,
) -> Result<Vec<Node>> {
    let (inner_key, inner_value) = &template.pairs()[0];
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let mut binding = Context::new();
        binding.insert(var.to_string(), item.clone());

        let mut key = inner_key.clone();
        add_to_context(&mut key, &binding, &add_to_context_key());
        let mut value = inner_value.clone();
        add_context_to_tree_with(&mut value, &binding, &add_to_context_key());

        let temp_mapping = MappingNode::with_pairs(
            confit_yaml::DEFAULT_MAP_TAG,
            vec![(key, value)],
        )?;
        let mut temp = CompositionResult::new(Node::Mapping(temp_mapping));
        process_instructions(loader, &mut temp)?;
        results.push(temp.root);
    }
    Ok(results)
}

fn apply_inner_results(
    comp: &mut CompositionResult,
    parent_path: &KeyPath,
    parent: &MappingNode,
    key_node: &InterpolableNode,
    splice_index: Option<usize>,
    results: Vec<Node>,
) -> Result<()> {
    let all_sequences = results.iter().all(|n| matches!(n, Node::Sequence(_)));
    if all_sequences && !results.is_empty() {
        let mut expanded = Vec::new();
        for result in results {
            if let Node::Sequence(sequence) = result {
                expanded.extend(sequence.items);
            }
        }
        if let Some(index) = splice_index {
            let grandparent_path = parent_path.parent();
            let mut grandparent = comp
                .get(&grandparent_path)?
                .as_sequence()
                .ok_or_else(|| Error::instruction("expected enclosing sequence"))?
                .clone();
            grandparent.items.splice(index..=index, expanded);
            comp.set_at(&grandparent_path, Node::Sequence(grandparent))?;
        } else {
            let mut sequence = SequenceNode::from_mapping_shell(parent);
            sequence.items = expanded;
            comp.set_at(parent_path, Node::Sequence(sequence))?;
        }
    } else {
        let mut new_parent = parent.clone();
        new_parent.remove(key_node.raw.as_str());
        for result in results {
            if let Node::Mapping(mapping) = result {
                for (key, value) in mapping.pairs().iter().cloned() {
                    new_parent.insert(key, value);
                }
            }
        }
        comp.set_at(parent_path, Node::Mapping(new_parent))?;
    }
    Ok(())
}

/// Evaluate a template mapping key for one iteration. Keys must be
/// interpolable so each duplicate gets a distinct name.
fn expanded_key(
    loader: &Loader,
    template_key: &Node,
    binding: &Context,
    path: &KeyPath,
    root: &Node,
) -> Result<String> {
    match template_key {
        Node::Interpolable(interpolable) => {
            let mut context = instruction_scope_context(loader, &interpolable.context);
            context = context_add(&context, binding, &add_to_context_key());
            let scope = EvalScope {
                current_path: path.clone(),
                node_root: Some(root),
                value_root: None,
                ref_root: interpolable.ref_root.as_deref(),
                context: &context,
                engine: loader.engine.as_ref(),
            };
            Ok(
                evaluate_expression(&interpolable.raw, interpolable.spans.as_deref(), &scope)?
                    .coerce_string(),
            )
        }
        other => Err(Error::instruction(format!(
            "keys inside an !each template must be interpolable (so each copy is unique), got `{}`",
            other.key_repr()
        ))
        .at(other.source())),
    }
}
