//! `!generate` document fan-out.
//!
//! A `!generate` node expands a single node position into one whole
//! document variant per generated value. Markers are expanded deepest
//! first, each variant re-scanned until no markers remain, so independent
//! markers multiply into the full cartesian product.

use crate::api::Loader;
use crate::construct::value_to_node;
use crate::error::{Error, Result};
use crate::interpolation::{evaluate_expression, EvalScope};
use crate::merge::add_to_context_key;
use confit_keypath::KeyPath;
use confit_yaml::{CompositionResult, Node, Value};

const GENERATE_TAG_PREFIX: &str = "!generate";

/// Upper bound on generated variants; the cartesian product grows fast.
pub const MAX_GENERATED_VARIANTS: usize = 4096;

/// Expand all `!generate` markers, returning one composition per variant.
/// A document with no markers comes back as a single-element list.
pub fn process_generators(
    loader: &mut Loader,
    comp: CompositionResult,
) -> Result<Vec<CompositionResult>> {
    let mut generators: Vec<KeyPath> = Vec::new();
    comp.walk(|node, path| {
        if node.tag().starts_with(GENERATE_TAG_PREFIX) {
            generators.push(path.clone());
        }
    });
    if generators.is_empty() {
        return Ok(vec![comp]);
    }

    // expand the deepest marker first
    generators.sort_by(|a, b| b.depth().cmp(&a.depth()));
    let path = generators[0].clone();
    let node = comp.get(&path)?.clone();
    let nodes = generate_nodes(loader, &node, &path, &comp)?;

    let mut variants = Vec::new();
    for generated in nodes {
        let mut variant = comp.clone();
        variant.set_at(&path, generated)?;
        // re-scan: remaining markers in this variant expand in turn
        let expanded = process_generators(loader, variant)?;
        variants.extend(expanded);
        if variants.len() > MAX_GENERATED_VARIANTS {
            return Err(Error::instruction(format!(
                "!generate produced more than {MAX_GENERATED_VARIANTS} document variants"
            )));
        }
    }
    Ok(variants)
}

/// The nodes a single generator marker expands into.
fn generate_nodes(
    loader: &mut Loader,
    generator: &Node,
    path: &KeyPath,
    comp: &CompositionResult,
) -> Result<Vec<Node>> {
    let tag = generator.tag();
    let rest = tag.strip_prefix(GENERATE_TAG_PREFIX).unwrap_or_default();
    let element_tag = rest.strip_prefix(':').map(|t| format!("!{t}"));

    let mut nodes = match generator {
        Node::Sequence(sequence) => sequence.items.clone(),
        Node::Interpolable(interpolable) => {
            let context = crate::context::context_add(
                &loader.context,
                &interpolable.context,
                &add_to_context_key(),
            );
            let scope = EvalScope {
                current_path: path.clone(),
                node_root: Some(&comp.root),
                value_root: None,
                ref_root: interpolable.ref_root.as_deref(),
                context: &context,
                engine: loader.engine.as_ref(),
            };
            let evaluated =
                evaluate_expression(&interpolable.raw, interpolable.spans.as_deref(), &scope)?;
            match evaluated {
                Value::Sequence(items) => items.iter().map(value_to_node).collect(),
                other => {
                    return Err(Error::instruction(format!(
                        "!generate must evaluate to a sequence, got a {}",
                        other.type_name()
                    ))
                    .at(generator.source()))
                }
            }
        }
        other => {
            return Err(Error::instruction(
                "!generate value must be a sequence or an interpolation expression",
            )
            .at(other.source()))
        }
    };

    if let Some(element_tag) = element_tag {
        for node in &mut nodes {
            node.set_tag(element_tag.clone());
        }
    } else {
        // strip the marker: generated nodes carry their own shape tags
        for node in &mut nodes {
            if node.tag().starts_with(GENERATE_TAG_PREFIX) {
                node.reset_tag();
            }
        }
    }
    Ok(nodes)
}
