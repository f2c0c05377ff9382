//! Load command: compose, overlay, override, resolve, print.

use crate::render::{print_value, render_error};
use anyhow::{bail, Result};
use confit_compose::{
    cli_override_key, merge_compositions, resolve_all_lazy, EvalScope, Loader, Value,
};
use confit_keypath::KeyPath;
use confit_yaml::interp::has_interpolation;
use tracing::debug;

pub struct LoadArgs {
    pub target: String,
    pub overlays: Vec<String>,
    pub set: Vec<String>,
    pub context: Vec<String>,
    pub deferred: Vec<String>,
    pub search_path: Vec<String>,
    pub format: String,
}

pub fn execute(args: LoadArgs) -> Result<()> {
    let mut loader = super::build_loader(&args.context, &args.deferred, &args.search_path)?;

    let mut comp = loader
        .compose_include(&super::as_include_string(&args.target))
        .map_err(|e| render_error(&e, &loader.sources))?;

    // +path overlays merge on top with the CLI key (new layer wins)
    for overlay in &args.overlays {
        let Some(path) = overlay.strip_prefix('+') else {
            bail!("overlay arguments must start with `+`, got `{overlay}`");
        };
        let overlay_comp = loader
            .compose_include(&super::as_include_string(path))
            .map_err(|e| render_error(&e, &loader.sources))?;
        comp = merge_compositions(&comp, &overlay_comp, &cli_override_key());
        debug!(overlay = path, "applied overlay");
    }

    let mut value = loader
        .construct(&comp)
        .map_err(|e| render_error(&e, &loader.sources))?;

    apply_overrides(&mut value, &args.set, &loader)?;

    resolve_all_lazy(&mut value, &loader.context, loader.engine.as_ref())
        .map_err(|e| render_error(&e, &loader.sources))?;

    print_value(&value, &args.format)
}

/// Apply `--set key.path=value` overrides.
///
/// Override values may themselves be interpolations; they are
/// pre-resolved leniently: a failed pre-resolution leaves the value lazy
/// for the main resolution pass instead of aborting the load.
fn apply_overrides(value: &mut Value, sets: &[String], loader: &Loader) -> Result<()> {
    for set in sets {
        let Some((path_text, raw)) = set.split_once('=') else {
            bail!("expected key.path=value in --set, got `{set}`");
        };

        let new_value = if has_interpolation(raw) {
            let scope = EvalScope {
                current_path: KeyPath::root(),
                node_root: None,
                value_root: None,
                ref_root: None,
                context: &loader.context,
                engine: loader.engine.as_ref(),
            };
            match confit_compose::evaluate_expression(raw, None, &scope) {
                Ok(resolved) => resolved,
                Err(error) => {
                    // leave it lazy; the bulk pass may have more context
                    debug!(%error, raw, "override pre-resolution failed, keeping lazy");
                    Value::Lazy(Box::new(confit_yaml::LazyValue::new(raw)))
                }
            }
        } else {
            super::scalar_value(raw)
        };

        let path = KeyPath::parse(path_text);
        let slot = path
            .get_obj_mut_or_create(value)
            .map_err(|e| anyhow::anyhow!("cannot apply --set {set}: {e}"))?;
        *slot = new_value;
    }
    Ok(())
}
