//! Merge command: layer documents with an explicit merge key.

use crate::render::{print_value, render_error};
use anyhow::Result;
use confit_compose::{merge_compositions, resolve_all_lazy, MergeKey};

pub fn execute(base: String, overlays: Vec<String>, key: &str, format: &str) -> Result<()> {
    let mut loader = confit_compose::Loader::new();
    let merge_key =
        MergeKey::parse(key).map_err(|e| render_error(&e, &loader.sources))?;

    let mut comp = loader
        .compose_include(&super::as_include_string(&base))
        .map_err(|e| render_error(&e, &loader.sources))?;

    for overlay in &overlays {
        let overlay_comp = loader
            .compose_include(&super::as_include_string(overlay))
            .map_err(|e| render_error(&e, &loader.sources))?;
        comp = merge_compositions(&comp, &overlay_comp, &merge_key);
    }

    let mut value = loader
        .construct(&comp)
        .map_err(|e| render_error(&e, &loader.sources))?;
    resolve_all_lazy(&mut value, &loader.context, loader.engine.as_ref())
        .map_err(|e| render_error(&e, &loader.sources))?;

    print_value(&value, format)
}
