//! Check command: compose and report errors, produce no output.

use crate::render::render_error;
use anyhow::Result;

pub fn execute(target: &str, search_paths: Vec<String>) -> Result<()> {
    let mut loader = super::build_loader(&[], &[], &search_paths)?;
    loader
        .compose_include(&super::as_include_string(target))
        .map_err(|e| render_error(&e, &loader.sources))?;
    println!("ok: {target}");
    Ok(())
}
