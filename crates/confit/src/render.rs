//! Plain-text rendering of composition errors and resolved values.

use anyhow::anyhow;
use confit_compose::{Error, Value};
use confit_source_map::SourceRegistry;

/// Render a composition error with its location, a source excerpt, and
/// the include trace.
pub fn render_error(error: &Error, sources: &SourceRegistry) -> anyhow::Error {
    let mut out = format!("error: {}", error.kind);

    if let Some(location) = &error.location {
        let path = location
            .file
            .and_then(|id| sources.path(id))
            .unwrap_or("<unknown>");
        out.push_str(&format!(
            "\n  --> {}:{}:{}",
            path,
            location.line(),
            location.column()
        ));
        if let Some(excerpt) = sources.excerpt(location) {
            out.push_str(&format!("\n   | {}", excerpt.trim_end()));
            out.push_str(&format!(
                "\n   | {}^",
                " ".repeat(location.range.start.column)
            ));
        }
    }

    if !error.trace.is_empty() {
        out.push_str(&format!("\n{}", error.trace));
    }

    anyhow!(out)
}

/// Print a resolved value as JSON or YAML.
pub fn print_value(value: &Value, format: &str) -> anyhow::Result<()> {
    let json = value.to_json_lossy();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&json)?),
        "yaml" => print!("{}", serde_yaml::to_string(&json)?),
        other => return Err(anyhow!("unknown output format `{other}` (use json or yaml)")),
    }
    Ok(())
}
