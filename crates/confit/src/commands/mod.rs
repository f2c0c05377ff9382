//! CLI command implementations.

pub mod check;
pub mod load;
pub mod merge;

use anyhow::{bail, Result};
use confit_compose::{Loader, Value};

/// Turn a bare path into a `file:` include string; anything already
/// carrying a loader prefix or special form passes through.
pub fn as_include_string(target: &str) -> String {
    let special = target.starts_with('$')
        || target.starts_with('/')
        || target.starts_with('.')
        || target.starts_with('@')
        || target.contains(':');
    if special {
        target.to_string()
    } else {
        format!("file:{target}")
    }
}

/// Parse a `NAME=VALUE` context binding. Values get YAML scalar typing.
pub fn parse_binding(binding: &str) -> Result<(String, Value)> {
    let Some((name, raw)) = binding.split_once('=') else {
        bail!("expected NAME=VALUE, got `{binding}`");
    };
    Ok((name.to_string(), scalar_value(raw)))
}

/// Scalar typing for CLI-provided values: int, float, bool, null, string.
pub fn scalar_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" | "~" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}

/// Build a loader from common CLI options.
pub fn build_loader(
    context: &[String],
    deferred: &[String],
    search_paths: &[String],
) -> Result<Loader> {
    let mut loader = Loader::new();
    for binding in context {
        let (name, value) = parse_binding(binding)?;
        loader.context.insert(name, value);
    }
    for pattern in deferred {
        loader = loader.defer_at(confit_keypath::KeyPath::parse(pattern));
    }
    for path in search_paths {
        loader.env.search_paths.push(path.into());
    }
    Ok(loader)
}
