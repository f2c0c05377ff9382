//! Named loader backends for includes.
//!
//! A loader takes the path portion of an include string and returns either
//! raw text (recursively composed by the caller) or an already-composed
//! result, plus new context variables for the surrounding scope (`$FILE`,
//! `$DIR`, `$FILE_STEM` for the file loader). Built-ins: `file`, `pkg`,
//! `env`; callers can register their own under any name.
//!
//! File text is cached by resolved path. Source files are assumed
//! immutable for the duration of a run, so the cache is never invalidated
//! and is safe for concurrent readers.

use crate::error::{Error, ErrorKind, Result};
use confit_yaml::{CompositionResult, Context, Value};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// What a loader produced.
pub enum LoaderContent {
    /// Raw text, to be composed by the caller
    Text(String),
    /// An already-composed document
    Composition(CompositionResult),
}

/// A loader's output: content plus new context variables.
pub struct LoaderResult {
    pub content: LoaderContent,
    pub context: Context,
}

/// A loader backend.
pub type LoaderFn = Arc<dyn Fn(&str, &LoaderEnv) -> Result<LoaderResult> + Send + Sync>;

/// Environment shared by loaders.
#[derive(Debug, Clone, Default)]
pub struct LoaderEnv {
    /// Directories searched by the `file` loader, tried in order after
    /// the current directory
    pub search_paths: Vec<PathBuf>,
}

/// The named loader backends available to include resolution.
#[derive(Clone)]
pub struct LoaderRegistry {
    backends: IndexMap<String, LoaderFn>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = LoaderRegistry {
            backends: IndexMap::new(),
        };
        registry.register("file", Arc::new(|path, env| load_from_file(path, env)));
        registry.register("pkg", Arc::new(|path, _env| load_from_pkg(path)));
        registry.register("env", Arc::new(|path, _env| load_from_env(path)));
        registry
    }
}

impl LoaderRegistry {
    pub fn register(&mut self, name: impl Into<String>, loader: LoaderFn) {
        self.backends.insert(name.into(), loader);
    }

    pub fn get(&self, name: &str) -> Option<&LoaderFn> {
        self.backends.get(name)
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The candidate paths tried for a file include: as written, with
/// `.yaml`, with `.yml`, with the extension stripped: in that order.
fn with_possible_ext(path: &str) -> Vec<PathBuf> {
    let p = PathBuf::from(path);
    vec![
        p.clone(),
        p.with_extension("yaml"),
        p.with_extension("yml"),
        p.with_extension(""),
    ]
}

static FILE_CACHE: Lazy<RwLock<HashMap<PathBuf, Arc<str>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn cached_read(path: &Path) -> Result<Arc<str>> {
    if let Some(content) = FILE_CACHE.read().expect("cache lock").get(path) {
        return Ok(Arc::clone(content));
    }
    let content: Arc<str> = std::fs::read_to_string(path)
        .map_err(|e| {
            Error::new(ErrorKind::IncludeNotFound {
                message: format!("{}: {e}", path.display()),
            })
        })?
        .into();
    FILE_CACHE
        .write()
        .expect("cache lock")
        .insert(path.to_path_buf(), Arc::clone(&content));
    Ok(content)
}

fn file_context(path: &Path) -> Context {
    let mut context = IndexMap::new();
    context.insert(
        "FILE".to_string(),
        Value::String(path.display().to_string()),
    );
    context.insert(
        "DIR".to_string(),
        Value::String(
            path.parent()
                .unwrap_or_else(|| Path::new("."))
                .display()
                .to_string(),
        ),
    );
    context.insert(
        "FILE_STEM".to_string(),
        Value::String(
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
    );
    context
}

fn load_from_file(path: &str, env: &LoaderEnv) -> Result<LoaderResult> {
    let candidates = with_possible_ext(path);
    let mut roots = vec![PathBuf::from(".")];
    roots.extend(env.search_paths.iter().cloned());

    for root in &roots {
        for candidate in &candidates {
            let full = root.join(candidate);
            if full.exists() {
                let content = cached_read(&full)?;
                return Ok(LoaderResult {
                    content: LoaderContent::Text(content.to_string()),
                    context: file_context(&full),
                });
            }
        }
    }
    Err(Error::new(ErrorKind::IncludeNotFound {
        message: format!("file not found: {path}"),
    }))
}

static PKG_ROOTS: Lazy<RwLock<HashMap<String, PathBuf>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register the resource root for a package name, making
/// `pkg:name:relative/path` includes resolvable.
pub fn register_pkg_root(name: impl Into<String>, root: impl Into<PathBuf>) {
    PKG_ROOTS
        .write()
        .expect("pkg roots lock")
        .insert(name.into(), root.into());
}

fn load_from_pkg(path: &str) -> Result<LoaderResult> {
    let (pkg, rel) = path.split_once(':').ok_or_else(|| {
        Error::new(ErrorKind::InvalidInclude {
            include_str: format!("pkg:{path}"),
            message: "expected pkg:package_name:relative/path".to_string(),
        })
    })?;

    let root = PKG_ROOTS
        .read()
        .expect("pkg roots lock")
        .get(pkg)
        .cloned()
        .ok_or_else(|| {
            Error::new(ErrorKind::IncludeNotFound {
                message: format!("unknown package `{pkg}` (no registered resource root)"),
            })
        })?;

    for candidate in with_possible_ext(rel) {
        let full = root.join(candidate);
        if full.exists() {
            let content = cached_read(&full)?;
            return Ok(LoaderResult {
                content: LoaderContent::Text(content.to_string()),
                context: file_context(&full),
            });
        }
    }
    Err(Error::new(ErrorKind::IncludeNotFound {
        message: format!("file not found in package `{pkg}`: {rel}"),
    }))
}

fn load_from_env(name: &str) -> Result<LoaderResult> {
    let value = std::env::var(name).map_err(|_| {
        Error::new(ErrorKind::IncludeNotFound {
            message: format!("environment variable `{name}` is not set"),
        })
    })?;
    Ok(LoaderResult {
        content: LoaderContent::Text(value),
        context: Context::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_loader_extension_completion() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("params.yaml");
        writeln!(std::fs::File::create(&file_path).unwrap(), "a: 1").unwrap();

        let env = LoaderEnv {
            search_paths: vec![dir.path().to_path_buf()],
        };
        let registry = LoaderRegistry::default();
        let loader = registry.get("file").unwrap();

        // `params` finds `params.yaml`
        let result = loader("params", &env).unwrap();
        match result.content {
            LoaderContent::Text(text) => assert!(text.contains("a: 1")),
            _ => panic!("expected text"),
        }
        assert!(result.context.contains_key("DIR"));
        assert_eq!(
            result.context["FILE_STEM"].as_str(),
            Some("params")
        );
    }

    #[test]
    fn test_file_loader_missing() {
        let env = LoaderEnv::default();
        let registry = LoaderRegistry::default();
        let loader = registry.get("file").unwrap();
        assert!(loader("definitely/not/here.yaml", &env).is_err());
    }

    #[test]
    fn test_env_loader() {
        std::env::set_var("CONFIT_TEST_VAR_A", "42");
        let registry = LoaderRegistry::default();
        let loader = registry.get("env").unwrap();
        let result = loader("CONFIT_TEST_VAR_A", &LoaderEnv::default()).unwrap();
        match result.content {
            LoaderContent::Text(text) => assert_eq!(text, "42"),
            _ => panic!("expected text"),
        }
        assert!(loader("CONFIT_TEST_VAR_MISSING", &LoaderEnv::default()).is_err());
    }

    #[test]
    fn test_pkg_loader_registered_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("defaults.yaml"), "x: 9").unwrap();
        register_pkg_root("testpkg_loaders", dir.path());

        let registry = LoaderRegistry::default();
        let loader = registry.get("pkg").unwrap();
        let result = loader("testpkg_loaders:defaults", &LoaderEnv::default()).unwrap();
        match result.content {
            LoaderContent::Text(text) => assert!(text.contains("x: 9")),
            _ => panic!("expected text"),
        }
        assert!(loader("nopkg:defaults", &LoaderEnv::default()).is_err());
    }

    #[test]
    fn test_custom_loader_registration() {
        let mut registry = LoaderRegistry::default();
        registry.register(
            "mem",
            Arc::new(|path, _env| {
                Ok(LoaderResult {
                    content: LoaderContent::Text(format!("name: {path}")),
                    context: Context::new(),
                })
            }),
        );
        let loader = registry.get("mem").unwrap();
        let result = loader("demo", &LoaderEnv::default()).unwrap();
        match result.content {
            LoaderContent::Text(text) => assert_eq!(text, "name: demo"),
            _ => panic!("expected text"),
        }
    }
}
