//! The loader: pipeline orchestration.
//!
//! A [`Loader`] owns everything a load needs (context, loader backends,
//! the expression engine, the type registry, the source registry) and
//! drives the pipeline: compose the event stream, rewrite anchor
//! references, resolve includes, run instructions, apply merges, drop
//! unset entries, wrap deferral boundaries, then construct and resolve.
//!
//! The loader itself is a process-local handle. It is cheap to clone and
//! is always passed explicitly to deferred-node resumption, never stored
//! inside nodes.

use crate::construct::{Constructor, NullRegistry, TypeRegistry};
use crate::context::context_add;
use crate::deferred::{process_deferred, ForcedDeferral};
use crate::error::{Error, Result};
use crate::eval::{ExprEngine, SimpleEngine};
use crate::include::{process_includes, resolve_include};
use crate::instructions::process_instructions;
use crate::interpolation::preprocess_references;
use crate::lazy::resolve_all_lazy;
use crate::loaders::{LoaderEnv, LoaderRegistry};
use crate::merge::{add_to_context_key, merged, MergeKey};
use confit_keypath::KeyPath;
use confit_source_map::{IncludeTrace, SourceRegistry};
use confit_yaml::{
    compose_str_with, delete_unset_nodes, ComposeOptions, CompositionResult, Context, Node, Value,
};
use std::sync::Arc;
use tracing::debug;

/// Composes, resolves and constructs configuration documents.
#[derive(Clone)]
pub struct Loader {
    /// Symbols visible to every expression evaluated under this loader
    pub context: Context,
    /// Tag-to-type refinement for construction
    pub registry: Arc<dyn TypeRegistry>,
    /// The expression evaluator
    pub engine: Arc<dyn ExprEngine>,
    /// Named include backends
    pub loaders: LoaderRegistry,
    /// Environment shared by backends (search paths)
    pub env: LoaderEnv,
    /// Texts of every document seen, for error excerpts
    pub sources: SourceRegistry,
    /// Patterns forcing deferral regardless of tags
    pub deferred_patterns: Vec<ForcedDeferral>,
    /// Composer options
    pub options: ComposeOptions,
    /// The include chain currently being resolved
    pub(crate) trace: IncludeTrace,
}

impl Default for Loader {
    fn default() -> Self {
        Loader {
            context: Context::new(),
            registry: Arc::new(NullRegistry),
            engine: Arc::new(SimpleEngine),
            loaders: LoaderRegistry::default(),
            env: LoaderEnv::default(),
            sources: SourceRegistry::new(),
            deferred_patterns: Vec::new(),
            options: ComposeOptions::default(),
            trace: IncludeTrace::new(),
        }
    }
}

impl Loader {
    pub fn new() -> Self {
        Loader::default()
    }

    /// Add a context binding, builder-style.
    pub fn with_context(mut self, name: impl Into<String>, value: Value) -> Self {
        self.context.insert(name.into(), value);
        self
    }

    /// Replace the type registry, builder-style.
    pub fn with_registry(mut self, registry: Arc<dyn TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Force deferral at paths matching a pattern.
    pub fn defer_at(mut self, pattern: impl Into<KeyPath>) -> Self {
        self.deferred_patterns.push(ForcedDeferral::new(pattern.into()));
        self
    }

    /// Merge new bindings into the loader context (new values win).
    pub fn update_context(&mut self, bindings: &Context) {
        self.context = context_add(&self.context, bindings, &add_to_context_key());
    }

    /// Compose a document from text and run the full post-processing
    /// pipeline on it.
    pub fn compose_source(&mut self, content: &str, name: &str) -> Result<CompositionResult> {
        let file_id = self.sources.add_file(name.to_string(), Some(content.to_string()));
        let comp = compose_str_with(content, Some(file_id), &self.options)
            .map_err(|e| Error::from(e).traced(&self.trace))?;
        self.post_process(comp)
    }

    /// Resolve an include string (`file:...`, `pkg:...`, `env:...`, or a
    /// custom backend) into a processed composition.
    pub fn compose_include(&mut self, include_str: &str) -> Result<CompositionResult> {
        resolve_include(self, include_str, &KeyPath::root(), None, None)
    }

    /// The post-composition pipeline: references, includes, instructions,
    /// merges, unset cleanup, deferral.
    pub fn post_process(&mut self, mut comp: CompositionResult) -> Result<CompositionResult> {
        // seed every context-carrying node with the loader's symbols;
        // node-local bindings added later shadow them
        crate::context::add_context_to_tree(&mut comp.root, &self.context.clone());
        preprocess_references(&mut comp)?;
        process_includes(self, &mut comp)?;

        let defined = process_instructions(self, &mut comp)?;
        if !defined.is_empty() {
            debug!(count = defined.len(), "instructions defined variables");
            self.update_context(&defined);
        }

        crate::merge::process_merges(&mut comp)?;

        let mut has_unset = false;
        comp.walk(|node, _| has_unset |= node.is_unset());
        if has_unset {
            delete_unset_nodes(&mut comp);
        }

        let forced = self.deferred_patterns.clone();
        process_deferred(&mut comp, &forced)?;
        Ok(comp)
    }

    /// Like [`Loader::post_process`], but `!generate` markers fan the
    /// document out into multiple variants.
    pub fn post_process_all(&mut self, mut comp: CompositionResult) -> Result<Vec<CompositionResult>> {
        crate::context::add_context_to_tree(&mut comp.root, &self.context.clone());
        preprocess_references(&mut comp)?;
        process_includes(self, &mut comp)?;
        let defined = process_instructions(self, &mut comp)?;
        self.update_context(&defined);

        let variants = crate::generator::process_generators(self, comp)?;
        let mut out = Vec::with_capacity(variants.len());
        for mut variant in variants {
            crate::merge::process_merges(&mut variant)?;
            let mut has_unset = false;
            variant.walk(|node, _| has_unset |= node.is_unset());
            if has_unset {
                delete_unset_nodes(&mut variant);
            }
            let forced = self.deferred_patterns.clone();
            process_deferred(&mut variant, &forced)?;
            out.push(variant);
        }
        Ok(out)
    }

    /// Construct a processed composition into a value.
    pub fn construct(&self, comp: &CompositionResult) -> Result<Value> {
        let constructor = Constructor {
            registry: Arc::clone(&self.registry),
            engine: self.engine.as_ref(),
            root: Some(&comp.root),
            context: &self.context,
        };
        constructor.construct(&comp.root, &KeyPath::root())
    }

    /// Construct a single node against this loader's registry.
    pub fn construct_node(&self, node: &Node) -> Result<Value> {
        let comp = CompositionResult::new(node.clone());
        self.construct(&comp)
    }

    /// Load a document from text: compose, post-process, construct, and
    /// resolve every lazy value.
    pub fn load_source(&mut self, content: &str, name: &str) -> Result<Value> {
        let comp = self.compose_source(content, name)?;
        let mut value = self.construct(&comp)?;
        resolve_all_lazy(&mut value, &self.context, self.engine.as_ref())?;
        Ok(value)
    }

    /// Load from an include string (typically `file:path`).
    pub fn load_include(&mut self, include_str: &str) -> Result<Value> {
        let comp = self.compose_include(include_str)?;
        let mut value = self.construct(&comp)?;
        resolve_all_lazy(&mut value, &self.context, self.engine.as_ref())?;
        Ok(value)
    }

    /// Load every `!generate` variant of a document.
    pub fn load_source_all(&mut self, content: &str, name: &str) -> Result<Vec<Value>> {
        let file_id = self.sources.add_file(name.to_string(), Some(content.to_string()));
        let comp = compose_str_with(content, Some(file_id), &self.options)
            .map_err(|e| Error::from(e).traced(&self.trace))?;
        let variants = self.post_process_all(comp)?;
        let mut out = Vec::with_capacity(variants.len());
        for variant in variants {
            let mut value = self.construct(&variant)?;
            resolve_all_lazy(&mut value, &self.context, self.engine.as_ref())?;
            out.push(value);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("context_keys", &self.context.keys().collect::<Vec<_>>())
            .field("deferred_patterns", &self.deferred_patterns)
            .field("options", &self.options)
            .finish()
    }
}

/// Merge two processed compositions (the CLI's `+path` layering).
pub fn merge_compositions(
    base: &CompositionResult,
    overlay: &CompositionResult,
    key: &MergeKey,
) -> CompositionResult {
    CompositionResult::new(merged(&base.root, &overlay.root, key))
}
