//! Graph Builder
//!
//! The entry point of the construction phase: collects modules, roots and a
//! [`BuildConfig`], then aggregates, resolves and instantiates into a sealed
//! [`Graph`].

use super::aggregator::{aggregate, Aggregated};
use super::resolver::{Closure, Resolver, ResolverLimits};
use super::Stage;
use crate::graph::{Graph, GraphId, GraphInner};
use crate::in_flight::InFlight;
use bindery_core::{BuildConfig, CreationError, Key, Module};
use indexmap::IndexSet;
use parking_lot::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Builder for validated graphs
///
/// ```rust,ignore
/// let graph = GraphBuilder::new(Stage::Strict)
///     .module(AppModule)
///     .root::<dyn Server>()
///     .build()?;
/// let server = graph.get::<dyn Server>()?;
/// ```
pub struct GraphBuilder {
    stage: Stage,
    config: BuildConfig,
    modules: Vec<Box<dyn Module>>,
    roots: Vec<Key>,
    parent: Option<Arc<GraphInner>>,
}

impl GraphBuilder {
    /// Builder for a top-level graph
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            config: BuildConfig::default(),
            modules: Vec::new(),
            roots: Vec::new(),
            parent: None,
        }
    }

    /// Builder for a graph that falls back to `parent` for unbound keys
    ///
    /// The child starts from the parent's configuration.
    #[must_use]
    pub fn child_of(parent: &Graph, stage: Stage) -> Self {
        Self {
            config: parent.inner().config.clone(),
            parent: Some(Arc::clone(parent.inner())),
            ..Self::new(stage)
        }
    }

    /// With build configuration
    #[must_use]
    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a module
    #[must_use]
    pub fn module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    /// Add boxed modules
    #[must_use]
    pub fn modules(mut self, modules: impl IntoIterator<Item = Box<dyn Module>>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Validate the unqualified `T` at build time in every stage
    #[must_use]
    pub fn root<T: ?Sized + 'static>(self) -> Self {
        self.root_key(Key::of::<T>())
    }

    /// Validate `key` at build time in every stage
    #[must_use]
    pub fn root_key(mut self, key: Key) -> Self {
        self.roots.push(key);
        self
    }

    /// Stage the graph will be built in
    #[inline]
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Number of modules added
    #[inline]
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Aggregate, resolve and instantiate
    ///
    /// Every problem found is reported in the returned [`CreationError`].
    #[instrument(name = "build", skip_all, fields(stage = %self.stage, modules = self.modules.len()))]
    pub fn build(self) -> Result<Graph, CreationError> {
        let started = Instant::now();
        let parent = self.parent.as_deref();
        let Aggregated {
            table,
            scopes,
            required,
            allow_deferred_cycles,
            mut errors,
        } = aggregate(&self.modules, &self.config, parent);

        let mut roots: IndexSet<Key> = IndexSet::new();
        if self.stage == Stage::Strict {
            roots.extend(table.keys().cloned());
        } else {
            roots.extend(table.bindings().filter(|b| b.is_eager()).map(|b| b.key().clone()));
        }
        roots.extend(required);
        roots.extend(self.roots.iter().cloned());
        info!(bindings = table.len(), roots = roots.len(), "building graph");

        let limits = ResolverLimits {
            max_depth: self.config.max_depth,
            allow_deferred_cycles,
        };
        let base = Closure::default();
        let (closure, resolution_errors) =
            Resolver::new(&table, &scopes, &base, parent, limits).resolve(roots);
        errors.extend(resolution_errors);
        CreationError::check(errors)?;

        let bulk = self
            .config
            .eager_singletons
            .unwrap_or(self.stage == Stage::Strict);
        let stage = self.stage;
        let config = self.config;
        let inner = Arc::new_cyclic(|this| GraphInner {
            id: GraphId::new(),
            stage,
            config,
            limits,
            table,
            scopes,
            closure: RwLock::new(closure),
            parent: self.parent,
            closed: AtomicBool::new(false),
            in_flight: InFlight::default(),
            this: this.clone(),
        });
        let created = inner.instantiate_eagerly(bulk)?;

        let graph = Graph::from_inner(inner);
        info!(
            graph = %graph.id(),
            eager = created,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "graph built"
        );
        Ok(graph)
    }
}

impl std::fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("stage", &self.stage)
            .field("config", &self.config)
            .field("modules", &self.modules.len())
            .field("roots", &self.roots)
            .field("child", &self.parent.is_some())
            .finish()
    }
}

/// Build a graph from `modules` with the default configuration
pub fn create_graph(
    stage: Stage,
    modules: impl IntoIterator<Item = Box<dyn Module>>,
) -> Result<Graph, CreationError> {
    GraphBuilder::new(stage).modules(modules).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_core::{Binder, ErrorKind};

    #[test]
    fn strict_validates_unreferenced_bindings() {
        let module = |b: &mut Binder| {
            b.bind::<u8>()
                .to_provider(vec![bindery_core::Dependency::on::<u32>()], |_| Ok(Arc::new(1)));
        };
        let lenient = GraphBuilder::new(Stage::Lenient).module(module).build();
        assert!(lenient.is_ok());

        let err = GraphBuilder::new(Stage::Strict).module(module).build().unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.contains(ErrorKind::MissingBinding));
    }

    #[test]
    fn roots_are_validated_in_lenient_stage() {
        let err = GraphBuilder::new(Stage::Lenient)
            .root::<u64>()
            .build()
            .unwrap_err();
        assert_eq!(err.errors()[0].key(), Some(&Key::of::<u64>()));
    }

    #[test]
    fn builder_reports_stage_and_modules() {
        let builder = GraphBuilder::new(Stage::Strict).module(|_: &mut Binder| {});
        assert_eq!(builder.stage(), Stage::Strict);
        assert_eq!(builder.module_count(), 1);
    }
}
