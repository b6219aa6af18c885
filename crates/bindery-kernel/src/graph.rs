//! Graph handle
//!
//! A [`Graph`] is the sealed result of a successful build. The binding table
//! is read-only from here on; the only state that still changes is the
//! validated closure (grown by lazily validated keys) and the scope caches.
//!
//! Handles are cheap to clone and safe to share between threads.

use crate::construction::resolver::{Closure, ResolverLimits};
use crate::construction::{GraphBuilder, Stage};
use crate::in_flight::InFlight;
use crate::report::{BindingInfo, DependencyInfo, GraphReport};
use bindery_core::{
    unerase, BindingTable, BuildConfig, ConstructionError, ConstructorRule, CreationError,
    Deferred, DeferredRef, DependencyKind, Erased, Injectable, Key, Lifespan, Module, Provision,
    ScopeContext, ScopeName, ScopeRegistry, Source,
};
use indexmap::IndexSet;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::type_name;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of one built graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct GraphId(Uuid);

impl GraphId {
    /// Fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph-{}", &self.0.simple().to_string()[..8])
    }
}

/// Shared state behind every [`Graph`] handle
pub(crate) struct GraphInner {
    pub(crate) id: GraphId,
    pub(crate) stage: Stage,
    pub(crate) config: BuildConfig,
    pub(crate) limits: ResolverLimits,
    pub(crate) table: BindingTable,
    pub(crate) scopes: ScopeRegistry,
    pub(crate) closure: RwLock<Closure>,
    pub(crate) parent: Option<Arc<GraphInner>>,
    pub(crate) closed: AtomicBool,
    pub(crate) in_flight: InFlight,
    pub(crate) this: Weak<GraphInner>,
}

impl GraphInner {
    #[inline]
    pub(crate) fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// Declaration site of an explicit binding for `key` here or in an ancestor
    pub(crate) fn explicit_source(&self, key: &Key) -> Option<Source> {
        self.table
            .explicit(key)
            .map(|binding| binding.source())
            .or_else(|| self.parent.as_ref().and_then(|p| p.explicit_source(key)))
    }

    /// Whether `key` is validated or could be validated here or in an ancestor
    pub(crate) fn can_resolve(&self, key: &Key) -> bool {
        self.closure.read().contains(key)
            || self.table.can_resolve(key)
            || self.parent.as_ref().is_some_and(|p| p.can_resolve(key))
    }

    /// Scope of the binding that serves `key`
    pub(crate) fn scope_of(&self, key: &Key) -> Option<ScopeName> {
        let local = self
            .closure
            .read()
            .bindings
            .get(key)
            .map(|binding| binding.scope().clone());
        local
            .or_else(|| self.table.explicit(key).map(|b| b.scope().clone()))
            .or_else(|| self.parent.as_ref().and_then(|p| p.scope_of(key)))
    }

    /// Lifespan of the binding that serves `key`, evaluated where it is bound
    pub(crate) fn lifespan_of(&self, key: &Key) -> Option<Lifespan> {
        let local = self
            .closure
            .read()
            .bindings
            .get(key)
            .map(|binding| binding.scope().clone())
            .or_else(|| self.table.explicit(key).map(|b| b.scope().clone()));
        match local {
            Some(scope) => self.scopes.lifespan(&scope),
            None => self.parent.as_ref().and_then(|p| p.lifespan_of(key)),
        }
    }

    /// Create eager bindings, and with `bulk` every graph-lived binding,
    /// dependencies first
    ///
    /// Every failure is collected before reporting.
    pub(crate) fn instantiate_eagerly(&self, bulk: bool) -> Result<usize, CreationError> {
        let candidates = {
            let closure = self.closure.read();
            let order = closure
                .topology
                .construction_order()
                .map_err(|e| CreationError::new(vec![e]))?;
            order
                .into_iter()
                .filter_map(|key| closure.bindings.get(&key).cloned())
                .filter(|binding| {
                    binding.is_eager()
                        || (bulk && self.scopes.lifespan(binding.scope()) == Some(Lifespan::Graph))
                })
                .collect::<Vec<_>>()
        };

        let mut created = 0;
        let mut reported: HashSet<Key> = HashSet::new();
        let mut errors = Vec::new();
        for binding in candidates {
            match self.provide_binding(&binding, None) {
                Ok(_) => {
                    created += 1;
                    debug!(key = %binding.key(), "eager instance created");
                }
                Err(error) => {
                    let fresh = match error.key() {
                        Some(key) => reported.insert(key.clone()),
                        None => true,
                    };
                    if fresh {
                        errors.push(error);
                    }
                }
            }
        }
        CreationError::check(errors)?;
        Ok(created)
    }
}

impl fmt::Debug for GraphInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphInner")
            .field("id", &self.id)
            .field("stage", &self.stage)
            .field("bindings", &self.table.len())
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .finish_non_exhaustive()
    }
}

/// A validated, ready-to-serve object graph
///
/// ```rust,ignore
/// let graph = create_graph(Stage::Strict, [Box::new(AppModule) as Box<dyn Module>])?;
/// let logger = graph.get::<dyn Logger>()?;
/// graph.shutdown();
/// ```
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    pub(crate) fn from_inner(inner: Arc<GraphInner>) -> Self {
        Self { inner }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &Arc<GraphInner> {
        &self.inner
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> GraphId {
        self.inner.id
    }

    /// Stage the graph was built in
    #[inline]
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.inner.stage
    }

    /// Configuration the graph was built with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.inner.config
    }

    /// Parent graph, for child graphs
    #[must_use]
    pub fn parent(&self) -> Option<Graph> {
        self.inner.parent.as_ref().map(|p| Graph::from_inner(Arc::clone(p)))
    }

    /// Instance for the unqualified `T`
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, ConstructionError> {
        self.get_key(&Key::of::<T>())
    }

    /// Instance for `T` qualified by `name`
    pub fn get_named<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
    ) -> Result<Arc<T>, ConstructionError> {
        self.get_key(&Key::named::<T>(name))
    }

    /// Instance for an arbitrary key whose contract type is `T`
    pub fn get_key<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: &Key,
    ) -> Result<Arc<T>, ConstructionError> {
        let value = self.inner.provide(key, None)?;
        downcast(key, &value)
    }

    /// Type-erased instance for `key`
    pub fn get_erased(&self, key: &Key) -> Result<Erased, ConstructionError> {
        self.inner.provide(key, None)
    }

    /// Add `C` to the constructor catalog and provide it
    ///
    /// This is the one way the catalog grows after the build. Bindings
    /// validated earlier keep their view: an optional dependency on `C` that
    /// was absent then stays absent.
    pub fn get_injectable<C: Injectable>(&self) -> Result<Arc<C>, ConstructionError> {
        self.inner.table.register_constructor(ConstructorRule::of::<C>());
        self.get::<C>()
    }

    /// Validated handle to the unqualified `T`, resolved on first dereference
    pub fn deferred<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Deferred<T>, ConstructionError> {
        let key = Key::of::<T>();
        self.inner.ensure_open()?;
        self.inner.ensure_validated(&key)?;
        let source: Weak<dyn Provision> = self.inner.this.clone();
        DeferredRef::new(key, source, None).typed::<T>()
    }

    /// View whose requests run inside `context`
    #[must_use]
    pub fn in_context(&self, context: ScopeContext) -> ContextView<'_> {
        ContextView {
            graph: self,
            context,
        }
    }

    /// Drop every instance cached for `context`
    pub fn close_context(&self, context: ScopeContext) {
        self.inner.scopes.release_context(context);
        debug!(graph = %self.id(), %context, "context closed");
    }

    /// Keys that are declared or validated in this graph
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: IndexSet<Key> = self.inner.table.keys().cloned().collect();
        keys.extend(self.inner.closure.read().bindings.keys().cloned());
        keys.into_iter().collect()
    }

    /// Description of the binding serving `key`, if it was validated here
    #[must_use]
    pub fn binding_info(&self, key: &Key) -> Option<BindingInfo> {
        let closure = self.inner.closure.read();
        let binding = closure.bindings.get(key)?;
        Some(BindingInfo {
            key: key.to_string(),
            production: binding.production().kind(),
            scope: binding.scope().clone(),
            lifespan: self.inner.scopes.lifespan(binding.scope()),
            origin: binding.origin(),
            source: binding.source(),
            eager: binding.is_eager(),
            dependencies: closure
                .topology
                .dependencies_of(key)
                .into_iter()
                .map(|(key, kind)| DependencyInfo {
                    key: key.to_string(),
                    kind,
                })
                .collect(),
        })
    }

    /// Validated dependencies of `key`
    #[must_use]
    pub fn dependencies_of(&self, key: &Key) -> Vec<(Key, DependencyKind)> {
        self.inner.closure.read().topology.dependencies_of(key)
    }

    /// Validated keys depending on `key`
    #[must_use]
    pub fn dependents_of(&self, key: &Key) -> Vec<(Key, DependencyKind)> {
        self.inner.closure.read().topology.dependents_of(key)
    }

    /// Validated keys, dependencies first
    pub fn topological_order(&self) -> Result<Vec<Key>, ConstructionError> {
        self.inner.closure.read().topology.construction_order()
    }

    /// Serialisable snapshot of the validated graph
    #[must_use]
    pub fn report(&self) -> GraphReport {
        let (keys, external) = {
            let closure = self.inner.closure.read();
            let keys: Vec<Key> = closure.bindings.keys().cloned().collect();
            let external: Vec<String> = closure.external.iter().map(ToString::to_string).collect();
            (keys, external)
        };
        let bindings = keys.iter().filter_map(|key| self.binding_info(key)).collect();
        let construction_order = self
            .topological_order()
            .map(|order| order.iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        GraphReport {
            graph: self.id(),
            parent: self.inner.parent.as_ref().map(|p| p.id),
            stage: self.stage(),
            shut_down: self.is_shut_down(),
            scopes: self.inner.scopes.names().cloned().collect(),
            bindings,
            external,
            construction_order,
        }
    }

    /// Clear every scope cache; later requests fail with
    /// [`ConstructionError::GraphClosed`]
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            warn!(graph = %self.id(), "graph already shut down");
            return;
        }
        self.inner.scopes.clear_all();
        info!(graph = %self.id(), "graph shut down");
    }

    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Builder for a child graph that sees this graph's bindings
    #[must_use]
    pub fn child_builder(&self, stage: Stage) -> GraphBuilder {
        GraphBuilder::child_of(self, stage)
    }

    /// Build a child graph from `modules`
    pub fn create_child(
        &self,
        stage: Stage,
        modules: impl IntoIterator<Item = Box<dyn Module>>,
    ) -> Result<Graph, CreationError> {
        self.child_builder(stage).modules(modules).build()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.inner.id)
            .field("stage", &self.inner.stage)
            .field("bindings", &self.inner.table.len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Requests bound to one [`ScopeContext`]
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'g> {
    graph: &'g Graph,
    context: ScopeContext,
}

impl ContextView<'_> {
    #[inline]
    #[must_use]
    pub fn context(&self) -> ScopeContext {
        self.context
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, ConstructionError> {
        self.get_key(&Key::of::<T>())
    }

    pub fn get_named<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
    ) -> Result<Arc<T>, ConstructionError> {
        self.get_key(&Key::named::<T>(name))
    }

    pub fn get_key<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: &Key,
    ) -> Result<Arc<T>, ConstructionError> {
        let value = self.get_erased(key)?;
        downcast(key, &value)
    }

    pub fn get_erased(&self, key: &Key) -> Result<Erased, ConstructionError> {
        self.graph.inner.provide(key, Some(self.context))
    }

    /// Release this context's instances
    pub fn close(self) {
        self.graph.close_context(self.context);
    }
}

fn downcast<T: ?Sized + Send + Sync + 'static>(
    key: &Key,
    value: &Erased,
) -> Result<Arc<T>, ConstructionError> {
    unerase::<T>(value).ok_or_else(|| ConstructionError::TypeMismatch {
        key: key.clone(),
        expected: type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_core::{Binder, ErrorKind};
    use std::sync::atomic::AtomicUsize;

    fn build(module: impl Module + 'static) -> Graph {
        GraphBuilder::new(Stage::Lenient).module(module).build().unwrap()
    }

    #[test]
    fn graph_ids_are_unique() {
        assert_ne!(GraphId::new(), GraphId::new());
        assert!(GraphId::new().to_string().starts_with("graph-"));
    }

    #[test]
    fn get_with_wrong_type_is_a_mismatch() {
        let graph = build(|b: &mut Binder| {
            b.bind::<u32>().to_instance(Arc::new(7));
        });
        let err = graph.get_key::<u64>(&Key::of::<u32>()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(*graph.get::<u32>().unwrap(), 7);
    }

    #[test]
    fn shutdown_closes_graph() {
        let graph = build(|b: &mut Binder| {
            b.bind::<u32>().to_instance(Arc::new(7));
        });
        graph.shutdown();
        graph.shutdown();
        assert!(graph.is_shut_down());
        assert_eq!(graph.get::<u32>().unwrap_err().kind(), ErrorKind::GraphClosed);
    }

    #[test]
    fn binding_info_describes_validated_keys() {
        let graph = build(|b: &mut Binder| {
            b.bind::<u32>().as_singleton().to_instance(Arc::new(7));
            b.bind::<String>()
                .to_provider(vec![bindery_core::Dependency::on::<u32>()], |args| {
                    Ok(Arc::new(args.get::<u32>()?.to_string()))
                });
        });
        assert!(graph.binding_info(&Key::of::<String>()).is_none());
        assert_eq!(&*graph.get::<String>().unwrap(), "7");

        let info = graph.binding_info(&Key::of::<String>()).unwrap();
        assert_eq!(info.dependencies.len(), 1);
        assert_eq!(info.lifespan, Some(Lifespan::Fresh));
        assert_eq!(graph.dependents_of(&Key::of::<u32>()).len(), 1);
    }

    #[test]
    fn context_view_caches_per_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let graph = build(move |b: &mut Binder| {
            let counter = Arc::clone(&counter);
            b.bind_context_scope("request");
            b.bind::<usize>().in_scope("request").to_provider(vec![], move |_| {
                Ok(Arc::new(counter.fetch_add(1, Ordering::SeqCst)))
            });
        });
        let (one, two) = (ScopeContext::new(), ScopeContext::new());
        let first = graph.in_context(one).get::<usize>().unwrap();
        let again = graph.in_context(one).get::<usize>().unwrap();
        let other = graph.in_context(two).get::<usize>().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        graph.in_context(one).close();
        let _ = graph.in_context(one).get::<usize>().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = graph.get::<usize>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfScope);
    }
}
