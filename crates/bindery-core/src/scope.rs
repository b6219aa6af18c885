//! Scope policies
//!
//! A scope decides whether a request reuses a cached instance or runs the
//! production rule again. Policies are looked up by [`ScopeName`] in a
//! [`ScopeRegistry`]; `unscoped` and `singleton` are always present, further
//! policies are registered by modules.
//!
//! Caches hold `Arc<OnceCell<_>>` per key so concurrent first requests run
//! the production rule once and every caller observes the same instance.

use crate::binding::Erased;
use crate::error::ConstructionError;
use crate::key::Key;
use dashmap::DashMap;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Name under which a scope policy is registered
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeName(Cow<'static, str>);

impl ScopeName {
    /// A fresh instance per request
    pub const UNSCOPED: Self = Self(Cow::Borrowed("unscoped"));

    /// One instance per graph
    pub const SINGLETON: Self = Self(Cow::Borrowed("singleton"));

    /// Arbitrary scope name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Name as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ScopeName {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ScopeName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Identity of one activation of a context scope (one request, one session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeContext(Uuid);

impl ScopeContext {
    /// New, unique context
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying id
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for ScopeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// How long an instance cached by a policy lives
///
/// Ordered from shortest to longest. A dependent may depend directly only on
/// bindings that live at least as long, with `Fresh` exempt on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifespan {
    /// Nothing is cached
    Fresh,
    /// Cached per [`ScopeContext`]
    Context,
    /// Cached for the life of the graph
    Graph,
}

/// Deferred production handed to a policy
pub type Producer<'a> = &'a mut dyn FnMut() -> Result<Erased, ConstructionError>;

/// Caching strategy for instances of a binding
pub trait ScopePolicy: Send + Sync + 'static {
    /// Lifetime of instances this policy caches
    fn lifespan(&self) -> Lifespan;

    /// Return the cached instance for `key`, or run `produce` and cache its result
    ///
    /// A failed production must not be cached.
    fn get_or_create(
        &self,
        key: &Key,
        context: Option<ScopeContext>,
        produce: Producer<'_>,
    ) -> Result<Erased, ConstructionError>;

    /// Already cached instance, without producing
    fn cached(&self, _key: &Key, _context: Option<ScopeContext>) -> Option<Erased> {
        None
    }

    /// Drop everything cached for one context
    fn release_context(&self, _context: ScopeContext) {}

    /// Drop everything cached
    fn clear(&self) {}
}

/// Runs the production rule on every request
#[derive(Debug, Default, Clone, Copy)]
pub struct Unscoped;

impl ScopePolicy for Unscoped {
    fn lifespan(&self) -> Lifespan {
        Lifespan::Fresh
    }

    fn get_or_create(
        &self,
        _key: &Key,
        _context: Option<ScopeContext>,
        produce: Producer<'_>,
    ) -> Result<Erased, ConstructionError> {
        produce()
    }
}

type Cell = Arc<OnceCell<Erased>>;

/// At most one instance per key for the life of the graph
#[derive(Default)]
pub struct SingletonScope {
    cells: DashMap<Key, Cell>,
}

impl SingletonScope {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a cell (initialized or in flight)
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether nothing was requested yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn cell(&self, key: &Key) -> Cell {
        // clone out of the shard so initialization runs without the shard lock
        self.cells.entry(key.clone()).or_default().clone()
    }
}

impl ScopePolicy for SingletonScope {
    fn lifespan(&self) -> Lifespan {
        Lifespan::Graph
    }

    fn get_or_create(
        &self,
        key: &Key,
        _context: Option<ScopeContext>,
        produce: Producer<'_>,
    ) -> Result<Erased, ConstructionError> {
        self.cell(key).get_or_try_init(produce).cloned()
    }

    fn cached(&self, key: &Key, _context: Option<ScopeContext>) -> Option<Erased> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    fn clear(&self) {
        self.cells.clear();
    }
}

impl fmt::Debug for SingletonScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonScope")
            .field("cells", &self.cells.len())
            .finish()
    }
}

/// At most one instance per key and [`ScopeContext`]
///
/// Requests outside of a context fail with
/// [`ConstructionError::OutOfScope`].
pub struct ContextScope {
    name: ScopeName,
    cells: DashMap<(ScopeContext, Key), Cell>,
}

impl ContextScope {
    /// Context scope registered under `name`
    #[must_use]
    pub fn new(name: impl Into<ScopeName>) -> Self {
        Self {
            name: name.into(),
            cells: DashMap::new(),
        }
    }

    /// Name this policy reports in errors
    #[must_use]
    pub fn name(&self) -> &ScopeName {
        &self.name
    }

    /// Number of live contexts holding at least one instance
    #[must_use]
    pub fn live_contexts(&self) -> usize {
        let mut contexts: Vec<ScopeContext> = self.cells.iter().map(|e| e.key().0).collect();
        contexts.sort_unstable_by_key(ScopeContext::id);
        contexts.dedup();
        contexts.len()
    }
}

impl ScopePolicy for ContextScope {
    fn lifespan(&self) -> Lifespan {
        Lifespan::Context
    }

    fn get_or_create(
        &self,
        key: &Key,
        context: Option<ScopeContext>,
        produce: Producer<'_>,
    ) -> Result<Erased, ConstructionError> {
        let Some(context) = context else {
            return Err(ConstructionError::OutOfScope {
                key: key.clone(),
                scope: self.name.clone(),
            });
        };
        let cell = self
            .cells
            .entry((context, key.clone()))
            .or_default()
            .clone();
        cell.get_or_try_init(produce).cloned()
    }

    fn cached(&self, key: &Key, context: Option<ScopeContext>) -> Option<Erased> {
        let context = context?;
        self.cells
            .get(&(context, key.clone()))
            .and_then(|cell| cell.get().cloned())
    }

    fn release_context(&self, context: ScopeContext) {
        self.cells.retain(|(owner, _), _| *owner != context);
    }

    fn clear(&self) {
        self.cells.clear();
    }
}

impl fmt::Debug for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextScope")
            .field("name", &self.name)
            .field("cells", &self.cells.len())
            .finish()
    }
}

/// Scope policies by name
#[derive(Clone)]
pub struct ScopeRegistry {
    policies: IndexMap<ScopeName, Arc<dyn ScopePolicy>>,
    inherited: HashSet<ScopeName>,
}

impl ScopeRegistry {
    /// Registry holding fresh `unscoped` and `singleton` policies
    #[must_use]
    pub fn new() -> Self {
        let mut policies: IndexMap<ScopeName, Arc<dyn ScopePolicy>> = IndexMap::new();
        policies.insert(ScopeName::UNSCOPED, Arc::new(Unscoped));
        policies.insert(ScopeName::SINGLETON, Arc::new(SingletonScope::new()));
        Self {
            policies,
            inherited: HashSet::new(),
        }
    }

    /// Share every custom policy of `parent`
    ///
    /// Built-ins stay local. Inherited policies are not cleared by
    /// [`clear_all`](Self::clear_all); their owner clears them.
    pub fn inherit(&mut self, parent: &ScopeRegistry) {
        for (name, policy) in &parent.policies {
            if self.policies.contains_key(name) {
                continue;
            }
            self.policies.insert(name.clone(), Arc::clone(policy));
            self.inherited.insert(name.clone());
        }
    }

    /// Whether `name` was inherited from a parent registry
    #[inline]
    #[must_use]
    pub fn is_inherited(&self, name: &ScopeName) -> bool {
        self.inherited.contains(name)
    }

    /// Register a policy; a name may be registered once
    ///
    /// Returns the name back on conflict.
    pub fn register(
        &mut self,
        name: ScopeName,
        policy: Arc<dyn ScopePolicy>,
    ) -> Result<(), ScopeName> {
        if self.policies.contains_key(&name) {
            return Err(name);
        }
        tracing::debug!(scope = %name, lifespan = ?policy.lifespan(), "registered scope");
        self.policies.insert(name, policy);
        Ok(())
    }

    /// Policy registered under `name`
    #[must_use]
    pub fn resolve_scope(&self, name: &ScopeName) -> Option<Arc<dyn ScopePolicy>> {
        self.policies.get(name).cloned()
    }

    /// Whether `name` is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &ScopeName) -> bool {
        self.policies.contains_key(name)
    }

    /// Lifespan of the policy registered under `name`
    #[must_use]
    pub fn lifespan(&self, name: &ScopeName) -> Option<Lifespan> {
        self.policies.get(name).map(|p| p.lifespan())
    }

    /// Registered names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &ScopeName> {
        self.policies.keys()
    }

    /// Number of registered policies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Always false: built-ins are present from the start
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Release `context` in every policy
    pub fn release_context(&self, context: ScopeContext) {
        for policy in self.policies.values() {
            policy.release_context(context);
        }
    }

    /// Clear the cache of every policy this registry owns
    pub fn clear_all(&self) {
        for (name, policy) in &self.policies {
            if !self.inherited.contains(name) {
                policy.clear();
            }
        }
    }
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.policies.keys()).finish()
    }
}
