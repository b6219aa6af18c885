//! Graph resolver
//!
//! Depth-first closure over dependency edges from a root set. Every key
//! reached is looked up (synthesizing just-in-time bindings where allowed)
//! and its edges recorded. The walk never stops at the first problem: every
//! missing key, cycle and scope mismatch is collected before the caller
//! decides to fail.
//!
//! A resolution is staged against an already validated base closure and
//! merged only when it produced no errors, so lazily validated keys never
//! leave a half-validated graph behind.

use crate::graph::GraphInner;
use crate::topology::Topology;
use bindery_core::{
    Binding, BindingTable, ConstructionError, Dependency, DependencyKind, Key, KeyPath, Lifespan,
    Origin, ScopeRegistry,
};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Validated part of a graph: resolved bindings and their edges
#[derive(Debug, Default)]
pub(crate) struct Closure {
    pub(crate) topology: Topology,
    pub(crate) bindings: IndexMap<Key, Arc<Binding>>,
    pub(crate) external: IndexSet<Key>,
}

impl Closure {
    /// Whether `key` was validated, locally or in a parent
    pub(crate) fn contains(&self, key: &Key) -> bool {
        self.bindings.contains_key(key) || self.external.contains(key)
    }

    /// Absorb a staged resolution
    pub(crate) fn merge(&mut self, staged: Closure) {
        self.topology.merge(&staged.topology);
        for (key, binding) in staged.bindings {
            self.bindings.entry(key).or_insert(binding);
        }
        self.external.extend(staged.external);
    }
}

/// Limits applied by one resolution
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolverLimits {
    pub(crate) max_depth: usize,
    pub(crate) allow_deferred_cycles: bool,
}

/// One staged resolution pass
pub(crate) struct Resolver<'a> {
    table: &'a BindingTable,
    scopes: &'a ScopeRegistry,
    base: &'a Closure,
    parent: Option<&'a GraphInner>,
    limits: ResolverLimits,
    staged: Closure,
    failed: HashSet<Key>,
    errors: Vec<ConstructionError>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        table: &'a BindingTable,
        scopes: &'a ScopeRegistry,
        base: &'a Closure,
        parent: Option<&'a GraphInner>,
        limits: ResolverLimits,
    ) -> Self {
        Self {
            table,
            scopes,
            base,
            parent,
            limits,
            staged: Closure::default(),
            failed: HashSet::new(),
            errors: Vec::new(),
        }
    }

    /// Close over `roots`, returning the staged closure and every error found
    pub(crate) fn resolve(
        mut self,
        roots: impl IntoIterator<Item = Key>,
    ) -> (Closure, Vec<ConstructionError>) {
        let mut path = Vec::new();
        for root in roots {
            self.visit(&root, &mut path);
        }
        self.check_cycles();
        self.check_scopes();
        debug!(
            resolved = self.staged.bindings.len(),
            external = self.staged.external.len(),
            errors = self.errors.len(),
            "resolution finished"
        );
        (self.staged, self.errors)
    }

    fn known(&self, key: &Key) -> bool {
        self.base.contains(key) || self.staged.contains(key) || self.failed.contains(key)
    }

    fn fail(&mut self, key: &Key, error: ConstructionError) {
        self.failed.insert(key.clone());
        self.errors.push(error);
    }

    /// Ask the parent chain for `key`; `Ok(false)` when no ancestor binds it
    fn resolve_in_parent(&self, key: &Key) -> Result<bool, ConstructionError> {
        match self.parent {
            Some(parent) if parent.can_resolve(key) => {
                parent.ensure_validated(key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Whether an optional edge to `key` will be satisfied
    fn resolvable(&self, key: &Key) -> bool {
        self.known(key)
            || self.table.can_resolve(key)
            || self.parent.is_some_and(|p| p.can_resolve(key))
    }

    fn visit(&mut self, key: &Key, path: &mut Vec<Key>) {
        if self.known(key) {
            return;
        }
        if path.len() >= self.limits.max_depth {
            let error = ConstructionError::DepthLimitExceeded {
                key: key.clone(),
                limit: self.limits.max_depth,
                chain: KeyPath::from(path.clone()),
            };
            self.fail(key, error);
            return;
        }

        let binding = match self.table.explicit(key) {
            Some(binding) => Arc::clone(binding),
            None => match self.resolve_in_parent(key) {
                Ok(true) => {
                    self.staged.external.insert(key.clone());
                    return;
                }
                Err(error) => {
                    self.fail(key, error);
                    return;
                }
                Ok(false) => match self.table.lookup(key) {
                    Some(binding) => binding,
                    None => {
                        let error = ConstructionError::MissingBinding {
                            key: key.clone(),
                            chain: KeyPath::from(path.clone()),
                        };
                        self.fail(key, error);
                        return;
                    }
                },
            },
        };

        if binding.origin() == Origin::JustInTime && !self.scopes.contains(binding.scope()) {
            let error = ConstructionError::UnknownScope {
                key: key.clone(),
                scope: binding.scope().clone(),
            };
            self.fail(key, error);
            return;
        }

        self.staged.bindings.insert(key.clone(), Arc::clone(&binding));
        self.staged.topology.add_node(key);

        path.push(key.clone());
        for dependency in binding.dependencies() {
            self.follow(key, &dependency, path);
        }
        path.pop();
    }

    fn follow(&mut self, dependent: &Key, dependency: &Dependency, path: &mut Vec<Key>) {
        let target = dependency.target();
        if dependency.is_optional() && !self.resolvable(target) {
            return;
        }
        self.staged
            .topology
            .add_edge(dependent, target, dependency.kind());
        self.visit(target, path);
    }

    fn check_cycles(&mut self) {
        let include_deferred = !self.limits.allow_deferred_cycles;
        for path in self.staged.topology.cycles(include_deferred) {
            self.errors
                .push(ConstructionError::CircularDependency { path });
        }
    }

    fn lifespan_of(&self, key: &Key) -> Option<Lifespan> {
        let binding = self
            .staged
            .bindings
            .get(key)
            .or_else(|| self.base.bindings.get(key));
        match binding {
            Some(binding) => self.scopes.lifespan(binding.scope()),
            None => self.parent.and_then(|p| p.lifespan_of(key)),
        }
    }

    /// A graph-lived instance must not capture a context-bound one directly
    fn check_scopes(&mut self) {
        let mut mismatches = Vec::new();
        for (dependent, dependency, kind) in self.staged.topology.edges() {
            if kind == DependencyKind::Deferred || !self.staged.bindings.contains_key(dependent) {
                continue;
            }
            let outer = self.lifespan_of(dependent);
            let inner = self.lifespan_of(dependency);
            if outer == Some(Lifespan::Graph) && inner == Some(Lifespan::Context) {
                mismatches.push((dependent.clone(), dependency.clone()));
            }
        }
        for (dependent, dependency) in mismatches {
            let error = ConstructionError::ScopeMismatch {
                scope: self.scope_name(&dependent),
                dependency_scope: self.scope_name(&dependency),
                key: dependent,
                dependency,
            };
            self.errors.push(error);
        }
    }

    fn scope_name(&self, key: &Key) -> bindery_core::ScopeName {
        self.staged
            .bindings
            .get(key)
            .or_else(|| self.base.bindings.get(key))
            .map(|b| b.scope().clone())
            .or_else(|| self.parent.and_then(|p| p.scope_of(key)))
            .unwrap_or(bindery_core::ScopeName::UNSCOPED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::aggregator::aggregate;
    use bindery_core::{
        Args, Binder, BoxError, BuildConfig, ErrorKind, Injectable, Module, ScopeName,
    };

    struct Repo;
    struct Service;

    impl Injectable for Repo {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::on::<u32>()]
        }

        fn construct(_args: &Args) -> Result<Self, BoxError> {
            Ok(Self)
        }
    }

    impl Injectable for Service {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::on::<Repo>(), Dependency::optional::<u64>()]
        }

        fn construct(_args: &Args) -> Result<Self, BoxError> {
            Ok(Self)
        }
    }

    const LIMITS: ResolverLimits = ResolverLimits {
        max_depth: 16,
        allow_deferred_cycles: true,
    };

    fn resolve(
        module: impl Module + 'static,
        roots: Vec<Key>,
    ) -> (Closure, Vec<ConstructionError>) {
        let modules: Vec<Box<dyn Module>> = vec![Box::new(module)];
        let aggregated = aggregate(&modules, &BuildConfig::default(), None);
        let base = Closure::default();
        Resolver::new(&aggregated.table, &aggregated.scopes, &base, None, LIMITS).resolve(roots)
    }

    #[test]
    fn closes_over_just_in_time_dependencies() {
        let (closure, errors) = resolve(
            |b: &mut Binder| {
                b.injectable::<Repo>();
                b.bind::<u32>().to_instance(Arc::new(1));
                b.bind::<Service>().to_self();
            },
            vec![Key::of::<Service>()],
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(closure.contains(&Key::of::<Repo>()));
        assert!(closure.contains(&Key::of::<u32>()));
        assert!(!closure.topology.contains(&Key::of::<u64>()));
    }

    #[test]
    fn missing_binding_carries_chain() {
        let (_, errors) = resolve(
            |b: &mut Binder| {
                b.injectable::<Repo>();
                b.bind::<Service>().to_self();
            },
            vec![Key::of::<Service>()],
        );
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ConstructionError::MissingBinding { key, chain } => {
                assert_eq!(key, &Key::of::<u32>());
                assert_eq!(chain.keys(), &[Key::of::<Service>(), Key::of::<Repo>()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn singleton_depending_on_context_binding_is_a_mismatch() {
        let (_, errors) = resolve(
            |b: &mut Binder| {
                b.bind_context_scope("request");
                b.bind::<u32>().in_scope("request").to_instance(Arc::new(1));
                b.bind::<Repo>().as_singleton().to_self();
            },
            vec![Key::of::<Repo>()],
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::ScopeMismatch);
        if let ConstructionError::ScopeMismatch { dependency_scope, .. } = &errors[0] {
            assert_eq!(dependency_scope, &ScopeName::new("request"));
        }
    }

    #[test]
    fn every_missing_key_reported_once() {
        let (_, errors) = resolve(
            |b: &mut Binder| {
                b.bind::<u8>()
                    .to_provider(vec![Dependency::on::<u32>()], |_| Ok(Arc::new(1)));
                b.bind::<u16>()
                    .to_provider(vec![Dependency::on::<u32>(), Dependency::on::<u64>()], |_| {
                        Ok(Arc::new(2))
                    });
            },
            vec![Key::of::<u8>(), Key::of::<u16>()],
        );
        let missing: Vec<&Key> = errors.iter().filter_map(ConstructionError::key).collect();
        assert_eq!(missing, vec![&Key::of::<u32>(), &Key::of::<u64>()]);
    }
}
