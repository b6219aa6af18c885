//! Instance provider chain
//!
//! Produces the instance for a key: validate it if needed, enter a stack
//! frame, let the binding's scope policy decide between cache and production,
//! and produce direct dependencies before the rule runs. Deferred edges are
//! handed to the rule as handles that come back through [`Provision`].

use crate::construction::resolver::{Closure, Resolver};
use crate::graph::GraphInner;
use crate::stack;
use bindery_core::{
    ArgValue, Args, Binding, ConstructionError, CreationError, DeferredRef, Dependency,
    DependencyKind, Erased, Key, Lifespan, Production, Provision, ScopeContext,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, instrument, trace};

impl GraphInner {
    pub(crate) fn ensure_open(&self) -> Result<(), ConstructionError> {
        if self.closed.load(Ordering::Acquire) {
            Err(ConstructionError::GraphClosed)
        } else {
            Ok(())
        }
    }

    /// Make sure `key` and everything it reaches is validated
    pub(crate) fn ensure_validated(&self, key: &Key) -> Result<(), ConstructionError> {
        if self.closure.read().contains(key) {
            return Ok(());
        }
        self.validate_lazily(key)
    }

    /// Resolve `key` against the current closure and merge on success
    ///
    /// A single problem comes back as itself, several as
    /// [`ConstructionError::Aggregate`].
    #[instrument(level = "debug", skip(self), fields(graph = %self.id))]
    fn validate_lazily(&self, key: &Key) -> Result<(), ConstructionError> {
        let (staged, errors) = {
            let base = self.closure.read();
            Resolver::new(
                &self.table,
                &self.scopes,
                &base,
                self.parent.as_deref(),
                self.limits,
            )
            .resolve([key.clone()])
        };
        if !errors.is_empty() {
            return Err(CreationError::new(errors).into_single());
        }
        debug!(resolved = staged.bindings.len(), "validated on demand");
        self.closure.write().merge(staged);
        Ok(())
    }

    /// Instance for `key`, from this graph or its ancestors
    pub(crate) fn provide(
        &self,
        key: &Key,
        context: Option<ScopeContext>,
    ) -> Result<Erased, ConstructionError> {
        self.ensure_open()?;
        self.ensure_validated(key)?;
        let binding = self.closure.read().bindings.get(key).cloned();
        match (binding, &self.parent) {
            (Some(binding), _) => self.provide_binding(&binding, context),
            (None, Some(parent)) => parent.provide(key, context),
            (None, None) => Err(ConstructionError::MissingBinding {
                key: key.clone(),
                chain: stack::chain(self.id),
            }),
        }
    }

    /// Run `binding` through its scope policy
    pub(crate) fn provide_binding(
        &self,
        binding: &Binding,
        context: Option<ScopeContext>,
    ) -> Result<Erased, ConstructionError> {
        let key = binding.key();
        let _frame = stack::enter(self.id, key, false, self.limits.max_depth)?;
        let policy = self.scopes.resolve_scope(binding.scope()).ok_or_else(|| {
            ConstructionError::UnknownScope {
                key: key.clone(),
                scope: binding.scope().clone(),
            }
        })?;
        trace!(%key, scope = %binding.scope(), depth = stack::depth(), "provide");

        let lifespan = policy.lifespan();
        if lifespan == Lifespan::Fresh {
            return policy.get_or_create(key, context, &mut || self.produce(binding, context));
        }
        if let Some(cached) = policy.cached(key, context) {
            return Ok(cached);
        }
        let slot = (key.clone(), context.filter(|_| lifespan == Lifespan::Context));
        let Some(_waiting) = self.in_flight.wait_for(&slot) else {
            // the owner of `slot` is blocked on something this thread is producing
            return Err(ConstructionError::DeferredReferenceMisuse {
                key: key.clone(),
                path: stack::chain(self.id),
            });
        };
        policy.get_or_create(key, context, &mut || {
            let _owner = self.in_flight.own(&slot);
            self.produce(binding, context)
        })
    }

    fn produce(
        &self,
        binding: &Binding,
        context: Option<ScopeContext>,
    ) -> Result<Erased, ConstructionError> {
        let key = binding.key();
        match binding.production() {
            Production::Instance(value) => Ok(Arc::clone(value)),
            Production::Provider {
                dependencies,
                factory,
            } => {
                let args = self.collect(key, dependencies, context)?;
                factory(&args).map_err(|e| {
                    ConstructionError::production_failure(key.clone(), stack::chain(self.id), e)
                })
            }
            Production::Linked { target, cast } => {
                let value = self.provide(target, context)?;
                cast(value).ok_or_else(|| ConstructionError::TypeMismatch {
                    key: key.clone(),
                    expected: key.type_name(),
                })
            }
            Production::Constructor(rule) => {
                let args = self.collect(key, rule.dependencies(), context)?;
                rule.construct(&args).map_err(|e| {
                    ConstructionError::production_failure(key.clone(), stack::chain(self.id), e)
                })
            }
        }
    }

    /// Produce the arguments for a rule of `dependent`
    ///
    /// An optional dependency is present when validation of `dependent`
    /// recorded an edge to it.
    pub(crate) fn collect(
        &self,
        dependent: &Key,
        dependencies: &[Dependency],
        context: Option<ScopeContext>,
    ) -> Result<Args, ConstructionError> {
        self.collect_with(dependent, dependencies, context, |closure, target| {
            closure.topology.has_edge(dependent, target)
        })
    }

    /// Produce arguments, asking `present` whether an optional target is bound
    pub(crate) fn collect_with(
        &self,
        dependent: &Key,
        dependencies: &[Dependency],
        context: Option<ScopeContext>,
        present: impl Fn(&Closure, &Key) -> bool,
    ) -> Result<Args, ConstructionError> {
        let source: Weak<dyn Provision> = self.this.clone();
        let mut args = Args::new(dependent.clone(), source.clone(), context);
        for dependency in dependencies {
            let target = dependency.target();
            let value = match dependency.kind() {
                DependencyKind::Direct => ArgValue::Ready(self.provide(target, context)?),
                DependencyKind::Deferred => {
                    ArgValue::Deferred(DeferredRef::new(target.clone(), source.clone(), context))
                }
                DependencyKind::Optional => {
                    let bound = present(&self.closure.read(), target);
                    if bound {
                        ArgValue::Ready(self.provide(target, context)?)
                    } else {
                        ArgValue::Absent
                    }
                }
            };
            args.insert(dependency.clone(), value);
        }
        Ok(args)
    }
}

impl Provision for GraphInner {
    fn provide_deferred(
        &self,
        key: &Key,
        context: Option<ScopeContext>,
    ) -> Result<Erased, ConstructionError> {
        self.ensure_open()?;
        let _marker = stack::enter(self.id, key, true, self.limits.max_depth)?;
        self.provide(key, context)
    }
}

#[cfg(test)]
mod tests {
    use crate::construction::{GraphBuilder, Stage};
    use bindery_core::{Binder, ConstructionError, Dependency, ErrorKind, Key};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn production_failure_names_key_and_chain() {
        let graph = GraphBuilder::new(Stage::Lenient)
            .module(|b: &mut Binder| {
                b.bind::<u8>().to_provider(vec![], |_| Err("disk full".into()));
                b.bind::<u16>()
                    .to_provider(vec![Dependency::on::<u8>()], |args| {
                        Ok(Arc::new(u16::from(*args.get::<u8>()?)))
                    });
            })
            .build()
            .unwrap();

        match graph.get::<u16>().unwrap_err() {
            ConstructionError::ProductionFailure { key, chain, source } => {
                assert_eq!(key, Key::of::<u8>());
                assert_eq!(chain.keys(), &[Key::of::<u16>(), Key::of::<u8>()]);
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lazy_validation_failure_is_cached_nowhere() {
        let graph = GraphBuilder::new(Stage::Lenient)
            .module(|b: &mut Binder| {
                b.bind::<u16>()
                    .to_provider(vec![Dependency::on::<u8>()], |_| Ok(Arc::new(1)));
            })
            .build()
            .unwrap();
        for _ in 0..2 {
            let err = graph.get::<u16>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MissingBinding);
            assert_eq!(err.key(), Some(&Key::of::<u8>()));
        }
        assert!(graph.binding_info(&Key::of::<u16>()).is_none());
    }

    #[test]
    fn optional_dependency_absent_when_unbound() {
        let graph = GraphBuilder::new(Stage::Strict)
            .module(|b: &mut Binder| {
                b.bind::<String>()
                    .to_provider(vec![Dependency::optional::<u8>()], |args| {
                        let port = args.optional::<u8>()?;
                        Ok(Arc::new(format!("{port:?}")))
                    });
            })
            .build()
            .unwrap();
        assert_eq!(&*graph.get::<String>().unwrap(), "None");
    }

    #[test]
    fn linked_binding_delegates_to_target() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let graph = GraphBuilder::new(Stage::Lenient)
            .module(move |b: &mut Binder| {
                let counter = Arc::clone(&counter);
                b.bind::<u32>().as_singleton().to_provider(vec![], move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(9))
                });
                b.bind::<u32>().named("alias").to_key(Key::of::<u32>());
            })
            .build()
            .unwrap();
        let direct = graph.get::<u32>().unwrap();
        let aliased = graph.get_named::<u32>("alias").unwrap();
        assert!(Arc::ptr_eq(&direct, &aliased));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
