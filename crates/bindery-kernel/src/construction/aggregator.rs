//! Declaration aggregation
//!
//! Installs every module into one [`Binder`], then folds the declarations
//! into a [`BindingTable`] and a [`ScopeRegistry`]. Conflicts are collected,
//! never raised.

use crate::graph::GraphInner;
use bindery_core::{
    Binder, BinderOption, BindingTable, BuildConfig, ConstructionError, Declaration, Key, Module,
    ScopeRegistry,
};
use tracing::debug;

/// Result of folding all declarations
pub(crate) struct Aggregated {
    pub(crate) table: BindingTable,
    pub(crate) scopes: ScopeRegistry,
    pub(crate) required: Vec<Key>,
    pub(crate) allow_deferred_cycles: bool,
    pub(crate) errors: Vec<ConstructionError>,
}

/// Fold `modules` into a binding table and scope registry
pub(crate) fn aggregate(
    modules: &[Box<dyn Module>],
    config: &BuildConfig,
    parent: Option<&GraphInner>,
) -> Aggregated {
    let mut binder = Binder::new();
    for module in modules {
        binder.install(module.as_ref());
    }
    let declarations = binder.into_declarations();
    debug!(declarations = declarations.len(), "aggregating");

    let mut table = BindingTable::new();
    let mut scopes = ScopeRegistry::new();
    if let Some(parent) = parent {
        scopes.inherit(parent.scopes());
    }
    let mut required = Vec::new();
    let mut errors = Vec::new();
    let mut explicit_only = config.require_explicit_bindings;
    let mut allow_deferred_cycles = config.allow_deferred_cycles;

    for declaration in declarations {
        match declaration {
            Declaration::Binding {
                binding,
                precedence,
            } => {
                if let Some(first) = parent.and_then(|p| p.explicit_source(binding.key())) {
                    errors.push(ConstructionError::DuplicateBinding {
                        key: binding.key().clone(),
                        first,
                        second: binding.source(),
                    });
                    continue;
                }
                if let Err(error) = table.register(binding, precedence) {
                    errors.push(error);
                }
            }
            Declaration::Scope { name, policy, at } => {
                if let Err(scope) = scopes.register(name, policy) {
                    errors.push(ConstructionError::DuplicateScope { scope, at });
                }
            }
            Declaration::Require { key, .. } => {
                if !required.contains(&key) {
                    required.push(key);
                }
            }
            Declaration::Constructor(rule) => table.register_constructor(rule),
            Declaration::Error { message, at } => {
                errors.push(ConstructionError::Module { at, message });
            }
            Declaration::Option(BinderOption::RequireExplicitBindings) => explicit_only = true,
            Declaration::Option(BinderOption::DisableDeferredCycles) => {
                allow_deferred_cycles = false;
            }
        }
    }

    table.set_just_in_time(!explicit_only);

    for binding in table.bindings() {
        if !scopes.contains(binding.scope()) {
            errors.push(ConstructionError::UnknownScope {
                key: binding.key().clone(),
                scope: binding.scope().clone(),
            });
        }
    }

    if table.len() > config.max_bindings {
        errors.push(ConstructionError::TooManyBindings {
            limit: config.max_bindings,
        });
    }

    Aggregated {
        table,
        scopes,
        required,
        allow_deferred_cycles,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_core::{ErrorKind, ScopeName};
    use std::sync::Arc;

    fn boxed(module: impl Module + 'static) -> Vec<Box<dyn Module>> {
        vec![Box::new(module)]
    }

    #[test]
    fn collects_every_conflict() {
        let modules = boxed(|b: &mut Binder| {
            b.bind::<u8>().to_instance(Arc::new(1));
            b.bind::<u8>().to_instance(Arc::new(2));
            b.bind::<u16>().in_scope("session").to_instance(Arc::new(3));
            b.bind_context_scope("request");
            b.bind_context_scope("request");
            b.add_error("bad port");
        });
        let aggregated = aggregate(&modules, &BuildConfig::default(), None);
        let kinds: Vec<ErrorKind> = aggregated.errors.iter().map(ConstructionError::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::DuplicateBinding,
                ErrorKind::DuplicateScope,
                ErrorKind::Module,
                ErrorKind::UnknownScope,
            ]
        );
        assert!(aggregated.scopes.contains(&ScopeName::new("request")));
    }

    #[test]
    fn options_from_modules_apply() {
        let modules = boxed(|b: &mut Binder| {
            b.require_explicit_bindings();
            b.disable_deferred_cycles();
            b.require::<u8>();
            b.require::<u8>();
        });
        let aggregated = aggregate(&modules, &BuildConfig::default(), None);
        assert!(!aggregated.table.just_in_time());
        assert!(!aggregated.allow_deferred_cycles);
        assert_eq!(aggregated.required, vec![Key::of::<u8>()]);
    }

    #[test]
    fn binding_limit() {
        let modules = boxed(|b: &mut Binder| {
            b.bind::<u8>().to_instance(Arc::new(1));
            b.bind::<u16>().to_instance(Arc::new(2));
        });
        let config = BuildConfig::default().with_max_bindings(1);
        let aggregated = aggregate(&modules, &config, None);
        assert_eq!(aggregated.errors[0].kind(), ErrorKind::TooManyBindings);
    }
}
