//! Configuration units and the binding DSL
//!
//! A [`Module`] contributes declarations to a [`Binder`]. Modules may install
//! other modules; [`OverridingModule`] installs a set of replacements at a
//! raised precedence so they win over the base modules' bindings.
//!
//! ```ignore
//! fn configure(binder: &mut Binder) {
//!     binder.bind::<u16>().named("port").to_instance(Arc::new(8080));
//!     binder
//!         .bind::<dyn Store>()
//!         .as_singleton()
//!         .to_constructor::<PgStore, _>(|s| s as Arc<dyn Store>);
//! }
//! ```

use crate::binding::{
    cast_erased, erase, Binding, Cast, ConstructorRule, Erased, Injectable, Precedence,
    Production, Source,
};
use crate::dependency::{Args, Dependency};
use crate::error::BoxError;
use crate::key::{Key, Qualifier};
use crate::scope::{ContextScope, ScopeName, ScopePolicy};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// A unit of configuration
pub trait Module {
    /// Contribute declarations
    fn configure(&self, binder: &mut Binder);

    /// Name used in logs
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

impl<F> Module for F
where
    F: Fn(&mut Binder),
{
    fn configure(&self, binder: &mut Binder) {
        self(binder);
    }
}

/// Graph-wide options a module may switch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinderOption {
    /// Disable just-in-time synthesis
    RequireExplicitBindings,
    /// Treat deferred edges like direct ones during cycle detection
    DisableDeferredCycles,
}

/// One declaration collected from modules
pub enum Declaration {
    /// A binding and its precedence
    Binding {
        /// The binding
        binding: Binding,
        /// Its rank against other declarations of the same key
        precedence: Precedence,
    },
    /// A named scope policy
    Scope {
        /// Name bindings refer to
        name: ScopeName,
        /// The policy
        policy: Arc<dyn ScopePolicy>,
        /// Declaration site
        at: Source,
    },
    /// A key that must be resolvable when the graph is built
    Require {
        /// Required key
        key: Key,
        /// Declaration site
        at: Source,
    },
    /// A constructor rule for just-in-time synthesis
    Constructor(ConstructorRule),
    /// An error reported by a module
    Error {
        /// Message
        message: String,
        /// Declaration site
        at: Source,
    },
    /// A graph-wide option
    Option(BinderOption),
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binding {
                binding,
                precedence,
            } => f
                .debug_struct("Binding")
                .field("key", binding.key())
                .field("precedence", precedence)
                .finish(),
            Self::Scope { name, at, .. } => f
                .debug_struct("Scope")
                .field("name", name)
                .field("at", at)
                .finish_non_exhaustive(),
            Self::Require { key, at } => f
                .debug_struct("Require")
                .field("key", key)
                .field("at", at)
                .finish(),
            Self::Constructor(rule) => f.debug_tuple("Constructor").field(rule.key()).finish(),
            Self::Error { message, at } => f
                .debug_struct("Error")
                .field("message", message)
                .field("at", at)
                .finish(),
            Self::Option(option) => f.debug_tuple("Option").field(option).finish(),
        }
    }
}

/// Collects declarations from modules
#[derive(Debug, Default)]
pub struct Binder {
    declarations: Vec<Declaration>,
    precedence: i32,
    // highest level entered since the innermost overriding module started its base
    highest: i32,
}

impl Binder {
    /// Empty binder at precedence level 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a binding for the unqualified contract `T`
    #[track_caller]
    pub fn bind<T: ?Sized + Send + Sync + 'static>(&mut self) -> BindingBuilder<'_, T> {
        let source = Source::caller();
        BindingBuilder::new(self, Key::of::<T>(), source)
    }

    /// Install a module's declarations
    pub fn install(&mut self, module: &dyn Module) {
        trace!(module = module.name(), precedence = self.precedence, "installing module");
        module.configure(self);
    }

    /// Run `f` with declarations ranked at `level`
    pub fn with_precedence(&mut self, level: i32, f: impl FnOnce(&mut Binder)) {
        let previous = self.precedence;
        self.precedence = level;
        self.highest = self.highest.max(level);
        f(self);
        self.precedence = previous;
    }

    /// Current precedence level
    #[inline]
    #[must_use]
    pub fn precedence(&self) -> i32 {
        self.precedence
    }

    /// Register a scope policy under `name`
    #[track_caller]
    pub fn bind_scope(&mut self, name: impl Into<ScopeName>, policy: Arc<dyn ScopePolicy>) {
        let at = Source::caller();
        self.declarations.push(Declaration::Scope {
            name: name.into(),
            policy,
            at,
        });
    }

    /// Register a [`ContextScope`] under `name`
    #[track_caller]
    pub fn bind_context_scope(&mut self, name: impl Into<ScopeName>) {
        let name = name.into();
        let policy = Arc::new(ContextScope::new(name.clone()));
        self.bind_scope(name, policy);
    }

    /// Require the unqualified `T` to be resolvable at build time
    #[track_caller]
    pub fn require<T: ?Sized + 'static>(&mut self) {
        self.require_key(Key::of::<T>());
    }

    /// Require `key` to be resolvable at build time
    #[track_caller]
    pub fn require_key(&mut self, key: Key) {
        let at = Source::caller();
        self.declarations.push(Declaration::Require { key, at });
    }

    /// List `C` in the constructor catalog
    pub fn injectable<C: Injectable>(&mut self) {
        self.declarations
            .push(Declaration::Constructor(ConstructorRule::of::<C>()));
    }

    /// Report a configuration error; the build fails with it
    #[track_caller]
    pub fn add_error(&mut self, message: impl Into<String>) {
        let at = Source::caller();
        self.declarations.push(Declaration::Error {
            message: message.into(),
            at,
        });
    }

    /// Disable just-in-time synthesis for the whole graph
    pub fn require_explicit_bindings(&mut self) {
        self.declarations
            .push(Declaration::Option(BinderOption::RequireExplicitBindings));
    }

    /// Let deferred edges close cycles no longer
    pub fn disable_deferred_cycles(&mut self) {
        self.declarations
            .push(Declaration::Option(BinderOption::DisableDeferredCycles));
    }

    /// Collected declarations
    #[inline]
    #[must_use]
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Take the collected declarations
    #[must_use]
    pub fn into_declarations(self) -> Vec<Declaration> {
        self.declarations
    }

    fn push_binding(&mut self, binding: Binding, overriding: bool) {
        let precedence = Precedence {
            level: self.precedence,
            overriding,
        };
        self.declarations.push(Declaration::Binding {
            binding,
            precedence,
        });
    }
}

/// Fluent declaration of one binding
///
/// Modifiers (`named`, `in_scope`, ...) may be chained in any order; a
/// terminal (`to_instance`, `to_provider`, ...) records the binding.
#[must_use = "a binding is only declared once a target is chosen"]
pub struct BindingBuilder<'a, T: ?Sized> {
    binder: &'a mut Binder,
    key: Key,
    scope: Option<ScopeName>,
    eager: bool,
    overriding: bool,
    source: Source,
    _contract: PhantomData<fn() -> Arc<T>>,
}

impl<'a, T: ?Sized + Send + Sync + 'static> BindingBuilder<'a, T> {
    fn new(binder: &'a mut Binder, key: Key, source: Source) -> Self {
        Self {
            binder,
            key,
            scope: None,
            eager: false,
            overriding: false,
            source,
            _contract: PhantomData,
        }
    }

    /// Qualify the key with a name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.key = self.key.with_qualifier(Qualifier::named(name));
        self
    }

    /// Qualify the key with marker type `M`
    pub fn qualified_with<M: ?Sized + 'static>(mut self) -> Self {
        self.key = self.key.with_qualifier(Qualifier::marker::<M>());
        self
    }

    /// Place the binding in a named scope
    pub fn in_scope(mut self, scope: impl Into<ScopeName>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// One instance per graph
    pub fn as_singleton(self) -> Self {
        self.in_scope(ScopeName::SINGLETON)
    }

    /// One instance per graph, created during the build in every stage
    pub fn as_eager_singleton(mut self) -> Self {
        self.eager = true;
        self.as_singleton()
    }

    /// Replace a binding of the same key declared at the same precedence
    pub fn overriding(mut self) -> Self {
        self.overriding = true;
        self
    }

    /// Key being bound
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Always return `instance`
    pub fn to_instance(self, instance: Arc<T>) {
        self.finish(Production::Instance(erase(instance)), None);
    }

    /// Produce with `factory` from the declared `dependencies`
    pub fn to_provider<F>(self, dependencies: Vec<Dependency>, factory: F)
    where
        F: Fn(&Args) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        let factory = Arc::new(move |args: &Args| factory(args).map(erase));
        self.finish(
            Production::Provider {
                dependencies,
                factory,
            },
            None,
        );
    }

    /// Delegate to another key of the same contract type
    ///
    /// Declares an error if `target` is of a different type.
    pub fn to_key(self, target: Key) {
        if !target.is_type::<T>() {
            let message = format!(
                "{} cannot be linked to {target}: contract types differ",
                self.key
            );
            self.binder.declarations.push(Declaration::Error {
                message,
                at: self.source,
            });
            return;
        }
        let cast: Cast = Arc::new(|value: Erased| Some(value));
        self.finish(Production::Linked { target, cast }, None);
    }

    /// Delegate to the unqualified `U`, converting with `coerce`
    pub fn to<U, F>(self, coerce: F)
    where
        U: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<U>) -> Arc<T> + Send + Sync + 'static,
    {
        self.to_key_with(Key::of::<U>(), coerce);
    }

    /// Delegate to `target`, of type `U`, converting with `coerce`
    pub fn to_key_with<U, F>(self, target: Key, coerce: F)
    where
        U: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<U>) -> Arc<T> + Send + Sync + 'static,
    {
        let cast = cast_erased::<U, T, F>(coerce);
        self.finish(Production::Linked { target, cast }, None);
    }

    /// Delegate to `C`, listing it in the constructor catalog
    pub fn to_constructor<C, F>(self, coerce: F)
    where
        C: Injectable,
        F: Fn(Arc<C>) -> Arc<T> + Send + Sync + 'static,
    {
        self.binder.injectable::<C>();
        self.to::<C, F>(coerce);
    }

    fn finish(self, production: Production, default_scope: Option<ScopeName>) {
        let scope = self
            .scope
            .or(default_scope)
            .unwrap_or(ScopeName::UNSCOPED);
        let binding = Binding::new(self.key, production, self.source)
            .with_scope(scope)
            .with_eager(self.eager);
        self.binder.push_binding(binding, self.overriding);
    }
}

impl<T: Injectable> BindingBuilder<'_, T> {
    /// Construct `T` itself with its constructor rule
    pub fn to_self(self) {
        let rule = ConstructorRule::of::<T>();
        let default_scope = rule.scope().cloned();
        self.finish(Production::Constructor(rule), default_scope);
    }
}

/// Installs `base` modules, then `overrides` at a raised precedence level
///
/// Bindings from the overrides replace base bindings of the same key; keys
/// bound only by the base are kept.
#[derive(Default)]
pub struct OverridingModule {
    base: Vec<Box<dyn Module>>,
    overrides: Vec<Box<dyn Module>>,
}

impl OverridingModule {
    /// Wrap a base module
    #[must_use]
    pub fn new(base: impl Module + 'static) -> Self {
        Self {
            base: vec![Box::new(base)],
            overrides: Vec::new(),
        }
    }

    /// Add another base module
    #[must_use]
    pub fn and(mut self, base: impl Module + 'static) -> Self {
        self.base.push(Box::new(base));
        self
    }

    /// Add an overriding module
    #[must_use]
    pub fn with(mut self, overrides: impl Module + 'static) -> Self {
        self.overrides.push(Box::new(overrides));
        self
    }
}

impl Module for OverridingModule {
    fn configure(&self, binder: &mut Binder) {
        let outer = std::mem::replace(&mut binder.highest, binder.precedence);
        for module in &self.base {
            binder.install(module.as_ref());
        }
        // one band above everything the base used, nested overrides included
        let level = binder.highest.max(binder.precedence) + 1;
        binder.with_precedence(level, |binder| {
            for module in &self.overrides {
                binder.install(module.as_ref());
            }
        });
        binder.highest = binder.highest.max(outer);
    }
}

impl fmt::Debug for OverridingModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |modules: &[Box<dyn Module>]| {
            modules.iter().map(|m| m.name().to_owned()).collect::<Vec<_>>()
        };
        f.debug_struct("OverridingModule")
            .field("base", &names(&self.base))
            .field("overrides", &names(&self.overrides))
            .finish()
    }
}
