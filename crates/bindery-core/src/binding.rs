//! Bindings: a key, the rule producing its instances, and a scope
//!
//! Instances travel through the engine type-erased as [`Erased`], which wraps
//! an `Arc<T>` so unsized contracts (`dyn Trait`) are supported without
//! reflection.

use crate::dependency::{Args, Dependency, DependencyKind};
use crate::error::BoxError;
use crate::key::Key;
use crate::scope::ScopeName;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Type-erased instance: an `Arc<T>` behind `dyn Any`
pub type Erased = Arc<dyn Any + Send + Sync>;

/// Type-erased production function
pub type Factory = Arc<dyn Fn(&Args) -> Result<Erased, BoxError> + Send + Sync>;

/// Conversion from a linked target's instance to the binding's contract
pub type Cast = Arc<dyn Fn(Erased) -> Option<Erased> + Send + Sync>;

/// Erase an instance
#[inline]
#[must_use]
pub fn erase<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Erased {
    Arc::new(value)
}

/// Recover an instance erased by [`erase`]
#[inline]
#[must_use]
pub fn unerase<T: ?Sized + Send + Sync + 'static>(value: &Erased) -> Option<Arc<T>> {
    (**value).downcast_ref::<Arc<T>>().cloned()
}

/// Where a binding or error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Declared in a module at this location
    Declared(&'static Location<'static>),
    /// Synthesized from a constructor rule on first request
    JustInTime,
    /// Created by the engine itself
    Internal,
}

impl Source {
    /// Location of the caller of the enclosing `#[track_caller]` function
    #[track_caller]
    #[inline]
    #[must_use]
    pub fn caller() -> Self {
        Self::Declared(Location::caller())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared(location) => write!(f, "{location}"),
            Self::JustInTime => f.write_str("<just-in-time>"),
            Self::Internal => f.write_str("<internal>"),
        }
    }
}

impl Serialize for Source {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Type whose instances the engine can construct from declared dependencies
///
/// Implementations are listed in the constructor catalog (see
/// [`Binder::injectable`](crate::module::Binder::injectable)); an unqualified
/// request for an unbound implementing type is then satisfied just in time.
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Dependencies the constructor reads
    fn dependencies() -> Vec<Dependency>;

    /// Build an instance from collected arguments
    fn construct(args: &Args) -> Result<Self, BoxError>;

    /// Scope the type declares for itself, if any
    fn scope() -> Option<ScopeName> {
        None
    }
}

/// Type-erased [`Injectable`] implementation
#[derive(Clone)]
pub struct ConstructorRule {
    key: Key,
    dependencies: Vec<Dependency>,
    construct: Factory,
    scope: Option<ScopeName>,
}

impl ConstructorRule {
    /// Rule for `C`
    #[must_use]
    pub fn of<C: Injectable>() -> Self {
        Self {
            key: Key::of::<C>(),
            dependencies: C::dependencies(),
            construct: Arc::new(|args: &Args| C::construct(args).map(|c| erase(Arc::new(c)))),
            scope: C::scope(),
        }
    }

    /// Concrete type built by the rule
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Concrete type identity
    #[inline]
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.key.type_id()
    }

    /// Declared dependencies
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Scope the type declares for itself
    #[inline]
    #[must_use]
    pub fn scope(&self) -> Option<&ScopeName> {
        self.scope.as_ref()
    }

    /// Run the rule
    pub fn construct(&self, args: &Args) -> Result<Erased, BoxError> {
        (self.construct)(args)
    }
}

impl fmt::Debug for ConstructorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorRule")
            .field("key", &self.key)
            .field("dependencies", &self.dependencies)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// How instances of a binding are produced
#[derive(Clone)]
pub enum Production {
    /// A pre-made instance, returned as is
    Instance(Erased),
    /// A function of declared dependencies
    Provider {
        /// Declared dependencies
        dependencies: Vec<Dependency>,
        /// Production function
        factory: Factory,
    },
    /// Delegate to another key and convert its instance
    Linked {
        /// Key delegated to
        target: Key,
        /// Conversion into this binding's contract
        cast: Cast,
    },
    /// A registered constructor rule
    Constructor(ConstructorRule),
}

/// Fieldless discriminant of [`Production`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionKind {
    Instance,
    Provider,
    Linked,
    Constructor,
}

impl fmt::Display for ProductionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instance => "instance",
            Self::Provider => "provider",
            Self::Linked => "linked",
            Self::Constructor => "constructor",
        };
        f.write_str(name)
    }
}

impl Production {
    /// Dependencies of the rule, as graph edges
    #[must_use]
    pub fn dependencies(&self) -> Vec<Dependency> {
        match self {
            Self::Instance(_) => Vec::new(),
            Self::Provider { dependencies, .. } => dependencies.clone(),
            Self::Linked { target, .. } => {
                vec![Dependency::new(target.clone(), DependencyKind::Direct)]
            }
            Self::Constructor(rule) => rule.dependencies().to_vec(),
        }
    }

    /// Discriminant
    #[must_use]
    pub fn kind(&self) -> ProductionKind {
        match self {
            Self::Instance(_) => ProductionKind::Instance,
            Self::Provider { .. } => ProductionKind::Provider,
            Self::Linked { .. } => ProductionKind::Linked,
            Self::Constructor(_) => ProductionKind::Constructor,
        }
    }
}

impl fmt::Debug for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("Instance"),
            Self::Provider { dependencies, .. } => f
                .debug_struct("Provider")
                .field("dependencies", dependencies)
                .finish_non_exhaustive(),
            Self::Linked { target, .. } => {
                f.debug_struct("Linked").field("target", target).finish_non_exhaustive()
            }
            Self::Constructor(rule) => f.debug_tuple("Constructor").field(rule).finish(),
        }
    }
}

/// Whether a binding was declared or synthesized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Declared by a module
    Explicit,
    /// Synthesized from the constructor catalog
    JustInTime,
}

/// Rank of a declaration when the same key is bound more than once
///
/// A higher `level` replaces a lower one. At equal level an overriding
/// declaration replaces a plain one; anything else is a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Precedence {
    /// Override level; installing through an overriding module raises it
    pub level: i32,
    /// Declared with `.overriding()`
    pub overriding: bool,
}

impl Precedence {
    /// Plain declaration at `level`
    #[inline]
    #[must_use]
    pub fn at(level: i32) -> Self {
        Self {
            level,
            overriding: false,
        }
    }
}

/// A key bound to a production rule within a scope
#[derive(Debug, Clone)]
pub struct Binding {
    key: Key,
    production: Production,
    scope: ScopeName,
    eager: bool,
    source: Source,
    origin: Origin,
}

impl Binding {
    /// Unscoped, explicit binding
    #[must_use]
    pub fn new(key: Key, production: Production, source: Source) -> Self {
        Self {
            key,
            production,
            scope: ScopeName::UNSCOPED,
            eager: false,
            source,
            origin: Origin::Explicit,
        }
    }

    /// Just-in-time binding synthesized from a constructor rule
    #[must_use]
    pub fn just_in_time(key: Key, rule: ConstructorRule) -> Self {
        let scope = rule.scope().cloned().unwrap_or(ScopeName::UNSCOPED);
        Self {
            key,
            production: Production::Constructor(rule),
            scope,
            eager: false,
            source: Source::JustInTime,
            origin: Origin::JustInTime,
        }
    }

    /// Place in a scope
    #[must_use]
    pub fn with_scope(mut self, scope: ScopeName) -> Self {
        self.scope = scope;
        self
    }

    /// Mark for eager instantiation
    #[must_use]
    pub fn with_eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Bound key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Production rule
    #[inline]
    #[must_use]
    pub fn production(&self) -> &Production {
        &self.production
    }

    /// Scope name
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ScopeName {
        &self.scope
    }

    /// Whether instantiated during the build in every stage
    #[inline]
    #[must_use]
    pub fn is_eager(&self) -> bool {
        self.eager
    }

    /// Declaration site
    #[inline]
    #[must_use]
    pub fn source(&self) -> Source {
        self.source
    }

    /// Declared or synthesized
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Declared dependencies of the production rule
    #[must_use]
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.production.dependencies()
    }
}

/// Coerce an instance stored under one type into another, checking the type
pub fn cast_erased<U, T, F>(coerce: F) -> Cast
where
    U: ?Sized + Send + Sync + 'static,
    T: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<U>) -> Arc<T> + Send + Sync + 'static,
{
    Arc::new(move |value: Erased| unerase::<U>(&value).map(|u| erase(coerce(u))))
}
