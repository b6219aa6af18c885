//! Declared dependencies and the arguments handed to production rules
//!
//! A production rule declares its dependencies up front. The resolver walks
//! those declarations to close the graph, and at provision time the engine
//! collects one [`ArgValue`] per declaration into an [`Args`] view before
//! calling the rule. A rule can only read what it declared.

use crate::binding::{unerase, Erased};
use crate::error::ConstructionError;
use crate::key::{Key, KeyPath};
use crate::scope::ScopeContext;
use serde::Serialize;
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// How a dependency is satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Instance produced before the dependent
    Direct,
    /// Handle resolved on first dereference; breaks construction cycles
    Deferred,
    /// Instance if the key is bound, absent otherwise
    Optional,
}

/// A dependency edge from a production rule to a key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    key: Key,
    kind: DependencyKind,
}

impl Dependency {
    /// Direct dependency on `key`
    #[inline]
    #[must_use]
    pub fn new(key: Key, kind: DependencyKind) -> Self {
        Self { key, kind }
    }

    /// Direct dependency on an unqualified `T`
    #[inline]
    #[must_use]
    pub fn on<T: ?Sized + 'static>() -> Self {
        Self::key(Key::of::<T>())
    }

    /// Direct dependency on `T` qualified by `name`
    #[inline]
    #[must_use]
    pub fn named<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::key(Key::named::<T>(name))
    }

    /// Direct dependency on an arbitrary key
    #[inline]
    #[must_use]
    pub fn key(key: Key) -> Self {
        Self::new(key, DependencyKind::Direct)
    }

    /// Deferred dependency on an unqualified `T`
    #[inline]
    #[must_use]
    pub fn deferred<T: ?Sized + 'static>() -> Self {
        Self::on::<T>().as_deferred()
    }

    /// Optional dependency on an unqualified `T`
    #[inline]
    #[must_use]
    pub fn optional<T: ?Sized + 'static>() -> Self {
        Self::on::<T>().as_optional()
    }

    /// Same key, deferred
    #[inline]
    #[must_use]
    pub fn as_deferred(mut self) -> Self {
        self.kind = DependencyKind::Deferred;
        self
    }

    /// Same key, optional
    #[inline]
    #[must_use]
    pub fn as_optional(mut self) -> Self {
        self.kind = DependencyKind::Optional;
        self
    }

    /// Target key
    #[inline]
    #[must_use]
    pub fn target(&self) -> &Key {
        &self.key
    }

    /// Edge kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> DependencyKind {
        self.kind
    }

    /// Whether the edge is deferred
    #[inline]
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.kind == DependencyKind::Deferred
    }

    /// Whether the edge is optional
    #[inline]
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.kind == DependencyKind::Optional
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DependencyKind::Direct => write!(f, "{}", self.key),
            DependencyKind::Deferred => write!(f, "deferred {}", self.key),
            DependencyKind::Optional => write!(f, "optional {}", self.key),
        }
    }
}

/// Source that deferred references resolve against
///
/// Implemented by the graph; held weakly so a handle never keeps a graph alive.
pub trait Provision: Send + Sync {
    /// Produce `key`, marking the request as a deferred dereference
    fn provide_deferred(
        &self,
        key: &Key,
        context: Option<ScopeContext>,
    ) -> Result<Erased, ConstructionError>;
}

struct Detached;

impl Provision for Detached {
    fn provide_deferred(
        &self,
        _key: &Key,
        _context: Option<ScopeContext>,
    ) -> Result<Erased, ConstructionError> {
        Err(ConstructionError::GraphClosed)
    }
}

fn detached() -> Weak<dyn Provision> {
    Weak::<Detached>::new()
}

/// Untyped deferred reference
#[derive(Clone)]
pub struct DeferredRef {
    key: Key,
    source: Weak<dyn Provision>,
    context: Option<ScopeContext>,
}

impl DeferredRef {
    /// Handle to `key` resolved through `source`
    #[must_use]
    pub fn new(key: Key, source: Weak<dyn Provision>, context: Option<ScopeContext>) -> Self {
        Self {
            key,
            source,
            context,
        }
    }

    /// Target key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Resolve to an erased instance
    pub fn resolve(&self) -> Result<Erased, ConstructionError> {
        let source = self.source.upgrade().ok_or(ConstructionError::GraphClosed)?;
        source.provide_deferred(&self.key, self.context)
    }

    /// Typed view; fails if the key's contract type is not `T`
    pub fn typed<T: ?Sized + Send + Sync + 'static>(self) -> Result<Deferred<T>, ConstructionError> {
        if !self.key.is_type::<T>() {
            return Err(ConstructionError::TypeMismatch {
                key: self.key,
                expected: type_name::<T>(),
            });
        }
        Ok(Deferred {
            inner: self,
            _marker: PhantomData,
        })
    }
}

impl fmt::Debug for DeferredRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredRef")
            .field("key", &self.key)
            .field("context", &self.context)
            .field("attached", &(self.source.strong_count() > 0))
            .finish()
    }
}

/// Handle to an instance of `T` resolved on first dereference
///
/// Each [`get`](Self::get) goes through the target's scope, so a singleton
/// target yields the same instance every time. Dereferencing while the target
/// is still under construction on the current thread fails with
/// [`ConstructionError::DeferredReferenceMisuse`].
pub struct Deferred<T: ?Sized> {
    inner: DeferredRef,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Deferred<T> {
    /// Resolve the target
    pub fn get(&self) -> Result<Arc<T>, ConstructionError> {
        let value = self.inner.resolve()?;
        unerase::<T>(&value).ok_or_else(|| ConstructionError::TypeMismatch {
            key: self.inner.key.clone(),
            expected: type_name::<T>(),
        })
    }

    /// Target key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.inner.key
    }
}

impl<T: ?Sized> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.inner.key).finish()
    }
}

/// Value collected for one declared dependency
#[derive(Clone)]
pub enum ArgValue {
    /// Produced instance
    Ready(Erased),
    /// Unresolved handle for a deferred edge
    Deferred(DeferredRef),
    /// Optional dependency with no binding
    Absent,
}

impl fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Ready"),
            Self::Deferred(d) => write!(f, "Deferred({})", d.key()),
            Self::Absent => f.write_str("Absent"),
        }
    }
}

/// Arguments passed to a production rule
pub struct Args {
    dependent: Key,
    source: Weak<dyn Provision>,
    context: Option<ScopeContext>,
    values: Vec<(Dependency, ArgValue)>,
}

impl Args {
    /// Empty arguments for `dependent`
    #[must_use]
    pub fn new(dependent: Key, source: Weak<dyn Provision>, context: Option<ScopeContext>) -> Self {
        Self {
            dependent,
            source,
            context,
            values: Vec::new(),
        }
    }

    /// Arguments not attached to any graph; deferred handles fail to resolve
    #[must_use]
    pub fn detached(dependent: Key) -> Self {
        Self::new(dependent, detached(), None)
    }

    /// Record the value for a declared dependency
    pub fn insert(&mut self, dependency: Dependency, value: ArgValue) {
        self.values.push((dependency, value));
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, dependency: Dependency, value: ArgValue) -> Self {
        self.insert(dependency, value);
        self
    }

    /// Key whose rule receives these arguments
    #[inline]
    #[must_use]
    pub fn dependent(&self) -> &Key {
        &self.dependent
    }

    /// Scope context the request runs in
    #[inline]
    #[must_use]
    pub fn context(&self) -> Option<ScopeContext> {
        self.context
    }

    /// Number of collected values
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the rule declared no dependencies
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
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

    /// Instance for an arbitrary key of type `T`
    ///
    /// A deferred edge is dereferenced on the spot.
    pub fn get_key<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: &Key,
    ) -> Result<Arc<T>, ConstructionError> {
        match self.lookup(key)? {
            ArgValue::Ready(value) => self.downcast(key, value),
            ArgValue::Deferred(handle) => handle.clone().typed::<T>()?.get(),
            ArgValue::Absent => Err(ConstructionError::MissingBinding {
                key: key.clone(),
                chain: KeyPath::from(vec![self.dependent.clone()]),
            }),
        }
    }

    /// Deferred handle for the unqualified `T`
    pub fn deferred<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Deferred<T>, ConstructionError> {
        self.deferred_key(&Key::of::<T>())
    }

    /// Deferred handle for an arbitrary key of type `T`
    pub fn deferred_key<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: &Key,
    ) -> Result<Deferred<T>, ConstructionError> {
        let handle = match self.lookup(key)? {
            ArgValue::Deferred(handle) => handle.clone(),
            ArgValue::Ready(_) | ArgValue::Absent => {
                DeferredRef::new(key.clone(), self.source.clone(), self.context)
            }
        };
        handle.typed::<T>()
    }

    /// Instance for the unqualified `T` if it is bound
    pub fn optional<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Option<Arc<T>>, ConstructionError> {
        self.optional_key(&Key::of::<T>())
    }

    /// Instance for an arbitrary key of type `T` if it is bound
    pub fn optional_key<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: &Key,
    ) -> Result<Option<Arc<T>>, ConstructionError> {
        match self.lookup(key)? {
            ArgValue::Absent => Ok(None),
            ArgValue::Ready(value) => self.downcast(key, value).map(Some),
            ArgValue::Deferred(handle) => handle.clone().typed::<T>()?.get().map(Some),
        }
    }

    fn lookup(&self, key: &Key) -> Result<&ArgValue, ConstructionError> {
        self.values
            .iter()
            .find(|(dependency, _)| dependency.target() == key)
            .map(|(_, value)| value)
            .ok_or_else(|| ConstructionError::UndeclaredDependency {
                dependent: self.dependent.clone(),
                key: key.clone(),
            })
    }

    fn downcast<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: &Key,
        value: &Erased,
    ) -> Result<Arc<T>, ConstructionError> {
        unerase::<T>(value).ok_or_else(|| ConstructionError::TypeMismatch {
            key: key.clone(),
            expected: type_name::<T>(),
        })
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("dependent", &self.dependent)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::erase;
    use crate::error::ErrorKind;

    struct Dummy;

    #[test]
    fn dependency_kinds() {
        let dep = Dependency::on::<u32>();
        assert_eq!(dep.kind(), DependencyKind::Direct);
        assert!(Dependency::deferred::<u32>().is_deferred());
        assert!(Dependency::optional::<u32>().is_optional());
        assert_eq!(Dependency::named::<u32>("port").target(), &Key::named::<u32>("port"));
        assert_eq!(Dependency::deferred::<u32>().to_string(), "deferred Key[u32]");
    }

    #[test]
    fn args_hand_out_declared_values() {
        let args = Args::detached(Key::of::<Dummy>())
            .with(Dependency::on::<u32>(), ArgValue::Ready(erase(Arc::new(7_u32))))
            .with(
                Dependency::named::<String>("name"),
                ArgValue::Ready(erase(Arc::new("db".to_string()))),
            );

        assert_eq!(*args.get::<u32>().unwrap(), 7);
        assert_eq!(args.get_named::<String>("name").unwrap().as_str(), "db");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn undeclared_keys_are_rejected() {
        let args = Args::detached(Key::of::<Dummy>());
        let err = args.get::<u32>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndeclaredDependency);
    }

    #[test]
    fn wrong_type_is_a_mismatch() {
        let args = Args::detached(Key::of::<Dummy>())
            .with(Dependency::on::<u32>(), ArgValue::Ready(erase(Arc::new(7_u64))));
        let err = args.get::<u32>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn optional_absent_is_none() {
        let args = Args::detached(Key::of::<Dummy>())
            .with(Dependency::optional::<u32>(), ArgValue::Absent);
        assert!(args.optional::<u32>().unwrap().is_none());
        assert!(args.get::<u32>().unwrap_err().is_missing_binding());
    }

    #[test]
    fn detached_deferred_reports_closed_graph() {
        let key = Key::of::<u32>();
        let args = Args::detached(Key::of::<Dummy>()).with(
            Dependency::deferred::<u32>(),
            ArgValue::Deferred(DeferredRef::new(key, detached(), None)),
        );
        let handle = args.deferred::<u32>().unwrap();
        assert_eq!(handle.key(), &Key::of::<u32>());
        assert_eq!(handle.get().unwrap_err().kind(), ErrorKind::GraphClosed);
    }

    #[test]
    fn deferred_handle_checks_type() {
        let handle = DeferredRef::new(Key::of::<u32>(), detached(), None);
        assert_eq!(
            handle.typed::<u64>().unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );
    }
}
