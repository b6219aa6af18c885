//! Error types for binding construction and provisioning
//!
//! Every problem found while building a graph is a [`ConstructionError`].
//! Build-time errors are collected, never raised one by one, and reported
//! together as a single [`CreationError`]. Errors found by `get` after a
//! successful build propagate individually.

use crate::binding::Source;
use crate::key::{Key, KeyPath};
use crate::scope::ScopeName;
use std::fmt;

/// Boxed error returned by production rules
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single construction or provisioning problem
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    /// Two bindings for the same key at equal precedence, neither overriding
    #[error("{key} was already bound at {first}; duplicate binding at {second}")]
    DuplicateBinding {
        /// Key bound twice
        key: Key,
        /// First declaration site
        first: Source,
        /// Second declaration site
        second: Source,
    },

    /// No explicit binding and no constructor rule to synthesize one from
    #[error("no binding for {key} (required by {chain})")]
    MissingBinding {
        /// Unresolvable key
        key: Key,
        /// Requesting chain, outermost first
        chain: KeyPath,
    },

    /// Dependency cycle with no deferred edge to break it
    #[error("circular dependency: {path}")]
    CircularDependency {
        /// Every key of the cycle, once each
        path: KeyPath,
    },

    /// Binding names a scope nobody registered
    #[error("{key} is bound in unknown scope `{scope}`")]
    UnknownScope {
        /// Offending binding
        key: Key,
        /// Scope name as declared
        scope: ScopeName,
    },

    /// Scope name registered twice
    #[error("scope `{scope}` is registered more than once (again at {at})")]
    DuplicateScope {
        /// Scope name
        scope: ScopeName,
        /// Second registration site
        at: Source,
    },

    /// A longer-lived binding depends directly on a context-bound one
    #[error("{key} in scope `{scope}` depends directly on {dependency} in narrower scope `{dependency_scope}`")]
    ScopeMismatch {
        /// Dependent key
        key: Key,
        /// Dependent scope
        scope: ScopeName,
        /// Dependency key
        dependency: Key,
        /// Dependency scope
        dependency_scope: ScopeName,
    },

    /// Context-bound key requested without an active scope context
    #[error("{key} is in scope `{scope}` but was requested outside of a scope context")]
    OutOfScope {
        /// Requested key
        key: Key,
        /// Scope requiring a context
        scope: ScopeName,
    },

    /// Deferred reference dereferenced while its target is still under construction
    #[error("deferred reference to {key} dereferenced before its construction completed: {path}")]
    DeferredReferenceMisuse {
        /// Target of the deferred reference
        key: Key,
        /// Construction stack at the time of the dereference
        path: KeyPath,
    },

    /// The production rule itself failed
    #[error("error producing {key} (requested via {chain}): {source}")]
    ProductionFailure {
        /// Key whose rule failed
        key: Key,
        /// Requesting chain
        chain: KeyPath,
        /// Rule failure
        #[source]
        source: BoxError,
    },

    /// Resolution or construction went deeper than the configured limit
    #[error("dependency depth limit of {limit} exceeded resolving {key} (via {chain})")]
    DepthLimitExceeded {
        /// Key being resolved when the limit tripped
        key: Key,
        /// Configured limit
        limit: usize,
        /// Chain at that point
        chain: KeyPath,
    },

    /// More bindings than the configured limit
    #[error("binding limit of {limit} exceeded")]
    TooManyBindings {
        /// Configured limit
        limit: usize,
    },

    /// A rule asked its arguments for a key it never declared
    #[error("{dependent} requested undeclared dependency {key}")]
    UndeclaredDependency {
        /// Key whose rule asked
        dependent: Key,
        /// Key that was asked for
        key: Key,
    },

    /// Instance stored under a key is not of the requested type
    #[error("{key} does not produce a value of type {expected}")]
    TypeMismatch {
        /// Key
        key: Key,
        /// Requested Rust type
        expected: &'static str,
    },

    /// Error reported by a configuration unit
    #[error("module error at {at}: {message}")]
    Module {
        /// Declaration site
        at: Source,
        /// Message
        message: String,
    },

    /// The graph was shut down
    #[error("graph has been shut down")]
    GraphClosed,

    /// Several problems surfaced at once by a lazily validated key
    #[error("{0}")]
    Aggregate(CreationError),
}

/// Fieldless discriminant of [`ConstructionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateBinding,
    MissingBinding,
    CircularDependency,
    UnknownScope,
    DuplicateScope,
    ScopeMismatch,
    OutOfScope,
    DeferredReferenceMisuse,
    ProductionFailure,
    DepthLimitExceeded,
    TooManyBindings,
    UndeclaredDependency,
    TypeMismatch,
    Module,
    GraphClosed,
    Aggregate,
}

impl ConstructionError {
    /// Wrap a rule failure, passing nested construction errors through unchanged
    pub fn production_failure(key: Key, chain: KeyPath, source: BoxError) -> Self {
        match source.downcast::<ConstructionError>() {
            Ok(inner) => *inner,
            Err(source) => Self::ProductionFailure { key, chain, source },
        }
    }

    /// Discriminant
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateBinding { .. } => ErrorKind::DuplicateBinding,
            Self::MissingBinding { .. } => ErrorKind::MissingBinding,
            Self::CircularDependency { .. } => ErrorKind::CircularDependency,
            Self::UnknownScope { .. } => ErrorKind::UnknownScope,
            Self::DuplicateScope { .. } => ErrorKind::DuplicateScope,
            Self::ScopeMismatch { .. } => ErrorKind::ScopeMismatch,
            Self::OutOfScope { .. } => ErrorKind::OutOfScope,
            Self::DeferredReferenceMisuse { .. } => ErrorKind::DeferredReferenceMisuse,
            Self::ProductionFailure { .. } => ErrorKind::ProductionFailure,
            Self::DepthLimitExceeded { .. } => ErrorKind::DepthLimitExceeded,
            Self::TooManyBindings { .. } => ErrorKind::TooManyBindings,
            Self::UndeclaredDependency { .. } => ErrorKind::UndeclaredDependency,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::Module { .. } => ErrorKind::Module,
            Self::GraphClosed => ErrorKind::GraphClosed,
            Self::Aggregate(_) => ErrorKind::Aggregate,
        }
    }

    /// Key the error is about, when there is a single one
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::DuplicateBinding { key, .. }
            | Self::MissingBinding { key, .. }
            | Self::UnknownScope { key, .. }
            | Self::ScopeMismatch { key, .. }
            | Self::OutOfScope { key, .. }
            | Self::DeferredReferenceMisuse { key, .. }
            | Self::ProductionFailure { key, .. }
            | Self::DepthLimitExceeded { key, .. }
            | Self::TypeMismatch { key, .. } => Some(key),
            Self::UndeclaredDependency { dependent, .. } => Some(dependent),
            Self::CircularDependency { path } => path.keys().first(),
            Self::DuplicateScope { .. }
            | Self::TooManyBindings { .. }
            | Self::Module { .. }
            | Self::GraphClosed
            | Self::Aggregate(_) => None,
        }
    }

    /// Whether this is a [`ErrorKind::MissingBinding`]
    #[inline]
    #[must_use]
    pub fn is_missing_binding(&self) -> bool {
        self.kind() == ErrorKind::MissingBinding
    }

    /// Whether this is a [`ErrorKind::CircularDependency`]
    #[inline]
    #[must_use]
    pub fn is_circular(&self) -> bool {
        self.kind() == ErrorKind::CircularDependency
    }
}

/// Aggregate of every problem found by one build attempt
#[derive(Debug)]
pub struct CreationError {
    errors: Vec<ConstructionError>,
}

impl CreationError {
    /// Wrap collected errors
    #[must_use]
    pub fn new(errors: Vec<ConstructionError>) -> Self {
        Self { errors }
    }

    /// `Ok` when nothing was collected, the aggregate otherwise
    pub fn check(errors: Vec<ConstructionError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::new(errors))
        }
    }

    /// Collected errors, in discovery order
    #[inline]
    #[must_use]
    pub fn errors(&self) -> &[ConstructionError] {
        &self.errors
    }

    /// Take ownership of the collected errors
    #[inline]
    #[must_use]
    pub fn into_errors(self) -> Vec<ConstructionError> {
        self.errors
    }

    /// Number of errors
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no error was collected
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors of one kind
    pub fn of_kind(&self, kind: ErrorKind) -> impl Iterator<Item = &ConstructionError> {
        self.errors.iter().filter(move |e| e.kind() == kind)
    }

    /// Number of errors of one kind
    #[must_use]
    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Whether any error of `kind` was collected
    #[must_use]
    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.of_kind(kind).next().is_some()
    }

    /// Collapse into a single error: the only one, or the aggregate
    #[must_use]
    pub fn into_single(mut self) -> ConstructionError {
        if self.errors.len() == 1 {
            if let Some(only) = self.errors.pop() {
                return only;
            }
        }
        ConstructionError::Aggregate(self)
    }
}

impl fmt::Display for CreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "unable to create graph, see the following errors:")?;
        for (i, error) in self.errors.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "{}) {error}", i + 1)?;
        }
        writeln!(f)?;
        match self.errors.len() {
            1 => write!(f, "1 error"),
            n => write!(f, "{n} errors"),
        }
    }
}

impl std::error::Error for CreationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl IntoIterator for CreationError {
    type Item = ConstructionError;
    type IntoIter = std::vec::IntoIter<ConstructionError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
