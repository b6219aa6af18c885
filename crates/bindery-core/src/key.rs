//! Binding keys
//!
//! A [`Key`] identifies an injectable value: a contract type plus an optional
//! [`Qualifier`]. Parameterised contract types are distinct keys because their
//! `TypeId`s differ (`Vec<Cache<A>>` and `Vec<Cache<B>>` never collide).

use std::any::{type_name, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Qualifier distinguishing several bindings of the same contract type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Qualifier {
    /// String qualifier, e.g. `named("primary")`
    Named(String),

    /// Marker-type qualifier, e.g. `qualified_with::<Primary>()`
    Marker {
        /// Marker type identity
        type_id: TypeId,
        /// Marker type name (diagnostics only)
        name: &'static str,
    },
}

impl Qualifier {
    /// String qualifier
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Marker-type qualifier
    #[inline]
    #[must_use]
    pub fn marker<M: ?Sized + 'static>() -> Self {
        Self::Marker {
            type_id: TypeId::of::<M>(),
            name: type_name::<M>(),
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "@named({name:?})"),
            Self::Marker { name, .. } => write!(f, "@{name}"),
        }
    }
}

/// Identity of an injectable value
///
/// Equality and hashing consider the contract `TypeId` and the qualifier only;
/// the type name is carried for diagnostics.
#[derive(Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Option<Qualifier>,
}

impl Key {
    /// Unqualified key for contract type `T`
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            qualifier: None,
        }
    }

    /// Key for `T` qualified by a name
    #[inline]
    #[must_use]
    pub fn named<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::of::<T>().with_qualifier(Qualifier::named(name))
    }

    /// Key for `T` qualified by marker type `M`
    #[inline]
    #[must_use]
    pub fn qualified<T: ?Sized + 'static, M: ?Sized + 'static>() -> Self {
        Self::of::<T>().with_qualifier(Qualifier::marker::<M>())
    }

    /// Replace the qualifier
    #[inline]
    #[must_use]
    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    /// Same contract type, no qualifier
    #[inline]
    #[must_use]
    pub fn unqualified(&self) -> Self {
        Self {
            type_id: self.type_id,
            type_name: self.type_name,
            qualifier: None,
        }
    }

    /// Contract type identity
    #[inline]
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Contract type name
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Qualifier, if any
    #[inline]
    #[must_use]
    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    /// Whether this key carries a qualifier
    #[inline]
    #[must_use]
    pub fn is_qualified(&self) -> bool {
        self.qualifier.is_some()
    }

    /// Whether the contract type of this key is `T`
    #[inline]
    #[must_use]
    pub fn is_type<T: ?Sized + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name
            .cmp(other.type_name)
            .then_with(|| self.qualifier.cmp(&other.qualifier))
            .then_with(|| self.type_id.cmp(&other.type_id))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "Key[{} {qualifier}]", self.type_name),
            None => write!(f, "Key[{}]", self.type_name),
        }
    }
}

/// Ordered chain of keys, used for requesting chains and cycle paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPath(Vec<Key>);

impl KeyPath {
    /// Empty path
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a key
    #[inline]
    pub fn push(&mut self, key: Key) {
        self.0.push(key);
    }

    /// Copy of this path with `key` appended
    #[must_use]
    pub fn with(&self, key: Key) -> Self {
        let mut path = self.clone();
        path.push(key);
        path
    }

    /// Keys in order
    #[inline]
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// Whether `key` occurs on the path
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.0.contains(key)
    }

    /// Number of keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last key on the path
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&Key> {
        self.0.last()
    }

    /// Iterate keys
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.0.iter()
    }
}

impl From<Vec<Key>> for KeyPath {
    fn from(keys: Vec<Key>) -> Self {
        Self(keys)
    }
}

impl FromIterator<Key> for KeyPath {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}
