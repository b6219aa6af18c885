//! Binding table: explicit bindings plus the constructor catalog
//!
//! Explicit bindings are registered while declarations are aggregated and
//! never change afterwards. Unqualified keys with no explicit binding fall
//! back to the constructor catalog; synthesized bindings are cached so every
//! request for the key sees the same binding.

use crate::binding::{Binding, ConstructorRule, Precedence};
use crate::error::ConstructionError;
use crate::key::Key;
use indexmap::{map, IndexMap};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
struct Slot {
    binding: Arc<Binding>,
    precedence: Precedence,
}

/// Key to binding mapping with just-in-time synthesis
#[derive(Debug)]
pub struct BindingTable {
    explicit: IndexMap<Key, Slot>,
    catalog: RwLock<HashMap<TypeId, ConstructorRule>>,
    implicit: RwLock<IndexMap<Key, Arc<Binding>>>,
    just_in_time: bool,
}

impl BindingTable {
    /// Empty table with just-in-time synthesis enabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            explicit: IndexMap::new(),
            catalog: RwLock::new(HashMap::new()),
            implicit: RwLock::new(IndexMap::new()),
            just_in_time: true,
        }
    }

    /// Enable or disable just-in-time synthesis
    pub fn set_just_in_time(&mut self, enabled: bool) {
        self.just_in_time = enabled;
    }

    /// Whether just-in-time synthesis is enabled
    #[inline]
    #[must_use]
    pub fn just_in_time(&self) -> bool {
        self.just_in_time
    }

    /// Register an explicit binding
    ///
    /// A higher precedence level replaces the existing binding, a lower one is
    /// dropped. At equal level an overriding declaration replaces a plain one;
    /// any other collision is a [`ConstructionError::DuplicateBinding`].
    pub fn register(
        &mut self,
        binding: Binding,
        precedence: Precedence,
    ) -> Result<(), ConstructionError> {
        let key = binding.key().clone();
        let existing = match self.explicit.entry(key.clone()) {
            map::Entry::Vacant(vacant) => {
                trace!(%key, "bound");
                vacant.insert(Slot {
                    binding: Arc::new(binding),
                    precedence,
                });
                return Ok(());
            }
            map::Entry::Occupied(occupied) => occupied.into_mut(),
        };

        let current = existing.precedence;
        let replace = if precedence.level != current.level {
            precedence.level > current.level
        } else if precedence.overriding != current.overriding {
            precedence.overriding
        } else {
            return Err(ConstructionError::DuplicateBinding {
                key,
                first: existing.binding.source(),
                second: binding.source(),
            });
        };

        if replace {
            debug!(%key, replaced = %existing.binding.source(), by = %binding.source(), "binding overridden");
            *existing = Slot {
                binding: Arc::new(binding),
                precedence,
            };
        } else {
            debug!(%key, ignored = %binding.source(), "binding shadowed by override");
        }
        Ok(())
    }

    /// Add a constructor rule to the catalog; the first rule for a type wins
    pub fn register_constructor(&self, rule: ConstructorRule) {
        self.catalog.write().entry(rule.type_id()).or_insert(rule);
    }

    /// Whether the catalog can construct the type of `key`
    #[must_use]
    pub fn has_constructor(&self, key: &Key) -> bool {
        self.catalog.read().contains_key(&key.type_id())
    }

    /// Explicit binding only
    #[inline]
    #[must_use]
    pub fn explicit(&self, key: &Key) -> Option<&Arc<Binding>> {
        self.explicit.get(key).map(|entry| &entry.binding)
    }

    /// Explicit binding, previously synthesized binding, or a new synthesized one
    pub fn lookup(&self, key: &Key) -> Option<Arc<Binding>> {
        if let Some(binding) = self.explicit(key) {
            return Some(Arc::clone(binding));
        }
        if !self.just_in_time || key.is_qualified() {
            return None;
        }
        if let Some(binding) = self.implicit.read().get(key) {
            return Some(Arc::clone(binding));
        }

        let rule = self.catalog.read().get(&key.type_id()).cloned()?;
        let mut implicit = self.implicit.write();
        let binding = implicit
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(%key, "synthesized just-in-time binding");
                Arc::new(Binding::just_in_time(key.clone(), rule))
            })
            .clone();
        Some(binding)
    }

    /// Whether `key` can be looked up, synthesizing nothing
    #[must_use]
    pub fn can_resolve(&self, key: &Key) -> bool {
        self.explicit.contains_key(key)
            || (self.just_in_time && !key.is_qualified() && self.has_constructor(key))
    }

    /// Explicitly bound keys, in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.explicit.keys()
    }

    /// Explicit bindings, in declaration order
    pub fn bindings(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.explicit.values().map(|entry| &entry.binding)
    }

    /// Bindings synthesized so far
    #[must_use]
    pub fn implicit_bindings(&self) -> Vec<Arc<Binding>> {
        self.implicit.read().values().cloned().collect()
    }

    /// Number of explicit bindings
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.explicit.len()
    }

    /// Whether no explicit binding was registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty()
    }
}

impl Default for BindingTable {
    fn default() -> Self {
        Self::new()
    }
}
