//! Graph introspection
//!
//! Serialisable snapshots of what a graph has validated. Keys are rendered
//! as strings since type ids do not survive serialisation.

use crate::construction::Stage;
use crate::graph::GraphId;
use bindery_core::{DependencyKind, Lifespan, Origin, ProductionKind, ScopeName, Source};
use serde::Serialize;

/// One outgoing edge of a binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyInfo {
    pub key: String,
    pub kind: DependencyKind,
}

/// Description of one validated binding
#[derive(Debug, Clone, Serialize)]
pub struct BindingInfo {
    pub key: String,
    pub production: ProductionKind,
    pub scope: ScopeName,
    /// `None` only for scopes unknown to the graph
    pub lifespan: Option<Lifespan>,
    pub origin: Origin,
    pub source: Source,
    pub eager: bool,
    pub dependencies: Vec<DependencyInfo>,
}

/// Snapshot of a graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphReport {
    pub graph: GraphId,
    pub parent: Option<GraphId>,
    pub stage: Stage,
    pub shut_down: bool,
    pub scopes: Vec<ScopeName>,
    pub bindings: Vec<BindingInfo>,
    /// Keys served by an ancestor graph
    pub external: Vec<String>,
    /// Validated keys, dependencies first
    pub construction_order: Vec<String>,
}

impl GraphReport {
    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Binding rendered as `key`, if present
    #[must_use]
    pub fn binding(&self, key: &str) -> Option<&BindingInfo> {
        self.bindings.iter().find(|b| b.key == key)
    }

    /// Number of bindings created just in time
    #[must_use]
    pub fn just_in_time_count(&self) -> usize {
        self.bindings
            .iter()
            .filter(|b| b.origin == Origin::JustInTime)
            .count()
    }
}
