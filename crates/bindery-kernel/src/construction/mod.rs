//! Construction Phase
//!
//! Everything that happens before a [`Graph`](crate::Graph) is handed out:
//!
//! 1. **Aggregation**: install modules, fold declarations into a binding
//!    table and scope registry, collect conflicts
//! 2. **Resolution**: close over the dependency edges reachable from the
//!    stage's roots, synthesize just-in-time bindings, detect cycles and
//!    scope mismatches
//! 3. **Eager instantiation**: create eager singletons (and, in the strict
//!    stage, every graph-lived instance)
//!
//! Any error collected along the way fails the build as one
//! [`CreationError`](bindery_core::CreationError). No partial graph escapes.

pub mod builder;

pub(crate) mod aggregator;
pub(crate) mod resolver;

pub use builder::{create_graph, GraphBuilder};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Build mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Validate only what the roots reach; everything else on first request
    #[default]
    Lenient,
    /// Validate every declared binding and create graph-lived instances up front
    Strict,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lenient => f.write_str("lenient"),
            Self::Strict => f.write_str("strict"),
        }
    }
}
