//! Bindery Kernel - binding-graph resolver and instance-lifecycle engine
//!
//! Two-phase design:
//! 1. **Construction Phase**: aggregate modules, resolve and validate the
//!    binding graph, create eager instances
//! 2. **Provision Phase**: serve instances from the sealed [`Graph`],
//!    honouring scope policies and dependency order
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bindery_kernel::prelude::*;
//!
//! let graph = GraphBuilder::new(Stage::Strict)
//!     .module(|b: &mut Binder| {
//!         b.bind::<dyn Logger>().as_singleton().to(|c: Arc<ConsoleLogger>| c as Arc<dyn Logger>);
//!         b.bind::<ConsoleLogger>().to_self();
//!     })
//!     .build()?;
//!
//! let logger = graph.get::<dyn Logger>()?;
//! graph.shutdown();
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod construction;
pub mod graph;
pub mod members;
pub mod report;
pub mod topology;

pub(crate) mod in_flight;
pub(crate) mod provision;
pub(crate) mod stack;

pub use construction::{create_graph, GraphBuilder, Stage};
pub use graph::{ContextView, Graph, GraphId};
pub use members::InjectionPoint;
pub use report::{BindingInfo, DependencyInfo, GraphReport};
pub use topology::Topology;

/// Re-export of the types needed to declare and use a graph
pub mod prelude {
    pub use crate::{create_graph, Graph, GraphBuilder, InjectionPoint, Stage};
    pub use bindery_core::prelude::*;
    pub use bindery_core::{Deferred, ErrorKind, ScopeContext};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
