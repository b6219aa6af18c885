//! Bindery Core - data model of the binding graph
//!
//! Everything the engine consumes, with no engine behaviour of its own:
//! - [`Key`]s identifying injectable values, optionally qualified
//! - [`Binding`]s pairing a key with a [`Production`] rule and a scope
//! - [`Module`]s and the [`Binder`] DSL that collect declarations
//! - the [`BindingTable`] with just-in-time synthesis from [`Injectable`] types
//! - [`ScopePolicy`] implementations and the [`ScopeRegistry`]
//! - the [`ConstructionError`] / [`CreationError`] model and [`BuildConfig`]
//!
//! # Example
//!
//! ```rust,ignore
//! use bindery_core::prelude::*;
//!
//! struct Database { url: Arc<String> }
//!
//! impl Injectable for Database {
//!     fn dependencies() -> Vec<Dependency> {
//!         vec![Dependency::named::<String>("url")]
//!     }
//!     fn construct(args: &Args) -> Result<Self, BoxError> {
//!         Ok(Self { url: args.get_named::<String>("url")? })
//!     }
//! }
//!
//! let module = |b: &mut Binder| {
//!     b.bind::<String>().named("url").to_instance(Arc::new("pg://".into()));
//!     b.bind::<Database>().as_singleton().to_self();
//! };
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod binding;
pub mod config;
pub mod dependency;
pub mod error;
pub mod key;
pub mod module;
pub mod scope;
pub mod table;

pub use binding::{
    cast_erased, erase, unerase, Binding, Cast, ConstructorRule, Erased, Factory, Injectable,
    Origin, Precedence, Production, ProductionKind, Source,
};
pub use config::BuildConfig;
pub use dependency::{
    ArgValue, Args, Deferred, DeferredRef, Dependency, DependencyKind, Provision,
};
pub use error::{BoxError, ConstructionError, CreationError, ErrorKind};
pub use key::{Key, KeyPath, Qualifier};
pub use module::{Binder, BinderOption, BindingBuilder, Declaration, Module, OverridingModule};
pub use scope::{
    ContextScope, Lifespan, Producer, ScopeContext, ScopeName, ScopePolicy, ScopeRegistry,
    SingletonScope, Unscoped,
};
pub use table::BindingTable;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for declaring bindings
    pub use crate::{
        Args, Binder, BoxError, BuildConfig, ConstructionError, CreationError, Deferred,
        Dependency, Injectable, Key, Module, OverridingModule, ScopeContext, ScopeName,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
