//! Testing utilities for the Bindery workspace
//!
//! Shared contracts, injectable fixtures, and helpers.

#![allow(missing_docs)]

use anyhow::anyhow;
use bindery_core::{Args, Binder, BoxError, Deferred, Dependency, Injectable, Module};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn boxed(module: impl Module + 'static) -> Box<dyn Module> {
    Box::new(module)
}

/// Counts invocations of the providers it hands out
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Provider calling `make` and counting each call
    pub fn provider<T, F>(
        &self,
        make: F,
    ) -> impl Fn(&Args) -> Result<Arc<T>, BoxError> + Send + Sync + 'static
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.0);
        move |_: &Args| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(make()))
        }
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, line: &str);
    fn lines(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct ConsoleLogger {
    lines: Mutex<Vec<String>>,
}

impl Logger for ConsoleLogger {
    fn log(&self, line: &str) {
        self.lines.lock().push(line.to_owned());
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl Injectable for ConsoleLogger {
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    fn construct(_args: &Args) -> Result<Self, BoxError> {
        Ok(Self::default())
    }
}

pub struct Database {
    pub url: Arc<String>,
    pub logger: Arc<dyn Logger>,
}

impl Injectable for Database {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::named::<String>("db.url"),
            Dependency::on::<dyn Logger>(),
        ]
    }

    fn construct(args: &Args) -> Result<Self, BoxError> {
        let url = args.get_named::<String>("db.url")?;
        let logger = args.get::<dyn Logger>()?;
        logger.log(&format!("connecting to {url}"));
        Ok(Self { url, logger })
    }
}

pub struct UserService {
    pub db: Arc<Database>,
}

impl Injectable for UserService {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<Database>()]
    }

    fn construct(args: &Args) -> Result<Self, BoxError> {
        Ok(Self {
            db: args.get::<Database>()?,
        })
    }
}

/// Always fails to construct
#[derive(Debug)]
pub struct Unreachable;

impl Injectable for Unreachable {
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    fn construct(_args: &Args) -> Result<Self, BoxError> {
        Err(anyhow!("remote host unreachable").into())
    }
}

/// Half of a cycle broken by a deferred edge
pub struct Husband {
    pub wife: Deferred<Wife>,
}

impl Injectable for Husband {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::deferred::<Wife>()]
    }

    fn construct(args: &Args) -> Result<Self, BoxError> {
        Ok(Self {
            wife: args.deferred::<Wife>()?,
        })
    }
}

/// Depends on [`Husband`] directly
pub struct Wife {
    pub husband: Arc<Husband>,
}

impl Injectable for Wife {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<Husband>()]
    }

    fn construct(args: &Args) -> Result<Self, BoxError> {
        Ok(Self {
            husband: args.get::<Husband>()?,
        })
    }
}

/// Like [`Wife`], but dereferences the deferred handle while being built
pub struct Impatient {
    pub husband: Arc<ImpatientHusband>,
}

pub struct ImpatientHusband {
    pub wife: Deferred<Impatient>,
}

impl Injectable for ImpatientHusband {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::deferred::<Impatient>()]
    }

    fn construct(args: &Args) -> Result<Self, BoxError> {
        Ok(Self {
            wife: args.deferred::<Impatient>()?,
        })
    }
}

impl Injectable for Impatient {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<ImpatientHusband>()]
    }

    fn construct(args: &Args) -> Result<Self, BoxError> {
        let husband = args.get::<ImpatientHusband>()?;
        husband.wife.get()?;
        Ok(Self { husband })
    }
}

/// Binds `dyn Logger` to a singleton [`ConsoleLogger`] and the database url
pub fn infrastructure_module(url: &'static str) -> impl Module + 'static {
    move |b: &mut Binder| {
        b.bind::<dyn Logger>()
            .as_singleton()
            .to_constructor::<ConsoleLogger, _>(|c: Arc<ConsoleLogger>| -> Arc<dyn Logger> { c });
        b.bind::<String>()
            .named("db.url")
            .to_instance(Arc::new(url.to_owned()));
    }
}

/// Singleton [`Database`] and [`UserService`] on top of [`infrastructure_module`]
pub fn application_module() -> impl Module + 'static {
    |b: &mut Binder| {
        b.install(&infrastructure_module("pg://localhost/app"));
        b.bind::<Database>().as_singleton().to_self();
        b.bind::<UserService>().to_self();
    }
}
