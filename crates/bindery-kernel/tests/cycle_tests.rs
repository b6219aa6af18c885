//! Cycle detection and deferred references

use bindery_core::{Args, Binder, BoxError, ConstructionError, Dependency, ErrorKind, Injectable, Key};
use bindery_kernel::{GraphBuilder, Stage};
use bindery_test_utils::{Husband, Impatient, ImpatientHusband, Wife};
use std::collections::HashSet;
use std::sync::Arc;

struct Alpha;
struct Beta;
struct Gamma;

macro_rules! injectable {
    ($ty:ident => $($dep:ident),*) => {
        impl Injectable for $ty {
            fn dependencies() -> Vec<Dependency> {
                vec![$(Dependency::on::<$dep>()),*]
            }

            fn construct(_args: &Args) -> Result<Self, BoxError> {
                Ok(Self)
            }
        }
    };
}

injectable!(Alpha => Beta);
injectable!(Beta => Gamma);
injectable!(Gamma => Alpha);

#[test]
fn direct_cycle_lists_every_key_once() {
    let err = GraphBuilder::new(Stage::Strict)
        .module(|b: &mut Binder| {
            b.bind::<Alpha>().to_self();
            b.bind::<Beta>().to_self();
            b.bind::<Gamma>().to_self();
        })
        .build()
        .unwrap_err();

    assert_eq!(err.len(), 1);
    let ConstructionError::CircularDependency { path } = &err.errors()[0] else {
        panic!("unexpected error: {}", err.errors()[0]);
    };
    let expected: HashSet<Key> = [Key::of::<Alpha>(), Key::of::<Beta>(), Key::of::<Gamma>()]
        .into_iter()
        .collect();
    let reported: HashSet<Key> = path.iter().cloned().collect();
    assert_eq!(path.len(), 3);
    assert_eq!(reported, expected);
}

#[test]
fn cycle_through_just_in_time_bindings_is_found_lazily() -> anyhow::Result<()> {
    let graph = GraphBuilder::new(Stage::Lenient)
        .module(|b: &mut Binder| {
            b.injectable::<Beta>();
            b.injectable::<Gamma>();
            b.bind::<Alpha>().to_self();
        })
        .build()?;

    let err = graph.get::<Alpha>().err().expect("cycle");
    assert!(err.is_circular());
    Ok(())
}

#[test]
fn deferred_edge_breaks_cycle() -> anyhow::Result<()> {
    let graph = GraphBuilder::new(Stage::Strict)
        .module(|b: &mut Binder| {
            b.bind::<Husband>().as_singleton().to_self();
            b.bind::<Wife>().as_singleton().to_self();
        })
        .build()?;

    let husband = graph.get::<Husband>()?;
    let wife = husband.wife.get()?;
    assert!(Arc::ptr_eq(&wife.husband, &husband));
    assert!(Arc::ptr_eq(&wife, &graph.get::<Wife>()?));
    Ok(())
}

#[test]
fn deferred_cycle_with_unscoped_bindings() -> anyhow::Result<()> {
    let graph = GraphBuilder::new(Stage::Lenient)
        .module(|b: &mut Binder| {
            b.injectable::<Husband>();
            b.injectable::<Wife>();
        })
        .build()?;

    let wife = graph.get::<Wife>()?;
    // dereferencing after construction is an ordinary request
    let other = wife.husband.wife.get()?;
    assert!(!Arc::ptr_eq(&wife, &other));
    Ok(())
}

#[test]
fn dereferencing_during_construction_is_misuse() -> anyhow::Result<()> {
    let graph = GraphBuilder::new(Stage::Lenient)
        .module(|b: &mut Binder| {
            b.bind::<ImpatientHusband>().to_self();
            b.bind::<Impatient>().as_singleton().to_self();
        })
        .build()?;

    let err = graph.get::<Impatient>().err().expect("misuse");
    match err {
        ConstructionError::DeferredReferenceMisuse { key, path } => {
            assert_eq!(key, Key::of::<Impatient>());
            assert_eq!(path.keys().first(), Some(&Key::of::<Impatient>()));
            assert_eq!(path.last(), Some(&Key::of::<Impatient>()));
        }
        other => panic!("unexpected error: {other}"),
    }

    // the failed attempt left no half-built singleton behind
    let again = graph.get::<Impatient>().err().expect("misuse");
    assert_eq!(again.kind(), ErrorKind::DeferredReferenceMisuse);
    Ok(())
}

#[test]
fn deferred_cycles_can_be_disabled() {
    let err = GraphBuilder::new(Stage::Strict)
        .module(|b: &mut Binder| {
            b.disable_deferred_cycles();
            b.bind::<Husband>().to_self();
            b.bind::<Wife>().to_self();
        })
        .build()
        .unwrap_err();
    assert_eq!(err.count_of(ErrorKind::CircularDependency), 1);
}

#[test]
fn optional_edge_closes_cycle_despite_deferred_edge_to_same_key() {
    let err = GraphBuilder::new(Stage::Strict)
        .module(|b: &mut Binder| {
            b.bind::<u8>().to_provider(
                vec![Dependency::deferred::<u16>(), Dependency::optional::<u16>()],
                |_| Ok(Arc::new(1)),
            );
            b.bind::<u16>()
                .to_provider(vec![Dependency::on::<u8>()], |args| {
                    Ok(Arc::new(u16::from(*args.get::<u8>()?)))
                });
        })
        .build()
        .unwrap_err();

    assert_eq!(err.len(), 1);
    let ConstructionError::CircularDependency { path } = &err.errors()[0] else {
        panic!("unexpected error: {}", err.errors()[0]);
    };
    let reported: HashSet<Key> = path.iter().cloned().collect();
    assert_eq!(reported, HashSet::from([Key::of::<u8>(), Key::of::<u16>()]));
}

#[test]
fn self_dependency_is_a_cycle() {
    let err = GraphBuilder::new(Stage::Lenient)
        .module(|b: &mut Binder| {
            b.bind::<u32>()
                .as_eager_singleton()
                .to_provider(vec![Dependency::on::<u32>()], |args| args.get::<u32>().map_err(Into::into));
        })
        .build()
        .unwrap_err();
    let ConstructionError::CircularDependency { path } = &err.errors()[0] else {
        panic!("unexpected error: {}", err.errors()[0]);
    };
    assert_eq!(path.keys(), &[Key::of::<u32>()]);
}

#[test]
fn depth_limit_stops_long_chains() {
    let err = GraphBuilder::new(Stage::Strict)
        .with_config(bindery_core::BuildConfig::default().with_max_depth(2))
        .module(|b: &mut Binder| {
            b.bind::<u8>()
                .to_provider(vec![Dependency::on::<u16>()], |_| Ok(Arc::new(1)));
            b.bind::<u16>()
                .to_provider(vec![Dependency::on::<u32>()], |_| Ok(Arc::new(1)));
            b.bind::<u32>().to_instance(Arc::new(1));
        })
        .build()
        .unwrap_err();
    assert!(err.contains(ErrorKind::DepthLimitExceeded));
}
