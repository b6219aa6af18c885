//! Child graphs: parent fallback, shared singletons, inherited scopes

use bindery_core::{Binder, ConstructionError, Dependency, ErrorKind, Key, ScopeContext};
use bindery_kernel::{GraphBuilder, Stage};
use bindery_test_utils::{application_module, boxed, Database, Logger, UserService};
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Handler {
    db: Arc<Database>,
    route: Arc<String>,
}

fn handler_module() -> impl bindery_core::Module + 'static {
    |b: &mut Binder| {
        b.bind::<String>()
            .named("route")
            .to_instance(Arc::new("/users".to_owned()));
        b.bind::<Handler>().as_singleton().to_provider(
            vec![Dependency::on::<Database>(), Dependency::named::<String>("route")],
            |args| {
                Ok(Arc::new(Handler {
                    db: args.get::<Database>()?,
                    route: args.get_named::<String>("route")?,
                }))
            },
        );
    }
}

#[test]
fn child_sees_parent_bindings_and_shares_singletons() -> anyhow::Result<()> {
    let parent = GraphBuilder::new(Stage::Strict)
        .module(application_module())
        .build()?;
    let child = parent.create_child(Stage::Strict, [boxed(handler_module())])?;

    let handler = child.get::<Handler>()?;
    assert_eq!(handler.route.as_str(), "/users");
    assert!(Arc::ptr_eq(&handler.db, &parent.get::<Database>()?));
    assert!(Arc::ptr_eq(&child.get::<dyn Logger>()?, &parent.get::<dyn Logger>()?));

    // the parent cannot see the child's bindings
    assert!(parent.get::<Handler>().is_err());
    assert_eq!(child.parent().map(|p| p.id()), Some(parent.id()));
    Ok(())
}

#[test]
fn rebinding_a_parent_key_is_a_duplicate() {
    let parent = GraphBuilder::new(Stage::Lenient)
        .module(application_module())
        .build()
        .unwrap();
    let err = parent
        .child_builder(Stage::Lenient)
        .module(|b: &mut Binder| {
            b.bind::<UserService>().to_self();
        })
        .build()
        .unwrap_err();

    assert_eq!(err.len(), 1);
    let ConstructionError::DuplicateBinding { key, .. } = &err.errors()[0] else {
        panic!("unexpected error: {}", err.errors()[0]);
    };
    assert_eq!(key, &Key::of::<UserService>());
}

#[test]
fn child_inherits_custom_scopes() -> anyhow::Result<()> {
    let parent = GraphBuilder::new(Stage::Lenient)
        .module(|b: &mut Binder| {
            b.bind_context_scope("request");
        })
        .build()?;
    let child = parent.create_child(
        Stage::Strict,
        [boxed(|b: &mut Binder| {
            b.bind::<u32>().in_scope("request").to_provider(vec![], |_| Ok(Arc::new(1)));
        })],
    )?;

    let ctx = ScopeContext::new();
    let one = child.in_context(ctx).get::<u32>()?;
    let two = child.in_context(ctx).get::<u32>()?;
    assert!(Arc::ptr_eq(&one, &two));

    // context release on the parent reaches the shared policy
    parent.close_context(ctx);
    let three = child.in_context(ctx).get::<u32>()?;
    assert!(!Arc::ptr_eq(&one, &three));
    Ok(())
}

#[test]
fn child_of_a_shut_down_parent_cannot_reach_it() -> anyhow::Result<()> {
    let parent = GraphBuilder::new(Stage::Lenient)
        .module(application_module())
        .build()?;
    let child = parent.create_child(Stage::Lenient, [boxed(handler_module())])?;
    parent.shutdown();

    let err = child.get::<Handler>().err().expect("parent is closed");
    assert_eq!(err.kind(), ErrorKind::GraphClosed);
    Ok(())
}

#[test]
fn report_marks_parent_keys_as_external() -> anyhow::Result<()> {
    let parent = GraphBuilder::new(Stage::Strict)
        .module(application_module())
        .build()?;
    let child = parent.create_child(Stage::Strict, [boxed(handler_module())])?;

    let report = child.report();
    assert_eq!(report.parent, Some(parent.id()));
    assert_eq!(report.external, vec![Key::of::<Database>().to_string()]);
    assert!(report.binding(&Key::of::<Handler>().to_string()).is_some());
    Ok(())
}
