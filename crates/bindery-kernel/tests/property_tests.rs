//! Property tests over randomly shaped binding sets

use bindery_core::{Binder, ConstructionError, Dependency, Key};
use bindery_kernel::{Graph, GraphBuilder, Stage};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn node(i: usize) -> String {
    format!("node-{i}")
}

/// Build `count` named `usize` bindings; node `i` depends on every `j` in `edges[i]`
fn build(count: usize, edges: Vec<Vec<usize>>, stage: Stage) -> Result<Graph, bindery_core::CreationError> {
    GraphBuilder::new(stage)
        .module(move |b: &mut Binder| {
            for (i, targets) in edges.iter().enumerate().take(count) {
                let dependencies: Vec<Dependency> = targets
                    .iter()
                    .map(|&j| Dependency::named::<usize>(node(j)))
                    .collect();
                let names: Vec<String> = targets.iter().map(|&j| node(j)).collect();
                b.bind::<usize>().named(node(i)).to_provider(dependencies, move |args| {
                    let mut sum = 1;
                    for name in &names {
                        sum += *args.get_named::<usize>(name.as_str())?;
                    }
                    Ok(Arc::new(sum))
                });
            }
        })
        .build()
}

/// Edges only point to higher indices, so the graph is acyclic
fn acyclic() -> impl Strategy<Value = (usize, Vec<Vec<usize>>)> {
    (2_usize..10).prop_flat_map(|count| {
        let rows: Vec<_> = (0..count)
            .map(|i| proptest::collection::vec((i + 1)..count.max(i + 2), 0..3))
            .collect();
        (Just(count), rows)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn acyclic_sets_build_strictly(
        (count, edges) in acyclic()
    ) {
        let edges: Vec<Vec<usize>> = edges
            .into_iter()
            .map(|row| row.into_iter().filter(|&j| j < count).collect())
            .collect();
        let graph = build(count, edges, Stage::Strict).map_err(|e| TestCaseError::fail(e.to_string()))?;
        for i in 0..count {
            let value = graph.get_named::<usize>(node(i)).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(*value >= 1);
        }
        let order = graph.topological_order().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(order.len(), count);
    }

    #[test]
    fn rings_report_every_key_once(len in 1_usize..8) {
        let edges: Vec<Vec<usize>> = (0..len).map(|i| vec![(i + 1) % len]).collect();
        let err = build(len, edges, Stage::Strict).err().ok_or_else(|| TestCaseError::fail("ring built"))?;

        prop_assert_eq!(err.len(), 1);
        let ConstructionError::CircularDependency { path } = &err.errors()[0] else {
            return Err(TestCaseError::fail(err.to_string()));
        };
        let reported: HashSet<&Key> = path.iter().collect();
        prop_assert_eq!(path.len(), len);
        prop_assert_eq!(reported.len(), len);
        for i in 0..len {
            let key = Key::named::<usize>(node(i));
            prop_assert!(reported.contains(&key));
        }
    }
}
