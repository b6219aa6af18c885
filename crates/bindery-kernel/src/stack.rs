//! Per-thread construction stack
//!
//! Each provision pushes a frame for the key being produced; each deferred
//! dereference pushes a marker frame first. Re-entering a key already under
//! construction on this thread is a cycle, or a deferred misuse when a marker
//! sits between the two frames.

use crate::graph::GraphId;
use bindery_core::{ConstructionError, Key, KeyPath};
use std::cell::RefCell;

#[derive(Debug, Clone)]
struct Frame {
    graph: GraphId,
    key: Key,
    deferred: bool,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops its frame when dropped
#[derive(Debug)]
pub(crate) struct StackGuard {
    _frame: (),
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Push a frame for `key`, failing on re-entry or depth overflow
pub(crate) fn enter(
    graph: GraphId,
    key: &Key,
    deferred: bool,
    max_depth: usize,
) -> Result<StackGuard, ConstructionError> {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();

        if !deferred {
            let existing = stack
                .iter()
                .position(|f| !f.deferred && f.graph == graph && f.key == *key);
            if let Some(start) = existing {
                let crossed_deferred = stack[start + 1..]
                    .iter()
                    .any(|f| f.deferred && f.graph == graph);
                let path: KeyPath = stack[start..]
                    .iter()
                    .filter(|f| !f.deferred)
                    .map(|f| f.key.clone())
                    .collect();
                return Err(if crossed_deferred {
                    ConstructionError::DeferredReferenceMisuse {
                        key: key.clone(),
                        path: path.with(key.clone()),
                    }
                } else {
                    ConstructionError::CircularDependency { path }
                });
            }
        }

        if stack.len() >= max_depth {
            return Err(ConstructionError::DepthLimitExceeded {
                key: key.clone(),
                limit: max_depth,
                chain: chain_of(&stack, graph),
            });
        }

        stack.push(Frame {
            graph,
            key: key.clone(),
            deferred,
        });
        Ok(StackGuard { _frame: () })
    })
}

fn chain_of(stack: &[Frame], graph: GraphId) -> KeyPath {
    stack
        .iter()
        .filter(|f| !f.deferred && f.graph == graph)
        .map(|f| f.key.clone())
        .collect()
}

/// Keys under construction for `graph` on this thread, outermost first
pub(crate) fn chain(graph: GraphId) -> KeyPath {
    STACK.with(|stack| chain_of(&stack.borrow(), graph))
}

/// Current stack depth on this thread
pub(crate) fn depth() -> usize {
    STACK.with(|stack| stack.borrow().len())
}
