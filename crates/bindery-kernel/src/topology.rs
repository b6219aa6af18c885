//! Dependency topology
//!
//! Nodes are keys, edges point from a dependent to its dependency and carry
//! the [`DependencyKind`]. Keys are interned into dense indices so the
//! petgraph map can use `Copy` node weights.

use bindery_core::{ConstructionError, DependencyKind, Key, KeyPath};
use indexmap::IndexSet;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;

fn strength(kind: DependencyKind) -> u8 {
    match kind {
        DependencyKind::Deferred => 0,
        DependencyKind::Optional => 1,
        DependencyKind::Direct => 2,
    }
}

/// Key-level dependency graph
#[derive(Debug, Default, Clone)]
pub struct Topology {
    keys: IndexSet<Key>,
    graph: DiGraphMap<usize, DependencyKind>,
}

impl Topology {
    /// Empty topology
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its index
    pub fn add_node(&mut self, key: &Key) -> usize {
        let (index, _) = self.keys.insert_full(key.clone());
        self.graph.add_node(index);
        index
    }

    /// Add an edge from `dependent` to `dependency`
    ///
    /// Between the same pair the strongest kind is kept, ranked
    /// direct, optional, deferred.
    pub fn add_edge(&mut self, dependent: &Key, dependency: &Key, kind: DependencyKind) {
        let from = self.add_node(dependent);
        let to = self.add_node(dependency);
        let stronger = match self.graph.edge_weight(from, to) {
            Some(existing) => strength(kind) > strength(*existing),
            None => true,
        };
        if stronger {
            self.graph.add_edge(from, to, kind);
        }
    }

    /// Whether `key` is a node
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.keys.contains(key)
    }

    /// Whether an edge of any kind runs from `dependent` to `dependency`
    #[must_use]
    pub fn has_edge(&self, dependent: &Key, dependency: &Key) -> bool {
        match (self.keys.get_index_of(dependent), self.keys.get_index_of(dependency)) {
            (Some(from), Some(to)) => self.graph.contains_edge(from, to),
            _ => false,
        }
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Every edge as `(dependent, dependency, kind)`
    pub fn edges(&self) -> impl Iterator<Item = (&Key, &Key, DependencyKind)> {
        self.graph
            .all_edges()
            .filter_map(|(from, to, kind)| Some((self.keys.get_index(from)?, self.keys.get_index(to)?, *kind)))
    }

    /// Keys `key` depends on
    #[must_use]
    pub fn dependencies_of(&self, key: &Key) -> Vec<(Key, DependencyKind)> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Keys depending on `key`
    #[must_use]
    pub fn dependents_of(&self, key: &Key) -> Vec<(Key, DependencyKind)> {
        self.neighbors(key, Direction::Incoming)
    }

    fn neighbors(&self, key: &Key, direction: Direction) -> Vec<(Key, DependencyKind)> {
        let Some(index) = self.keys.get_index_of(key) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(index, direction)
            .filter_map(|(from, to, kind)| {
                let other = if direction == Direction::Outgoing { to } else { from };
                self.keys.get_index(other).map(|k| (k.clone(), *kind))
            })
            .collect()
    }

    /// Subgraph of the edges that must be satisfied before the dependent exists
    fn blocking(&self, include_deferred: bool) -> DiGraphMap<usize, ()> {
        let mut blocking = DiGraphMap::new();
        for node in self.graph.nodes() {
            blocking.add_node(node);
        }
        for (from, to, kind) in self.graph.all_edges() {
            if include_deferred || *kind != DependencyKind::Deferred {
                blocking.add_edge(from, to, ());
            }
        }
        blocking
    }

    /// Every cycle not broken by a deferred edge, each key listed once
    ///
    /// With `include_deferred`, deferred edges close cycles as well.
    #[must_use]
    pub fn cycles(&self, include_deferred: bool) -> Vec<KeyPath> {
        let blocking = self.blocking(include_deferred);
        let mut cycles: Vec<KeyPath> = tarjan_scc(&blocking)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| blocking.contains_edge(n, n))
            })
            .map(|component| self.walk_cycle(&blocking, &component))
            .collect();
        cycles.sort_by(|a, b| a.keys().first().cmp(&b.keys().first()));
        cycles
    }

    /// Order a strongly connected component along its edges, starting at the
    /// earliest discovered key
    fn walk_cycle(&self, blocking: &DiGraphMap<usize, ()>, component: &[usize]) -> KeyPath {
        let mut remaining: Vec<usize> = component.to_vec();
        remaining.sort_unstable();
        let mut order = Vec::with_capacity(remaining.len());
        let mut current = remaining.remove(0);
        order.push(current);
        while let Some(next) = blocking
            .neighbors_directed(current, Direction::Outgoing)
            .filter(|n| remaining.contains(n))
            .min()
        {
            remaining.retain(|n| *n != next);
            order.push(next);
            current = next;
        }
        order.extend(remaining);
        order
            .into_iter()
            .filter_map(|index| self.keys.get_index(index).cloned())
            .collect()
    }

    /// Keys ordered dependencies first, deferred edges ignored
    pub fn construction_order(&self) -> Result<Vec<Key>, ConstructionError> {
        let blocking = self.blocking(false);
        match toposort(&blocking, None) {
            Ok(order) => Ok(order
                .into_iter()
                .rev()
                .filter_map(|index| self.keys.get_index(index).cloned())
                .collect()),
            Err(cycle) => {
                let start = cycle.node_id();
                let path = self
                    .cycles(false)
                    .into_iter()
                    .find(|path| self.keys.get_index(start).is_some_and(|k| path.contains(k)))
                    .unwrap_or_default();
                Err(ConstructionError::CircularDependency { path })
            }
        }
    }

    /// Copy every node and edge of `other` into this topology
    pub fn merge(&mut self, other: &Topology) {
        for key in &other.keys {
            self.add_node(key);
        }
        for (from, to, kind) in other.edges() {
            self.add_edge(from, to, kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct A;
    struct B;
    struct C;

    fn keys() -> (Key, Key, Key) {
        (Key::of::<A>(), Key::of::<B>(), Key::of::<C>())
    }

    #[test]
    fn direct_cycle_lists_each_key_once() {
        let (a, b, c) = keys();
        let mut topology = Topology::new();
        topology.add_edge(&a, &b, DependencyKind::Direct);
        topology.add_edge(&b, &c, DependencyKind::Direct);
        topology.add_edge(&c, &a, DependencyKind::Direct);

        let cycles = topology.cycles(false);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].keys(), &[a, b, c]);
    }

    #[test]
    fn deferred_edge_breaks_cycle() {
        let (a, b, _) = keys();
        let mut topology = Topology::new();
        topology.add_edge(&a, &b, DependencyKind::Deferred);
        topology.add_edge(&b, &a, DependencyKind::Direct);

        assert!(topology.cycles(false).is_empty());
        assert_eq!(topology.cycles(true).len(), 1);
        assert_eq!(topology.construction_order().unwrap(), vec![a, b]);
    }

    #[test]
    fn optional_edge_outranks_deferred_edge() {
        let (a, b, _) = keys();
        let mut topology = Topology::new();
        topology.add_edge(&a, &b, DependencyKind::Deferred);
        topology.add_edge(&a, &b, DependencyKind::Optional);
        topology.add_edge(&b, &a, DependencyKind::Direct);

        assert_eq!(topology.edge_count(), 2);
        assert_eq!(topology.dependencies_of(&a), vec![(b.clone(), DependencyKind::Optional)]);
        assert_eq!(topology.cycles(false).len(), 1);

        // a weaker kind never downgrades the stored edge
        topology.add_edge(&a, &b, DependencyKind::Deferred);
        assert_eq!(topology.dependencies_of(&a), vec![(b, DependencyKind::Optional)]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let (a, _, _) = keys();
        let mut topology = Topology::new();
        topology.add_edge(&a, &a, DependencyKind::Direct);
        assert_eq!(topology.cycles(false)[0].keys(), &[a]);
    }

    #[test]
    fn construction_order_puts_dependencies_first() {
        let (a, b, c) = keys();
        let mut topology = Topology::new();
        topology.add_edge(&a, &b, DependencyKind::Direct);
        topology.add_edge(&b, &c, DependencyKind::Optional);

        let order = topology.construction_order().unwrap();
        assert_eq!(order, vec![c, b, a]);
    }

    #[test]
    fn direct_edge_upgrades_deferred() {
        let (a, b, _) = keys();
        let mut topology = Topology::new();
        topology.add_edge(&a, &b, DependencyKind::Deferred);
        topology.add_edge(&a, &b, DependencyKind::Direct);
        topology.add_edge(&a, &b, DependencyKind::Deferred);
        assert_eq!(topology.dependencies_of(&a), vec![(b.clone(), DependencyKind::Direct)]);
        assert_eq!(topology.dependents_of(&b), vec![(a, DependencyKind::Direct)]);
        assert_eq!(topology.edge_count(), 1);
    }

    #[test]
    fn merge_copies_nodes_and_edges() {
        let (a, b, c) = keys();
        let mut base = Topology::new();
        base.add_edge(&a, &b, DependencyKind::Direct);
        let mut staged = Topology::new();
        staged.add_edge(&c, &a, DependencyKind::Direct);

        base.merge(&staged);
        assert_eq!(base.node_count(), 3);
        assert_eq!(base.edge_count(), 2);
        assert_eq!(base.dependents_of(&a), vec![(c, DependencyKind::Direct)]);
    }
}
