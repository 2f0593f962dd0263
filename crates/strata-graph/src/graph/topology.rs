//! Cycle detection and topological ordering over node adjacency
//!
//! Everything here is a pure function of an adjacency map from each node to
//! the set of nodes it depends on. Iteration is over `BTreeMap`/`BTreeSet` so
//! results are deterministic for a given graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::GraphCycleError;
use crate::node::NodeId;

/// Node → the nodes it depends on
pub type Adjacency = BTreeMap<NodeId, BTreeSet<NodeId>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Find one dependency cycle, if any.
///
/// The returned path starts and ends with the same node.
pub fn find_cycle(deps: &Adjacency) -> Option<GraphCycleError> {
    let mut marks: BTreeMap<&NodeId, Mark> = BTreeMap::new();

    for start in deps.keys() {
        if marks.contains_key(start) {
            continue;
        }

        // Iterative DFS; each frame is a node and its remaining dependencies.
        let mut path: Vec<&NodeId> = vec![start];
        let mut frames: Vec<std::collections::btree_set::Iter<'_, NodeId>> =
            vec![deps[start].iter()];
        marks.insert(start, Mark::Visiting);

        while let Some(frame) = frames.last_mut() {
            match frame.next() {
                Some(next) => match marks.get(next) {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        let from = path.iter().position(|n| *n == next).unwrap_or(0);
                        let mut cycle: Vec<NodeId> =
                            path[from..].iter().map(|n| (*n).clone()).collect();
                        cycle.push(next.clone());
                        return Some(GraphCycleError { cycle });
                    }
                    None => {
                        marks.insert(next, Mark::Visiting);
                        path.push(next);
                        let children = deps.get(next).map(|d| d.iter());
                        frames.push(children.unwrap_or_else(|| EMPTY.iter()));
                    }
                },
                None => {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        marks.insert(done, Mark::Done);
                    }
                }
            }
        }
    }
    None
}

static EMPTY: BTreeSet<NodeId> = BTreeSet::new();

/// Kahn's algorithm. Among nodes that are ready at the same time the smallest
/// ID comes first. Returns `None` if the graph has a cycle.
pub fn topological_order(deps: &Adjacency) -> Option<Vec<NodeId>> {
    let dependents = invert(deps);
    let mut remaining: BTreeMap<&NodeId, usize> =
        deps.iter().map(|(id, d)| (id, d.len())).collect();
    let mut ready: BTreeSet<&NodeId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(deps.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    (order.len() == deps.len()).then_some(order)
}

/// Group nodes by depth: level 0 has no dependencies, level `n` depends on
/// at least one node at level `n - 1`. `order` must be topological.
pub fn levels(deps: &Adjacency, order: &[NodeId]) -> Vec<Vec<NodeId>> {
    let mut depth: BTreeMap<&NodeId, usize> = BTreeMap::new();
    let mut levels: Vec<Vec<NodeId>> = Vec::new();

    for id in order {
        let level = deps
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|dep| depth.get(dep))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(id, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(id.clone());
    }
    levels
}

/// Node → the nodes that depend on it
pub fn invert(deps: &Adjacency) -> Adjacency {
    let mut dependents: Adjacency = deps
        .keys()
        .map(|id| (id.clone(), BTreeSet::new()))
        .collect();
    for (id, node_deps) in deps {
        for dep in node_deps {
            dependents.entry(dep.clone()).or_default().insert(id.clone());
        }
    }
    dependents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ResourceKind;

    fn id(name: &str) -> NodeId {
        NodeId::new(ResourceKind::Secret, name)
    }

    fn adjacency(edges: Vec<(&str, Vec<&str>)>) -> Adjacency {
        edges
            .into_iter()
            .map(|(n, deps)| (id(n), deps.into_iter().map(id).collect()))
            .collect()
    }

    #[test]
    fn test_diamond_orders_dependencies_first() {
        let deps = adjacency(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);
        let order = topological_order(&deps).unwrap();
        assert_eq!(order, vec![id("a"), id("b"), id("c"), id("d")]);

        let levels = levels(&deps, &order);
        assert_eq!(
            levels,
            vec![vec![id("a")], vec![id("b"), id("c")], vec![id("d")]]
        );
    }

    #[test]
    fn test_order_is_deterministic_for_independent_nodes() {
        let deps = adjacency(vec![("z", vec![]), ("m", vec![]), ("a", vec![])]);
        assert_eq!(
            topological_order(&deps).unwrap(),
            vec![id("a"), id("m"), id("z")]
        );
    }

    #[test]
    fn test_cycle_path_is_reported() {
        let deps = adjacency(vec![
            ("a", vec!["c"]),
            ("b", vec!["a"]),
            ("c", vec!["b"]),
            ("d", vec![]),
        ]);
        let cycle = find_cycle(&deps).unwrap().cycle;

        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        for name in ["a", "b", "c"] {
            assert!(cycle.contains(&id(name)));
        }
        assert!(!cycle.contains(&id("d")));
        assert!(topological_order(&deps).is_none());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let deps = adjacency(vec![("a", vec!["a"])]);
        assert_eq!(find_cycle(&deps).unwrap().cycle, vec![id("a"), id("a")]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycle() {
        let deps = adjacency(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["a", "b"])]);
        assert!(find_cycle(&deps).is_none());
    }

    #[test]
    fn test_invert_lists_dependents() {
        let deps = adjacency(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["a"])]);
        let dependents = invert(&deps);
        assert_eq!(dependents[&id("a")], BTreeSet::from([id("b"), id("c")]));
        assert!(dependents[&id("c")].is_empty());
    }
}
