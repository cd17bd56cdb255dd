// Copyright 2020 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! General-purpose DAG algorithms, plus [`levelize`]: grouping a DAG's
//! nodes into dependency levels for the Planner, where everything in
//! level `n` only depends on nodes in levels `< n` and levels can be emitted
//! to the Work Queue one at a time.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::iter;

use itertools::Itertools as _;

/// Traverses nodes from `start` in depth-first order.
pub fn dfs<T, ID, II, NI>(
    start: II,
    id_fn: impl Fn(&T) -> ID,
    mut neighbors_fn: impl FnMut(&T) -> NI,
) -> impl Iterator<Item = T>
where
    ID: Hash + Eq,
    II: IntoIterator<Item = T>,
    NI: IntoIterator<Item = T>,
{
    let mut work: Vec<T> = start.into_iter().collect();
    let mut visited: HashSet<ID> = HashSet::new();
    iter::from_fn(move || loop {
        let c = work.pop()?;
        let id = id_fn(&c);
        if visited.contains(&id) {
            continue;
        }
        for p in neighbors_fn(&c) {
            work.push(p);
        }
        visited.insert(id);
        return Some(c);
    })
}

/// Builds a list of nodes reachable from `start` where neighbors come before
/// the node itself (a topological order respecting `neighbors_fn` as the
/// "depends on" relation).
pub fn topo_order_forward<T, ID, II, NI>(
    start: II,
    id_fn: impl Fn(&T) -> ID,
    mut neighbors_fn: impl FnMut(&T) -> NI,
) -> Vec<T>
where
    ID: Hash + Eq + Clone,
    II: IntoIterator<Item = T>,
    NI: IntoIterator<Item = T>,
{
    let mut stack: Vec<(T, bool)> = start.into_iter().map(|node| (node, false)).collect();
    let mut visiting = HashSet::new();
    let mut emitted = HashSet::new();
    let mut result = vec![];
    while let Some((node, neighbors_visited)) = stack.pop() {
        let id = id_fn(&node);
        if emitted.contains(&id) {
            continue;
        }
        if !neighbors_visited {
            assert!(visiting.insert(id.clone()), "graph has cycle");
            let neighbors_iter = neighbors_fn(&node).into_iter();
            stack.reserve(neighbors_iter.size_hint().0 + 1);
            stack.push((node, true));
            for neighbor in neighbors_iter {
                stack.push((neighbor, false));
            }
        } else {
            visiting.remove(&id);
            emitted.insert(id);
            result.push(node);
        }
    }
    result
}

/// Builds a list of nodes reachable from `start` where neighbors come after
/// the node itself.
pub fn topo_order_reverse<T, ID, II, NI>(
    start: II,
    id_fn: impl Fn(&T) -> ID,
    neighbors_fn: impl FnMut(&T) -> NI,
) -> Vec<T>
where
    ID: Hash + Eq + Clone,
    II: IntoIterator<Item = T>,
    NI: IntoIterator<Item = T>,
{
    let mut result = topo_order_forward(start, id_fn, neighbors_fn);
    result.reverse();
    result
}

/// Assigns each node reachable from `start` a dependency level: a node's
/// level is one greater than the maximum level of its neighbors (its
/// dependencies), and nodes with no neighbors sit at level 0. Returns levels
/// as a `Vec` where index `n` holds every node assigned level `n`, in the
/// relative order `neighbors_fn` discovered them.
///
/// This is the Planner's core primitive: child repositories with no
/// cross-dependency can land in the same level and be pushed through the
/// Work Queue together, while a child that declares another as a dependency
/// always lands in a strictly later level.
pub fn levelize<T, ID, II, NI>(
    start: II,
    id_fn: impl Fn(&T) -> ID,
    mut neighbors_fn: impl FnMut(&T) -> NI,
) -> Vec<Vec<T>>
where
    ID: Hash + Eq + Clone,
    II: IntoIterator<Item = T>,
    NI: IntoIterator<Item = T>,
{
    let ordered = topo_order_forward(start, &id_fn, &mut neighbors_fn);
    let mut level_by_id: HashMap<ID, usize> = HashMap::new();
    let mut levels: Vec<Vec<T>> = vec![];
    for node in ordered {
        let id = id_fn(&node);
        let level = neighbors_fn(&node)
            .into_iter()
            .map(|neighbor| level_by_id[&id_fn(&neighbor)] + 1)
            .max()
            .unwrap_or(0);
        level_by_id.insert(id, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(node);
    }
    levels
}

/// Like [`levelize`], but groups nodes that share a level using `key_fn`
/// instead of returning the bare nodes, convenient when the planner wants to
/// key each level's batch by child path for logging.
pub fn levelize_by<T, ID, K, II, NI>(
    start: II,
    id_fn: impl Fn(&T) -> ID,
    neighbors_fn: impl FnMut(&T) -> NI,
    key_fn: impl Fn(&T) -> K,
) -> Vec<Vec<(K, T)>>
where
    ID: Hash + Eq + Clone,
    II: IntoIterator<Item = T>,
    NI: IntoIterator<Item = T>,
{
    levelize(start, id_fn, neighbors_fn)
        .into_iter()
        .map(|level| level.into_iter().map(|node| (key_fn(&node), node)).collect_vec())
        .collect_vec()
}

/// Walks back from `head` collecting every ancestor not yet published,
/// stopping each branch of the walk as soon as it reaches a published
/// commit: publishing a commit implies every one of its ancestors was
/// published first, so the walk never needs to look past the nearest
/// published commit on any path. Returns ids oldest-first, suitable for
/// pushing in that order so a
/// child's dependency always lands before whatever references it.
///
/// `head` itself is included if unpublished. A commit reachable from `head`
/// by more than one path is only returned once.
pub fn first_unpublished_ancestor<ID>(
    head: ID,
    mut is_published: impl FnMut(&ID) -> bool,
    mut parents_fn: impl FnMut(&ID) -> Vec<ID>,
) -> Vec<ID>
where
    ID: Hash + Eq + Clone,
{
    if is_published(&head) {
        return vec![];
    }
    topo_order_forward(
        [head],
        |id: &ID| id.clone(),
        |id: &ID| {
            if is_published(id) {
                vec![]
            } else {
                parents_fn(id).into_iter().filter(|p| !is_published(p)).collect_vec()
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    struct Node(&'static str, Vec<&'static str>);

    fn graph() -> HashMap<&'static str, Node> {
        // a -> b -> d
        //  \-> c -/
        let mut g = HashMap::new();
        g.insert("a", Node("a", vec![]));
        g.insert("b", Node("b", vec!["a"]));
        g.insert("c", Node("c", vec!["a"]));
        g.insert("d", Node("d", vec!["b", "c"]));
        g
    }

    #[test]
    fn topo_order_forward_respects_dependencies() {
        let g = graph();
        let order = topo_order_forward(
            [g["d"].clone()],
            |n| n.0,
            |n| n.1.iter().map(|id| g[id].clone()).collect_vec(),
        );
        let positions: HashMap<_, _> = order.iter().enumerate().map(|(i, n)| (n.0, i)).collect();
        assert!(positions["a"] < positions["b"]);
        assert!(positions["a"] < positions["c"]);
        assert!(positions["b"] < positions["d"]);
        assert!(positions["c"] < positions["d"]);
    }

    #[test]
    fn levelize_groups_independent_nodes() {
        let g = graph();
        let levels = levelize(
            [g["d"].clone()],
            |n| n.0,
            |n| n.1.iter().map(|id| g[id].clone()).collect_vec(),
        );
        let level_of = |id: &str| {
            levels
                .iter()
                .position(|level| level.iter().any(|n| n.0 == id))
                .unwrap()
        };
        assert_eq!(level_of("a"), 0);
        assert_eq!(level_of("b"), 1);
        assert_eq!(level_of("c"), 1);
        assert_eq!(level_of("d"), 2);
        assert_eq!(levels[1].len(), 2);
    }

    #[test]
    fn first_unpublished_ancestor_stops_at_a_published_commit() {
        // a -> b -> c -> d, with a already published.
        let parents: HashMap<&str, Vec<&str>> =
            HashMap::from([("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"]), ("d", vec!["c"])]);
        let published: HashSet<&str> = HashSet::from(["a"]);
        let result = first_unpublished_ancestor(
            "d",
            |id| published.contains(id),
            |id| parents[id].clone(),
        );
        assert_eq!(result, vec!["b", "c", "d"]);
    }

    #[test]
    fn first_unpublished_ancestor_is_empty_when_head_is_already_published() {
        let parents: HashMap<&str, Vec<&str>> = HashMap::from([("a", vec![])]);
        let published: HashSet<&str> = HashSet::from(["a"]);
        let result = first_unpublished_ancestor("a", |id| published.contains(id), |id| parents[id].clone());
        assert!(result.is_empty());
    }

    #[test]
    fn dfs_visits_each_node_once() {
        let g = graph();
        let visited = dfs(
            [g["d"].clone()],
            |n| n.0,
            |n| n.1.iter().map(|id| g[id].clone()).collect_vec(),
        )
        .collect_vec();
        assert_eq!(visited.len(), 4);
    }
}
