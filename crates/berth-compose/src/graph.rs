//! Dependency graph management using `petgraph`.
//!
//! Nodes are synthesized service names; an edge `a -> b` means `a` depends
//! on `b`. Node and edge indices grow in insertion order, which is the
//! declaration order the tie-breaks below rely on.

use std::collections::{HashMap, HashSet};
use std::fmt;

use berth_common::error::{BerthError, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

/// A dependency cycle, as the full path back to its first node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCycle {
    /// Services on the cycle; the first entry is repeated at the end.
    pub path: Vec<String>,
}

impl DependencyCycle {
    /// Whether `name` lies on the cycle.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.path.iter().any(|n| n == name)
    }
}

impl fmt::Display for DependencyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependency cycle: {}", self.path.join(" -> "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

/// A dependency graph of synthesized services.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service node, returning the existing node if already present.
    pub fn add_service(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        let _ = self.index.insert(name.to_string(), idx);
        idx
    }

    /// Records that `dependent` depends on `dependency`.
    ///
    /// Missing nodes are created; a repeated edge is stored once.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) {
        let from = self.add_service(dependent);
        let to = self.add_service(dependency);
        if self.graph.find_edge(from, to).is_none() {
            let _ = self.graph.add_edge(from, to, ());
        }
    }

    /// Number of dependency edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of `name`, in the order they were recorded.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.index
            .get(name)
            .map(|&idx| {
                self.ordered_targets(idx)
                    .into_iter()
                    .map(|t| self.graph[t].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Services that directly depend on `name`.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut sources: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .map(|e| e.source())
            .collect();
        sources.sort_unstable();
        sources.into_iter().map(|s| self.graph[s].clone()).collect()
    }

    /// Outgoing neighbours in edge-insertion order.
    ///
    /// `petgraph` iterates adjacency lists newest-first, so edges are
    /// sorted by index to restore recording order.
    fn ordered_targets(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self.graph.edges(node).map(|e| (e.id(), e.target())).collect();
        edges.sort_unstable_by_key(|(id, _)| *id);
        edges.into_iter().map(|(_, target)| target).collect()
    }

    /// Finds every dependency cycle.
    ///
    /// Depth-first traversal from every node in declaration order, tracking
    /// the active path; reaching a node already on the path closes a cycle.
    /// Each cycle is reported once, whatever node it was entered from.
    #[must_use]
    pub fn check_cycles(&self) -> Vec<DependencyCycle> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut cycles = Vec::new();
        for node in self.graph.node_indices() {
            if marks[node.index()] == Mark::Unvisited {
                self.visit_for_cycles(node, &mut marks, &mut path, &mut seen, &mut cycles);
            }
        }
        cycles
    }

    fn visit_for_cycles(
        &self,
        node: NodeIndex,
        marks: &mut [Mark],
        path: &mut Vec<NodeIndex>,
        seen: &mut HashSet<Vec<NodeIndex>>,
        cycles: &mut Vec<DependencyCycle>,
    ) {
        marks[node.index()] = Mark::Active;
        path.push(node);
        for next in self.ordered_targets(node) {
            match marks[next.index()] {
                Mark::Unvisited => self.visit_for_cycles(next, marks, path, seen, cycles),
                Mark::Active => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let members = &path[start..];
                    if seen.insert(rotation_key(members)) {
                        let mut names: Vec<String> =
                            members.iter().map(|&n| self.graph[n].clone()).collect();
                        names.push(self.graph[next].clone());
                        cycles.push(DependencyCycle { path: names });
                    }
                }
                Mark::Done => {}
            }
        }
        let _ = path.pop();
        marks[node.index()] = Mark::Done;
    }

    /// Returns a start order: every service appears after all of its
    /// dependencies.
    ///
    /// Post-order depth-first traversal; roots are taken in declaration
    /// order and dependencies in recording order, so the result is stable
    /// when several valid orders exist.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Validation`] listing every cycle if the graph
    /// is not acyclic.
    pub fn start_order(&self) -> Result<Vec<String>> {
        let cycles = self.check_cycles();
        if !cycles.is_empty() {
            return Err(BerthError::Validation {
                problems: cycles.iter().map(ToString::to_string).collect(),
            });
        }
        let mut visited = vec![false; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.graph.node_count());
        for node in self.graph.node_indices() {
            self.emit_post_order(node, &mut visited, &mut order);
        }
        Ok(order)
    }

    fn emit_post_order(&self, node: NodeIndex, visited: &mut [bool], order: &mut Vec<String>) {
        if visited[node.index()] {
            return;
        }
        visited[node.index()] = true;
        for next in self.ordered_targets(node) {
            self.emit_post_order(next, visited, order);
        }
        order.push(self.graph[node].clone());
    }
}

/// Rotation-invariant identity of a cycle's members.
fn rotation_key(members: &[NodeIndex]) -> Vec<NodeIndex> {
    let pivot = members
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| **n)
        .map_or(0, |(i, _)| i);
    members[pivot..]
        .iter()
        .chain(&members[..pivot])
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_graph_resolves_to_empty() {
        let graph = DependencyGraph::new();
        let order = graph.start_order().expect("should resolve");
        assert!(order.is_empty());
    }

    #[test]
    fn single_node_resolves() {
        let mut graph = DependencyGraph::new();
        let _ = graph.add_service("api");
        let order = graph.start_order().expect("should resolve");
        assert_eq!(order, vec!["api"]);
    }

    #[test]
    fn chain_starts_from_the_leaf() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "c");
        let order = graph.start_order().expect("should resolve");
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn diamond_dependency() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("a", "c");
        graph.add_dependency("b", "d");
        graph.add_dependency("c", "d");

        let order = graph.start_order().expect("should resolve");
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn ties_follow_declaration_order() {
        let mut graph = DependencyGraph::new();
        let _ = graph.add_service("web");
        let _ = graph.add_service("worker");
        let _ = graph.add_service("admin");
        graph.add_dependency("worker", "redis-7");

        let order = graph.start_order().expect("should resolve");
        assert_eq!(order, vec!["web", "redis-7", "worker", "admin"]);
    }

    #[test]
    fn duplicate_edges_are_stored_once() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("app", "postgres-15");
        graph.add_dependency("app", "postgres-15");
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.dependencies_of("app"), vec!["postgres-15"]);
    }

    #[test]
    fn dependents_are_listed_in_declaration_order() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("app", "postgres-15");
        graph.add_dependency("app2", "postgres-15");
        assert_eq!(graph.dependents_of("postgres-15"), vec!["app", "app2"]);
        assert!(graph.dependents_of("missing").is_empty());
    }

    #[test]
    fn two_node_cycle_names_both() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "a");

        let cycles = graph.check_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path, vec!["a", "b", "a"]);

        let msg = graph.start_order().unwrap_err().to_string();
        assert!(msg.contains("a -> b -> a"), "got: {msg}");
    }

    #[test]
    fn three_node_cycle_reports_full_path() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "c");
        graph.add_dependency("c", "a");

        let cycles = graph.check_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("loop", "loop");
        let cycles = graph.check_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path, vec!["loop", "loop"]);
    }

    #[test]
    fn independent_cycles_are_all_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "a");
        graph.add_dependency("x", "y");
        graph.add_dependency("y", "x");
        graph.add_dependency("ok", "a");

        let cycles = graph.check_cycles();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.iter().any(|c| c.contains("a") && c.contains("b")));
        assert!(cycles.iter().any(|c| c.contains("x") && c.contains("y")));
    }

    #[test]
    fn cycle_through_shared_service_is_detected() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("app", "redis-7");
        graph.add_dependency("redis-7", "app");
        let cycles = graph.check_cycles();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].contains("redis-7"));
    }
}
