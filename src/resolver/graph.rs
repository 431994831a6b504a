// src/resolver/graph.rs

//! Dependency graph construction, cycle detection, and ordering.
//!
//! The graph is built over a concrete choice of component versions: one
//! node per identity, edges along declared depends-on relationships, plus a
//! reverse index for uninstall reasoning.

use crate::error::{Error, Result};
use crate::version::{ComponentVersion, VersionConstraint};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// A node representing one component at a chosen version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentNode {
    pub name: String,
    pub version: ComponentVersion,
}

/// A dependency edge with its version constraint.
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub constraint: VersionConstraint,
}

/// Dependency graph for resolution and ordering.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, ComponentNode>,
    edges: HashMap<String, Vec<DependencyEdge>>,
    reverse_edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ComponentNode) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn add_edge(&mut self, edge: DependencyEdge) {
        self.reverse_edges
            .entry(edge.to.clone())
            .or_default()
            .push(edge.from.clone());
        self.edges.entry(edge.from.clone()).or_default().push(edge);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct dependencies of a component.
    pub fn dependencies(&self, name: &str) -> Vec<&DependencyEdge> {
        self.edges
            .get(name)
            .map(|v| v.iter().collect())
            .unwrap_or_default()
    }

    /// Direct dependents of a component (reverse edges).
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let mut out = self.reverse_edges.get(name).cloned().unwrap_or_default();
        out.sort();
        out.dedup();
        out
    }

    /// All components that transitively depend on `name`.
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(name.to_string());

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if seen.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }

        let mut out: Vec<String> = seen.into_iter().collect();
        out.sort();
        out
    }

    /// Detect a dependency cycle, returning the names along it in walk
    /// order (first element repeated at the end).
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        let mut trail = Vec::new();

        let mut names: Vec<&String> = self.nodes.keys().collect();
        names.sort();

        for name in names {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut stack, &mut trail) {
                    return Some(cycle);
                }
            }
        }

        None
    }

    fn dfs_cycle(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        stack: &mut HashSet<String>,
        trail: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(name.to_string());
        stack.insert(name.to_string());
        trail.push(name.to_string());

        if let Some(edges) = self.edges.get(name) {
            for edge in edges {
                if !visited.contains(&edge.to) {
                    if let Some(cycle) = self.dfs_cycle(&edge.to, visited, stack, trail) {
                        return Some(cycle);
                    }
                } else if stack.contains(&edge.to) {
                    // Slice the trail from the cycle entry point and close it
                    let start = trail.iter().position(|n| n == &edge.to).unwrap_or(0);
                    let mut cycle: Vec<String> = trail[start..].to_vec();
                    cycle.push(edge.to.clone());
                    return Some(cycle);
                }
            }
        }

        stack.remove(name);
        trail.pop();
        None
    }

    /// Fail with `DependencyCycle` if the graph is not a DAG.
    pub fn ensure_acyclic(&self) -> Result<()> {
        match self.detect_cycle() {
            Some(cycle) => Err(Error::DependencyCycle(cycle)),
            None => Ok(()),
        }
    }

    /// Topological order with dependencies before dependents, using Kahn's
    /// algorithm. Ties resolve alphabetically so plans are deterministic.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        // Unresolved-dependency count per component; edges to nodes outside
        // the graph (e.g. already-installed components) do not block
        let mut pending: HashMap<String, usize> = self
            .nodes
            .keys()
            .map(|n| {
                let deps = self
                    .edges
                    .get(n)
                    .map(|e| {
                        e.iter()
                            .filter(|edge| self.contains(&edge.to) && edge.to != *n)
                            .map(|edge| edge.to.as_str())
                            .collect::<HashSet<_>>()
                            .len()
                    })
                    .unwrap_or(0);
                (n.clone(), deps)
            })
            .collect();

        let mut ready: BTreeSet<String> = pending
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(n, _)| n.clone())
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(name) = ready.pop_first() {
            for dependent in self.dependents(&name) {
                if dependent == name {
                    continue;
                }
                if let Some(d) = pending.get_mut(&dependent) {
                    if *d > 0 {
                        *d -= 1;
                        if *d == 0 {
                            ready.insert(dependent);
                        }
                    }
                }
            }
            result.push(name);
        }

        if result.len() != self.nodes.len() {
            let cycle = self
                .detect_cycle()
                .unwrap_or_else(|| vec!["<unknown>".to_string()]);
            return Err(Error::DependencyCycle(cycle));
        }

        Ok(result)
    }
}
