//! Dependency Graph Storage
//!
//! The graph owns every node and both directions of every edge. Reactive
//! values refer to their node by [`NodeId`] and go through the graph to
//! subscribe, unsubscribe and propagate dirty flags.
//!
//! # Propagation
//!
//! When a source node changes:
//!
//! 1. Its direct dependents are marked `Dirty`.
//! 2. Everything reachable beyond them is marked `Check`.
//! 3. The affected nodes are returned in topological order (dependencies
//!    before dependents) so the caller can enqueue the effects among them.
//!
//! `Check` nodes decide lazily, when pulled, whether anything they read
//! actually changed. That is what keeps a diamond from recomputing twice.

use std::collections::{HashMap, HashSet, VecDeque};

use smallvec::SmallVec;

use super::node::{DirtyState, Node, NodeId, NodeKind};

/// Result of rebuilding a node's dependency set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EdgeDiff {
    pub added: SmallVec<[NodeId; 4]>,
    pub removed: SmallVec<[NodeId; 4]>,
}

impl EdgeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The dependency graph, indexed by node ID.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<NodeId, Node>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph. Re-adding an existing id is a no-op.
    pub fn add_node(&mut self, id: NodeId, kind: NodeKind) -> NodeId {
        self.nodes.entry(id).or_insert_with(|| Node::new(id, kind));
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node. Returns the removed node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        Some(node)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn dirty_state(&self, node_id: NodeId) -> Option<DirtyState> {
        self.nodes.get(&node_id).map(Node::dirty_state)
    }

    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    pub fn mark_clean(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.mark_clean();
        }
    }

    pub fn mark_dirty(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.mark_dirty();
        }
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if dependency == dependent
            || !self.nodes.contains_key(&dependency)
            || !self.nodes.contains_key(&dependent)
        {
            return;
        }
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace the dependency set of `node_id` with `fresh`.
    ///
    /// Edges that were present before but are missing from `fresh` are
    /// unsubscribed; new ones are subscribed. Ids that are not in the graph
    /// (dropped nodes) and self edges are ignored.
    pub fn replace_dependencies(&mut self, node_id: NodeId, fresh: &[NodeId]) -> EdgeDiff {
        let mut diff = EdgeDiff::default();
        let Some(node) = self.nodes.get(&node_id) else {
            return diff;
        };

        let fresh_set: HashSet<NodeId> = fresh.iter().copied().collect();
        diff.removed = node
            .dependencies()
            .iter()
            .copied()
            .filter(|dep| !fresh_set.contains(dep))
            .collect();
        diff.added = fresh
            .iter()
            .copied()
            .filter(|dep| !node.dependencies().contains(dep))
            .collect();

        for dep in &diff.removed {
            self.remove_edge(*dep, node_id);
        }
        diff.added
            .retain(|dep| *dep != node_id && self.nodes.contains_key(dep));
        for dep in &diff.added {
            self.add_edge(*dep, node_id);
        }

        diff
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Returns the affected nodes in topological order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut to_process = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(source) = self.nodes.get(&source_id) {
            for dependent_id in source.dependents() {
                queue.push_back((*dependent_id, true));
            }
        }

        while let Some((node_id, direct)) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&node_id) {
                if direct {
                    node.mark_dirty();
                } else {
                    node.mark_check();
                }
                to_process.push(node_id);

                for dependent_id in node.dependents() {
                    queue.push_back((*dependent_id, false));
                }
            }
        }

        self.topological_sort(to_process)
    }

    /// Mark the direct dependents of a derived node dirty, except those
    /// `skip` rejects.
    ///
    /// Called when a recomputation produced a different value.
    pub fn mark_dependents_dirty(
        &mut self,
        node_id: NodeId,
        skip: impl Fn(NodeId) -> bool,
    ) -> SmallVec<[NodeId; 4]> {
        let dependents: SmallVec<[NodeId; 4]> = match self.nodes.get(&node_id) {
            Some(node) => node
                .dependents()
                .iter()
                .copied()
                .filter(|id| !skip(*id))
                .collect(),
            None => return SmallVec::new(),
        };
        for id in &dependents {
            self.mark_dirty(*id);
        }
        dependents
    }

    /// Derived dependencies of a node, in the order they were first read.
    pub fn derived_dependencies(&self, node_id: NodeId) -> SmallVec<[NodeId; 4]> {
        let Some(node) = self.nodes.get(&node_id) else {
            return SmallVec::new();
        };
        node.dependencies()
            .iter()
            .copied()
            .filter(|dep| self.kind(*dep) == Some(NodeKind::Derived))
            .collect()
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    /// Ties keep the input order.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Only count edges within the node set
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn dependency_count(&self, node_id: NodeId) -> usize {
        self.nodes
            .get(&node_id)
            .map_or(0, |node| node.dependencies().len())
    }

    pub fn dependent_count(&self, node_id: NodeId) -> usize {
        self.nodes
            .get(&node_id)
            .map_or(0, |node| node.dependents().len())
    }
}
