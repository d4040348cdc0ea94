//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

/// Unique identifier for a node in the dependency graph.
///
/// Every signal, computed and effect gets one when it is created. Edges in
/// the graph are stored as ids, never as pointers, so a node can be dropped
/// without the graph keeping it alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node (computed). These have dependencies and may have
    /// dependents. They cache their value.
    Derived,

    /// An effect node. These are leaves of the graph.
    Effect,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// A transitive dependency changed. The node must check its derived
    /// dependencies before deciding whether to recompute.
    Check,

    /// A direct dependency changed. The node must recompute.
    Dirty,
}

/// A node in the dependency graph.
///
/// Edge sets are insertion ordered so that notification order follows
/// subscription order.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Nodes that this node reads from.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read from this node.
    dependents: IndexSet<NodeId>,
}

impl Node {
    /// Create a node for an existing id.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                // Start dirty to force the first computation
                NodeKind::Derived | NodeKind::Effect => DirtyState::Dirty,
            },
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// Check if the node needs any processing.
    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as needing a check. Never downgrades `Dirty`.
    pub fn mark_check(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::Check;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub fn add_dependency(&mut self, node_id: NodeId) -> bool {
        self.dependencies.insert(node_id)
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) -> bool {
        self.dependencies.shift_remove(&node_id)
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub fn add_dependent(&mut self, node_id: NodeId) -> bool {
        self.dependents.insert(node_id)
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) -> bool {
        self.dependents.shift_remove(&node_id)
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }
}
