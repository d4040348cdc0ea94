//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values and computations.
//!
//! # Overview
//!
//! - Nodes represent reactive values (signals) or computations (computeds,
//!   effects)
//! - Edges represent dependencies: if A depends on B, there is an edge from B
//!   to A
//!
//! When a signal changes, we traverse the graph to find all affected nodes
//! and mark them dirty. The runtime then pulls the dirty nodes that are
//! actually observed.
//!
//! # Design Decisions
//!
//! 1. The graph is an arena indexed by [`NodeId`]. Reactive values hold their
//!    id, never a pointer to another node, so there are no reference cycles
//!    between nodes.
//!
//! 2. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.
//!
//! 3. Dependency sets are replaced wholesale after every run and diffed
//!    against the previous set, so edges read on one run but not the next are
//!    dropped.

mod node;
mod topology;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use topology::{DependencyGraph, EdgeDiff};
