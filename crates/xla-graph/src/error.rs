//! Recoverable error types for xla-graph.
//!
//! Uses `thiserror` for checked lookups and delegated failures. Programming
//! invariant violations (out-of-range edge side, missing slot identity,
//! duplicate node names, cluster reassignment) are not represented here;
//! they panic at the point of violation.

use thiserror::Error;

use crate::id::{ClusterId, EdgeId, NodeId};
use crate::operator::InferError;

/// Errors produced by the xla-graph crate.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node id does not resolve to a live node in the arena.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// An edge id does not resolve to a live edge in the arena.
    #[error("edge not found: EdgeId({id})", id = id.0)]
    EdgeNotFound { id: EdgeId },

    /// Adding the edge would close a cycle (including a self-loop).
    #[error("edge {start} -> {end} would create a cycle")]
    WouldCreateCycle { start: NodeId, end: NodeId },

    /// The node-level edge lists do not describe a DAG.
    #[error("graph contains a cycle through node {node}")]
    Cycle { node: NodeId },

    /// A node cannot be removed while edges still reference it.
    #[error("node {id} is still referenced by {count} edge(s)")]
    DanglingEdges { id: NodeId, count: usize },

    /// Finalizing a cluster that has no members.
    #[error("cluster {id} has no member nodes")]
    EmptyCluster { id: ClusterId },

    /// The compiler registry description could not be parsed.
    #[error("invalid compiler registry: {reason}")]
    InvalidRegistry { reason: String },

    /// Graph options could not be parsed.
    #[error("invalid graph options: {reason}")]
    InvalidOptions { reason: String },

    /// Node edge lists and the arena disagree.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },

    /// Blob inference failed inside an operator. The source is passed
    /// through untouched.
    #[error("blob inference failed for node '{node}'")]
    Inference {
        node: String,
        #[source]
        source: InferError,
    },
}
