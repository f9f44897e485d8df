//! Graph edges and the handles nodes keep to them.
//!
//! An [`XlaEdge`] lives in the graph arena and carries one [`Argument`] plus
//! metadata recorded separately for each side: index [`PRODUCER`] is the
//! value seen by the start node, index [`CONSUMER`] the value seen by the end
//! node. Nodes never own edges; they hold [`EdgeHandle`]s that name the arena
//! slot and the composite [`EdgeKey`] used for erasure.

use serde::{Deserialize, Serialize};

use crate::argument::Argument;
use crate::blob::{LayoutPolicy, Shape};
use crate::id::{EdgeId, NodeId};

/// Side index of the producing (start) node.
pub const PRODUCER: usize = 0;
/// Side index of the consuming (end) node.
pub const CONSUMER: usize = 1;

#[track_caller]
fn check_side(side: usize) {
    assert!(
        side < 2,
        "edge side index {} out of range (expected {} or {})",
        side,
        PRODUCER,
        CONSUMER
    );
}

/// Identity an edge is matched by when erased from a node's edge list.
///
/// Structurally equal edges can coexist between the same pair of nodes, so
/// the never-reused `unique_id` is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub unique_id: u64,
    pub argument: Argument,
}

/// Non-owning reference from a node to an edge in the arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeHandle {
    pub id: EdgeId,
    pub key: EdgeKey,
}

impl EdgeHandle {
    pub fn argument(&self) -> &Argument {
        &self.key.argument
    }

    pub fn matches(&self, key: &EdgeKey) -> bool {
        self.key.unique_id == key.unique_id && self.key.argument == key.argument
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XlaEdge {
    start: NodeId,
    end: NodeId,
    argument: Argument,
    unique_id: u64,
    layout_policy: [LayoutPolicy; 2],
    time_shape: [Shape; 2],
}

impl XlaEdge {
    pub fn new(start: NodeId, end: NodeId, argument: Argument, unique_id: u64) -> Self {
        XlaEdge {
            start,
            end,
            argument,
            unique_id,
            layout_policy: Default::default(),
            time_shape: Default::default(),
        }
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn end(&self) -> NodeId {
        self.end
    }

    pub fn argument(&self) -> &Argument {
        &self.argument
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            unique_id: self.unique_id,
            argument: self.argument.clone(),
        }
    }

    /// Layout policy on `side`. Panics unless `side` is `PRODUCER` or
    /// `CONSUMER`.
    #[track_caller]
    pub fn layout_policy(&self, side: usize) -> &LayoutPolicy {
        check_side(side);
        &self.layout_policy[side]
    }

    #[track_caller]
    pub fn set_layout_policy(&mut self, side: usize, policy: LayoutPolicy) {
        check_side(side);
        self.layout_policy[side] = policy;
    }

    /// Execution-time shape on `side`. Panics unless `side` is `PRODUCER` or
    /// `CONSUMER`.
    #[track_caller]
    pub fn time_shape(&self, side: usize) -> &Shape {
        check_side(side);
        &self.time_shape[side]
    }

    #[track_caller]
    pub fn set_time_shape(&mut self, side: usize, shape: Shape) {
        check_side(side);
        self.time_shape[side] = shape;
    }
}
