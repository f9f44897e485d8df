//! Cluster assignment and boundary synthesis.
//!
//! The clustering driver decides which nodes belong together (using
//! [`XlaGraph::is_reachable`] to keep every cluster acyclic) and records the
//! decision with [`XlaGraph::assign_cluster`]. [`XlaGraph::finalize_cluster`]
//! then cuts the cluster out as a self-contained subgraph: member nodes and
//! the edges between them are copied, and every blob crossing the cluster
//! edge is routed through a synthetic argument node.

use std::collections::{HashMap, HashSet};

use crate::argument::{Argument, BlobId};
use crate::edge::{XlaEdge, CONSUMER, PRODUCER};
use crate::error::GraphError;
use crate::graph::XlaGraph;
use crate::id::{ClusterId, NodeId, SubgraphId};
use crate::node::{ArgumentConf, XlaNode, IN_ARGUMENT_PREFIX, OUT_ARGUMENT_PREFIX};
use crate::registry::CompilerRegistry;

fn copy_metadata(from: &XlaEdge, to: &mut XlaEdge) {
    for side in [PRODUCER, CONSUMER] {
        to.set_layout_policy(side, *from.layout_policy(side));
        to.set_time_shape(side, from.time_shape(side).clone());
    }
}

/// Argument nodes created so far for one direction, keyed by the crossing
/// blob so that every consumer of a blob shares one boundary node.
struct Boundary {
    prefix: &'static str,
    nodes: HashMap<BlobId, (NodeId, Argument)>,
}

impl Boundary {
    fn new(prefix: &'static str) -> Self {
        Boundary {
            prefix,
            nodes: HashMap::new(),
        }
    }

    /// Argument node for `blob` and the argument it emits, creating the node
    /// on first use.
    ///
    /// In-arguments read the outer blob and expose a fresh inner one that
    /// members are rebound to; out-arguments read the member's blob and
    /// expose a fresh outer one.
    fn node_for(
        &mut self,
        sub: &mut XlaGraph,
        blob: &BlobId,
        near: &XlaNode,
    ) -> (NodeId, Argument) {
        if let Some(entry) = self.nodes.get(blob) {
            return entry.clone();
        }
        let name = format!("{}{}", self.prefix, self.nodes.len());
        let exposed = Argument::new(BlobId::new(name.clone(), "out"));
        let conf = ArgumentConf {
            output: exposed.blob_id().clone(),
            input: blob.clone(),
            name,
        };
        let id = sub.insert_node(XlaNode::argument_on(conf, near.backend()));
        self.nodes.insert(blob.clone(), (id, exposed.clone()));
        (id, exposed)
    }
}

impl XlaGraph {
    /// Records that `node` belongs to `cluster`.
    ///
    /// Panics if the node is already assigned to a different cluster.
    pub fn assign_cluster(&mut self, node: NodeId, cluster: ClusterId) -> Result<(), GraphError> {
        self.node_mut(node)?.set_cluster_id(cluster);
        Ok(())
    }

    /// Members of `cluster` in arena order.
    pub fn cluster_members(&self, cluster: ClusterId) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| node.cluster_id() == Some(cluster))
            .map(|(id, _)| id)
            .collect()
    }

    /// Nodes the registry can compile, in arena order. Argument nodes are
    /// never candidates.
    pub fn compilable_nodes(&self, registry: &CompilerRegistry) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| !node.is_argument_node() && node.is_compiled(registry))
            .map(|(id, _)| id)
            .collect()
    }

    /// Whether both endpoints of `edge` still list it.
    fn listed_at_both_ends(&self, edge: &XlaEdge) -> Result<bool, GraphError> {
        let key = edge.key();
        let at_start = self
            .node(edge.start())?
            .out_edges()
            .iter()
            .any(|h| h.matches(&key));
        let at_end = self
            .node(edge.end())?
            .in_edges()
            .iter()
            .any(|h| h.matches(&key));
        Ok(at_start && at_end)
    }

    /// Extracts `cluster` into a new subgraph owned by this graph.
    ///
    /// Only edges listed by both of their endpoints are carried over; an edge
    /// the driver erased from either list stays out of the subgraph. Every
    /// blob entering the cluster is read through an argument node named with
    /// [`IN_ARGUMENT_PREFIX`]: the edge from it carries the argument node's
    /// own output, and the consuming members' input slots are rebound to
    /// that output. Blobs leaving the cluster feed an argument node named
    /// with [`OUT_ARGUMENT_PREFIX`] over an edge carrying the member's blob.
    /// Copied edges keep their side metadata. Every member gets its
    /// `subgraph` set; the parent's own edges are left untouched.
    pub fn finalize_cluster(&mut self, cluster: ClusterId) -> Result<SubgraphId, GraphError> {
        let members = self.cluster_members(cluster);
        if members.is_empty() {
            return Err(GraphError::EmptyCluster { id: cluster });
        }
        let member_set: HashSet<NodeId> = members.iter().copied().collect();

        let mut sub = XlaGraph::with_options(self.options().clone());
        let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
        for &id in &members {
            let copy = self.node(id)?.detached();
            mapping.insert(id, sub.insert_node(copy));
        }

        let mut inbound = Boundary::new(IN_ARGUMENT_PREFIX);
        let mut outbound = Boundary::new(OUT_ARGUMENT_PREFIX);
        let mut copied: HashSet<u64> = HashSet::new();
        for &id in &members {
            let node = self.node(id)?;
            let inner = mapping[&id];

            for handle in node.in_edges() {
                let edge = self.edge(handle.id)?;
                // Internal edges are copied from the producer's side below.
                if member_set.contains(&edge.start())
                    || copied.contains(&edge.unique_id())
                    || !self.listed_at_both_ends(edge)?
                {
                    continue;
                }
                let (arg, exposed) =
                    inbound.node_for(&mut sub, edge.argument().blob_id(), node);
                sub.node_mut(inner)?.rebind_input(edge.argument(), &exposed);
                let new_edge = sub.connect(arg, inner, exposed)?;
                copy_metadata(edge, sub.edge_mut(new_edge)?);
                copied.insert(edge.unique_id());
            }

            for handle in node.out_edges() {
                let edge = self.edge(handle.id)?;
                if copied.contains(&edge.unique_id()) || !self.listed_at_both_ends(edge)? {
                    continue;
                }
                let target = match mapping.get(&edge.end()) {
                    Some(&end) => end,
                    None => outbound.node_for(&mut sub, edge.argument().blob_id(), node).0,
                };
                let new_edge = sub.connect(inner, target, edge.argument().clone())?;
                copy_metadata(edge, sub.edge_mut(new_edge)?);
                copied.insert(edge.unique_id());
            }
        }

        let subgraph = SubgraphId(self.subgraphs.len() as u32);
        for &id in &members {
            self.node_mut(id)?.set_subgraph(subgraph);
        }
        tracing::debug!(
            %cluster,
            %subgraph,
            members = members.len(),
            inputs = inbound.nodes.len(),
            outputs = outbound.nodes.len(),
            "finalized cluster"
        );
        self.subgraphs.push(sub);
        Ok(subgraph)
    }
}
