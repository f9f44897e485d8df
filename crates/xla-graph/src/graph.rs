//! XlaGraph: the arena owning every node and edge.
//!
//! Nodes and edges live in a petgraph `StableGraph`; nodes refer to their
//! edges only through [`EdgeHandle`]s and edges to their endpoints through
//! [`NodeId`]s, so every cross reference is a checked arena lookup. A lookup
//! that misses yields [`GraphError::NodeNotFound`] or
//! [`GraphError::EdgeNotFound`] rather than touching freed storage.
//!
//! # Edge lists versus the arena
//!
//! The arena records every edge ever connected and not yet removed. A node's
//! edge lists are what traversals follow, and the clustering driver may erase
//! handles from them (see [`XlaNode::erase_in_edge`]) while the edge itself
//! stays in the arena. [`XlaGraph::remove_edge`] drops both.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::{Directed, Direction};

use crate::argument::{Argument, BlobId};
use crate::blob::{BlobDescStore, ParallelContext};
use crate::edge::{EdgeHandle, XlaEdge, CONSUMER, PRODUCER};
use crate::error::GraphError;
use crate::id::{EdgeId, NodeId, SubgraphId};
use crate::node::{ArgumentConf, XlaNode};
use crate::operator::{DeviceType, Operator};
use crate::options::GraphOptions;

/// Owner of all nodes and edges of one graph.
#[derive(Debug, Clone)]
pub struct XlaGraph {
    arena: StableGraph<XlaNode, XlaEdge, Directed, u32>,
    /// Node name -> node, for duplicate detection and lookup.
    names: HashMap<String, NodeId>,
    /// Next edge `unique_id`. Never reused.
    next_unique_id: u64,
    options: GraphOptions,
    /// Subgraphs extracted from finalized clusters.
    pub(crate) subgraphs: Vec<XlaGraph>,
}

impl Default for XlaGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl XlaGraph {
    pub fn new() -> Self {
        Self::with_options(GraphOptions::default())
    }

    pub fn with_options(options: GraphOptions) -> Self {
        XlaGraph {
            arena: StableGraph::new(),
            names: HashMap::new(),
            next_unique_id: 0,
            options,
            subgraphs: Vec::new(),
        }
    }

    /// Builds a graph from the operators of a computation graph.
    ///
    /// One node is created per operator. Then every input slot whose blob is
    /// produced by another node's output gets an edge from the producer, with
    /// producer-side metadata taken from the producing operator and
    /// consumer-side metadata from the consuming one. Inputs without a
    /// producer in `ops` stay unconnected.
    pub fn from_operators<I>(ops: I, options: GraphOptions) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = Arc<dyn Operator>>,
    {
        let mut graph = Self::with_options(options);
        let ids: Vec<NodeId> = ops
            .into_iter()
            .map(|op| graph.add_operator_node(op))
            .collect();

        let mut producers: HashMap<BlobId, (NodeId, String)> = HashMap::new();
        for &id in &ids {
            for (bn, arg) in graph.node(id)?.outputs() {
                producers.insert(arg.blob_id().clone(), (id, bn.clone()));
            }
        }

        for &end in &ids {
            let inputs: Vec<(String, Argument)> = graph
                .node(end)?
                .inputs()
                .iter()
                .map(|(bn, arg)| (bn.clone(), arg.clone()))
                .collect();
            for (in_bn, argument) in inputs {
                let Some((start, out_bn)) = producers.get(argument.blob_id()).cloned() else {
                    continue;
                };
                if start == end {
                    tracing::debug!(
                        node = %graph.node(end)?.name(),
                        blob = %argument,
                        "skipping self-consumed blob"
                    );
                    continue;
                }
                let edge_id = graph.connect(start, end, argument)?;

                let producer = graph.node(start)?.operator().cloned();
                let consumer = graph.node(end)?.operator().cloned();
                let edge = graph.edge_mut(edge_id)?;
                if let Some(op) = producer {
                    edge.set_layout_policy(PRODUCER, op.layout_policy(&out_bn));
                    edge.set_time_shape(PRODUCER, op.time_shape());
                }
                if let Some(op) = consumer {
                    edge.set_layout_policy(CONSUMER, op.layout_policy(&in_bn));
                    edge.set_time_shape(CONSUMER, op.time_shape());
                }
            }
        }

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built graph from operators"
        );
        Ok(graph)
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Adds a node wrapping `op`. Panics if a node with the same name exists.
    pub fn add_operator_node(&mut self, op: Arc<dyn Operator>) -> NodeId {
        let node = XlaNode::from_operator(op, self.options.fallback_backend);
        self.insert_node(node)
    }

    /// Adds a boundary node. Panics if a node with the same name exists.
    pub fn add_argument_node(&mut self, conf: ArgumentConf, device: DeviceType) -> NodeId {
        let node = XlaNode::argument(conf, device, self.options.fallback_backend);
        self.insert_node(node)
    }

    pub(crate) fn insert_node(&mut self, node: XlaNode) -> NodeId {
        assert!(
            !self.names.contains_key(node.name()),
            "duplicate node name '{}'",
            node.name()
        );
        let name = node.name().to_string();
        let id = NodeId::from(self.arena.add_node(node));
        self.names.insert(name, id);
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&XlaNode, GraphError> {
        self.arena
            .node_weight(NodeIndex::from(id))
            .ok_or(GraphError::NodeNotFound { id })
    }

    /// Mutable node access, for edge-list mutation by the clustering driver.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut XlaNode, GraphError> {
        self.arena
            .node_weight_mut(NodeIndex::from(id))
            .ok_or(GraphError::NodeNotFound { id })
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// All live nodes in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &XlaNode)> {
        self.arena
            .node_indices()
            .map(move |idx| (NodeId::from(idx), &self.arena[idx]))
    }

    pub fn node_count(&self) -> usize {
        self.arena.node_count()
    }

    /// Removes a node that no edge refers to any more.
    pub fn remove_node(&mut self, id: NodeId) -> Result<XlaNode, GraphError> {
        let idx = NodeIndex::from(id);
        self.node(id)?;
        let count = self.arena.edges_directed(idx, Direction::Outgoing).count()
            + self.arena.edges_directed(idx, Direction::Incoming).count();
        if count > 0 {
            return Err(GraphError::DanglingEdges { id, count });
        }
        let node = self
            .arena
            .remove_node(idx)
            .ok_or(GraphError::NodeNotFound { id })?;
        self.names.remove(node.name());
        self.verify();
        Ok(node)
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    pub fn edge(&self, id: EdgeId) -> Result<&XlaEdge, GraphError> {
        self.arena
            .edge_weight(EdgeIndex::from(id))
            .ok_or(GraphError::EdgeNotFound { id })
    }

    /// Mutable edge access, for updating side metadata.
    pub fn edge_mut(&mut self, id: EdgeId) -> Result<&mut XlaEdge, GraphError> {
        self.arena
            .edge_weight_mut(EdgeIndex::from(id))
            .ok_or(GraphError::EdgeNotFound { id })
    }

    /// Handle for `id`, suitable for [`XlaNode::add_in_edge`] and friends.
    pub fn edge_handle(&self, id: EdgeId) -> Result<EdgeHandle, GraphError> {
        Ok(EdgeHandle {
            id,
            key: self.edge(id)?.key(),
        })
    }

    /// Ids of all edges in the arena, including ones no node lists.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.arena.edge_indices().map(EdgeId::from)
    }

    pub fn edge_count(&self) -> usize {
        self.arena.edge_count()
    }

    /// Creates an edge `start -> end` carrying `argument` and links it into
    /// both endpoint lists. Performs no cycle check; see
    /// [`connect_acyclic`](Self::connect_acyclic).
    pub fn connect(
        &mut self,
        start: NodeId,
        end: NodeId,
        argument: Argument,
    ) -> Result<EdgeId, GraphError> {
        self.node(start)?;
        self.node(end)?;

        let unique_id = self.next_unique_id;
        self.next_unique_id += 1;

        let edge = XlaEdge::new(start, end, argument, unique_id);
        let key = edge.key();
        let id = EdgeId::from(self.arena.add_edge(start.into(), end.into(), edge));
        let handle = EdgeHandle { id, key };

        self.node_mut(start)?.add_out_edge(handle.clone());
        self.node_mut(end)?.add_in_edge(handle);

        tracing::debug!(%start, %end, edge = %id, unique_id, "connected edge");
        self.verify();
        Ok(id)
    }

    /// Like [`connect`](Self::connect), but refuses an edge that would close
    /// a cycle: a self-loop, or `end` already reaching `start`.
    pub fn connect_acyclic(
        &mut self,
        start: NodeId,
        end: NodeId,
        argument: Argument,
    ) -> Result<EdgeId, GraphError> {
        if start == end || self.is_reachable(end, start)? {
            return Err(GraphError::WouldCreateCycle { start, end });
        }
        self.connect(start, end, argument)
    }

    /// Removes an edge from the arena and from both endpoint lists.
    pub fn remove_edge(&mut self, id: EdgeId) -> Result<XlaEdge, GraphError> {
        let edge = self
            .arena
            .remove_edge(EdgeIndex::from(id))
            .ok_or(GraphError::EdgeNotFound { id })?;
        let key = edge.key();
        self.node_mut(edge.start())?.erase_out_edge(&key);
        self.node_mut(edge.end())?.erase_in_edge(&key);

        tracing::debug!(edge = %id, unique_id = edge.unique_id(), "removed edge");
        self.verify();
        Ok(edge)
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Whether `to` is reachable from `from` through out-edge lists.
    ///
    /// The search starts at `from`'s immediate successors, so a node reaches
    /// itself only through a cycle. Each node is expanded at most once.
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.node(to)?;
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = Vec::new();
        for handle in self.node(from)?.out_edges() {
            let next = self.edge(handle.id)?.end();
            if visited.insert(next) {
                stack.push(next);
            }
        }

        while let Some(current) = stack.pop() {
            if current == to {
                tracing::trace!(%from, %to, visited = visited.len(), "reachable");
                return Ok(true);
            }
            for handle in self.node(current)?.out_edges() {
                let next = self.edge(handle.id)?.end();
                if visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        tracing::trace!(%from, %to, visited = visited.len(), "not reachable");
        Ok(false)
    }

    /// Nodes in dependency order following out-edge lists. Ties are broken
    /// by arena order, so the result is deterministic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: HashMap<NodeId, usize> =
            self.nodes().map(|(id, _)| (id, 0)).collect();
        for (_, node) in self.nodes() {
            for handle in node.out_edges() {
                let end = self.edge(handle.id)?.end();
                *in_degree.entry(end).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<NodeId> = self
            .nodes()
            .map(|(id, _)| id)
            .filter(|id| in_degree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.node_count());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for handle in self.node(id)?.out_edges() {
                let end = self.edge(handle.id)?.end();
                let degree = in_degree
                    .get_mut(&end)
                    .ok_or(GraphError::NodeNotFound { id: end })?;
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(end);
                }
            }
        }

        if let Some(node) = self.nodes().map(|(id, _)| id).find(|id| in_degree[id] > 0) {
            return Err(GraphError::Cycle { node });
        }
        Ok(order)
    }

    /// Runs blob inference for every node in topological order. Stops at
    /// the first failing node.
    pub fn infer_blob_descs(
        &self,
        store: &mut dyn BlobDescStore,
        parallel_ctx: &ParallelContext,
    ) -> Result<(), GraphError> {
        for id in self.topological_order()? {
            let node = self.node(id)?;
            node.infer_blob_descs(store, parallel_ctx)
                .map_err(|source| GraphError::Inference {
                    node: node.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subgraphs
    // -----------------------------------------------------------------------

    pub fn subgraph(&self, id: SubgraphId) -> Option<&XlaGraph> {
        self.subgraphs.get(id.0 as usize)
    }

    pub fn subgraph_count(&self) -> usize {
        self.subgraphs.len()
    }

    // -----------------------------------------------------------------------
    // Consistency
    // -----------------------------------------------------------------------

    /// Checks that every handle in every edge list names a live edge with a
    /// matching key and endpoint, that arena endpoints agree with the edge
    /// records, and that the name index is current.
    pub fn check_integrity(&self) -> Result<(), GraphError> {
        let inconsistency = |reason: String| GraphError::GraphInconsistency { reason };

        for (id, node) in self.nodes() {
            if self.names.get(node.name()) != Some(&id) {
                return Err(inconsistency(format!(
                    "node {} '{}' missing from name index",
                    id,
                    node.name()
                )));
            }
            let lists = [(node.out_edges(), true), (node.in_edges(), false)];
            for (handles, outgoing) in lists {
                for handle in handles {
                    let edge = self.edge(handle.id).map_err(|_| {
                        inconsistency(format!(
                            "node {} refers to missing edge {}",
                            id, handle.id
                        ))
                    })?;
                    if edge.key() != handle.key {
                        return Err(inconsistency(format!(
                            "node {} holds a stale handle for edge {}",
                            id, handle.id
                        )));
                    }
                    let endpoint = if outgoing { edge.start() } else { edge.end() };
                    if endpoint != id {
                        return Err(inconsistency(format!(
                            "edge {} is listed on node {} but connects {} -> {}",
                            handle.id,
                            id,
                            edge.start(),
                            edge.end()
                        )));
                    }
                }
            }
        }

        for idx in self.arena.edge_indices() {
            let edge = &self.arena[idx];
            let endpoints = self
                .arena
                .edge_endpoints(idx)
                .map(|(source, target)| (NodeId::from(source), NodeId::from(target)));
            if endpoints != Some((edge.start(), edge.end())) {
                return Err(inconsistency(format!(
                    "edge {} endpoints disagree with the arena",
                    EdgeId::from(idx)
                )));
            }
        }

        if self.names.len() != self.node_count() {
            return Err(inconsistency(format!(
                "name index has {} entries for {} nodes",
                self.names.len(),
                self.node_count()
            )));
        }
        Ok(())
    }

    /// Panics on inconsistency when `verify_integrity` is enabled.
    pub(crate) fn verify(&self) {
        if self.options.verify_integrity {
            if let Err(err) = self.check_integrity() {
                panic!("{}", err);
            }
        }
    }
}
