//! Graph nodes.
//!
//! An [`XlaNode`] is either a wrapped operator or a synthetic boundary
//! ("argument") node marking where a cluster's data crosses in or out of the
//! compiled region. Both variants share the same slot tables, edge lists and
//! cluster assignment; [`NodeKind`] carries what differs.
//!
//! Edge lists hold [`EdgeHandle`]s, not edges. Adding never de-duplicates;
//! erasing removes every handle whose [`EdgeKey`] matches.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::argument::{Argument, BlobId};
use crate::blob::{BlobDescStore, ParallelContext, SlotBlobDescs};
use crate::edge::{EdgeHandle, EdgeKey};
use crate::id::{ClusterId, SubgraphId};
use crate::operator::{Backend, DeviceType, InferError, Operator};
use crate::registry::CompilerRegistry;

/// Op type tag reserved for boundary nodes.
pub const ARGUMENT_OP_TYPE: &str = "XlaArgument";
/// Name prefix of boundary nodes feeding data into a cluster.
pub const IN_ARGUMENT_PREFIX: &str = "_input_argument_";
/// Name prefix of boundary nodes carrying data out of a cluster.
pub const OUT_ARGUMENT_PREFIX: &str = "_output_argument_";

const ARGUMENT_IN: &str = "in";
const ARGUMENT_OUT: &str = "out";

/// Boundary descriptor an argument node is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentConf {
    pub name: String,
    /// Blob on the outer side of the boundary.
    pub input: BlobId,
    /// Blob on the inner side of the boundary.
    pub output: BlobId,
}

/// What a node wraps.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Operator(Arc<dyn Operator>),
    Argument(ArgumentConf),
}

/// A vertex of the graph.
#[derive(Debug, Clone)]
pub struct XlaNode {
    name: String,
    op_type: String,
    backend: Backend,
    kind: NodeKind,
    inputs: IndexMap<String, Argument>,
    outputs: IndexMap<String, Argument>,
    in_edges: Vec<EdgeHandle>,
    out_edges: Vec<EdgeHandle>,
    cluster_id: Option<ClusterId>,
    subgraph: Option<SubgraphId>,
}

impl XlaNode {
    /// Wraps `op`, recording the blob bound to each of its slots.
    ///
    /// Panics if the operator declares a slot it cannot resolve to a blob.
    pub fn from_operator(op: Arc<dyn Operator>, fallback: Backend) -> Self {
        let backend = Backend::for_device(op.device_type(), fallback);
        let resolve = |bn: String| {
            let blob = op.bn_to_blob_id(&bn).unwrap_or_else(|| {
                panic!(
                    "operator '{}' has no blob bound to slot '{}'",
                    op.op_name(),
                    bn
                )
            });
            (bn, Argument::new(blob))
        };
        let inputs = op.input_bns().into_iter().map(resolve).collect();
        let outputs = op.output_bns().into_iter().map(resolve).collect();

        XlaNode {
            name: op.op_name().to_string(),
            op_type: op.op_type().to_string(),
            backend,
            inputs,
            outputs,
            kind: NodeKind::Operator(op),
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            cluster_id: None,
            subgraph: None,
        }
    }

    /// Builds a boundary node with the single slot pair `in` / `out`.
    pub fn argument(conf: ArgumentConf, device: DeviceType, fallback: Backend) -> Self {
        Self::argument_on(conf, Backend::for_device(device, fallback))
    }

    pub(crate) fn argument_on(conf: ArgumentConf, backend: Backend) -> Self {
        let mut inputs = IndexMap::new();
        inputs.insert(ARGUMENT_IN.to_string(), Argument::new(conf.input.clone()));
        let mut outputs = IndexMap::new();
        outputs.insert(ARGUMENT_OUT.to_string(), Argument::new(conf.output.clone()));

        XlaNode {
            name: conf.name.clone(),
            op_type: ARGUMENT_OP_TYPE.to_string(),
            backend,
            kind: NodeKind::Argument(conf),
            inputs,
            outputs,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            cluster_id: None,
            subgraph: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn operator(&self) -> Option<&Arc<dyn Operator>> {
        match &self.kind {
            NodeKind::Operator(op) => Some(op),
            NodeKind::Argument(_) => None,
        }
    }

    pub fn argument_conf(&self) -> Option<&ArgumentConf> {
        match &self.kind {
            NodeKind::Argument(conf) => Some(conf),
            NodeKind::Operator(_) => None,
        }
    }

    pub fn inputs(&self) -> &IndexMap<String, Argument> {
        &self.inputs
    }

    pub fn outputs(&self) -> &IndexMap<String, Argument> {
        &self.outputs
    }

    /// Input slot names in declaration order.
    pub fn input_bns(&self) -> Vec<&str> {
        self.inputs.keys().map(String::as_str).collect()
    }

    /// Output slot names in declaration order.
    pub fn output_bns(&self) -> Vec<&str> {
        self.outputs.keys().map(String::as_str).collect()
    }

    pub fn in_edges(&self) -> &[EdgeHandle] {
        &self.in_edges
    }

    pub fn out_edges(&self) -> &[EdgeHandle] {
        &self.out_edges
    }

    pub fn cluster_id(&self) -> Option<ClusterId> {
        self.cluster_id
    }

    pub fn subgraph(&self) -> Option<SubgraphId> {
        self.subgraph
    }

    /// Whether the registry has a compiler for this node's op type on its
    /// backend.
    pub fn is_compiled(&self, registry: &CompilerRegistry) -> bool {
        registry.is_registered(self.backend, &self.op_type)
    }

    pub fn add_in_edge(&mut self, edge: EdgeHandle) {
        self.in_edges.push(edge);
    }

    pub fn add_out_edge(&mut self, edge: EdgeHandle) {
        self.out_edges.push(edge);
    }

    /// Removes every in-edge matching `key`. No-op if none match.
    pub fn erase_in_edge(&mut self, key: &EdgeKey) {
        self.in_edges.retain(|e| !e.matches(key));
    }

    /// Removes every out-edge matching `key`. No-op if none match.
    pub fn erase_out_edge(&mut self, key: &EdgeKey) {
        self.out_edges.retain(|e| !e.matches(key));
    }

    /// Infers descriptors for this node's outputs.
    ///
    /// Operator nodes delegate to the wrapped operator and return its error
    /// as is. Argument nodes copy the `in` descriptor onto `out` and fail if
    /// `in` has none yet.
    pub fn infer_blob_descs(
        &self,
        store: &mut dyn BlobDescStore,
        parallel_ctx: &ParallelContext,
    ) -> Result<(), InferError> {
        match &self.kind {
            NodeKind::Operator(op) => {
                let mut slots = SlotBlobDescs::new(&self.inputs, &self.outputs, store);
                op.infer_blob_descs(&mut slots, parallel_ctx)
            }
            NodeKind::Argument(_) => {
                let input = self.inputs[ARGUMENT_IN].blob_id();
                let desc = store.blob_desc(input).cloned().ok_or_else(|| {
                    format!(
                        "argument '{}': no descriptor for input blob {}",
                        self.name, input
                    )
                })?;
                *store.blob_desc_mut(self.outputs[ARGUMENT_OUT].blob_id()) = desc;
                Ok(())
            }
        }
    }

    pub fn is_source_node(&self) -> bool {
        self.in_edges.is_empty()
    }

    pub fn is_finish_node(&self) -> bool {
        self.out_edges.is_empty()
    }

    pub fn is_argument_node(&self) -> bool {
        self.op_type == ARGUMENT_OP_TYPE
    }

    pub fn is_in_argument_node(&self) -> bool {
        self.is_argument_node() && self.name.starts_with(IN_ARGUMENT_PREFIX)
    }

    pub fn is_out_argument_node(&self) -> bool {
        self.is_argument_node() && self.name.starts_with(OUT_ARGUMENT_PREFIX)
    }

    /// Panics if the node already belongs to a different cluster.
    pub(crate) fn set_cluster_id(&mut self, cluster: ClusterId) {
        assert!(
            self.cluster_id.is_none_or(|c| c == cluster),
            "node '{}' is already assigned to cluster {:?}",
            self.name,
            self.cluster_id
        );
        self.cluster_id = Some(cluster);
    }

    /// Panics if the node was already moved into a subgraph.
    pub(crate) fn set_subgraph(&mut self, subgraph: SubgraphId) {
        assert!(
            self.subgraph.is_none(),
            "node '{}' already belongs to subgraph {:?}",
            self.name,
            self.subgraph
        );
        self.subgraph = Some(subgraph);
    }

    /// Points every input slot bound to `from` at `to`. Slot tables drive
    /// inference, so the node reads `to` from then on.
    pub(crate) fn rebind_input(&mut self, from: &Argument, to: &Argument) {
        for arg in self.inputs.values_mut() {
            if arg == from {
                *arg = to.clone();
            }
        }
    }

    /// Copy of this node with empty edge lists and no cluster assignment.
    pub(crate) fn detached(&self) -> Self {
        XlaNode {
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            cluster_id: None,
            subgraph: None,
            ..self.clone()
        }
    }
}

/// Whether any in-edge of `node` carries `blob`.
pub fn is_node_input(node: &XlaNode, blob: &BlobId) -> bool {
    node.in_edges()
        .iter()
        .any(|edge| edge.argument().blob_id() == blob)
}

/// Whether any out-edge of `node` carries `blob`.
pub fn is_node_output(node: &XlaNode, blob: &BlobId) -> bool {
    node.out_edges()
        .iter()
        .any(|edge| edge.argument().blob_id() == blob)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::blob::{BlobDesc, DataType, Shape};
    use crate::id::EdgeId;
    use crate::test_support::FakeOp;
    use proptest::prelude::*;

    fn node(op: FakeOp) -> XlaNode {
        XlaNode::from_operator(Arc::new(op), Backend::Cpu)
    }

    fn handle(id: u32, unique_id: u64, blob: BlobId) -> EdgeHandle {
        EdgeHandle {
            id: EdgeId(id),
            key: EdgeKey {
                unique_id,
                argument: Argument::new(blob),
            },
        }
    }

    fn argument_node(name: &str) -> XlaNode {
        XlaNode::argument(
            ArgumentConf {
                name: name.to_string(),
                input: BlobId::new("outer", "out"),
                output: BlobId::new(name, "out"),
            },
            DeviceType::Gpu,
            Backend::Cpu,
        )
    }

    #[test]
    fn from_operator_copies_identity_and_slots() {
        let n = node(
            FakeOp::new("mm", "matmul")
                .input("a", "x")
                .input("b", "w")
                .output("out"),
        );
        assert_eq!(n.name(), "mm");
        assert_eq!(n.op_type(), "matmul");
        assert_eq!(n.backend(), Backend::Cuda);
        assert_eq!(n.input_bns(), vec!["a", "b"]);
        assert_eq!(n.output_bns(), vec!["out"]);
        assert_eq!(n.inputs()["b"].blob_id(), &BlobId::new("w", "out"));
        assert_eq!(n.outputs()["out"].blob_id(), &BlobId::new("mm", "out"));
        assert!(n.operator().is_some());
        assert!(n.argument_conf().is_none());
        assert_eq!(n.cluster_id(), None);
        assert_eq!(n.subgraph(), None);
    }

    #[test]
    fn invalid_device_takes_fallback_backend() {
        let op = FakeOp::new("n", "relu").on(DeviceType::Invalid);
        let n = XlaNode::from_operator(Arc::new(op), Backend::Cuda);
        assert_eq!(n.backend(), Backend::Cuda);
    }

    #[test]
    #[should_panic(expected = "no blob bound to slot 'ghost'")]
    fn unresolvable_slot_panics() {
        let mut op = FakeOp::new("bad", "relu");
        op.inputs.push(("x".into(), BlobId::new("src", "out")));
        // Declared as an output slot but never bound to a blob.
        #[derive(Debug)]
        struct Ghost(FakeOp);
        impl Operator for Ghost {
            fn device_type(&self) -> DeviceType {
                self.0.device_type()
            }
            fn op_name(&self) -> &str {
                self.0.op_name()
            }
            fn op_type(&self) -> &str {
                self.0.op_type()
            }
            fn input_bns(&self) -> Vec<String> {
                self.0.input_bns()
            }
            fn output_bns(&self) -> Vec<String> {
                vec!["ghost".into()]
            }
            fn bn_to_blob_id(&self, bn: &str) -> Option<BlobId> {
                self.0.bn_to_blob_id(bn)
            }
            fn infer_blob_descs(
                &self,
                blob_descs: &mut SlotBlobDescs<'_>,
                ctx: &ParallelContext,
            ) -> Result<(), InferError> {
                self.0.infer_blob_descs(blob_descs, ctx)
            }
        }
        XlaNode::from_operator(Arc::new(Ghost(op)), Backend::Cpu);
    }

    #[test]
    fn is_compiled_consults_registry() {
        let n = node(FakeOp::new("r", "relu"));
        let mut registry = CompilerRegistry::new();
        assert!(!n.is_compiled(&registry));
        registry.register(Backend::Cpu, "relu");
        assert!(!n.is_compiled(&registry));
        registry.register(Backend::Cuda, "relu");
        assert!(n.is_compiled(&registry));
    }

    #[test]
    fn source_and_finish_follow_edge_lists() {
        let mut n = node(FakeOp::new("n", "relu"));
        assert!(n.is_source_node());
        assert!(n.is_finish_node());

        n.add_in_edge(handle(0, 0, BlobId::new("a", "out")));
        assert!(!n.is_source_node());
        assert!(n.is_finish_node());

        n.add_out_edge(handle(1, 1, BlobId::new("n", "out")));
        assert!(!n.is_finish_node());
    }

    #[test]
    fn erase_removes_all_matching_handles() {
        let mut n = node(FakeOp::new("n", "add"));
        let blob = BlobId::new("a", "out");
        n.add_in_edge(handle(0, 3, blob.clone()));
        n.add_in_edge(handle(0, 3, blob.clone()));
        n.add_in_edge(handle(1, 4, blob.clone()));
        assert_eq!(n.in_edges().len(), 3);

        let key = n.in_edges()[0].key.clone();
        n.erase_in_edge(&key);
        assert_eq!(n.in_edges().len(), 1);
        assert_eq!(n.in_edges()[0].key.unique_id, 4);

        n.erase_in_edge(&key);
        assert_eq!(n.in_edges().len(), 1);
    }

    #[test]
    fn erase_out_edge_needs_matching_argument() {
        let mut n = node(FakeOp::new("n", "add"));
        n.add_out_edge(handle(0, 1, BlobId::new("n", "out")));
        n.erase_out_edge(&EdgeKey {
            unique_id: 1,
            argument: Argument::new(BlobId::new("n", "other")),
        });
        assert_eq!(n.out_edges().len(), 1);
    }

    #[test]
    fn argument_node_direction_from_name() {
        let inbound = argument_node("_input_argument_0");
        assert!(inbound.is_argument_node());
        assert!(inbound.is_in_argument_node());
        assert!(!inbound.is_out_argument_node());
        assert_eq!(inbound.input_bns(), vec!["in"]);
        assert_eq!(inbound.output_bns(), vec!["out"]);

        let outbound = argument_node("_output_argument_2");
        assert!(outbound.is_out_argument_node());
        assert!(!outbound.is_in_argument_node());

        let unnamed = argument_node("boundary");
        assert!(unnamed.is_argument_node());
        assert!(!unnamed.is_in_argument_node());
        assert!(!unnamed.is_out_argument_node());
    }

    #[test]
    fn operator_named_like_argument_is_not_argument() {
        let n = node(FakeOp::new("_input_argument_0", "relu"));
        assert!(!n.is_argument_node());
        assert!(!n.is_in_argument_node());
    }

    #[test]
    fn operator_inference_errors_pass_through() {
        let n = node(FakeOp::new("bad", "relu").input("x", "src").output("y").failing());
        let mut store: HashMap<BlobId, BlobDesc> = HashMap::new();
        let err = n
            .infer_blob_descs(&mut store, &ParallelContext::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot infer 'bad'");
    }

    #[test]
    fn operator_inference_writes_outputs() {
        let n = node(FakeOp::new("relu", "relu").input("x", "src").output("y"));
        let mut store: HashMap<BlobId, BlobDesc> = HashMap::new();
        store.insert(
            BlobId::new("src", "out"),
            BlobDesc::new(Shape::new(&[3, 3]), DataType::Float16),
        );
        n.infer_blob_descs(&mut store, &ParallelContext::default())
            .unwrap();
        assert_eq!(
            store[&BlobId::new("relu", "y")],
            BlobDesc::new(Shape::new(&[3, 3]), DataType::Float16)
        );
    }

    #[test]
    fn cluster_assignment_is_one_time() {
        let mut n = node(FakeOp::new("n", "relu"));
        n.set_cluster_id(ClusterId(1));
        n.set_cluster_id(ClusterId(1));
        assert_eq!(n.cluster_id(), Some(ClusterId(1)));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut n = n;
            n.set_cluster_id(ClusterId(2));
        }));
        assert!(result.is_err());
    }

    #[test]
    fn node_queries_with_zero_one_and_many_edges() {
        let target = BlobId::new("a", "out");
        let other = BlobId::new("b", "out");
        let mut n = node(FakeOp::new("n", "add"));
        assert!(!is_node_input(&n, &target));
        assert!(!is_node_output(&n, &target));

        n.add_in_edge(handle(0, 0, other.clone()));
        assert!(!is_node_input(&n, &target));

        n.add_in_edge(handle(1, 1, target.clone()));
        n.add_in_edge(handle(2, 2, target.clone()));
        assert!(is_node_input(&n, &target));
        assert!(is_node_input(&n, &other));
        assert!(!is_node_output(&n, &target));

        n.add_out_edge(handle(3, 3, target.clone()));
        assert!(is_node_output(&n, &target));
        assert!(!is_node_output(&n, &other));
    }

    #[test]
    fn argument_node_without_input_descriptor_fails() {
        let n = argument_node("_input_argument_0");
        let mut store: HashMap<BlobId, BlobDesc> = HashMap::new();
        let err = n
            .infer_blob_descs(&mut store, &ParallelContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("outer/out"));
        assert!(store.is_empty());
    }

    #[test]
    fn rebind_input_redirects_matching_slots() {
        let mut n = node(
            FakeOp::new("add", "add")
                .input("lhs", "x")
                .input("rhs", "x")
                .input("bias", "b")
                .output("out"),
        );
        let outer = Argument::new(BlobId::new("x", "out"));
        let inner = Argument::new(BlobId::new("_input_argument_0", "out"));
        n.rebind_input(&outer, &inner);
        assert_eq!(n.inputs()["lhs"], inner);
        assert_eq!(n.inputs()["rhs"], inner);
        assert_eq!(n.inputs()["bias"].blob_id(), &BlobId::new("b", "out"));
        assert_eq!(n.input_bns(), vec!["lhs", "rhs", "bias"]);

        let mut store: HashMap<BlobId, BlobDesc> = HashMap::new();
        store.insert(
            inner.blob_id().clone(),
            BlobDesc::new(Shape::new(&[5]), DataType::Int32),
        );
        n.infer_blob_descs(&mut store, &ParallelContext::default())
            .unwrap();
        assert_eq!(
            store[&BlobId::new("add", "out")],
            BlobDesc::new(Shape::new(&[5]), DataType::Int32)
        );
    }

    fn blob_desc() -> impl Strategy<Value = BlobDesc> {
        (
            prop::collection::vec(0i64..128, 0..6),
            prop_oneof![
                Just(DataType::Int32),
                Just(DataType::Float32),
                Just(DataType::Bool)
            ],
            any::<bool>(),
        )
            .prop_map(|(dims, data_type, is_dynamic)| BlobDesc {
                shape: Shape::from(dims),
                data_type,
                is_dynamic,
            })
    }

    proptest! {
        #[test]
        fn argument_node_passes_descriptor_through(desc in blob_desc()) {
            let n = argument_node("_input_argument_0");
            let mut store: HashMap<BlobId, BlobDesc> = HashMap::new();
            store.insert(BlobId::new("outer", "out"), desc.clone());
            n.infer_blob_descs(&mut store, &ParallelContext::default()).unwrap();
            prop_assert_eq!(&store[&BlobId::new("_input_argument_0", "out")], &desc);
        }

        #[test]
        fn erase_is_idempotent(ids in prop::collection::vec(0u64..4, 0..12), victim in 0u64..4) {
            let blob = BlobId::new("a", "out");
            let mut n = node(FakeOp::new("n", "add"));
            for (i, unique_id) in ids.iter().enumerate() {
                n.add_out_edge(handle(i as u32, *unique_id, blob.clone()));
            }
            let key = EdgeKey { unique_id: victim, argument: Argument::new(blob.clone()) };
            n.erase_out_edge(&key);
            let once = n.out_edges().to_vec();
            n.erase_out_edge(&key);
            prop_assert_eq!(n.out_edges(), once.as_slice());
            prop_assert!(n.out_edges().iter().all(|e| e.key.unique_id != victim));
            let kept = ids.iter().filter(|&&id| id != victim).count();
            prop_assert_eq!(n.out_edges().len(), kept);
        }
    }
}
