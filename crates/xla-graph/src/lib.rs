pub mod argument;
pub mod blob;
pub mod cluster;
pub mod edge;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod operator;
pub mod options;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use argument::{Argument, BlobId};
pub use blob::{BlobDesc, BlobDescStore, DataType, LayoutPolicy, ParallelContext, Shape, SlotBlobDescs};
pub use edge::{EdgeHandle, EdgeKey, XlaEdge, CONSUMER, PRODUCER};
pub use error::GraphError;
pub use graph::XlaGraph;
pub use id::{ClusterId, EdgeId, NodeId, SubgraphId};
pub use node::{is_node_input, is_node_output, ArgumentConf, NodeKind, XlaNode};
pub use operator::{Backend, DeviceType, InferError, Operator};
pub use options::GraphOptions;
pub use registry::CompilerRegistry;
