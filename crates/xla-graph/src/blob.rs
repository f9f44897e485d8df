//! Blob descriptors and the per-edge metadata values.
//!
//! [`BlobDesc`] is the shape/type record produced by operator inference. The
//! storage for descriptors belongs to the caller; the graph only reads and
//! writes through a [`BlobDescStore`]. [`LayoutPolicy`] and [`Shape`] are the
//! two pieces of metadata tracked on each side of an edge.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::argument::{Argument, BlobId};

/// Tensor shape. Also used as the execution-time shape on edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: SmallVec<[i64; 4]>,
}

impl Shape {
    pub fn new(dims: &[i64]) -> Self {
        Shape {
            dims: SmallVec::from_slice(dims),
        }
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn num_axes(&self) -> usize {
        self.dims.len()
    }

    /// Product of all dimensions. A scalar (zero axes) has one element.
    pub fn elem_cnt(&self) -> i64 {
        self.dims.iter().product()
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

/// Element data type of a blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    Invalid,
    Bool,
    Int8,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
}

/// Shape and type information for one blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDesc {
    pub shape: Shape,
    pub data_type: DataType,
    pub is_dynamic: bool,
}

impl BlobDesc {
    pub fn new(shape: Shape, data_type: DataType) -> Self {
        BlobDesc {
            shape,
            data_type,
            is_dynamic: false,
        }
    }
}

/// How a distributed tensor is partitioned or replicated across devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutPolicy {
    /// No policy deduced yet.
    #[default]
    Unspecified,
    /// Each device holds a slice along `axis`.
    Split { axis: i64 },
    /// Each device holds a full copy.
    Broadcast,
    /// Each device holds a partial value; the logical value is their sum.
    PartialSum,
}

/// Placement of the current inference within a parallel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelContext {
    pub parallel_id: i64,
    pub parallel_num: i64,
}

impl Default for ParallelContext {
    fn default() -> Self {
        ParallelContext {
            parallel_id: 0,
            parallel_num: 1,
        }
    }
}

/// Caller-owned descriptor storage keyed by global blob id.
pub trait BlobDescStore {
    fn blob_desc(&self, blob: &BlobId) -> Option<&BlobDesc>;

    /// Returns the descriptor for `blob`, creating a default one if absent.
    fn blob_desc_mut(&mut self, blob: &BlobId) -> &mut BlobDesc;
}

impl BlobDescStore for HashMap<BlobId, BlobDesc> {
    fn blob_desc(&self, blob: &BlobId) -> Option<&BlobDesc> {
        self.get(blob)
    }

    fn blob_desc_mut(&mut self, blob: &BlobId) -> &mut BlobDesc {
        self.entry(blob.clone()).or_default()
    }
}

/// Slot-name view over a [`BlobDescStore`] for one node.
///
/// Operators address blobs by their own slot names ("in", "weight", "out_0");
/// this resolver maps a slot through the node's input/output table to the
/// global blob id and then into the store.
pub struct SlotBlobDescs<'a> {
    inputs: &'a IndexMap<String, Argument>,
    outputs: &'a IndexMap<String, Argument>,
    store: &'a mut dyn BlobDescStore,
}

impl<'a> SlotBlobDescs<'a> {
    pub fn new(
        inputs: &'a IndexMap<String, Argument>,
        outputs: &'a IndexMap<String, Argument>,
        store: &'a mut dyn BlobDescStore,
    ) -> Self {
        SlotBlobDescs {
            inputs,
            outputs,
            store,
        }
    }

    fn resolve(&self, bn: &str) -> Option<&BlobId> {
        self.inputs
            .get(bn)
            .or_else(|| self.outputs.get(bn))
            .map(Argument::blob_id)
    }

    /// Read-only descriptor for slot `bn`. `None` if the slot is unknown or
    /// the store holds no descriptor for it yet.
    pub fn get(&self, bn: &str) -> Option<&BlobDesc> {
        let blob = self.resolve(bn)?;
        self.store.blob_desc(blob)
    }

    /// Mutable descriptor for slot `bn`. `None` if the slot is unknown.
    pub fn get_mut(&mut self, bn: &str) -> Option<&mut BlobDesc> {
        let blob = self.resolve(bn)?.clone();
        Some(self.store.blob_desc_mut(&blob))
    }
}
