//! Adapter trait for the operators wrapped by graph nodes.
//!
//! The graph never implements operator semantics. It reads slot names and
//! blob identities from an [`Operator`] at construction time and forwards
//! shape/type inference to it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::argument::BlobId;
use crate::blob::{LayoutPolicy, ParallelContext, Shape, SlotBlobDescs};

/// Failure raised by an operator's own blob inference.
pub type InferError = Box<dyn std::error::Error + Send + Sync>;

/// Device an operator was placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
    Gpu,
    Invalid,
}

/// Compilation backend a node is keyed under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    #[default]
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "CUDA")]
    Cuda,
}

impl Backend {
    /// Maps a device to its backend. Devices without a backend fall back to
    /// `fallback` with a warning.
    pub fn for_device(device: DeviceType, fallback: Backend) -> Backend {
        match device {
            DeviceType::Gpu => Backend::Cuda,
            DeviceType::Cpu => Backend::Cpu,
            DeviceType::Invalid => {
                tracing::warn!(
                    ?device,
                    %fallback,
                    "no backend for device type, using fallback backend"
                );
                fallback
            }
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpu => write!(f, "CPU"),
            Backend::Cuda => write!(f, "CUDA"),
        }
    }
}

/// An operator of the surrounding computation graph.
pub trait Operator: fmt::Debug {
    fn device_type(&self) -> DeviceType;

    /// Unique operator name within the computation graph.
    fn op_name(&self) -> &str;

    /// Operator kind tag, e.g. `"matmul"`. Used for compilability lookup.
    fn op_type(&self) -> &str;

    /// Input slot names in declaration order.
    fn input_bns(&self) -> Vec<String>;

    /// Output slot names in declaration order.
    fn output_bns(&self) -> Vec<String>;

    /// Global blob bound to slot `bn`, if the slot exists.
    fn bn_to_blob_id(&self, bn: &str) -> Option<BlobId>;

    fn infer_blob_descs(
        &self,
        blob_descs: &mut SlotBlobDescs<'_>,
        parallel_ctx: &ParallelContext,
    ) -> Result<(), InferError>;

    /// Layout policy deduced for slot `bn`.
    fn layout_policy(&self, _bn: &str) -> LayoutPolicy {
        LayoutPolicy::Unspecified
    }

    /// Execution-time shape of this operator.
    fn time_shape(&self) -> Shape {
        Shape::default()
    }
}
