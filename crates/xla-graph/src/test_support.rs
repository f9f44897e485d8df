//! Fake operator used by the unit tests.

use crate::argument::BlobId;
use crate::blob::{BlobDesc, DataType, LayoutPolicy, ParallelContext, Shape, SlotBlobDescs};
use crate::operator::{DeviceType, InferError, Operator};

#[derive(Debug, Clone)]
pub struct FakeOp {
    pub name: String,
    pub op_type: String,
    pub device: DeviceType,
    pub inputs: Vec<(String, BlobId)>,
    pub outputs: Vec<(String, BlobId)>,
    pub policy: LayoutPolicy,
    pub time_shape: Shape,
    pub fail: bool,
}

impl FakeOp {
    pub fn new(name: &str, op_type: &str) -> Self {
        FakeOp {
            name: name.to_string(),
            op_type: op_type.to_string(),
            device: DeviceType::Gpu,
            inputs: Vec::new(),
            outputs: Vec::new(),
            policy: LayoutPolicy::Unspecified,
            time_shape: Shape::default(),
            fail: false,
        }
    }

    /// Binds input slot `bn` to the `out` blob of operator `producer`.
    pub fn input(mut self, bn: &str, producer: &str) -> Self {
        self.inputs
            .push((bn.to_string(), BlobId::new(producer, "out")));
        self
    }

    pub fn output(mut self, bn: &str) -> Self {
        let blob = BlobId::new(self.name.clone(), bn);
        self.outputs.push((bn.to_string(), blob));
        self
    }

    pub fn on(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Operator for FakeOp {
    fn device_type(&self) -> DeviceType {
        self.device
    }

    fn op_name(&self) -> &str {
        &self.name
    }

    fn op_type(&self) -> &str {
        &self.op_type
    }

    fn input_bns(&self) -> Vec<String> {
        self.inputs.iter().map(|(bn, _)| bn.clone()).collect()
    }

    fn output_bns(&self) -> Vec<String> {
        self.outputs.iter().map(|(bn, _)| bn.clone()).collect()
    }

    fn bn_to_blob_id(&self, bn: &str) -> Option<BlobId> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|(name, _)| name == bn)
            .map(|(_, blob)| blob.clone())
    }

    /// Outputs copy the first input's descriptor; sources emit a fixed
    /// `[1]` float blob.
    fn infer_blob_descs(
        &self,
        blob_descs: &mut SlotBlobDescs<'_>,
        _parallel_ctx: &ParallelContext,
    ) -> Result<(), InferError> {
        if self.fail {
            return Err(format!("cannot infer '{}'", self.name).into());
        }
        let desc = match self.inputs.first() {
            Some((bn, _)) => blob_descs.get(bn).cloned().unwrap_or_default(),
            None => BlobDesc::new(Shape::new(&[1]), DataType::Float32),
        };
        for (bn, _) in &self.outputs {
            if let Some(out) = blob_descs.get_mut(bn) {
                *out = desc.clone();
            }
        }
        Ok(())
    }

    fn layout_policy(&self, _bn: &str) -> LayoutPolicy {
        self.policy
    }

    fn time_shape(&self) -> Shape {
        self.time_shape.clone()
    }
}
