//! Argument identity: which blob flows along an edge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Global blob identifier: the producing operator plus its output slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId {
    pub op_name: String,
    pub blob_name: String,
}

impl BlobId {
    pub fn new(op_name: impl Into<String>, blob_name: impl Into<String>) -> Self {
        BlobId {
            op_name: op_name.into(),
            blob_name: blob_name.into(),
        }
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.op_name, self.blob_name)
    }
}

/// The data item carried by an edge. Two arguments are equal iff they name
/// the same blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Argument {
    blob_id: BlobId,
}

impl Argument {
    pub fn new(blob_id: BlobId) -> Self {
        Argument { blob_id }
    }

    pub fn blob_id(&self) -> &BlobId {
        &self.blob_id
    }
}

impl From<BlobId> for Argument {
    fn from(blob_id: BlobId) -> Self {
        Argument::new(blob_id)
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.blob_id.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_on_blob_id() {
        let a = Argument::new(BlobId::new("matmul", "out"));
        let b = Argument::from(BlobId::new("matmul", "out"));
        let c = Argument::new(BlobId::new("matmul", "out_1"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_joins_op_and_blob() {
        let arg = Argument::new(BlobId::new("relu_3", "y_0"));
        assert_eq!(arg.to_string(), "relu_3/y_0");
    }
}
