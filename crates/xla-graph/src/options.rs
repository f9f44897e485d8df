//! Graph construction options.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::operator::Backend;

/// Options for an [`XlaGraph`](crate::graph::XlaGraph).
///
/// Every field has a default, so a partial JSON object is accepted by
/// [`GraphOptions::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Backend used for nodes placed on a device without a backend.
    pub fallback_backend: Backend,
    /// Run [`XlaGraph::check_integrity`](crate::graph::XlaGraph::check_integrity)
    /// after every structural mutation and panic on inconsistency.
    pub verify_integrity: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        GraphOptions {
            fallback_backend: Backend::Cpu,
            verify_integrity: cfg!(debug_assertions),
        }
    }
}

impl GraphOptions {
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        serde_json::from_str(json).map_err(|e| GraphError::InvalidOptions {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let options = GraphOptions::from_json(r#"{"fallback_backend": "CUDA"}"#).unwrap();
        assert_eq!(options.fallback_backend, Backend::Cuda);
        assert_eq!(options.verify_integrity, cfg!(debug_assertions));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(GraphOptions::from_json("{").is_err());
    }
}
