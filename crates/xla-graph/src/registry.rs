//! Compilability registry keyed by `(backend, op type)`.
//!
//! [`CompilerRegistry`] is built once by the driver (in code or from a JSON
//! description) and handed to [`XlaNode::is_compiled`] by reference. There is
//! no process-wide instance.
//!
//! [`XlaNode::is_compiled`]: crate::node::XlaNode::is_compiled

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::operator::Backend;

/// Set of op types each backend can compile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompilerRegistry {
    compilers: HashMap<Backend, BTreeSet<String>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a registry of the form `{"CUDA": ["matmul", "relu"], "CPU": []}`.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        serde_json::from_str(json).map_err(|e| GraphError::InvalidRegistry {
            reason: e.to_string(),
        })
    }

    /// Registers `op_type` as compilable on `backend`. Returns `false` if it
    /// was already registered.
    pub fn register(&mut self, backend: Backend, op_type: impl Into<String>) -> bool {
        self.compilers
            .entry(backend)
            .or_default()
            .insert(op_type.into())
    }

    pub fn is_registered(&self, backend: Backend, op_type: &str) -> bool {
        self.compilers
            .get(&backend)
            .is_some_and(|ops| ops.contains(op_type))
    }

    /// Op types registered for `backend`, in sorted order.
    pub fn op_types(&self, backend: Backend) -> impl Iterator<Item = &str> {
        self.compilers
            .get(&backend)
            .into_iter()
            .flat_map(|ops| ops.iter().map(String::as_str))
    }
}
