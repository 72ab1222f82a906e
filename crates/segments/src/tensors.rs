use std::collections::HashMap;

use candle_core::Tensor;

use crate::errors::SegmentError;
use crate::kind::SegmentKind;

/// Named tensors passed into or returned from a segment.
#[derive(Debug, Clone, Default)]
pub struct TensorMap {
    tensors: HashMap<String, Tensor>,
}

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Looks up an input a segment implementation depends on.
    pub fn input(&self, name: &str) -> Result<&Tensor, SegmentError> {
        self.tensors
            .get(name)
            .ok_or_else(|| SegmentError::MissingInput {
                name: name.to_string(),
            })
    }

    /// Removes an output the caller depends on.
    pub fn take(&mut self, kind: SegmentKind, name: &str) -> Result<Tensor, SegmentError> {
        self.tensors
            .remove(name)
            .ok_or_else(|| SegmentError::MissingOutput {
                kind,
                name: name.to_string(),
            })
    }

    pub fn into_inner(self) -> HashMap<String, Tensor> {
        self.tensors
    }
}

impl From<HashMap<String, Tensor>> for TensorMap {
    fn from(tensors: HashMap<String, Tensor>) -> Self {
        Self { tensors }
    }
}
