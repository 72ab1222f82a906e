//! Layout definitions for key/value caches.

use candle_core::DType;

/// Declarative description of a cache buffer.
///
/// Both the key and the value buffer share this layout, ordered
/// `[num_layers, num_kv_heads, max_seq_len, head_dim]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLayout {
    /// Number of decoder layers with their own cache slice.
    pub num_layers: usize,
    /// Number of key/value heads stored per layer.
    pub num_kv_heads: usize,
    /// Maximum sequence length captured by the cache.
    pub max_seq_len: usize,
    /// Dimensionality of each head.
    pub head_dim: usize,
    /// Element type of both buffers.
    pub dtype: DType,
}

impl CacheLayout {
    pub fn new(
        num_layers: usize,
        num_kv_heads: usize,
        max_seq_len: usize,
        head_dim: usize,
    ) -> Self {
        Self {
            num_layers,
            num_kv_heads,
            max_seq_len,
            head_dim,
            dtype: DType::F16,
        }
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn dims(&self) -> [usize; 4] {
        [
            self.num_layers,
            self.num_kv_heads,
            self.max_seq_len,
            self.head_dim,
        ]
    }

    /// Elements in one buffer.
    pub fn element_count(&self) -> usize {
        self.dims().iter().product()
    }

    /// Bytes held by the key and value buffers together.
    pub fn byte_size(&self) -> usize {
        2 * self.element_count() * self.dtype.size_in_bytes()
    }
}
