//! Error types emitted by cache operations.

/// Cache-specific error category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A write would push the occupied length past the preallocated capacity.
    Capacity {
        occupied: usize,
        requested: usize,
        capacity: usize,
    },
    /// The supplied tensor shapes do not align with the cache layout.
    InvalidShape { context: String },
    /// The buffer dtype differs from the one the cache was allocated with.
    UnsupportedDType { requested: String },
    /// A backend-specific failure propagated to the caller.
    Backend { message: String },
}

impl CacheError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, CacheError::Capacity { .. })
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Capacity {
                occupied,
                requested,
                capacity,
            } => write!(
                f,
                "kv cache capacity exceeded: {occupied} occupied + {requested} requested > {capacity}"
            ),
            CacheError::InvalidShape { context } => {
                write!(f, "invalid cache tensor shape: {context}")
            }
            CacheError::UnsupportedDType { requested } => {
                write!(f, "unsupported cache dtype {requested}")
            }
            CacheError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for CacheError {}

pub fn to_backend_err(err: candle_core::Error) -> CacheError {
    CacheError::Backend {
        message: err.to_string(),
    }
}
