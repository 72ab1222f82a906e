use attention::CacheError;
use segments::SegmentError;
use thiserror::Error;

use crate::config::ConfigError;

/// Everything that can end a generation call.
///
/// `Capacity` and `Cancelled` are boundaries rather than failures: inside the
/// decode loop they stop the stream and keep the text produced so far. Every
/// other variant is fatal to the call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("segment resource error: {0}")]
    Resource(#[from] SegmentError),

    #[error("sequence capacity exceeded: {occupied} occupied + {requested} requested > {capacity}")]
    Capacity {
        occupied: usize,
        requested: usize,
        capacity: usize,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("generation cancelled")]
    Cancelled,

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] tokenizer::Error),

    #[error("image preprocessing failed: {0}")]
    Image(String),

    #[error("kv cache error: {0}")]
    Cache(CacheError),

    #[error("tensor backend error: {0}")]
    Backend(#[from] candle_core::Error),
}

impl EngineError {
    /// True for conditions that end the decode loop gracefully.
    pub fn is_boundary(&self) -> bool {
        matches!(self, EngineError::Capacity { .. } | EngineError::Cancelled)
    }
}

impl From<CacheError> for EngineError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Capacity {
                occupied,
                requested,
                capacity,
            } => EngineError::Capacity {
                occupied,
                requested,
                capacity,
            },
            other => EngineError::Cache(other),
        }
    }
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::Image(err.to_string())
    }
}
