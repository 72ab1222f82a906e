use std::path::PathBuf;

use thiserror::Error;

use crate::kind::SegmentKind;

/// Failures raised while fetching, parsing, or running a segment.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("failed to fetch {file} for {model_id}: {message}")]
    Fetch {
        model_id: String,
        file: String,
        message: String,
    },
    #[error("truncated download of {file}: expected {expected} bytes, got {actual}")]
    Truncated {
        file: String,
        expected: u64,
        actual: u64,
    },
    #[error("failed to parse {kind} segment: {message}")]
    Parse { kind: SegmentKind, message: String },
    #[error("{kind} segment failed: {message}")]
    Run { kind: SegmentKind, message: String },
    #[error("segment input `{name}` was not supplied")]
    MissingInput { name: String },
    #[error("{kind} segment produced no `{name}` output")]
    MissingOutput { kind: SegmentKind, name: String },
    #[error("{kind} segment cannot be used this way: {reason}")]
    InvalidKind {
        kind: SegmentKind,
        reason: &'static str,
    },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl SegmentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SegmentError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for misuse of the registry rather than a resource failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SegmentError::InvalidKind { .. })
    }
}
