use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read tokenizer artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed generation config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] tokenizers::Error),

    #[error("invalid tokenizer configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{what} not found at {}", path.display())]
    MissingArtifact { what: &'static str, path: PathBuf },

    #[error("no stop tokens could be resolved from the tokenizer artifacts")]
    NoStopTokens,
}
