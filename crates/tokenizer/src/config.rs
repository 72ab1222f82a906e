use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub artifacts: ArtifactsCfg,
    /// Special tokens whose ids end generation when the artifacts do not
    /// declare `eos_token_id`.
    #[serde(default = "default_stop_tokens")]
    pub stop_tokens: Vec<String>,
    #[serde(default)]
    pub add_special_tokens: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsCfg {
    pub dir: PathBuf,
    #[serde(default = "default_tokenizer_json")]
    pub tokenizer_json: PathBuf,
    /// Optional; a missing file falls back to `stop_tokens`.
    #[serde(default = "default_generation_config")]
    pub generation_config: Option<PathBuf>,
}

impl Config {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts: ArtifactsCfg {
                dir: dir.into(),
                tokenizer_json: default_tokenizer_json(),
                generation_config: default_generation_config(),
            },
            stop_tokens: default_stop_tokens(),
            add_special_tokens: false,
        }
    }
}

pub fn default_stop_tokens() -> Vec<String> {
    vec!["<|endoftext|>".to_string(), "<|im_end|>".to_string()]
}

fn default_tokenizer_json() -> PathBuf {
    PathBuf::from("tokenizer.json")
}

fn default_generation_config() -> Option<PathBuf> {
    Some(PathBuf::from("generation_config.json"))
}
