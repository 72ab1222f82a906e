//! Text tokenization for the generation engine.
//!
//! This crate adapts a Hugging Face `tokenizer.json` to the narrow surface
//! the decode loop needs: text to ids, ids back to text, and the set of ids
//! that end generation. Stop ids are never hardcoded; they are resolved from
//! `generation_config.json` when present and otherwise from the configured
//! end-of-sequence special tokens looked up in the vocabulary.
//!
//! # Prompt templates
//!
//! [`PromptTemplate`] renders the chat layout the vision-language export was
//! trained on. Image markers are only inserted when an image accompanies the
//! prompt, and [`PromptFormat::Raw`] passes the prompt through untouched.
//!
//! # Thread Safety
//!
//! [`HfTokenizer`] is `Send + Sync`; the engine only requires `Send`.

pub mod config;
pub mod errors;
pub mod stop;
pub mod template;

mod artifacts;
mod validate;

use std::path::Path;

pub use config::{ArtifactsCfg, Config};
pub use errors::{Error, Result};
pub use stop::StopTokens;
pub use template::{PromptFormat, PromptTemplate};

/// Tokenizer operations used by the generation loop.
pub trait TextTokenizer: Send {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Ids that terminate generation.
    fn stop_tokens(&self) -> &StopTokens;
}

/// [`TextTokenizer`] backed by the `tokenizers` crate.
#[derive(Debug, Clone)]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    stop: StopTokens,
    add_special_tokens: bool,
}

impl HfTokenizer {
    /// Loads `tokenizer.json` and resolves stop ids as described by `cfg`.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        validate::validate_config(cfg)?;
        let paths = artifacts::resolve_paths(&cfg.artifacts)?;
        let inner = artifacts::load_tokenizer_from_json(&paths.tokenizer_json)?;
        let declared = match &paths.generation_config {
            Some(path) => artifacts::read_generation_config(path)?.eos_token_ids(),
            None => Vec::new(),
        };
        let stop = StopTokens::resolve(&inner, &declared, &cfg.stop_tokens)?;
        validate::validate_stop_tokens(&inner, &stop)?;
        log::info!(
            "tokenizer loaded from {}: vocab={} stop_ids={:?}",
            paths.tokenizer_json.display(),
            inner.get_vocab_size(true),
            stop
        );
        Ok(Self {
            inner,
            stop,
            add_special_tokens: cfg.add_special_tokens,
        })
    }

    /// Loads a standalone `tokenizer.json`, taking stop ids from the named
    /// special tokens.
    pub fn from_file(path: &Path, stop_tokens: &[String]) -> Result<Self> {
        let inner = artifacts::load_tokenizer_from_json(path)?;
        let stop = StopTokens::resolve(&inner, &[], stop_tokens)?;
        Ok(Self::from_tokenizer(inner, stop))
    }

    pub fn from_tokenizer(inner: tokenizers::Tokenizer, stop: StopTokens) -> Self {
        Self {
            inner,
            stop,
            add_special_tokens: false,
        }
    }

    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.inner.encode(text, self.add_special_tokens)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Ok(self.inner.decode(ids, true)?)
    }

    fn stop_tokens(&self) -> &StopTokens {
        &self.stop
    }
}
