use crate::config::Config;
use crate::errors::{Error, Result};
use crate::stop::StopTokens;
use std::collections::HashSet;
use tokenizers::Tokenizer;

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.artifacts.tokenizer_json.as_os_str().is_empty() {
        return Err(Error::InvalidConfig("artifacts.tokenizer_json must not be empty"));
    }

    let mut seen = HashSet::new();
    for token in &cfg.stop_tokens {
        if token.is_empty() {
            return Err(Error::Validation("stop token names must not be empty".into()));
        }
        if !seen.insert(token) {
            return Err(Error::Validation(format!(
                "stop token '{token}' appears multiple times"
            )));
        }
    }

    Ok(())
}

pub fn validate_stop_tokens(tok: &Tokenizer, stop: &StopTokens) -> Result<()> {
    let vocab_size = tok.get_vocab_size(true);
    for id in stop.iter() {
        if id as usize >= vocab_size {
            return Err(Error::Validation(format!(
                "stop token id {id} is outside the tokenizer vocab of {vocab_size}"
            )));
        }
    }
    Ok(())
}
