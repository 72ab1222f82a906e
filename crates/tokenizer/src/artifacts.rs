use crate::config::ArtifactsCfg;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

const TOKENIZER_JSON: &str = "tokenizer json";
const GENERATION_CONFIG: &str = "generation config";

pub struct ArtifactPaths {
    pub tokenizer_json: PathBuf,
    pub generation_config: Option<PathBuf>,
}

/// The subset of `generation_config.json` the engine reads.
#[derive(Debug, Default, Deserialize)]
pub struct GenerationConfigFile {
    #[serde(default)]
    pub eos_token_id: Option<EosTokenId>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EosTokenId {
    Single(u32),
    Many(Vec<u32>),
}

impl GenerationConfigFile {
    pub fn eos_token_ids(&self) -> Vec<u32> {
        match &self.eos_token_id {
            Some(EosTokenId::Single(id)) => vec![*id],
            Some(EosTokenId::Many(ids)) => ids.clone(),
            None => Vec::new(),
        }
    }
}

pub fn load_tokenizer_from_json(path: &Path) -> Result<Tokenizer> {
    ensure_file(path, TOKENIZER_JSON)?;
    Tokenizer::from_file(path).map_err(Error::from)
}

pub fn read_generation_config(path: &Path) -> Result<GenerationConfigFile> {
    ensure_file(path, GENERATION_CONFIG)?;
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn resolve_paths(cfg: &ArtifactsCfg) -> Result<ArtifactPaths> {
    let dir = cfg.dir.as_path();
    if !dir.is_dir() {
        return Err(Error::MissingArtifact {
            what: "artifact directory",
            path: dir.to_path_buf(),
        });
    }

    let resolve = |path: &Path| -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            dir.join(path)
        }
    };

    let tokenizer_json = resolve(&cfg.tokenizer_json);
    ensure_file(&tokenizer_json, TOKENIZER_JSON)?;

    let generation_config = cfg
        .generation_config
        .as_deref()
        .map(resolve)
        .filter(|path| {
            let present = path.is_file();
            if !present {
                log::debug!(
                    "no generation config at {}, using configured stop tokens",
                    path.display()
                );
            }
            present
        });

    Ok(ArtifactPaths {
        tokenizer_json,
        generation_config,
    })
}

fn ensure_file(path: &Path, what: &'static str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingArtifact {
            what,
            path: path.to_path_buf(),
        })
    }
}
