use std::collections::BTreeSet;
use std::fmt;

use tokenizers::Tokenizer;

use crate::errors::{Error, Result};

/// Ids that end generation as soon as the decoder produces one of them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StopTokens {
    ids: BTreeSet<u32>,
}

impl StopTokens {
    pub fn new(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Prefers ids declared by the artifacts; otherwise looks the named
    /// special tokens up in the vocabulary. Unknown names are skipped, but an
    /// empty result is an error.
    pub fn resolve(tokenizer: &Tokenizer, declared: &[u32], names: &[String]) -> Result<Self> {
        let stop = if declared.is_empty() {
            let mut ids = BTreeSet::new();
            for name in names {
                match tokenizer.token_to_id(name) {
                    Some(id) => {
                        ids.insert(id);
                    }
                    None => log::warn!("stop token {name:?} is not in the vocabulary"),
                }
            }
            Self { ids }
        } else {
            Self::new(declared.iter().copied())
        };
        if stop.is_empty() {
            return Err(Error::NoStopTokens);
        }
        Ok(stop)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<u32> for StopTokens {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Debug for StopTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids.iter()).finish()
    }
}
