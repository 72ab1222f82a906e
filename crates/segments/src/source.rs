//! Byte sources for segment files.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::errors::SegmentError;

/// Returns the raw bytes of a segment file.
pub trait SegmentSource: Send {
    fn fetch(&self, model_id: &str, file: &str) -> Result<Vec<u8>, SegmentError>;
}

impl<S: SegmentSource + ?Sized> SegmentSource for Box<S> {
    fn fetch(&self, model_id: &str, file: &str) -> Result<Vec<u8>, SegmentError> {
        (**self).fetch(model_id, file)
    }
}

/// Reads segment files from a local directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    per_model: bool,
}

impl DirectorySource {
    /// Files live at `<root>/<model_id>/<file>`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            per_model: true,
        }
    }

    /// Files live at `<root>/<file>`, ignoring the model id.
    pub fn flat(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            per_model: false,
        }
    }

    pub fn path_for(&self, model_id: &str, file: &str) -> PathBuf {
        if self.per_model {
            self.root.join(model_id).join(file)
        } else {
            self.root.join(file)
        }
    }
}

impl SegmentSource for DirectorySource {
    fn fetch(&self, model_id: &str, file: &str) -> Result<Vec<u8>, SegmentError> {
        let path = self.path_for(model_id, file);
        fs::read(&path).map_err(|err| SegmentError::Fetch {
            model_id: model_id.to_string(),
            file: file.to_string(),
            message: format!("{}: {err}", path.display()),
        })
    }
}

/// Persistent on-disk cache in front of another source.
///
/// Entries are keyed by the SHA-256 of `model_id/file` and written through a
/// temporary file plus rename, so a partial write never becomes a hit.
#[derive(Debug)]
pub struct CachedSource<S> {
    inner: S,
    dir: PathBuf,
}

impl<S: SegmentSource> CachedSource<S> {
    pub fn new(inner: S, dir: impl Into<PathBuf>) -> Result<Self, SegmentError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| SegmentError::io(&dir, err))?;
        Ok(Self { inner, dir })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, model_id: &str, file: &str) -> PathBuf {
        self.dir.join(cache_key(model_id, file))
    }

    pub fn contains(&self, model_id: &str, file: &str) -> bool {
        self.entry_path(model_id, file).is_file()
    }

    /// Drops a cached entry. Returns whether one existed.
    pub fn remove(&self, model_id: &str, file: &str) -> Result<bool, SegmentError> {
        let path = self.entry_path(model_id, file);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SegmentError::io(path, err)),
        }
    }

    fn store(&self, path: &Path, bytes: &[u8]) -> Result<(), SegmentError> {
        let partial = path.with_extension("partial");
        fs::write(&partial, bytes).map_err(|err| SegmentError::io(&partial, err))?;
        fs::rename(&partial, path).map_err(|err| SegmentError::io(path, err))
    }
}

impl<S: SegmentSource> SegmentSource for CachedSource<S> {
    fn fetch(&self, model_id: &str, file: &str) -> Result<Vec<u8>, SegmentError> {
        let path = self.entry_path(model_id, file);
        if path.is_file() {
            log::debug!("segment disk cache hit: {model_id}/{file}");
            return fs::read(&path).map_err(|err| SegmentError::io(&path, err));
        }
        log::debug!("segment disk cache miss: {model_id}/{file}");
        let bytes = self.inner.fetch(model_id, file)?;
        self.store(&path, &bytes)?;
        Ok(bytes)
    }
}

fn cache_key(model_id: &str, file: &str) -> String {
    let digest = Sha256::digest(format!("{model_id}/{file}").as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
