//! Segment lifecycle: lazy load, resident cache, scoped leases.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::SegmentError;
use crate::kind::SegmentKind;
use crate::source::SegmentSource;
use crate::{Segment, SegmentRuntime};

/// Where and how segment files are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Repository identifier handed to the source, e.g. `onnx-community/Qwen2-VL-2B-Instruct`.
    pub model_id: String,
    /// Quantization tag substituted into `{quant}`.
    pub quantization: String,
    /// File name template with `{tag}` and `{quant}` placeholders.
    pub file_template: String,
}

impl RegistryConfig {
    pub const DEFAULT_TEMPLATE: &'static str = "onnx/QwenVL_{tag}_{quant}.onnx";

    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            quantization: "q4f16".to_string(),
            file_template: Self::DEFAULT_TEMPLATE.to_string(),
        }
    }

    pub fn with_quantization(mut self, quantization: impl Into<String>) -> Self {
        self.quantization = quantization.into();
        self
    }

    pub fn with_file_template(mut self, template: impl Into<String>) -> Self {
        self.file_template = template.into();
        self
    }

    pub fn file_name(&self, kind: SegmentKind) -> String {
        self.file_template
            .replace("{tag}", kind.tag())
            .replace("{quant}", &self.quantization)
    }
}

/// Counters describing registry activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Calls into the byte source.
    pub fetches: usize,
    /// Resident loads served from the in-memory cache.
    pub cache_hits: usize,
    /// Segments freed, either explicitly or by a dropped lease.
    pub releases: usize,
}

#[derive(Debug, Default)]
struct LeaseTracker {
    live: AtomicUsize,
    released: AtomicUsize,
}

/// Owns every loaded segment.
pub struct SegmentRegistry {
    config: RegistryConfig,
    source: Box<dyn SegmentSource>,
    runtime: Box<dyn SegmentRuntime>,
    resident: HashMap<SegmentKind, Arc<dyn Segment>>,
    fetches: usize,
    cache_hits: usize,
    resident_releases: usize,
    leases: Arc<LeaseTracker>,
}

impl SegmentRegistry {
    pub fn new(
        config: RegistryConfig,
        source: Box<dyn SegmentSource>,
        runtime: Box<dyn SegmentRuntime>,
    ) -> Self {
        Self {
            config,
            source,
            runtime,
            resident: HashMap::new(),
            fetches: 0,
            cache_hits: 0,
            resident_releases: 0,
            leases: Arc::new(LeaseTracker::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the cached handle for a resident segment, fetching it on first
    /// use. Repeated calls return the same handle without touching the source.
    pub fn load(&mut self, kind: SegmentKind) -> Result<Arc<dyn Segment>, SegmentError> {
        if !kind.is_resident() {
            return Err(SegmentError::InvalidKind {
                kind,
                reason: "one-shot segments must be acquired as a lease",
            });
        }
        if let Some(segment) = self.resident.get(&kind) {
            self.cache_hits += 1;
            log::debug!("segment cache hit: {kind}");
            return Ok(Arc::clone(segment));
        }
        let segment: Arc<dyn Segment> = Arc::from(self.instantiate(kind)?);
        self.resident.insert(kind, Arc::clone(&segment));
        Ok(segment)
    }

    /// Loads a one-shot segment. It is freed when the returned lease drops.
    pub fn acquire(&mut self, kind: SegmentKind) -> Result<SegmentLease, SegmentError> {
        if kind.is_resident() {
            return Err(SegmentError::InvalidKind {
                kind,
                reason: "resident segments are loaded into the cache",
            });
        }
        let segment = self.instantiate(kind)?;
        self.leases.live.fetch_add(1, Ordering::SeqCst);
        Ok(SegmentLease {
            kind,
            segment,
            tracker: Arc::clone(&self.leases),
        })
    }

    /// Loads every resident segment up front.
    pub fn preload(&mut self) -> Result<(), SegmentError> {
        for kind in SegmentKind::resident() {
            self.load(kind)?;
        }
        Ok(())
    }

    /// Frees a resident segment. It must be loaded again before reuse.
    /// Returns whether anything was held.
    pub fn release(&mut self, kind: SegmentKind) -> bool {
        match self.resident.remove(&kind) {
            Some(_) => {
                self.resident_releases += 1;
                log::info!("segment released: {kind}");
                true
            }
            None => false,
        }
    }

    pub fn release_all(&mut self) {
        let kinds: Vec<SegmentKind> = self.resident.keys().copied().collect();
        for kind in kinds {
            self.release(kind);
        }
    }

    pub fn is_loaded(&self, kind: SegmentKind) -> bool {
        self.resident.contains_key(&kind)
    }

    /// Number of leases that have not been dropped yet.
    pub fn live_leases(&self) -> usize {
        self.leases.live.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            fetches: self.fetches,
            cache_hits: self.cache_hits,
            releases: self.resident_releases + self.leases.released.load(Ordering::SeqCst),
        }
    }

    fn instantiate(&mut self, kind: SegmentKind) -> Result<Box<dyn Segment>, SegmentError> {
        let file = self.config.file_name(kind);
        self.fetches += 1;
        let bytes = self.source.fetch(&self.config.model_id, &file)?;
        log::info!("segment load: {kind} from {file} ({} bytes)", bytes.len());
        self.runtime.instantiate(kind, bytes)
    }
}

impl Drop for SegmentRegistry {
    fn drop(&mut self) {
        if !self.resident.is_empty() {
            log::debug!("registry dropped with {} resident segments", self.resident.len());
        }
    }
}

/// A one-shot segment, freed on drop.
pub struct SegmentLease {
    kind: SegmentKind,
    segment: Box<dyn Segment>,
    tracker: Arc<LeaseTracker>,
}

impl SegmentLease {
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }
}

impl Deref for SegmentLease {
    type Target = dyn Segment;

    fn deref(&self) -> &Self::Target {
        self.segment.as_ref()
    }
}

impl Drop for SegmentLease {
    fn drop(&mut self) {
        self.tracker.live.fetch_sub(1, Ordering::SeqCst);
        self.tracker.released.fetch_add(1, Ordering::SeqCst);
        log::info!("segment released: {}", self.kind);
    }
}
