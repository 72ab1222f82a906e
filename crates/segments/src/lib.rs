//! Lazy loading and scoped release of model segments.
//!
//! A vision-language model is split into independently loadable computation
//! segments. Segments that run on every decode step stay resident for the
//! life of the [`SegmentRegistry`]; segments that run once per request are
//! handed out as a [`SegmentLease`] and freed as soon as the lease is
//! dropped.
//!
//! Raw segment bytes come from a [`SegmentSource`] (local directory, HTTP,
//! or a persistent disk cache in front of either) and are turned into a
//! runnable [`Segment`] by a [`SegmentRuntime`]. The `onnx` feature provides
//! a runtime backed by `candle-onnx`.

pub mod errors;
pub mod kind;
pub mod registry;
pub mod source;
pub mod tensors;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use errors::SegmentError;
pub use kind::SegmentKind;
pub use registry::{RegistryConfig, RegistryStats, SegmentLease, SegmentRegistry};
pub use source::{CachedSource, DirectorySource, SegmentSource};
pub use tensors::TensorMap;

#[cfg(feature = "http")]
pub use http::HttpSource;
#[cfg(feature = "onnx")]
pub use onnx::OnnxRuntime;

/// A stateless computation unit mapping named input tensors to named outputs.
pub trait Segment: Send + Sync {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap, SegmentError>;
}

/// Turns fetched segment bytes into a runnable [`Segment`].
pub trait SegmentRuntime: Send {
    fn instantiate(&self, kind: SegmentKind, bytes: Vec<u8>)
        -> Result<Box<dyn Segment>, SegmentError>;
}
