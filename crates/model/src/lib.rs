//! Segmented vision-language generation engine.
//!
//! An [`Engine`] owns the resident segments, the key/value cache and the
//! tokenizer for one model. A call tokenizes the prompt, optionally encodes
//! and merges an image, then drives the decoder one token at a time through
//! a [`Generation`] stream.
//!
//! ```no_run
//! use model::{Engine, EngineConfig, GenerationRequest};
//! # fn run(runtime: Box<dyn segments::SegmentRuntime>) -> Result<(), model::EngineError> {
//! let config = EngineConfig::from_path("engine.toml")?;
//! let mut engine = Engine::from_config(&config, runtime)?;
//! let output = engine.generate(GenerationRequest::new("Hello"), |text| println!("{text}"))?;
//! println!("stopped: {:?}", output.stop_reason);
//! # Ok(())
//! # }
//! ```

pub mod bindings;
pub mod config;
pub mod engine;
pub mod errors;
pub mod generation;
pub mod position;
pub mod request;
pub mod vision;

pub use config::{ConfigError, EngineConfig, ModelConfig, VisionGrid};
pub use engine::Engine;
pub use errors::EngineError;
pub use generation::{
    Generation, GenerationOutput, GenerationPhase, PrefillSummary, StopReason, TokenChunk,
};
pub use position::{Phase, PositionTracker};
pub use request::{CancelToken, GenerationRequest};
pub use vision::{ImagePreprocessor, ResizePreprocessor};
