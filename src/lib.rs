//! Segmented vision-language model inference on candle.
//!
//! The workspace crates are re-exported here under one roof:
//!
//! * [`codec`]: integer to binary16 control scalars.
//! * [`attention`]: the fixed-capacity key/value cache and mask scalars.
//! * [`segments`]: segment sources, runtimes and the lifecycle registry.
//! * [`tokenizer`]: `tokenizer.json` loading, stop ids and prompt templates.
//! * [`model`]: the engine and its streaming decode loop.

pub use attention;
pub use codec;
pub use model;
pub use model::*;
pub use segments;
pub use tokenizer;

use anyhow::Result;
use candle_core::Device;

/// Picks the compute device. `CANDLE_FORCE_CPU` pins the CPU backend;
/// otherwise CUDA is used when the build and the host support it.
pub fn setup_device() -> Result<Device> {
    if std::env::var("CANDLE_FORCE_CPU").is_ok() {
        log::info!("CANDLE_FORCE_CPU set, using CPU backend");
        return Ok(Device::Cpu);
    }

    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => {
            log::info!("CUDA device selected: {device:?}");
            Ok(device)
        }
        Ok(_) => {
            log::info!("using CPU backend");
            Ok(Device::Cpu)
        }
        Err(err) => {
            log::warn!("CUDA probe failed ({err}), falling back to CPU");
            Ok(Device::Cpu)
        }
    }
}

/// Logs the host platform and compiled backends.
pub fn log_available_backends() {
    log::info!(
        "host: os={} arch={} cuda_compiled={}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        candle_core::utils::cuda_is_available()
    );
}
