//! Types shared by the cache and mask modules.

pub mod errors;

pub use errors::{to_backend_err, CacheError};
