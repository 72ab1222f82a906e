//! Key/value cache storage and attention-mask control values for the
//! segmented decoder.
//!
//! The decoder segment owns the attention math; this crate only owns the
//! state that must survive between decoder invocations. Cache buffers use the
//! layout `[num_layers, num_kv_heads, max_seq_len, head_dim]` and are
//! preallocated once. Nothing is ever evicted, so reaching `max_seq_len` is a
//! hard capacity boundary reported through [`CacheError::Capacity`].

pub mod core;
pub mod kv_cache;
pub mod masks;

pub use core::CacheError;
pub use kv_cache::{CacheLayout, KvCacheStore};
pub use masks::AttentionMask;
