//! Preallocated key/value buffers exchanged with the decoder segment.
//!
//! Each decoder call consumes the current buffers and hands back updated
//! ones; the store swaps them in after checking they still match the layout.

pub mod layout;
pub mod store;

pub use layout::CacheLayout;
pub use store::KvCacheStore;
