//! Fixed-capacity cache store.

use std::cell::Cell;
use std::marker::PhantomData;

use candle_core::{Device, Tensor};

use crate::core::{to_backend_err, CacheError};
use crate::kv_cache::layout::CacheLayout;

/// Owns the preallocated key and value buffers for one engine.
///
/// The occupied length only moves forward between [`KvCacheStore::reset`]
/// calls and never exceeds `layout.max_seq_len`. The store is `Send` but not
/// `Sync`.
#[derive(Debug)]
pub struct KvCacheStore {
    layout: CacheLayout,
    device: Device,
    keys: Tensor,
    values: Tensor,
    occupied: usize,
    _not_sync: PhantomData<Cell<()>>,
}

impl KvCacheStore {
    pub fn new(layout: CacheLayout, device: &Device) -> Result<Self, CacheError> {
        if layout.element_count() == 0 {
            return Err(CacheError::InvalidShape {
                context: format!("every cache dimension must be non-zero, got {:?}", layout.dims()),
            });
        }
        let (keys, values) = allocate(&layout, device)?;
        log::info!(
            "kv-cache init: layers={} kv_heads={} max_seq={} head_dim={} dtype={:?} bytes={}",
            layout.num_layers,
            layout.num_kv_heads,
            layout.max_seq_len,
            layout.head_dim,
            layout.dtype,
            layout.byte_size()
        );
        Ok(Self {
            layout,
            device: device.clone(),
            keys,
            values,
            occupied: 0,
            _not_sync: PhantomData,
        })
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn keys(&self) -> &Tensor {
        &self.keys
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    pub fn occupied(&self) -> usize {
        self.occupied
    }

    pub fn capacity(&self) -> usize {
        self.layout.max_seq_len
    }

    pub fn remaining(&self) -> usize {
        self.layout.max_seq_len - self.occupied
    }

    /// Fails with [`CacheError::Capacity`] if `len` more positions do not fit.
    pub fn ensure_room(&self, len: usize) -> Result<(), CacheError> {
        if len > self.remaining() {
            return Err(CacheError::Capacity {
                occupied: self.occupied,
                requested: len,
                capacity: self.layout.max_seq_len,
            });
        }
        Ok(())
    }

    /// Swaps in the buffers returned by a decoder step that wrote `len`
    /// positions. On error the store is left untouched.
    pub fn commit(&mut self, keys: Tensor, values: Tensor, len: usize) -> Result<(), CacheError> {
        self.ensure_room(len)?;
        self.check_buffer(&keys, "keys")?;
        self.check_buffer(&values, "values")?;
        self.keys = keys;
        self.values = values;
        self.occupied += len;
        log::debug!(
            "kv-cache commit: +{len} -> {}/{}",
            self.occupied,
            self.layout.max_seq_len
        );
        Ok(())
    }

    /// Zeroes both buffers and the occupied length.
    pub fn reset(&mut self) -> Result<(), CacheError> {
        let (keys, values) = allocate(&self.layout, &self.device)?;
        self.keys = keys;
        self.values = values;
        self.occupied = 0;
        Ok(())
    }

    fn check_buffer(&self, tensor: &Tensor, name: &str) -> Result<(), CacheError> {
        if tensor.dims() != self.layout.dims().as_slice() {
            return Err(CacheError::InvalidShape {
                context: format!(
                    "{name} buffer has dims {:?}, expected {:?}",
                    tensor.dims(),
                    self.layout.dims()
                ),
            });
        }
        if tensor.dtype() != self.layout.dtype {
            return Err(CacheError::UnsupportedDType {
                requested: format!("{:?}", tensor.dtype()),
            });
        }
        Ok(())
    }
}

fn allocate(layout: &CacheLayout, device: &Device) -> Result<(Tensor, Tensor), CacheError> {
    let keys = Tensor::zeros(&layout.dims(), layout.dtype, device).map_err(to_backend_err)?;
    let values = Tensor::zeros(&layout.dims(), layout.dtype, device).map_err(to_backend_err)?;
    Ok((keys, values))
}
