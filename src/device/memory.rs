//! Native device memory owned by a backend instance.
//!
//! wgpu has no integer names for buffers, so the backend issues its own:
//! every live `wgpu::Buffer` it knows about is registered here under a
//! fresh [`DeviceHandle`]. Handles are never reused within a process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DeviceError, Result};
use crate::handle::DeviceHandle;

/// Copies between buffers must be multiples of this many bytes.
pub(crate) const COPY_ALIGN: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(0x1000);

pub(crate) fn align_up(bytes: u64) -> u64 {
    bytes.div_ceil(COPY_ALIGN) * COPY_ALIGN
}

pub(crate) struct NativeMemory {
    buffers: Mutex<HashMap<DeviceHandle, Arc<wgpu::Buffer>>>,
}

impl NativeMemory {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, buffer: wgpu::Buffer) -> Result<DeviceHandle> {
        let mut buffers = self.buffers.lock();
        buffers
            .try_reserve(1)
            .map_err(|e| DeviceError::OutOfResources(format!("native memory table: {e}")))?;
        let raw = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        let handle = DeviceHandle::from_raw(raw)
            .ok_or_else(|| DeviceError::OutOfResources("device handles exhausted".into()))?;
        buffers.insert(handle, Arc::new(buffer));
        Ok(handle)
    }

    pub(crate) fn get(&self, handle: DeviceHandle) -> Result<Arc<wgpu::Buffer>> {
        self.buffers
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(DeviceError::InvalidHandle(handle))
    }

    pub(crate) fn remove(&self, handle: DeviceHandle) -> Option<Arc<wgpu::Buffer>> {
        self.buffers.lock().remove(&handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.lock().len()
    }
}
