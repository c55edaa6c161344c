//! Buffer binding table: which host buffer owns which device memory.
//!
//! The table records every binding a backend has made, keyed by
//! [`BufferId`], together with its [`Origin`]. Wrapped memory belongs to the
//! caller and is never freed here. Allocated memory belongs to the backend.
//! The descriptor's device field is the fast path for `get`; the table is
//! the authority for `detach` and `device_free`.
//!
//! Callers detach wrapped buffers and free allocated ones when they are
//! done. A [`HostBuffer`] dropped while still bound removes its entry from
//! its backend's table on drop.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::buffer::{BufferId, DeviceBinding, HostBuffer};
use crate::device::BackendKind;
use crate::error::{DeviceError, Result};
use crate::handle::DeviceHandle;

/// Who owns the native memory behind a binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Adopted through `wrap`; the caller owns the native allocation.
    Wrapped,
    /// Created by `device_malloc`; the backend owns it.
    Allocated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Binding {
    handle: DeviceHandle,
    origin: Origin,
}

/// Per-backend binding table.
pub struct BindingTable {
    backend: BackendKind,
    entries: Mutex<HashMap<BufferId, Binding>>,
}

impl BindingTable {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Adopt `handle` as the device memory of `buf`.
    ///
    /// Fails if `buf` already has device memory. Dirty flags are untouched.
    pub fn wrap(&self, buf: &mut HostBuffer, handle: DeviceHandle) -> Result<()> {
        self.bind(buf, handle, Origin::Wrapped)
    }

    /// Record backend-allocated memory for `buf`.
    pub(crate) fn bind_allocated(&self, buf: &mut HostBuffer, handle: DeviceHandle) -> Result<()> {
        self.bind(buf, handle, Origin::Allocated)
    }

    fn bind(&self, buf: &mut HostBuffer, handle: DeviceHandle, origin: Origin) -> Result<()> {
        if let Some(existing) = buf.device() {
            return Err(DeviceError::AlreadyBound(existing.handle));
        }
        let mut entries = self.entries.lock();
        entries
            .try_reserve(1)
            .map_err(|e| DeviceError::OutOfResources(format!("binding table: {e}")))?;
        entries.insert(buf.id(), Binding { handle, origin });
        buf.set_device(Some(DeviceBinding {
            handle,
            backend: self.backend,
        }));
        tracing::debug!(buffer = buf.id().get(), %handle, ?origin, "bound device memory");
        Ok(())
    }

    /// Disconnect `buf` from wrapped memory and return the handle.
    ///
    /// Returns `None` when nothing is bound. Memory from `device_malloc` is
    /// not detachable: the binding stays and `None` is returned.
    pub fn detach(&self, buf: &mut HostBuffer) -> Option<DeviceHandle> {
        let binding = buf.device()?;
        if binding.backend != self.backend {
            tracing::warn!(
                buffer = buf.id().get(),
                bound = binding.backend.name(),
                backend = self.backend.name(),
                "detach on a buffer bound to another backend"
            );
            return None;
        }
        let mut entries = self.entries.lock();
        match entries.get(&buf.id()) {
            Some(entry) if entry.origin == Origin::Wrapped => {
                let handle = entry.handle;
                entries.remove(&buf.id());
                buf.set_device(None);
                tracing::debug!(buffer = buf.id().get(), %handle, "detached device memory");
                Some(handle)
            }
            Some(_) => {
                tracing::warn!(
                    buffer = buf.id().get(),
                    "detach on backend-allocated memory; use device_free"
                );
                None
            }
            None => {
                tracing::warn!(buffer = buf.id().get(), "detach on unregistered binding");
                None
            }
        }
    }

    /// Currently bound handle, without locking or allocating.
    pub fn get(&self, buf: &HostBuffer) -> Option<DeviceHandle> {
        let binding = buf.device()?;
        debug_assert_eq!(
            binding.backend, self.backend,
            "buffer queried through the wrong device interface"
        );
        (binding.backend == self.backend).then_some(binding.handle)
    }

    /// Handle bound to `buf` on this backend, or a binding-contract error.
    pub(crate) fn require(&self, buf: &HostBuffer) -> Result<DeviceHandle> {
        let binding = buf.device().ok_or(DeviceError::NoDeviceMemory)?;
        if binding.backend != self.backend {
            return Err(DeviceError::WrongBackend {
                expected: self.backend.name(),
                found: binding.backend.name(),
            });
        }
        Ok(binding.handle)
    }

    /// Remove whatever binding `buf` has and report its origin.
    pub(crate) fn unbind(&self, buf: &mut HostBuffer) -> Option<(DeviceHandle, Origin)> {
        let binding = buf.device()?;
        if binding.backend != self.backend {
            return None;
        }
        buf.set_device(None);
        self.forget(buf.id())
    }

    /// Drop the entry for a buffer that no longer exists.
    pub(crate) fn forget(&self, id: BufferId) -> Option<(DeviceHandle, Origin)> {
        self.entries
            .lock()
            .remove(&id)
            .map(|b| (b.handle, b.origin))
    }

    /// Remove every backend-allocated entry and return its handle.
    /// Wrapped entries stay so their owners can still detach.
    pub(crate) fn drain_allocated(&self) -> Vec<DeviceHandle> {
        let mut drained = Vec::new();
        self.entries.lock().retain(|_, b| {
            if b.origin == Origin::Allocated {
                drained.push(b.handle);
                false
            } else {
                true
            }
        });
        drained
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
