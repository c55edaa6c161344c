//! Host-side buffer descriptors.
//!
//! A [`HostBuffer`] is the host half of an N-dimensional array: element
//! type, dense shape, host bytes, and the two dirty flags. Its device field
//! is either empty or holds exactly one [`DeviceBinding`]. Only a
//! [`DeviceInterface`](crate::device::DeviceInterface) changes that field.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::BackendKind;
use crate::error::{DeviceError, Result};
use crate::handle::DeviceHandle;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a host buffer descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn fresh() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Element type of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
    F32,
}

impl ScalarType {
    pub const fn bytes(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
        }
    }
}

/// One axis of a buffer: logical minimum, extent, and stride in elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dim {
    pub min: i64,
    pub extent: usize,
    pub stride: usize,
}

/// A device handle together with the backend that issued or adopted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceBinding {
    pub handle: DeviceHandle,
    pub backend: BackendKind,
}

/// Host buffer descriptor.
///
/// Not `Clone`: a copy would claim the same device binding. Detach wrapped
/// memory and free allocated memory before dropping; a buffer dropped while
/// bound frees allocated memory and abandons its wrapped handle.
#[derive(Debug)]
pub struct HostBuffer {
    id: BufferId,
    elem: ScalarType,
    dims: Vec<Dim>,
    host: Vec<u8>,
    /// Host bytes are newer than device memory.
    pub host_dirty: bool,
    /// Device memory is newer than host bytes.
    pub device_dirty: bool,
    device: Option<DeviceBinding>,
}

impl HostBuffer {
    /// Dense, zero-filled buffer with the first axis innermost.
    ///
    /// Fails when the byte size of the shape overflows `usize` or the host
    /// bytes cannot be allocated.
    pub fn new(elem: ScalarType, extents: &[usize]) -> Result<Self> {
        let overflow =
            || DeviceError::OutOfResources(format!("buffer shape {extents:?} overflows usize"));
        let mut dims = Vec::with_capacity(extents.len());
        let mut stride = 1usize;
        for &extent in extents {
            dims.push(Dim {
                min: 0,
                extent,
                stride,
            });
            stride = stride.checked_mul(extent).ok_or_else(overflow)?;
        }
        let len = stride.checked_mul(elem.bytes()).ok_or_else(overflow)?;
        let mut host = Vec::new();
        host.try_reserve_exact(len)
            .map_err(|e| DeviceError::OutOfResources(format!("{len}-byte host buffer: {e}")))?;
        host.resize(len, 0);
        Ok(Self::from_parts(elem, dims, host))
    }

    /// One-dimensional buffer initialised from `values`, marked host-dirty.
    pub fn from_slice<T: bytemuck::Pod>(elem: ScalarType, values: &[T]) -> Self {
        debug_assert_eq!(std::mem::size_of::<T>(), elem.bytes());
        let host: Vec<u8> = bytemuck::cast_slice(values).to_vec();
        let dims = vec![Dim {
            min: 0,
            extent: host.len() / elem.bytes(),
            stride: 1,
        }];
        let mut buf = Self::from_parts(elem, dims, host);
        buf.host_dirty = true;
        buf
    }

    fn from_parts(elem: ScalarType, dims: Vec<Dim>, host: Vec<u8>) -> Self {
        Self {
            id: BufferId::fresh(),
            elem,
            dims,
            host,
            host_dirty: false,
            device_dirty: false,
            device: None,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn elem(&self) -> ScalarType {
        self.elem
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.iter().map(|d| d.extent).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.host.len()
    }

    pub fn host_bytes(&self) -> &[u8] {
        &self.host
    }

    /// Mutable host bytes. Dirty flags are the caller's to set.
    pub fn host_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.host
    }

    /// Copy host bytes out as typed elements.
    pub fn to_vec<T: bytemuck::Pod>(&self) -> Vec<T> {
        self.host
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    /// Current device binding, if any.
    pub fn device(&self) -> Option<DeviceBinding> {
        self.device
    }

    pub fn has_device_memory(&self) -> bool {
        self.device.is_some()
    }

    pub(crate) fn set_device(&mut self, binding: Option<DeviceBinding>) {
        self.device = binding;
    }
}

/// A buffer dropped while still bound gives its table entry back.
/// Allocated memory is freed; wrapped memory stays with its owner, who
/// should have detached it first.
impl Drop for HostBuffer {
    fn drop(&mut self) {
        if let Some(binding) = self.device.take() {
            crate::device::wgpu_device(binding.backend).forget(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_strides() {
        let buf = HostBuffer::new(ScalarType::F32, &[4, 3, 2]).unwrap();
        let strides: Vec<usize> = buf.dims().iter().map(|d| d.stride).collect();
        assert_eq!(strides, vec![1, 4, 12]);
        assert_eq!(buf.len(), 24);
        assert_eq!(buf.size_in_bytes(), 96);
        assert!(!buf.host_dirty);
        assert!(!buf.has_device_memory());
    }

    #[test]
    fn ids_are_unique() {
        let a = HostBuffer::new(ScalarType::U8, &[1]).unwrap();
        let b = HostBuffer::new(ScalarType::U8, &[1]).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn from_slice_marks_host_dirty() {
        let buf = HostBuffer::from_slice(ScalarType::I32, &[1i32, -2, 3]);
        assert!(buf.host_dirty);
        assert_eq!(buf.to_vec::<i32>(), vec![1, -2, 3]);
    }

    #[test]
    fn zero_extent_is_empty() {
        let buf = HostBuffer::new(ScalarType::U16, &[0, 5]).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.size_in_bytes(), 0);
    }

    #[test]
    fn oversized_shape_is_rejected() {
        let err = HostBuffer::new(ScalarType::U8, &[usize::MAX, 2]).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfResources(_)));
        let err = HostBuffer::new(ScalarType::F32, &[usize::MAX / 2]).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
    }
}
