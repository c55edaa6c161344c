//! Device memory handles.

use std::fmt;
use std::num::NonZeroUsize;

/// Opaque token naming a block of device-resident memory.
///
/// A handle is a native-width integer with no arithmetic. Its validity is
/// defined by the backend that issued it. The "no memory" state is
/// represented as `Option::<DeviceHandle>::None`, which has the same size
/// as a bare `usize` and converts to 0 through [`DeviceHandle::raw_or_zero`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(NonZeroUsize);

impl DeviceHandle {
    /// Wrap a raw native value. Returns `None` for 0.
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// The raw native value.
    pub const fn raw(self) -> usize {
        self.0.get()
    }

    /// Raw value of an optional handle, 0 when absent.
    pub fn raw_or_zero(handle: Option<Self>) -> usize {
        handle.map_or(0, Self::raw)
    }

    /// Native-endian bytes, the form a buffer argument takes in
    /// [`KernelArgs`](crate::launch::KernelArgs).
    pub fn to_ne_bytes(self) -> [u8; std::mem::size_of::<usize>()] {
        self.raw().to_ne_bytes()
    }

    /// Decode a handle from a buffer argument's bytes.
    pub fn from_ne_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; std::mem::size_of::<usize>()] = bytes.try_into().ok()?;
        Self::from_raw(usize::from_ne_bytes(arr))
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{:#x}", self.raw())
    }
}
