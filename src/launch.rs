//! Launch geometry, argument lists, and vertex buffers for kernel dispatch.

use std::fmt;

use crate::error::{DeviceError, Result};
use crate::handle::DeviceHandle;

/// A 3-D extent. Values of 1 mean a single unit along that axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(x: u32) -> Self {
        Self { x, y: 1, z: 1 }
    }

    pub const fn as_array(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    /// Total units, saturating at `u64::MAX`.
    pub const fn volume(&self) -> u64 {
        (self.x as u64)
            .saturating_mul(self.y as u64)
            .saturating_mul(self.z as u64)
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl From<[u32; 3]> for Dim3 {
    fn from([x, y, z]: [u32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Grid of blocks, block of threads, and dynamic shared memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem_bytes: usize,
}

impl LaunchGeometry {
    pub const fn new(grid: Dim3, block: Dim3, shared_mem_bytes: usize) -> Self {
        Self {
            grid,
            block,
            shared_mem_bytes,
        }
    }

    /// Reject any zero axis. A zero never launches as empty work.
    pub fn validate(&self) -> Result<()> {
        for (what, dims) in [("grid", self.grid), ("block", self.block)] {
            for (axis, v) in ["x", "y", "z"].into_iter().zip(dims.as_array()) {
                if v == 0 {
                    return Err(DeviceError::InvalidGeometry(format!(
                        "{what}.{axis} is zero in {what} {dims}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Marshaled kernel arguments as three index-aligned sequences.
///
/// For a scalar, `values[i]` holds its little-endian bytes and `sizes[i]`
/// its width. For a buffer, `values[i]` holds the native-endian bytes of a
/// [`DeviceHandle`] and `sizes[i]` is ignored.
#[derive(Clone, Copy, Debug)]
pub struct KernelArgs<'a> {
    pub sizes: &'a [usize],
    pub values: &'a [&'a [u8]],
    pub is_buffer: &'a [bool],
}

impl<'a> KernelArgs<'a> {
    /// Wrap three sequences. Lengths are checked by [`KernelArgs::validate`].
    pub const fn new(sizes: &'a [usize], values: &'a [&'a [u8]], is_buffer: &'a [bool]) -> Self {
        Self {
            sizes,
            values,
            is_buffer,
        }
    }

    pub const fn empty() -> Self {
        Self::new(&[], &[], &[])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All three sequences must have the same length.
    pub fn validate(&self) -> Result<()> {
        let (s, v, b) = (self.sizes.len(), self.values.len(), self.is_buffer.len());
        if s != v || v != b {
            return Err(DeviceError::ArgumentMismatch(format!(
                "{s} sizes, {v} values, {b} buffer flags"
            )));
        }
        Ok(())
    }

    /// Decode argument `i` as a buffer handle.
    pub fn handle(&self, i: usize) -> Result<DeviceHandle> {
        let value = self.values.get(i).copied().ok_or_else(|| {
            DeviceError::ArgumentMismatch(format!(
                "argument {i} out of range for {} arguments",
                self.values.len()
            ))
        })?;
        DeviceHandle::from_ne_bytes(value).ok_or_else(|| {
            DeviceError::ArgumentMismatch(format!(
                "argument {i} is flagged as a buffer but does not hold a device handle"
            ))
        })
    }
}

/// Owned argument list built from typed values.
#[derive(Clone, Debug, Default)]
pub struct ArgPack {
    sizes: Vec<usize>,
    values: Vec<Vec<u8>>,
    is_buffer: Vec<bool>,
}

impl ArgPack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar<T: bytemuck::Pod>(mut self, value: T) -> Self {
        let bytes = bytemuck::bytes_of(&value).to_vec();
        self.sizes.push(bytes.len());
        self.values.push(bytes);
        self.is_buffer.push(false);
        self
    }

    pub fn buffer(mut self, handle: DeviceHandle) -> Self {
        self.sizes.push(std::mem::size_of::<usize>());
        self.values.push(handle.to_ne_bytes().to_vec());
        self.is_buffer.push(true);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow the pack as [`KernelArgs`] for the duration of `f`.
    pub fn with_args<R>(&self, f: impl FnOnce(KernelArgs<'_>) -> R) -> R {
        let views: Vec<&[u8]> = self.values.iter().map(Vec::as_slice).collect();
        f(KernelArgs::new(&self.sizes, &views, &self.is_buffer))
    }
}

/// Coordinates for the vertex-bound execution mode.
///
/// Each vertex has [`VertexBuffer::COMPONENTS`] floats. A non-empty buffer
/// holds `dim0 * dim1` vertices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexBuffer<'a> {
    pub coords: &'a [f32],
    pub dim0: usize,
    pub dim1: usize,
}

impl<'a> VertexBuffer<'a> {
    pub const COMPONENTS: usize = 2;

    pub const fn new(coords: &'a [f32], dim0: usize, dim1: usize) -> Self {
        Self { coords, dim0, dim1 }
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let expected = self
            .dim0
            .checked_mul(self.dim1)
            .and_then(|n| n.checked_mul(Self::COMPONENTS));
        match expected {
            Some(n) if n == self.coords.len() && n > 0 => Ok(()),
            _ => Err(DeviceError::VertexMismatch(format!(
                "{} coordinates for {} x {} vertices of {} components",
                self.coords.len(),
                self.dim0,
                self.dim1,
                Self::COMPONENTS
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_axes_fail() {
        let ok = LaunchGeometry::new(Dim3::linear(8), Dim3::linear(64), 0);
        assert!(ok.validate().is_ok());
        for i in 0..6 {
            let mut dims = [1u32; 6];
            dims[i] = 0;
            let g = LaunchGeometry::new(
                Dim3::new(dims[0], dims[1], dims[2]),
                Dim3::new(dims[3], dims[4], dims[5]),
                0,
            );
            assert!(
                matches!(g.validate(), Err(DeviceError::InvalidGeometry(_))),
                "axis {i} accepted zero"
            );
        }
    }

    #[test]
    fn volume_saturates() {
        assert_eq!(Dim3::new(4, 2, 3).volume(), 24);
        assert_eq!(Dim3::default().volume(), 1);
        assert_eq!(Dim3::new(u32::MAX, u32::MAX, u32::MAX).volume(), u64::MAX);
    }

    #[test]
    fn geometry_message_names_axis() {
        let g = LaunchGeometry::new(Dim3::new(1, 0, 1), Dim3::default(), 0);
        let msg = g.validate().unwrap_err().to_string();
        assert!(msg.contains("grid.y"), "{msg}");
    }

    #[test]
    fn mismatched_arg_lengths() {
        let v: [&[u8]; 1] = [&[0, 0, 0, 0]];
        let args = KernelArgs::new(&[4, 4], &v, &[false]);
        assert!(matches!(
            args.validate(),
            Err(DeviceError::ArgumentMismatch(_))
        ));
        let args = KernelArgs::new(&[4], &v, &[]);
        assert!(args.validate().is_err());
        let args = KernelArgs::new(&[4], &v, &[false]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn arg_pack_layout() {
        let h = DeviceHandle::from_raw(77).unwrap();
        let pack = ArgPack::new().scalar(42i32).buffer(h).scalar(1.5f32);
        assert_eq!(pack.len(), 3);
        pack.with_args(|args| {
            assert!(args.validate().is_ok());
            assert_eq!(args.sizes, &[4, std::mem::size_of::<usize>(), 4]);
            assert_eq!(args.is_buffer, &[false, true, false]);
            assert_eq!(args.values[0], &42i32.to_le_bytes());
            assert_eq!(args.handle(1).unwrap(), h);
            assert!(args.handle(0).is_err());
        });
    }

    #[test]
    fn handle_past_the_end_is_an_error() {
        let h = DeviceHandle::from_raw(0x2000).unwrap();
        ArgPack::new().buffer(h).with_args(|args| {
            assert_eq!(args.handle(0).unwrap(), h);
            let err = args.handle(1).unwrap_err();
            assert!(matches!(err, DeviceError::ArgumentMismatch(_)));
            assert!(err.to_string().contains("out of range"), "{err}");
        });
        assert!(KernelArgs::empty().handle(0).is_err());
    }

    #[test]
    fn vertex_shape() {
        let coords = [0.0f32; 12];
        assert!(VertexBuffer::new(&coords, 3, 2).validate().is_ok());
        assert!(VertexBuffer::new(&coords, 2, 2).validate().is_err());
        assert!(VertexBuffer::new(&[], 0, 0).validate().is_err());
        assert!(VertexBuffer::new(&coords, usize::MAX, 2).validate().is_err());
    }
}
