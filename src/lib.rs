//! Device backend runtime for compute kernels.
//!
//! Generated pipeline code talks to accelerators only through
//! [`DeviceInterface`]: it compiles embedded kernel source once into a
//! caller-held [`KernelSlot`], launches entry points with explicit grid and
//! block geometry, and attaches host buffers to device memory through
//! opaque [`DeviceHandle`]s. The backends here drive wgpu; kernels are WGSL.

pub mod binding;
pub mod buffer;
pub mod config;
pub mod context;
pub mod device;
pub mod diagnostic;
pub mod error;
pub mod handle;
pub mod kernel;
pub mod launch;

pub use buffer::{HostBuffer, ScalarType};
pub use context::Context;
pub use device::{
    device_interface, renderscript_device_interface, wgpu_device, BackendKind, DeviceInterface,
    WgpuDevice,
};
pub use error::{status, CompileError, DeviceError, ErrorKind, Result};
pub use handle::DeviceHandle;
pub use kernel::{KernelModule, KernelSlot};
pub use launch::{ArgPack, Dim3, KernelArgs, LaunchGeometry, VertexBuffer};
