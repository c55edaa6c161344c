//! The device interface contract and the backend registry.
//!
//! Every accelerator backend implements [`DeviceInterface`]. Generated code
//! holds a `&'static dyn DeviceInterface` and never names backend symbols,
//! so one call site can target any backend in the registry.
//!
//! The registry is a closed set: [`BackendKind`] enumerates the wgpu
//! backends this crate can drive. Each kind resolves to exactly one
//! interface, built on first request and immutable afterwards. Building an
//! interface does not touch the GPU; the adapter is acquired when an
//! operation first needs it.

mod memory;
pub mod gpu;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::buffer::HostBuffer;
use crate::context::Context;
use crate::error::{DeviceError, Result};
use crate::handle::DeviceHandle;
use crate::kernel::{KernelModule, KernelSlot};
use crate::launch::{KernelArgs, LaunchGeometry, VertexBuffer};

pub use self::gpu::{AdapterSummary, WgpuDevice};

/// Backends in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Whatever native backend wgpu prefers on this platform.
    Primary,
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Primary,
        BackendKind::Vulkan,
        BackendKind::Metal,
        BackendKind::Dx12,
        BackendKind::Gl,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Primary => "primary",
            BackendKind::Vulkan => "vulkan",
            BackendKind::Metal => "metal",
            BackendKind::Dx12 => "dx12",
            BackendKind::Gl => "gl",
        }
    }

    /// wgpu backend mask the interface instance is restricted to.
    pub fn backends(self) -> wgpu::Backends {
        match self {
            BackendKind::Primary => wgpu::Backends::PRIMARY,
            BackendKind::Vulkan => wgpu::Backends::VULKAN,
            BackendKind::Metal => wgpu::Backends::METAL,
            BackendKind::Dx12 => wgpu::Backends::DX12,
            BackendKind::Gl => wgpu::Backends::GL,
        }
    }

    fn index(self) -> usize {
        match self {
            BackendKind::Primary => 0,
            BackendKind::Vulkan => 1,
            BackendKind::Metal => 2,
            BackendKind::Dx12 => 3,
            BackendKind::Gl => 4,
        }
    }
}

impl FromStr for BackendKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "default" | "renderscript" => Ok(BackendKind::Primary),
            "vulkan" | "vk" => Ok(BackendKind::Vulkan),
            "metal" | "mtl" => Ok(BackendKind::Metal),
            "dx12" | "d3d12" => Ok(BackendKind::Dx12),
            "gl" | "opengl" | "gles" => Ok(BackendKind::Gl),
            other => Err(DeviceError::InvalidConfig(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The contract every accelerator backend satisfies.
///
/// All operations are synchronous from the caller's side. `run` returns
/// only after the kernel has finished; the rest are metadata updates or
/// blocking transfers. The [`Context`] is passed through untouched.
pub trait DeviceInterface: Send + Sync {
    /// Which registry entry this is.
    fn kind(&self) -> BackendKind;

    /// Compile `source` into `slot` unless the slot is already filled.
    ///
    /// On failure the slot stays empty.
    fn initialize_kernels(
        &self,
        ctx: &Context,
        slot: &KernelSlot,
        source: &[u8],
    ) -> Result<Arc<KernelModule>>;

    /// Launch `entry` from `module` and block until it completes.
    ///
    /// A `Some` non-empty vertex buffer selects the vertex-bound mode.
    fn run(
        &self,
        ctx: &Context,
        module: &KernelModule,
        entry: &str,
        geometry: &LaunchGeometry,
        args: &KernelArgs<'_>,
        vertices: Option<&VertexBuffer<'_>>,
    ) -> Result<()>;

    /// Adopt caller-owned device memory for `buf`, which must be unbound.
    fn wrap(&self, ctx: &Context, buf: &mut HostBuffer, handle: DeviceHandle) -> Result<()>;

    /// Undo `wrap`, returning the adopted handle without freeing it.
    ///
    /// Only valid for buffers bound through `wrap`. An unbound buffer
    /// yields `None`; memory from `device_malloc` is left bound and also
    /// yields `None`.
    fn detach(&self, ctx: &Context, buf: &mut HostBuffer) -> Option<DeviceHandle>;

    /// Currently bound handle, `None` if `buf` has no device memory.
    fn get(&self, ctx: &Context, buf: &HostBuffer) -> Option<DeviceHandle>;

    /// Allocate backend-owned device memory sized for `buf`.
    fn device_malloc(&self, ctx: &Context, buf: &mut HostBuffer) -> Result<()>;

    /// Release `buf`'s device memory: freed if allocated, detached if wrapped.
    fn device_free(&self, ctx: &Context, buf: &mut HostBuffer) -> Result<()>;

    /// Upload host bytes and clear `host_dirty`.
    fn copy_to_device(&self, ctx: &Context, buf: &mut HostBuffer) -> Result<()>;

    /// Download device memory and clear `device_dirty`.
    fn copy_to_host(&self, ctx: &Context, buf: &mut HostBuffer) -> Result<()>;

    /// Wait for all submitted work.
    fn device_sync(&self, ctx: &Context) -> Result<()>;

    /// Drop the acquired device and everything allocated on it.
    fn device_release(&self, ctx: &Context) -> Result<()>;
}

static REGISTRY: [OnceLock<WgpuDevice>; 5] = [
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
];

/// The interface for `kind`. Pure accessor: never fails, no device work.
pub fn device_interface(kind: BackendKind) -> &'static dyn DeviceInterface {
    wgpu_device(kind)
}

/// Concrete registry entry, for callers that need native wgpu access.
pub fn wgpu_device(kind: BackendKind) -> &'static WgpuDevice {
    REGISTRY[kind.index()].get_or_init(|| WgpuDevice::new(kind))
}

/// The default device interface.
pub fn renderscript_device_interface() -> &'static dyn DeviceInterface {
    device_interface(BackendKind::Primary)
}
