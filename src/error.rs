//! Error types for device backend operations.
//!
//! Every operation on a [`DeviceInterface`](crate::device::DeviceInterface)
//! returns a [`Result`]. Callers that speak the integer-status convention
//! use [`DeviceError::status`] or [`crate::status`]: 0 is success, every
//! error maps to a fixed negative code.

use std::fmt;
use std::ops::Range;

use crate::handle::DeviceHandle;

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Coarse error taxonomy shared by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsupported kernel source.
    Compilation,
    /// Bad entry name, inconsistent arguments or geometry, execution fault.
    Launch,
    /// Wrap/detach/get contract violated by the caller.
    Binding,
    /// Backend could not obtain a device, memory, or other resources.
    Resource,
    /// Environment or caller-supplied configuration was rejected.
    Configuration,
}

/// Kernel source failed to compile.
///
/// `labels` are byte ranges into the source with a short message each, in
/// the order the compiler reported them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub labels: Vec<(Range<usize>, String)>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, range: Range<usize>, message: impl Into<String>) -> Self {
        self.labels.push((range, message.into()));
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors that can occur during device backend operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Kernel source did not compile
    #[error("kernel compilation failed: {0}")]
    Compile(CompileError),

    /// Entry point missing from the module or not a compute entry point
    #[error("unknown entry point `{0}`")]
    UnknownEntryPoint(String),

    /// Zero-sized or unsupported grid/block/shared-memory request
    #[error("invalid launch geometry: {0}")]
    InvalidGeometry(String),

    /// Argument sequences disagree with each other or with the kernel
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),

    /// Vertex buffer shape or presence disagrees with the kernel
    #[error("vertex buffer mismatch: {0}")]
    VertexMismatch(String),

    /// wgpu rejected the pipeline, bind groups, or dispatch
    #[error("kernel launch failed: {0}")]
    Launch(String),

    /// Buffer already has device memory bound
    #[error("buffer already bound to device handle {0}")]
    AlreadyBound(DeviceHandle),

    /// Buffer has no device memory bound
    #[error("buffer has no device memory")]
    NoDeviceMemory,

    /// Buffer is bound through a different backend
    #[error("buffer is bound to the {found} backend, not {expected}")]
    WrongBackend {
        expected: &'static str,
        found: &'static str,
    },

    /// Handle does not name live device memory on this backend
    #[error("unknown device handle {0}")]
    InvalidHandle(DeviceHandle),

    /// Configuration value rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Native buffer cannot back a binding on this backend
    #[error("incompatible native buffer: {0}")]
    IncompatibleBuffer(String),

    /// Host/device transfer failed
    #[error("device transfer failed: {0}")]
    Transfer(String),

    /// Registering a binding or allocating a resource failed
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// No adapter/device could be acquired for the backend
    #[error("no {0} device available")]
    Unavailable(String),
}

impl DeviceError {
    /// Which part of the taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Compile(_) => ErrorKind::Compilation,
            DeviceError::UnknownEntryPoint(_)
            | DeviceError::InvalidGeometry(_)
            | DeviceError::ArgumentMismatch(_)
            | DeviceError::VertexMismatch(_)
            | DeviceError::Launch(_) => ErrorKind::Launch,
            DeviceError::AlreadyBound(_)
            | DeviceError::NoDeviceMemory
            | DeviceError::WrongBackend { .. }
            | DeviceError::InvalidHandle(_)
            | DeviceError::IncompatibleBuffer(_) => ErrorKind::Binding,
            DeviceError::InvalidConfig(_) => ErrorKind::Configuration,
            DeviceError::Transfer(_)
            | DeviceError::OutOfResources(_)
            | DeviceError::Unavailable(_) => ErrorKind::Resource,
        }
    }

    /// Integer status for callers using the C-style convention. Never 0.
    pub fn status(&self) -> i32 {
        match self {
            DeviceError::Compile(_) => -2,
            DeviceError::UnknownEntryPoint(_) => -3,
            DeviceError::InvalidGeometry(_) => -4,
            DeviceError::ArgumentMismatch(_) => -5,
            DeviceError::VertexMismatch(_) => -6,
            DeviceError::Launch(_) => -7,
            DeviceError::AlreadyBound(_) => -8,
            DeviceError::NoDeviceMemory => -9,
            DeviceError::WrongBackend { .. } => -10,
            DeviceError::InvalidHandle(_) => -11,
            DeviceError::InvalidConfig(_) => -12,
            DeviceError::Transfer(_) => -13,
            DeviceError::OutOfResources(_) => -14,
            DeviceError::Unavailable(_) => -15,
            DeviceError::IncompatibleBuffer(_) => -16,
        }
    }
}

impl From<CompileError> for DeviceError {
    fn from(err: CompileError) -> Self {
        DeviceError::Compile(err)
    }
}

/// Collapse a result into the integer-status convention (0 = success).
pub fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status(),
    }
}
