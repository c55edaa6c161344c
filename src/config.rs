//! Device selection configuration.
//!
//! Two settings choose the adapter: a platform name (case-insensitive
//! substring of the adapter name or driver) and a device type. Each is read
//! from a process-wide override when one is set, else from the environment.

use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;

use crate::context::Context;
use crate::error::{DeviceError, Result};

pub const PLATFORM_NAME_ENV: &str = "KDEV_PLATFORM_NAME";
pub const DEVICE_TYPE_ENV: &str = "KDEV_DEVICE_TYPE";

static PLATFORM_NAME: RwLock<Option<String>> = parking_lot::const_rwlock(None);
static DEVICE_TYPE: RwLock<Option<DeviceType>> = parking_lot::const_rwlock(None);

/// Requested class of device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    Cpu,
    Gpu,
    Accelerator,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Cpu => "cpu",
            DeviceType::Gpu => "gpu",
            DeviceType::Accelerator => "acc",
        }
    }

    /// Whether an adapter of type `ty` satisfies this request.
    pub fn matches(self, ty: wgpu::DeviceType) -> bool {
        match self {
            DeviceType::Cpu => ty == wgpu::DeviceType::Cpu,
            DeviceType::Gpu => matches!(
                ty,
                wgpu::DeviceType::DiscreteGpu
                    | wgpu::DeviceType::IntegratedGpu
                    | wgpu::DeviceType::VirtualGpu
            ),
            DeviceType::Accelerator => ty == wgpu::DeviceType::Other,
        }
    }
}

impl FromStr for DeviceType {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceType::Cpu),
            "gpu" => Ok(DeviceType::Gpu),
            "acc" => Ok(DeviceType::Accelerator),
            other => Err(DeviceError::InvalidConfig(format!(
                "device type must be cpu, gpu, or acc, got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Override the platform name. `None` falls back to the environment.
pub fn set_platform_name(name: Option<&str>) {
    *PLATFORM_NAME.write() = name.map(str::to_owned);
}

/// Platform name to select, override first, then `KDEV_PLATFORM_NAME`.
pub fn platform_name(_ctx: &Context) -> Option<String> {
    if let Some(name) = PLATFORM_NAME.read().clone() {
        return Some(name);
    }
    std::env::var(PLATFORM_NAME_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
}

/// Override the device type. Only "cpu", "gpu", and "acc" are accepted.
pub fn set_device_type(name: Option<&str>) -> Result<()> {
    let parsed = name.map(DeviceType::from_str).transpose()?;
    *DEVICE_TYPE.write() = parsed;
    Ok(())
}

/// Device type to select, override first, then `KDEV_DEVICE_TYPE`.
pub fn device_type(_ctx: &Context) -> Option<DeviceType> {
    if let Some(ty) = *DEVICE_TYPE.read() {
        return Some(ty);
    }
    let raw = std::env::var(DEVICE_TYPE_ENV).ok()?;
    match raw.parse() {
        Ok(ty) => Some(ty),
        Err(e) => {
            tracing::warn!("ignoring {DEVICE_TYPE_ENV}: {e}");
            None
        }
    }
}

/// Does an adapter named `name` with driver `driver` match `wanted`?
pub fn platform_matches(wanted: &str, name: &str, driver: &str) -> bool {
    let wanted = wanted.to_lowercase();
    name.to_lowercase().contains(&wanted) || driver.to_lowercase().contains(&wanted)
}
