//! Kernel module state and the caller-held slot that caches it.
//!
//! A [`KernelSlot`] starts empty. The first successful
//! `initialize_kernels` fills it with an `Arc<KernelModule>`; later calls
//! return the same module without recompiling. Failed compilation leaves the
//! slot empty so a corrected source can be retried.
//!
//! Compilation happens on the host (parse, validate, reflect). The
//! device-side shader module and one compute pipeline per entry point are
//! created on first launch and cached per device generation, so a module
//! outlives a `device_release`.

pub mod reflect;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CompileError, Result};

pub use reflect::{BindingInfo, BindingKind, EntryPointInfo};

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// A compiled kernel module.
pub struct KernelModule {
    id: u64,
    digest: blake3::Hash,
    source: String,
    entry_points: Vec<EntryPointInfo>,
    pub(crate) device_state: Mutex<DeviceModuleCache>,
}

/// Device-side objects built from a module for one device generation.
#[derive(Default)]
pub(crate) struct DeviceModuleCache {
    pub(crate) generation: u64,
    pub(crate) shader: Option<Arc<wgpu::ShaderModule>>,
    pub(crate) pipelines: HashMap<String, Arc<wgpu::ComputePipeline>>,
}

impl DeviceModuleCache {
    /// Drop everything built for an older device.
    pub(crate) fn retarget(&mut self, generation: u64) {
        if self.generation != generation {
            self.generation = generation;
            self.shader = None;
            self.pipelines.clear();
        }
    }
}

impl KernelModule {
    /// Compile WGSL source bytes on the host.
    pub fn compile(source: &[u8]) -> std::result::Result<Self, CompileError> {
        let text = reflect::source_text(source)?;
        let entry_points = reflect::reflect_wgsl(text)?;
        Ok(Self {
            id: NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed),
            digest: blake3::hash(text.as_bytes()),
            source: text.to_owned(),
            entry_points,
            device_state: Mutex::new(DeviceModuleCache::default()),
        })
    }

    /// Process-unique identity; two compilations never share one.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// blake3 digest of the source text.
    pub fn digest(&self) -> blake3::Hash {
        self.digest
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_points(&self) -> &[EntryPointInfo] {
        &self.entry_points
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPointInfo> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    /// Number of pipelines built for the current device generation.
    pub fn cached_pipelines(&self) -> usize {
        self.device_state.lock().pipelines.len()
    }
}

impl std::fmt::Debug for KernelModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelModule")
            .field("id", &self.id)
            .field("digest", &self.digest.to_hex().as_str())
            .field(
                "entry_points",
                &self
                    .entry_points
                    .iter()
                    .map(|e| e.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Caller-held slot for a kernel module, filled at most once.
#[derive(Default)]
pub struct KernelSlot {
    state: Mutex<Option<Arc<KernelModule>>>,
}

impl KernelSlot {
    pub const fn new() -> Self {
        Self {
            state: parking_lot::const_mutex(None),
        }
    }

    pub fn get(&self) -> Option<Arc<KernelModule>> {
        self.state.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_none()
    }

    /// Return the stored module, or run `init` and store its result.
    ///
    /// The lock is held across `init`, so racing callers on an empty slot
    /// wait for the first one instead of compiling twice. An error from
    /// `init` leaves the slot empty.
    pub fn get_or_try_init(
        &self,
        init: impl FnOnce() -> Result<KernelModule>,
    ) -> Result<Arc<KernelModule>> {
        let mut state = self.state.lock();
        if let Some(module) = state.as_ref() {
            return Ok(Arc::clone(module));
        }
        let module = Arc::new(init()?);
        *state = Some(Arc::clone(&module));
        Ok(module)
    }

    /// Explicit teardown: empty the slot and hand back the module.
    pub fn take(&self) -> Option<Arc<KernelModule>> {
        self.state.lock().take()
    }
}

impl std::fmt::Debug for KernelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("KernelSlot").field(&self.get()).finish()
    }
}
