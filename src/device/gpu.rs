//! wgpu implementation of [`DeviceInterface`].
//!
//! Kernel source is WGSL. Compilation is host-side (see
//! [`crate::kernel`]); the device and its pipelines are created lazily, so
//! compiling, binding, and launch validation all work on machines without
//! an adapter. Everything that reaches the device is wrapped in a wgpu
//! error scope and surfaces as a [`DeviceError`] instead of a panic.
//!
//! Calling convention for `run`:
//! - argument `i` binds to `@group(0) @binding(i)`;
//! - scalars are `var<uniform>`, uploaded into a fresh uniform buffer;
//! - buffers are `var<storage>`, resolved from their [`DeviceHandle`];
//! - vertex mode binds the coordinates as `array<vec2<f32>>` at
//!   `@group(1) @binding(0)`;
//! - `block` must equal the entry point's `@workgroup_size`.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use super::memory::{align_up, NativeMemory, COPY_ALIGN};
use super::{BackendKind, DeviceInterface};
use crate::binding::{BindingTable, Origin};
use crate::buffer::{BufferId, HostBuffer};
use crate::config;
use crate::context::Context;
use crate::error::{DeviceError, Result};
use crate::handle::DeviceHandle;
use crate::kernel::reflect::{ARG_GROUP, VERTEX_BINDING, VERTEX_GROUP};
use crate::kernel::{BindingKind, EntryPointInfo, KernelModule, KernelSlot};
use crate::launch::{KernelArgs, LaunchGeometry, VertexBuffer};

/// Uniform buffers are padded to this many bytes.
const UNIFORM_ALIGN: usize = 16;

/// Workgroup storage every WebGPU device supports.
pub const MAX_WORKGROUP_STORAGE: usize = 16384;

/// Usage every imported native buffer must carry.
pub const NATIVE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// An acquired adapter, device, and queue.
pub struct Gpu {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: wgpu::AdapterInfo,
    generation: u64,
    /// wgpu keeps one error-scope stack per device; push/pop pairs from
    /// different threads must not interleave.
    scopes: Mutex<()>,
}

impl Gpu {
    fn wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

/// Adapter description for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterSummary {
    pub name: String,
    pub backend: String,
    pub device_type: String,
    pub driver: String,
}

impl From<&wgpu::AdapterInfo> for AdapterSummary {
    fn from(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
            driver: if info.driver_info.is_empty() {
                info.driver.clone()
            } else {
                format!("{} ({})", info.driver, info.driver_info)
            },
        }
    }
}

impl fmt::Display for AdapterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} {}]", self.name, self.backend, self.device_type)?;
        if !self.driver.is_empty() {
            write!(f, " driver {}", self.driver)?;
        }
        Ok(())
    }
}

/// One registry entry: a wgpu backend plus its memory and binding tables.
pub struct WgpuDevice {
    kind: BackendKind,
    gpu: Mutex<Option<Arc<Gpu>>>,
    generation: AtomicU64,
    memory: NativeMemory,
    bindings: BindingTable,
}

impl WgpuDevice {
    pub(crate) fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            gpu: Mutex::new(None),
            generation: AtomicU64::new(1),
            memory: NativeMemory::new(),
            bindings: BindingTable::new(kind),
        }
    }

    /// The acquired device, acquiring it on first use.
    pub fn gpu(&self, ctx: &Context) -> Result<Arc<Gpu>> {
        let mut slot = self.gpu.lock();
        if let Some(gpu) = slot.as_ref() {
            return Ok(Arc::clone(gpu));
        }
        let generation = self.generation.load(Ordering::Acquire);
        let gpu = Arc::new(create_gpu(self.kind, ctx, generation)?);
        *slot = Some(Arc::clone(&gpu));
        Ok(gpu)
    }

    /// Like [`WgpuDevice::gpu`], but `None` when no adapter is available.
    pub fn try_acquire(&self, ctx: &Context) -> Option<Arc<Gpu>> {
        match self.gpu(ctx) {
            Ok(gpu) => Some(gpu),
            Err(e) => {
                tracing::debug!(backend = self.kind.name(), "no device: {e}");
                None
            }
        }
    }

    pub fn adapter_info(&self, ctx: &Context) -> Result<AdapterSummary> {
        Ok(AdapterSummary::from(&self.gpu(ctx)?.info))
    }

    /// Register a caller-created buffer and return a handle for `wrap`.
    ///
    /// The buffer must come from this backend's current device and carry
    /// at least [`NATIVE_USAGE`]. Imported buffers outlive `device_release`
    /// but belong to the device that created them.
    pub fn import_native(&self, _ctx: &Context, buffer: wgpu::Buffer) -> Result<DeviceHandle> {
        check_native_usage(buffer.usage())?;
        let handle = self.memory.insert(buffer)?;
        tracing::debug!(%handle, "imported native buffer");
        Ok(handle)
    }

    /// Unregister a native buffer and return it to the caller.
    pub fn take_native(&self, _ctx: &Context, handle: DeviceHandle) -> Option<Arc<wgpu::Buffer>> {
        self.memory.remove(handle)
    }

    /// Native buffer behind `handle`.
    pub fn native_buffer(&self, handle: DeviceHandle) -> Result<Arc<wgpu::Buffer>> {
        self.memory.get(handle)
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    /// Release the binding of a host buffer that is being dropped.
    pub(crate) fn forget(&self, id: BufferId) {
        match self.bindings.forget(id) {
            Some((handle, Origin::Allocated)) => {
                if let Some(buffer) = self.memory.remove(handle) {
                    buffer.destroy();
                }
                tracing::debug!(buffer = id.get(), %handle, "freed memory of dropped buffer");
            }
            Some((handle, Origin::Wrapped)) => {
                tracing::warn!(buffer = id.get(), %handle, "buffer dropped without detach");
            }
            None => {}
        }
    }

    /// Native buffers currently registered, allocated or imported.
    pub fn live_allocations(&self) -> usize {
        self.memory.len()
    }

    fn pipeline(
        &self,
        gpu: &Gpu,
        module: &KernelModule,
        entry: &str,
    ) -> Result<Arc<wgpu::ComputePipeline>> {
        let mut cache = module.device_state.lock();
        cache.retarget(gpu.generation);
        if let Some(pipeline) = cache.pipelines.get(entry) {
            return Ok(Arc::clone(pipeline));
        }

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = match &cache.shader {
            Some(shader) => Arc::clone(shader),
            None => Arc::new(
                gpu.device
                    .create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some("kdev_module"),
                        source: wgpu::ShaderSource::Wgsl(module.source().into()),
                    }),
            ),
        };
        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: None,
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            });
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(DeviceError::Launch(format!(
                "building pipeline for `{entry}`: {err}"
            )));
        }

        let pipeline = Arc::new(pipeline);
        cache.shader = Some(shader);
        cache
            .pipelines
            .insert(entry.to_owned(), Arc::clone(&pipeline));
        tracing::debug!(module = module.id(), entry, "built compute pipeline");
        Ok(pipeline)
    }

    fn encode_and_submit(
        &self,
        gpu: &Gpu,
        pipeline: &wgpu::ComputePipeline,
        entry: &EntryPointInfo,
        geometry: &LaunchGeometry,
        args: &KernelArgs<'_>,
        vertices: Option<&VertexBuffer<'_>>,
    ) -> Result<()> {
        // Resolve every handle before creating anything on the device.
        let mut storage = Vec::new();
        let mut scalars = Vec::new();
        for b in entry.group(ARG_GROUP) {
            let i = b.binding as usize;
            if args.is_buffer[i] {
                storage.push((b.binding, self.memory.get(args.handle(i)?)?));
            } else {
                let mut bytes = args.values[i].to_vec();
                bytes.resize(bytes.len().div_ceil(UNIFORM_ALIGN).max(1) * UNIFORM_ALIGN, 0);
                scalars.push((b.binding, bytes));
            }
        }

        let uniforms: Vec<(u32, wgpu::Buffer)> = scalars
            .iter()
            .map(|(binding, bytes)| {
                let buffer = gpu
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("kdev_scalar"),
                        contents: bytes,
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                (*binding, buffer)
            })
            .collect();
        let vertex_buf = vertices.map(|v| {
            gpu.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("kdev_vertices"),
                    contents: bytemuck::cast_slice(v.coords),
                    usage: wgpu::BufferUsages::STORAGE,
                })
        });

        let mut arg_entries: Vec<wgpu::BindGroupEntry<'_>> = uniforms
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        arg_entries.extend(storage.iter().map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: *binding,
            resource: buffer.as_entire_binding(),
        }));
        arg_entries.sort_by_key(|e| e.binding);

        let group_count = if vertex_buf.is_some() {
            2
        } else if entry.group(ARG_GROUP).next().is_some() {
            1
        } else {
            0
        };
        let mut bind_groups = Vec::with_capacity(group_count);
        for group in 0..group_count as u32 {
            let entries: Vec<wgpu::BindGroupEntry<'_>> = if group == VERTEX_GROUP {
                vertex_buf
                    .iter()
                    .map(|buffer| wgpu::BindGroupEntry {
                        binding: VERTEX_BINDING,
                        resource: buffer.as_entire_binding(),
                    })
                    .collect()
            } else {
                std::mem::take(&mut arg_entries)
            };
            let layout = pipeline.get_bind_group_layout(group);
            bind_groups.push(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("kdev_args"),
                layout: &layout,
                entries: &entries,
            }));
        }

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kdev_dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(entry.name.as_str()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            for (group, bind_group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(group as u32, bind_group, &[]);
            }
            let grid = geometry.grid;
            pass.dispatch_workgroups(grid.x, grid.y, grid.z);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.wait();
        Ok(())
    }

    /// Binding on `buf`, erroring if it belongs to another backend.
    fn own_binding(&self, buf: &HostBuffer) -> Result<bool> {
        match buf.device() {
            None => Ok(false),
            Some(b) if b.backend == self.kind => Ok(true),
            Some(b) => Err(DeviceError::WrongBackend {
                expected: self.kind.name(),
                found: b.backend.name(),
            }),
        }
    }
}

/// Host-side launch checks. Nothing here touches the device.
pub(crate) fn check_launch<'m>(
    module: &'m KernelModule,
    entry: &str,
    geometry: &LaunchGeometry,
    args: &KernelArgs<'_>,
    vertices: Option<&VertexBuffer<'_>>,
) -> Result<&'m EntryPointInfo> {
    geometry.validate()?;
    args.validate()?;

    let ep = module
        .entry_point(entry)
        .ok_or_else(|| DeviceError::UnknownEntryPoint(entry.to_owned()))?;

    if geometry.block.as_array() != ep.workgroup_size {
        return Err(DeviceError::InvalidGeometry(format!(
            "block {} does not match @workgroup_size{:?} of `{entry}`",
            geometry.block, ep.workgroup_size
        )));
    }

    let shared = (ep.workgroup_memory as usize).saturating_add(geometry.shared_mem_bytes);
    if shared > MAX_WORKGROUP_STORAGE {
        return Err(DeviceError::InvalidGeometry(format!(
            "{shared} bytes of workgroup memory exceeds the {MAX_WORKGROUP_STORAGE}-byte limit"
        )));
    }

    let mut uses_vertices = false;
    for b in &ep.bindings {
        if b.group == VERTEX_GROUP && b.binding == VERTEX_BINDING {
            if !matches!(b.kind, BindingKind::Storage { .. }) {
                return Err(DeviceError::VertexMismatch(format!(
                    "`{entry}` declares the vertex binding as {:?}, expected storage",
                    b.kind
                )));
            }
            uses_vertices = true;
            continue;
        }
        if b.group != ARG_GROUP {
            return Err(DeviceError::ArgumentMismatch(format!(
                "`{entry}` uses @group({}) @binding({}), which no argument feeds",
                b.group, b.binding
            )));
        }
        let i = b.binding as usize;
        if i >= args.len() {
            return Err(DeviceError::ArgumentMismatch(format!(
                "`{entry}` uses binding {i} but only {} arguments were passed",
                args.len()
            )));
        }
        match (b.kind, args.is_buffer[i]) {
            (BindingKind::Uniform, false) => {
                let declared = b.size as usize;
                if args.sizes[i] != declared || args.values[i].len() != declared {
                    return Err(DeviceError::ArgumentMismatch(format!(
                        "argument {i} is {} bytes ({} given) but `{entry}` declares {declared}",
                        args.sizes[i],
                        args.values[i].len()
                    )));
                }
            }
            (BindingKind::Storage { .. }, true) => {
                args.handle(i)?;
            }
            (kind, is_buffer) => {
                return Err(DeviceError::ArgumentMismatch(format!(
                    "argument {i} is a {} but `{entry}` binds it as {kind:?}",
                    if is_buffer { "buffer" } else { "scalar" }
                )));
            }
        }
    }

    match (vertices.filter(|v| !v.is_empty()), uses_vertices) {
        (Some(v), true) => v.validate()?,
        (Some(_), false) => {
            return Err(DeviceError::VertexMismatch(format!(
                "`{entry}` takes no vertex buffer"
            )))
        }
        (None, true) => {
            return Err(DeviceError::VertexMismatch(format!(
                "`{entry}` requires a vertex buffer"
            )))
        }
        (None, false) => {}
    }

    Ok(ep)
}

/// Reject native buffers that cannot serve as storage and transfer target.
pub(crate) fn check_native_usage(usage: wgpu::BufferUsages) -> Result<()> {
    if usage.contains(NATIVE_USAGE) {
        Ok(())
    } else {
        Err(DeviceError::IncompatibleBuffer(format!(
            "usage {usage:?} lacks {:?}",
            NATIVE_USAGE.difference(usage)
        )))
    }
}

fn create_gpu(kind: BackendKind, ctx: &Context, generation: u64) -> Result<Gpu> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: kind.backends(),
        ..Default::default()
    });
    let adapter = select_adapter(&instance, kind, ctx)?;
    let info = adapter.get_info();
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("kdev"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
        },
        None,
    ))
    .map_err(|e| DeviceError::Unavailable(format!("{} ({e})", kind.name())))?;
    device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
        tracing::error!("uncaptured wgpu error: {err}");
    }));
    tracing::info!(
        ctx = ctx.label(),
        backend = kind.name(),
        adapter = %AdapterSummary::from(&info),
        "acquired device"
    );
    Ok(Gpu {
        device,
        queue,
        info,
        generation,
        scopes: Mutex::new(()),
    })
}

fn select_adapter(instance: &wgpu::Instance, kind: BackendKind, ctx: &Context) -> Result<wgpu::Adapter> {
    let platform = config::platform_name(ctx);
    let device_type = config::device_type(ctx);

    if platform.is_none() && device_type.is_none() {
        return pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| DeviceError::Unavailable(kind.name().to_owned()));
    }

    instance
        .enumerate_adapters(kind.backends())
        .into_iter()
        .find(|adapter| {
            let info = adapter.get_info();
            platform
                .as_deref()
                .map_or(true, |p| config::platform_matches(p, &info.name, &info.driver))
                && device_type.map_or(true, |t| t.matches(info.device_type))
        })
        .ok_or_else(|| {
            DeviceError::Unavailable(format!(
                "{} adapter matching platform {:?} and device type {:?}",
                kind.name(),
                platform,
                device_type.map(|t| t.as_str())
            ))
        })
}

impl DeviceInterface for WgpuDevice {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn initialize_kernels(
        &self,
        ctx: &Context,
        slot: &KernelSlot,
        source: &[u8],
    ) -> Result<Arc<KernelModule>> {
        let _span = tracing::debug_span!(
            "initialize_kernels",
            ctx = ctx.label(),
            backend = self.kind.name()
        )
        .entered();
        slot.get_or_try_init(|| {
            let module = KernelModule::compile(source)?;
            tracing::debug!(
                module = module.id(),
                digest = %module.digest(),
                entry_points = module.entry_points().len(),
                "compiled kernel module"
            );
            Ok(module)
        })
    }

    fn run(
        &self,
        ctx: &Context,
        module: &KernelModule,
        entry: &str,
        geometry: &LaunchGeometry,
        args: &KernelArgs<'_>,
        vertices: Option<&VertexBuffer<'_>>,
    ) -> Result<()> {
        let _span = tracing::debug_span!(
            "run",
            ctx = ctx.label(),
            module = module.id(),
            entry,
            grid = %geometry.grid,
            block = %geometry.block
        )
        .entered();

        let vertices = vertices.filter(|v| !v.is_empty());
        let ep = check_launch(module, entry, geometry, args, vertices)?;

        let gpu = self.gpu(ctx)?;
        let max = gpu.device.limits().max_compute_workgroups_per_dimension;
        if geometry.grid.as_array().iter().any(|&n| n > max) {
            return Err(DeviceError::InvalidGeometry(format!(
                "grid {} exceeds {max} workgroups per dimension",
                geometry.grid
            )));
        }

        let _scopes = gpu.scopes.lock();
        let pipeline = self.pipeline(&gpu, module, entry)?;
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let submitted = self.encode_and_submit(&gpu, &pipeline, ep, geometry, args, vertices);
        let scope = pollster::block_on(gpu.device.pop_error_scope());
        submitted?;
        if let Some(err) = scope {
            return Err(DeviceError::Launch(err.to_string()));
        }
        tracing::debug!(
            entry,
            invocations = geometry.grid.volume().saturating_mul(geometry.block.volume()),
            "kernel complete"
        );
        Ok(())
    }

    fn wrap(&self, ctx: &Context, buf: &mut HostBuffer, handle: DeviceHandle) -> Result<()> {
        let _span = tracing::debug_span!("wrap", ctx = ctx.label()).entered();
        self.bindings.wrap(buf, handle)
    }

    fn detach(&self, ctx: &Context, buf: &mut HostBuffer) -> Option<DeviceHandle> {
        let _span = tracing::debug_span!("detach", ctx = ctx.label()).entered();
        self.bindings.detach(buf)
    }

    fn get(&self, _ctx: &Context, buf: &HostBuffer) -> Option<DeviceHandle> {
        self.bindings.get(buf)
    }

    fn device_malloc(&self, ctx: &Context, buf: &mut HostBuffer) -> Result<()> {
        if self.own_binding(buf)? {
            return Ok(());
        }
        let gpu = self.gpu(ctx)?;
        let size = align_up(buf.size_in_bytes() as u64).max(COPY_ALIGN);
        if size > gpu.device.limits().max_buffer_size {
            return Err(DeviceError::OutOfResources(format!(
                "{size}-byte buffer exceeds the device maximum"
            )));
        }

        let scopes = gpu.scopes.lock();
        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kdev_buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let scope = pollster::block_on(gpu.device.pop_error_scope());
        drop(scopes);
        if let Some(err) = scope {
            return Err(DeviceError::OutOfResources(err.to_string()));
        }

        let handle = self.memory.insert(buffer)?;
        if let Err(e) = self.bindings.bind_allocated(buf, handle) {
            if let Some(buffer) = self.memory.remove(handle) {
                buffer.destroy();
            }
            return Err(e);
        }
        tracing::debug!(ctx = ctx.label(), %handle, size, "allocated device memory");
        Ok(())
    }

    fn device_free(&self, ctx: &Context, buf: &mut HostBuffer) -> Result<()> {
        if !self.own_binding(buf)? {
            return Ok(());
        }
        match self.bindings.unbind(buf) {
            Some((handle, Origin::Allocated)) => {
                if let Some(buffer) = self.memory.remove(handle) {
                    buffer.destroy();
                }
                tracing::debug!(ctx = ctx.label(), %handle, "freed device memory");
            }
            Some((handle, Origin::Wrapped)) => {
                tracing::debug!(ctx = ctx.label(), %handle, "released wrapped memory without freeing");
            }
            None => {}
        }
        buf.device_dirty = false;
        Ok(())
    }

    fn copy_to_device(&self, ctx: &Context, buf: &mut HostBuffer) -> Result<()> {
        let handle = self.bindings.require(buf)?;
        let target = self.memory.get(handle)?;
        let gpu = self.gpu(ctx)?;

        let bytes = buf.host_bytes();
        let data: Cow<'_, [u8]> = if bytes.len() as u64 % COPY_ALIGN == 0 {
            Cow::Borrowed(bytes)
        } else {
            let mut padded = bytes.to_vec();
            padded.resize(align_up(bytes.len() as u64) as usize, 0);
            Cow::Owned(padded)
        };
        if data.len() as u64 > target.size() {
            return Err(DeviceError::Transfer(format!(
                "{} host bytes do not fit in {}-byte device buffer {handle}",
                bytes.len(),
                target.size()
            )));
        }
        let scopes = gpu.scopes.lock();
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        if !data.is_empty() {
            gpu.queue.write_buffer(&target, 0, &data);
        }
        gpu.queue.submit(std::iter::empty());
        let scope = pollster::block_on(gpu.device.pop_error_scope());
        drop(scopes);
        if let Some(err) = scope {
            return Err(DeviceError::Transfer(err.to_string()));
        }
        gpu.wait();
        buf.host_dirty = false;
        Ok(())
    }

    fn copy_to_host(&self, ctx: &Context, buf: &mut HostBuffer) -> Result<()> {
        let handle = self.bindings.require(buf)?;
        let source = self.memory.get(handle)?;
        let gpu = self.gpu(ctx)?;

        let len = buf.size_in_bytes();
        let size = align_up(len as u64);
        if size > source.size() {
            return Err(DeviceError::Transfer(format!(
                "{len}-byte host buffer is larger than device buffer {handle}"
            )));
        }
        if len > 0 {
            let scopes = gpu.scopes.lock();
            gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("kdev_staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("kdev_readback"),
                });
            encoder.copy_buffer_to_buffer(&source, 0, &staging, 0, size);
            gpu.queue.submit(std::iter::once(encoder.finish()));
            let scope = pollster::block_on(gpu.device.pop_error_scope());
            drop(scopes);
            if let Some(err) = scope {
                return Err(DeviceError::Transfer(err.to_string()));
            }

            let slice = staging.slice(..);
            let (tx, rx) = std::sync::mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
            gpu.wait();
            rx.recv()
                .map_err(|_| DeviceError::Transfer("readback channel closed".into()))?
                .map_err(|e| DeviceError::Transfer(e.to_string()))?;

            let data = slice.get_mapped_range();
            buf.host_bytes_mut().copy_from_slice(&data[..len]);
            drop(data);
            staging.unmap();
        }
        buf.device_dirty = false;
        Ok(())
    }

    fn device_sync(&self, _ctx: &Context) -> Result<()> {
        if let Some(gpu) = self.gpu.lock().as_ref() {
            gpu.wait();
        }
        Ok(())
    }

    fn device_release(&self, ctx: &Context) -> Result<()> {
        // Held until the generation moves so `gpu()` cannot build a device
        // under the old generation.
        let mut slot = self.gpu.lock();
        let Some(gpu) = slot.take() else {
            return Ok(());
        };
        gpu.wait();
        let allocated = self.bindings.drain_allocated();
        for &handle in &allocated {
            if let Some(buffer) = self.memory.remove(handle) {
                buffer.destroy();
            }
        }
        if !allocated.is_empty() {
            tracing::warn!(
                ctx = ctx.label(),
                freed = allocated.len(),
                "device released with live allocations; their buffers now dangle"
            );
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(slot);
        tracing::debug!(
            ctx = ctx.label(),
            backend = self.kind.name(),
            wrapped = self.bindings.len(),
            "released device"
        );
        Ok(())
    }
}
