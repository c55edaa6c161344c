//! Device release and re-acquisition. Kept in its own test binary so no
//! other test is using the device when it is dropped.

use kdev::device::gpu::NATIVE_USAGE;
use kdev::{
    wgpu_device, ArgPack, BackendKind, Context, DeviceInterface, Dim3, HostBuffer, KernelSlot,
    LaunchGeometry, ScalarType,
};

const INC: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(2)
fn inc(@builtin(global_invocation_id) gid: vec3<u32>) {
    data[gid.x] = data[gid.x] + 1u;
}
"#;

#[test]
fn modules_survive_device_release() {
    let ctx = Context::with_label("release");
    let dev = wgpu_device(BackendKind::Primary);
    if dev.try_acquire(&ctx).is_none() {
        eprintln!("No GPU available, skipping test");
        return;
    }
    let slot = KernelSlot::new();
    let module = dev.initialize_kernels(&ctx, &slot, INC.as_bytes()).unwrap();
    let geometry = LaunchGeometry::new(Dim3::linear(1), Dim3::linear(2), 0);

    let launch = || {
        let mut buf = HostBuffer::from_slice(ScalarType::U32, &[5u32, 9]);
        dev.device_malloc(&ctx, &mut buf).unwrap();
        dev.copy_to_device(&ctx, &mut buf).unwrap();
        let handle = dev.get(&ctx, &buf).unwrap();
        ArgPack::new()
            .buffer(handle)
            .with_args(|args| dev.run(&ctx, &module, "inc", &geometry, &args, None))
            .unwrap();
        dev.copy_to_host(&ctx, &mut buf).unwrap();
        dev.device_free(&ctx, &mut buf).unwrap();
        buf.to_vec::<u32>()
    };

    assert_eq!(launch(), vec![6, 10]);
    assert_eq!(module.cached_pipelines(), 1);
    assert_eq!(dev.live_allocations(), 0);

    // A wrapped native buffer and a forgotten allocation across release.
    let gpu = dev.gpu(&ctx).unwrap();
    let native = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("caller_owned"),
        size: 8,
        usage: NATIVE_USAGE,
        mapped_at_creation: false,
    });
    drop(gpu);
    let imported = dev.import_native(&ctx, native).unwrap();
    let mut wrapped = HostBuffer::new(ScalarType::U32, &[2]).unwrap();
    dev.wrap(&ctx, &mut wrapped, imported).unwrap();
    let mut leaked = HostBuffer::new(ScalarType::U32, &[2]).unwrap();
    dev.device_malloc(&ctx, &mut leaked).unwrap();
    assert_eq!(dev.live_allocations(), 2);
    assert_eq!(dev.bindings().len(), 2);

    dev.device_sync(&ctx).unwrap();
    dev.device_release(&ctx).unwrap();

    // Backend-allocated memory is gone; the caller's buffer is untouched.
    assert_eq!(dev.live_allocations(), 1);
    assert_eq!(dev.bindings().len(), 1);
    assert_eq!(dev.get(&ctx, &wrapped), Some(imported));
    assert_eq!(dev.detach(&ctx, &mut wrapped), Some(imported));
    assert_eq!(dev.get(&ctx, &wrapped), None);
    assert_eq!(dev.take_native(&ctx, imported).unwrap().size(), 8);
    dev.device_free(&ctx, &mut leaked).unwrap();
    assert!(!leaked.has_device_memory());
    assert!(dev.bindings().is_empty());

    // Second release with nothing acquired is a no-op.
    dev.device_release(&ctx).unwrap();

    // The next launch acquires a fresh device and rebuilds the pipeline.
    assert_eq!(launch(), vec![6, 10]);
    assert_eq!(module.cached_pipelines(), 1);
    assert!(dev.bindings().is_empty());
}
