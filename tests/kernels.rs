use std::sync::Arc;

use kdev::{
    renderscript_device_interface, status, ArgPack, Context, DeviceError, Dim3, ErrorKind,
    KernelArgs, KernelSlot, LaunchGeometry, VertexBuffer,
};

const KERNEL: &str = r#"
@group(0) @binding(0) var<uniform> value: i32;
@group(0) @binding(1) var<storage, read_write> out: array<i32>;

@compute @workgroup_size(4)
fn fill(@builtin(local_invocation_index) i: u32) {
    out[i] = value + i32(i);
}
"#;

fn geometry(grid: [u32; 3], block: [u32; 3]) -> LaunchGeometry {
    LaunchGeometry::new(Dim3::from(grid), Dim3::from(block), 0)
}

#[test]
fn initialize_kernels_is_idempotent() {
    let ctx = Context::with_label("kernels");
    let dev = renderscript_device_interface();
    let slot = KernelSlot::new();

    let first = dev.initialize_kernels(&ctx, &slot, KERNEL.as_bytes()).unwrap();
    // Different source is ignored once the slot is filled.
    let second = dev.initialize_kernels(&ctx, &slot, b"garbage").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.id(), second.id());
    assert_eq!(first.entry_points()[0].name, "fill");
}

#[test]
fn failed_compile_leaves_slot_empty_for_retry() {
    let ctx = Context::new();
    let dev = renderscript_device_interface();
    let slot = KernelSlot::new();

    let bad = dev.initialize_kernels(&ctx, &slot, b"fn broken( {");
    assert_eq!(bad.as_ref().map_err(DeviceError::kind).err(), Some(ErrorKind::Compilation));
    assert_ne!(status(&bad), 0);
    assert!(slot.is_empty());

    let good = dev.initialize_kernels(&ctx, &slot, KERNEL.as_bytes());
    assert_eq!(status(&good), 0);
    assert!(!slot.is_empty());
}

#[test]
fn trailing_nul_in_source_is_accepted() {
    let ctx = Context::new();
    let dev = renderscript_device_interface();
    let slot = KernelSlot::new();
    let mut blob = KERNEL.as_bytes().to_vec();
    blob.push(0);
    assert!(dev.initialize_kernels(&ctx, &slot, &blob).is_ok());
}

#[test]
fn zero_geometry_fails_before_launch() {
    let ctx = Context::new();
    let dev = renderscript_device_interface();
    let slot = KernelSlot::new();
    let module = dev.initialize_kernels(&ctx, &slot, KERNEL.as_bytes()).unwrap();

    let cases = [
        ([0, 1, 1], [4, 1, 1]),
        ([1, 0, 1], [4, 1, 1]),
        ([1, 1, 0], [4, 1, 1]),
        ([1, 1, 1], [0, 1, 1]),
        ([1, 1, 1], [4, 0, 1]),
        ([1, 1, 1], [4, 1, 0]),
    ];
    for (grid, block) in cases {
        let result = dev.run(
            &ctx,
            &module,
            "fill",
            &geometry(grid, block),
            &KernelArgs::empty(),
            None,
        );
        assert!(
            matches!(result, Err(DeviceError::InvalidGeometry(_))),
            "grid {grid:?} block {block:?}: {result:?}"
        );
    }
}

#[test]
fn mismatched_argument_lengths_fail() {
    let ctx = Context::new();
    let dev = renderscript_device_interface();
    let slot = KernelSlot::new();
    let module = dev.initialize_kernels(&ctx, &slot, KERNEL.as_bytes()).unwrap();

    let value = 42i32.to_le_bytes();
    let values: [&[u8]; 1] = [&value];
    let args = KernelArgs::new(&[4, 8], &values, &[false]);
    let result = dev.run(&ctx, &module, "fill", &geometry([1, 1, 1], [4, 1, 1]), &args, None);
    assert!(matches!(result, Err(DeviceError::ArgumentMismatch(_))), "{result:?}");
    assert_eq!(status(&result), -5);
}

#[test]
fn unknown_entry_point_has_nonzero_status() {
    let ctx = Context::new();
    let dev = renderscript_device_interface();
    let slot = KernelSlot::new();
    let module = dev.initialize_kernels(&ctx, &slot, KERNEL.as_bytes()).unwrap();

    let result = ArgPack::new().scalar(42i32).with_args(|args| {
        dev.run(&ctx, &module, "nonexistent", &geometry([1, 1, 1], [4, 1, 1]), &args, None)
    });
    assert!(matches!(&result, Err(DeviceError::UnknownEntryPoint(name)) if name == "nonexistent"));
    assert_ne!(status(&result), 0);
}

#[test]
fn block_must_equal_workgroup_size() {
    let ctx = Context::new();
    let dev = renderscript_device_interface();
    let slot = KernelSlot::new();
    let module = dev.initialize_kernels(&ctx, &slot, KERNEL.as_bytes()).unwrap();

    let result = ArgPack::new().scalar(42i32).with_args(|args| {
        dev.run(&ctx, &module, "fill", &geometry([1, 1, 1], [8, 1, 1]), &args, None)
    });
    assert!(matches!(result, Err(DeviceError::InvalidGeometry(_))), "{result:?}");
}

#[test]
fn vertex_buffer_on_plain_kernel_is_rejected() {
    let ctx = Context::new();
    let dev = renderscript_device_interface();
    let slot = KernelSlot::new();
    let module = dev.initialize_kernels(&ctx, &slot, KERNEL.as_bytes()).unwrap();

    let coords = [0.0f32; 8];
    let verts = VertexBuffer::new(&coords, 2, 2);
    let handle = kdev::DeviceHandle::from_raw(0x1234).unwrap();
    let result = ArgPack::new().scalar(1i32).buffer(handle).with_args(|args| {
        dev.run(&ctx, &module, "fill", &geometry([1, 1, 1], [4, 1, 1]), &args, Some(&verts))
    });
    assert!(matches!(result, Err(DeviceError::VertexMismatch(_))), "{result:?}");
}
