//! Pins the entry-point listing `kdev check` prints.

use kdev::KernelModule;

const TILED: &str = r#"
@group(0) @binding(0) var<uniform> scale: f32;
@group(0) @binding(1) var<storage, read> src: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
var<workgroup> tile: array<f32, 64>;

@compute @workgroup_size(64)
fn scale_tile(
    @builtin(local_invocation_index) i: u32,
    @builtin(global_invocation_id) gid: vec3<u32>,
) {
    tile[i] = src[gid.x] * scale;
    workgroupBarrier();
    dst[gid.x] = tile[63u - i];
}

@compute @workgroup_size(8, 8)
fn zero(@builtin(global_invocation_id) gid: vec3<u32>) {
    dst[gid.y * 8u + gid.x] = 0.0;
}
"#;

#[test]
fn entry_point_listing() {
    let module = KernelModule::compile(TILED.as_bytes()).unwrap();
    let listing = module
        .entry_points()
        .iter()
        .map(|ep| ep.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    insta::assert_snapshot!("entry_point_listing", listing);
}
