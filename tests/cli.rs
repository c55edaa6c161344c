use std::fs;
use std::process::Command;

use tempfile::tempdir;

const KERNEL: &str = r#"
@group(0) @binding(0) var<uniform> n: u32;
@group(0) @binding(1) var<storage, read_write> out: array<u32>;

@compute @workgroup_size(4)
fn iota(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < n) {
        out[gid.x] = gid.x;
    }
}
"#;

#[test]
fn check_lists_entry_points() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("iota.wgsl");
    fs::write(&path, KERNEL).expect("write kernel");

    let output = Command::new(env!("CARGO_BIN_EXE_kdev"))
        .arg("check")
        .arg(&path)
        .output()
        .expect("spawn kdev");

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("iota @workgroup_size(4, 1, 1)"), "{stdout}");
    assert!(stdout.contains("@group(0) @binding(1) out <storage, read_write> 4 B"));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("OK:"), "{stderr}");
}

#[test]
fn check_reports_compile_errors() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.wgsl");
    fs::write(&path, "@compute @workgroup_size(1)\nfn main( {\n").expect("write kernel");

    let output = Command::new(env!("CARGO_BIN_EXE_kdev"))
        .arg("check")
        .arg(&path)
        .output()
        .expect("spawn kdev");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("broken.wgsl"), "{stderr}");
}

#[test]
fn run_rejects_bad_device_type() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("iota.wgsl");
    fs::write(&path, KERNEL).expect("write kernel");

    let output = Command::new(env!("CARGO_BIN_EXE_kdev"))
        .args(["--device-type", "fpga", "run"])
        .arg(&path)
        .args(["--entry", "iota"])
        .output()
        .expect("spawn kdev");

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn run_fails_fast_on_zero_grid() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("iota.wgsl");
    fs::write(&path, KERNEL).expect("write kernel");

    let output = Command::new(env!("CARGO_BIN_EXE_kdev"))
        .arg("run")
        .arg(&path)
        .args(["--entry", "iota", "--grid", "0", "--block", "4"])
        .args(["--arg", "u32:4"])
        .output()
        .expect("spawn kdev");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("grid.x is zero"), "{stderr}");
}

#[test]
fn check_warns_about_binding_gaps() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("gap.wgsl");
    fs::write(
        &path,
        "@group(0) @binding(1) var<storage, read_write> out: array<u32>;\n\
         @compute @workgroup_size(1)\nfn gap() { out[0] = 7u; }\n",
    )
    .expect("write kernel");

    let output = Command::new(env!("CARGO_BIN_EXE_kdev"))
        .arg("check")
        .arg(&path)
        .output()
        .expect("spawn kdev");

    assert!(output.status.success(), "{output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("skips @group(0) @binding(0)"), "{stderr}");
    assert!(stderr.contains("OK:"), "{stderr}");
}
