//! WGSL front end: parse, validate, and reflect compute entry points.
//!
//! The launch calling convention is read straight off the validated
//! module. For each `@compute` entry point we record the workgroup size,
//! the static workgroup memory it declares, and every resource binding it
//! statically uses. Bindings it does not touch are absent, matching the
//! automatic pipeline layout wgpu derives for the same entry point.

use std::fmt;
use std::ops::Range;

use crate::error::CompileError;

/// Bind group carrying kernel arguments; argument `i` is binding `i`.
pub const ARG_GROUP: u32 = 0;
/// Bind group carrying the vertex buffer in vertex mode.
pub const VERTEX_GROUP: u32 = 1;
/// Binding of the vertex buffer inside [`VERTEX_GROUP`].
pub const VERTEX_BINDING: u32 = 0;

/// How a global resource is bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    /// `var<uniform>`: scalar arguments.
    Uniform,
    /// `var<storage, ...>`: device buffers.
    Storage { read_only: bool },
    /// Textures, samplers, and other handles; no argument maps to these.
    Opaque,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingInfo {
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
    pub name: Option<String>,
    /// Declared size in bytes; for runtime-sized arrays, the element stride.
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPointInfo {
    pub name: String,
    pub workgroup_size: [u32; 3],
    /// Bytes of `var<workgroup>` storage the entry point uses.
    pub workgroup_memory: u32,
    /// Sorted by (group, binding).
    pub bindings: Vec<BindingInfo>,
}

impl EntryPointInfo {
    pub fn binding(&self, group: u32, binding: u32) -> Option<&BindingInfo> {
        self.bindings
            .iter()
            .find(|b| b.group == group && b.binding == binding)
    }

    pub fn group(&self, group: u32) -> impl Iterator<Item = &BindingInfo> {
        self.bindings.iter().filter(move |b| b.group == group)
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::Uniform => f.write_str("uniform"),
            BindingKind::Storage { read_only: true } => f.write_str("storage, read"),
            BindingKind::Storage { read_only: false } => f.write_str("storage, read_write"),
            BindingKind::Opaque => f.write_str("opaque"),
        }
    }
}

/// One header line, then one indented line per binding.
impl fmt::Display for EntryPointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.workgroup_size;
        write!(f, "{} @workgroup_size({x}, {y}, {z})", self.name)?;
        if self.workgroup_memory > 0 {
            write!(f, " workgroup {} B", self.workgroup_memory)?;
        }
        for b in &self.bindings {
            write!(
                f,
                "\n  @group({}) @binding({}) {} <{}> {} B",
                b.group,
                b.binding,
                b.name.as_deref().unwrap_or("_"),
                b.kind,
                b.size
            )?;
        }
        Ok(())
    }
}

/// Parse and validate WGSL, returning its compute entry points.
pub fn reflect_wgsl(source: &str) -> Result<Vec<EntryPointInfo>, CompileError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        let mut err = CompileError::new(e.message());
        for (span, label) in e.labels() {
            if let Some(range) = span.to_range() {
                err = err.with_label(range, label);
            }
        }
        err
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    );
    let info = validator.validate(&module).map_err(|e| {
        let mut message = e.as_inner().to_string();
        let mut cause = std::error::Error::source(e.as_inner());
        while let Some(inner) = cause {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            cause = inner.source();
        }
        let mut err = CompileError::new(message);
        for (span, label) in e.spans() {
            if let Some(range) = span.to_range() {
                err = err.with_label(range, label.clone());
            }
        }
        err
    })?;

    let gctx = module.to_ctx();
    let mut entries = Vec::new();
    for (index, ep) in module.entry_points.iter().enumerate() {
        if ep.stage != naga::ShaderStage::Compute {
            continue;
        }
        let uses = info.get_entry_point(index);
        let mut bindings = Vec::new();
        let mut workgroup_memory = 0u32;
        for (handle, var) in module.global_variables.iter() {
            if uses[handle].is_empty() {
                continue;
            }
            let size = module.types[var.ty].inner.size(gctx);
            if var.space == naga::AddressSpace::WorkGroup {
                workgroup_memory = workgroup_memory.saturating_add(size);
                continue;
            }
            let Some(rb) = &var.binding else { continue };
            let kind = match var.space {
                naga::AddressSpace::Uniform => BindingKind::Uniform,
                naga::AddressSpace::Storage { access } => BindingKind::Storage {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                _ => BindingKind::Opaque,
            };
            bindings.push(BindingInfo {
                group: rb.group,
                binding: rb.binding,
                kind,
                name: var.name.clone(),
                size,
            });
        }
        bindings.sort_by_key(|b| (b.group, b.binding));
        entries.push(EntryPointInfo {
            name: ep.name.clone(),
            workgroup_size: ep.workgroup_size,
            workgroup_memory,
            bindings,
        });
    }

    if entries.is_empty() {
        return Err(CompileError::new("module has no @compute entry point"));
    }
    Ok(entries)
}

/// Decode kernel source bytes. Trailing NULs from C-style blobs are ignored.
pub fn source_text(bytes: &[u8]) -> Result<&str, CompileError> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let bytes = &bytes[..end];
    std::str::from_utf8(bytes).map_err(|e| {
        let at = e.valid_up_to();
        let bad: Range<usize> = at..(at + e.error_len().unwrap_or(1)).min(bytes.len());
        CompileError::new("kernel source is not valid UTF-8").with_label(bad, "invalid byte")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAXPY: &str = r#"
@group(0) @binding(0) var<uniform> a: f32;
@group(0) @binding(1) var<storage, read> x: array<f32>;
@group(0) @binding(2) var<storage, read_write> y: array<f32>;

@compute @workgroup_size(64)
fn saxpy(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&y)) {
        y[i] = a * x[i] + y[i];
    }
}

@compute @workgroup_size(8, 8, 1)
fn clear(@builtin(global_invocation_id) gid: vec3<u32>) {
    y[gid.x] = 0.0;
}
"#;

    #[test]
    fn reflects_entry_points_and_bindings() {
        let eps = reflect_wgsl(SAXPY).unwrap();
        assert_eq!(eps.len(), 2);

        let saxpy = &eps[0];
        assert_eq!(saxpy.name, "saxpy");
        assert_eq!(saxpy.workgroup_size, [64, 1, 1]);
        assert_eq!(saxpy.bindings.len(), 3);
        assert_eq!(saxpy.bindings[0].kind, BindingKind::Uniform);
        assert_eq!(saxpy.bindings[0].size, 4);
        assert_eq!(
            saxpy.bindings[1].kind,
            BindingKind::Storage { read_only: true }
        );
        assert_eq!(
            saxpy.bindings[2].kind,
            BindingKind::Storage { read_only: false }
        );

        // `clear` only touches y.
        let clear = &eps[1];
        assert_eq!(clear.workgroup_size, [8, 8, 1]);
        assert_eq!(clear.bindings.len(), 1);
        assert_eq!(clear.bindings[0].binding, 2);
        assert!(clear.binding(0, 0).is_none());
    }

    #[test]
    fn workgroup_memory_is_counted() {
        let src = r#"
var<workgroup> tile: array<f32, 256>;

@compute @workgroup_size(16)
fn main(@builtin(local_invocation_index) li: u32) {
    tile[li] = 1.0;
}
"#;
        let eps = reflect_wgsl(src).unwrap();
        assert_eq!(eps[0].workgroup_memory, 1024);
        assert!(eps[0].bindings.is_empty());
    }

    #[test]
    fn parse_error_has_labels() {
        let err = reflect_wgsl("@compute @workgroup_size(1) fn main( {").unwrap_err();
        assert!(!err.message.is_empty());
        assert!(!err.labels.is_empty());
    }

    #[test]
    fn validation_error_is_reported() {
        // Parses, but assigns a float to an i32.
        let src = r#"
@compute @workgroup_size(1)
fn main() {
    var x: i32 = 1.5;
}
"#;
        assert!(reflect_wgsl(src).is_err());
    }

    #[test]
    fn graphics_only_module_is_rejected() {
        let src = r#"
@vertex
fn vs(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(i), 0.0, 0.0, 1.0);
}
"#;
        let err = reflect_wgsl(src).unwrap_err();
        assert!(err.message.contains("no @compute entry point"));
    }

    #[test]
    fn source_text_strips_nul_and_checks_utf8() {
        assert_eq!(source_text(b"fn f() {}\0\0").unwrap(), "fn f() {}");
        assert_eq!(source_text(b"").unwrap(), "");
        let err = source_text(b"ok\xff\xfe").unwrap_err();
        assert_eq!(err.labels[0].0, 2..3);
    }
}
