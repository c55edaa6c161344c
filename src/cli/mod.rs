pub mod check;
pub mod devices;
pub mod run;

use std::path::Path;
use std::process;

use kdev::diagnostic::Diagnostic;
use kdev::{DeviceError, Dim3};

/// Read a kernel file or exit.
pub fn read_source(path: &Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Print an error; compile errors get a source report.
pub fn report_error(path: &Path, source: &[u8], err: &DeviceError) {
    match err {
        DeviceError::Compile(compile) => {
            let text = String::from_utf8_lossy(source);
            Diagnostic::from(compile).render(&path.display().to_string(), &text);
        }
        other => eprintln!("error: {other}"),
    }
}

/// Parse `x[,y[,z]]`; omitted axes are 1.
pub fn parse_dim3(s: &str) -> Result<Dim3, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("expected x[,y[,z]], got '{s}'"));
    }
    let mut dims = [1u32; 3];
    for (slot, part) in dims.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|e| format!("bad extent '{part}': {e}"))?;
    }
    Ok(Dim3::from(dims))
}
