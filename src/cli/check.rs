use std::path::PathBuf;
use std::process;

use clap::Args;
use kdev::device::gpu::MAX_WORKGROUP_STORAGE;
use kdev::diagnostic::{render_diagnostics, Diagnostic};
use kdev::kernel::reflect::ARG_GROUP;
use kdev::KernelModule;

use super::{read_source, report_error};

#[derive(Args)]
pub struct CheckArgs {
    /// WGSL kernel file
    pub input: PathBuf,
}

pub fn cmd_check(args: CheckArgs) {
    let source = read_source(&args.input);
    match KernelModule::compile(&source) {
        Ok(module) => {
            for ep in module.entry_points() {
                println!("{ep}");
            }
            let text = String::from_utf8_lossy(&source);
            let warnings = launch_warnings(&module, &text);
            render_diagnostics(&warnings, &args.input.display().to_string(), &text);
            eprintln!("OK: {} ({})", args.input.display(), module.digest().to_hex());
        }
        Err(e) => {
            report_error(&args.input, &source, &e.into());
            process::exit(1);
        }
    }
}

/// Entry points that compile but cannot be launched as written.
fn launch_warnings(module: &KernelModule, source: &str) -> Vec<Diagnostic> {
    let mut warnings = Vec::new();
    for ep in module.entry_points() {
        let decl = format!("fn {}", ep.name);
        let at = source.find(&decl).map(|start| start..start + decl.len());
        let mut push = |diag: Diagnostic| {
            warnings.push(match &at {
                Some(range) => diag.with_label(range.clone(), "declared here".into()),
                None => diag,
            });
        };

        if ep.workgroup_memory as usize > MAX_WORKGROUP_STORAGE {
            push(
                Diagnostic::warning(format!(
                    "`{}` uses {} bytes of workgroup memory",
                    ep.name, ep.workgroup_memory
                ))
                .with_note(format!("launches fail above {MAX_WORKGROUP_STORAGE} bytes")),
            );
        }

        // Argument i binds to @binding(i), so a gap is an argument no launch can fill.
        for (expected, b) in ep.group(ARG_GROUP).enumerate() {
            if b.binding != expected as u32 {
                push(
                    Diagnostic::warning(format!(
                        "`{}` skips @group({ARG_GROUP}) @binding({expected})",
                        ep.name
                    ))
                    .with_help(format!(
                        "renumber `{}` to @binding({expected}); arguments bind in order",
                        b.name.as_deref().unwrap_or("the next binding")
                    )),
                );
                break;
            }
        }
    }
    warnings
}
