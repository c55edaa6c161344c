use std::process;

use clap::Args;
use kdev::{wgpu_device, BackendKind, Context, DeviceInterface};

#[derive(Args)]
pub struct DevicesArgs {
    /// Backend to query (default: all)
    #[arg(long)]
    pub backend: Option<BackendKind>,
}

pub fn cmd_devices(args: DevicesArgs) {
    let ctx = Context::with_label("kdev devices");
    let kinds = match args.backend {
        Some(kind) => vec![kind],
        None => BackendKind::ALL.to_vec(),
    };

    let mut found = 0;
    for kind in kinds {
        let device = wgpu_device(kind);
        match device.adapter_info(&ctx) {
            Ok(info) => {
                found += 1;
                println!("{:<8} {}", kind.name(), info);
            }
            Err(e) => println!("{:<8} unavailable: {}", kind.name(), e),
        }
        if let Err(e) = device.device_release(&ctx) {
            eprintln!("warning: releasing {kind}: {e}");
        }
    }

    if found == 0 {
        eprintln!("error: no adapter available");
        process::exit(1);
    }
}
