use std::path::PathBuf;
use std::process;

use clap::Args;
use kdev::{
    device_interface, ArgPack, BackendKind, Context, DeviceError, DeviceInterface, Dim3,
    HostBuffer, KernelSlot, LaunchGeometry, ScalarType,
};

use super::{parse_dim3, read_source, report_error};

#[derive(Args)]
pub struct RunArgs {
    /// WGSL kernel file
    pub input: PathBuf,
    /// Entry point to launch
    #[arg(long)]
    pub entry: String,
    /// Workgroups per axis, as x[,y[,z]]
    #[arg(long, value_parser = parse_dim3, default_value = "1")]
    pub grid: Dim3,
    /// Threads per workgroup; must equal the entry's @workgroup_size
    #[arg(long, value_parser = parse_dim3, default_value = "1")]
    pub block: Dim3,
    /// Extra workgroup memory in bytes
    #[arg(long, default_value_t = 0)]
    pub shared: usize,
    /// Kernel argument in binding order: i32:V, u32:V, f32:V, or buf:N
    #[arg(long = "arg", value_parser = parse_arg)]
    pub args: Vec<ArgSpec>,
    /// Backend to launch on
    #[arg(long, default_value = "primary")]
    pub backend: BackendKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArgSpec {
    I32(i32),
    U32(u32),
    F32(f32),
    /// Zeroed `u32` buffer with this many elements.
    Buffer(usize),
}

pub fn parse_arg(s: &str) -> Result<ArgSpec, String> {
    let (kind, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:VALUE, got '{s}'"))?;
    let bad = |e: &dyn std::fmt::Display| format!("bad {kind} value '{value}': {e}");
    match kind {
        "i32" => value.parse().map(ArgSpec::I32).map_err(|e| bad(&e)),
        "u32" => value.parse().map(ArgSpec::U32).map_err(|e| bad(&e)),
        "f32" => value.parse().map(ArgSpec::F32).map_err(|e| bad(&e)),
        "buf" => value.parse().map(ArgSpec::Buffer).map_err(|e| bad(&e)),
        other => Err(format!("unknown argument kind '{other}' (i32, u32, f32, buf)")),
    }
}

pub fn cmd_run(args: RunArgs) {
    let source = read_source(&args.input);
    let ctx = Context::with_label("kdev run");
    let device = device_interface(args.backend);

    let mut buffers = Vec::new();
    let result = launch(device, &ctx, &args, &source, &mut buffers);
    for (_, buf) in &mut buffers {
        if let Err(e) = device.device_free(&ctx, buf) {
            eprintln!("warning: freeing buffer: {e}");
        }
    }

    match result {
        Ok(()) => {
            for (index, buf) in &buffers {
                println!("arg {index}: {:?}", buf.to_vec::<u32>());
            }
            eprintln!("OK: {} grid {} block {}", args.entry, args.grid, args.block);
        }
        Err(e) => {
            report_error(&args.input, &source, &e);
            process::exit(1);
        }
    }
}

fn launch(
    device: &dyn DeviceInterface,
    ctx: &Context,
    args: &RunArgs,
    source: &[u8],
    buffers: &mut Vec<(usize, HostBuffer)>,
) -> Result<(), DeviceError> {
    let slot = KernelSlot::new();
    let module = device.initialize_kernels(ctx, &slot, source)?;

    let mut pack = ArgPack::new();
    for (index, spec) in args.args.iter().enumerate() {
        pack = match *spec {
            ArgSpec::I32(v) => pack.scalar(v),
            ArgSpec::U32(v) => pack.scalar(v),
            ArgSpec::F32(v) => pack.scalar(v),
            ArgSpec::Buffer(len) => {
                let mut buf = HostBuffer::new(ScalarType::U32, &[len])?;
                device.device_malloc(ctx, &mut buf)?;
                let bound = device.get(ctx, &buf);
                buffers.push((index, buf));
                let handle = bound.ok_or(DeviceError::NoDeviceMemory)?;
                if let Some((_, buf)) = buffers.last_mut() {
                    device.copy_to_device(ctx, buf)?;
                }
                pack.buffer(handle)
            }
        };
    }

    let geometry = LaunchGeometry::new(args.grid, args.block, args.shared);
    pack.with_args(|kargs| device.run(ctx, &module, &args.entry, &geometry, &kargs, None))?;

    for (_, buf) in buffers.iter_mut() {
        device.copy_to_host(ctx, buf)?;
    }
    Ok(())
}
