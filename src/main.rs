mod cli;

use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kdev", version, about = "Compile and launch WGSL compute kernels")]
struct Cli {
    /// Adapter name or driver substring (overrides KDEV_PLATFORM_NAME)
    #[arg(long, global = true)]
    platform: Option<String>,
    /// cpu, gpu, or acc (overrides KDEV_DEVICE_TYPE)
    #[arg(long, global = true)]
    device_type: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the adapter each backend selects
    Devices(cli::devices::DevicesArgs),
    /// Compile a kernel and list its compute entry points
    Check(cli::check::CheckArgs),
    /// Compile a kernel and launch one entry point
    Run(cli::run::RunArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.platform.is_some() {
        kdev::config::set_platform_name(cli.platform.as_deref());
    }
    if let Err(e) = kdev::config::set_device_type(cli.device_type.as_deref()) {
        eprintln!("error: {e}");
        process::exit(1);
    }

    match cli.command {
        Command::Devices(args) => cli::devices::cmd_devices(args),
        Command::Check(args) => cli::check::cmd_check(args),
        Command::Run(args) => cli::run::cmd_run(args),
    }
}
