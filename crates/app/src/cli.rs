use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::explorer::{
    self, CaptureBackend, ExplorerCliArgs, ExplorerConfig, TelemetryOptions, backends, telemetry,
};

/// Nemo: a two-camera robot that narrates what it sees.
#[derive(Debug, Parser)]
#[command(name = "nemo", version, about, long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run capture, detection, narration and the web gateway.
    Explore(ExplorerCliArgs),
    /// Report which camera device indices open and deliver frames.
    Cameras {
        #[arg(long = "capture-backend", value_enum, default_value_t = CaptureBackend::Ffmpeg)]
        backend: CaptureBackend,
        #[arg(long = "width", value_name = "PX", default_value_t = 640)]
        width: i32,
        #[arg(long = "height", value_name = "PX", default_value_t = 480)]
        height: i32,
    },
}

pub(crate) fn handle_commands(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Explore(args) => explorer::run(ExplorerConfig::try_from(args)?),
        Command::Cameras {
            backend,
            width,
            height,
        } => {
            let _telemetry_guard = telemetry::enter_runtime(&TelemetryOptions::default());
            for (index, works) in backends::probe_cameras(backend, (width, height)) {
                let verdict = if works { "ok" } else { "no frames" };
                println!("/dev/video{index}: {verdict}");
            }
            Ok(())
        }
    }
}
