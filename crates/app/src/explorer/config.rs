//! Configuration parsing for the explorer.
//!
//! This module owns translation of CLI arguments into an `ExplorerConfig`
//! which the loops use without re-parsing flags.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use video_ingest::parse_device_index;

use crate::explorer::state::PerCamera;

/// Pause after a failed capture, added to the capture interval.
pub(crate) const CAPTURE_BACKOFF: Duration = Duration::from_secs(1);
/// Detector pause while the narrator holds the busy flag.
pub(crate) const BUSY_PAUSE: Duration = Duration::from_millis(500);
/// Reply length cap applied to the language model.
pub(crate) const MAX_THOUGHT_WORDS: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
/// Library used to talk to capture devices.
pub(crate) enum CaptureBackend {
    /// Spawn `ffmpeg` and read raw frames from its stdout.
    Ffmpeg,
    /// OpenCV `VideoCapture` (requires the `with-opencv` feature).
    Opencv,
}

#[derive(Clone, Debug, PartialEq)]
/// Where one camera's frames come from.
pub(crate) struct CameraConfig {
    /// Device index, `/dev/videoN`, file path or stream URL.
    pub source: String,
    /// Scan nearby device indices when the requested one does not deliver.
    pub hunt: bool,
}

#[derive(Clone, Debug, PartialEq)]
/// Loop periods. Every loop sleeps for its interval after each cycle.
pub(crate) struct Cadence {
    pub capture: Duration,
    pub capture_backoff: Duration,
    pub detect: Duration,
    pub busy_pause: Duration,
    pub narrate: Duration,
    pub cooldown: Duration,
    pub camera_settle: Duration,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Optional telemetry knobs for tracing.
pub(crate) struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing loop spans.
    pub chrome_trace_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every loop.
pub(crate) struct ExplorerConfig {
    pub cameras: PerCamera<CameraConfig>,
    pub backend: CaptureBackend,
    /// Capture width and height in pixels.
    pub frame_size: (i32, i32),
    pub jpeg_quality: u8,
    /// TorchScript detector weights.
    pub model_path: PathBuf,
    pub use_cpu: bool,
    pub thresholds: PerCamera<f32>,
    pub cadence: Cadence,
    pub llm_url: String,
    pub llm_model: String,
    pub max_thought_words: usize,
    pub tts_command: String,
    pub tts_args: Vec<String>,
    pub bind: SocketAddr,
    /// A loop that has not completed a cycle for this long is reported stale.
    pub stale_after: Duration,
    pub telemetry: TelemetryOptions,
}

/// CLI arguments accepted by the `explore` subcommand.
#[derive(Debug, Args)]
pub(crate) struct ExplorerCliArgs {
    /// Front camera: device index, /dev/videoN, file or stream URL.
    #[arg(long = "front-source", value_name = "SOURCE", default_value = "0")]
    pub front_source: String,
    /// Rear camera: device index, /dev/videoN, file or stream URL.
    #[arg(long = "rear-source", value_name = "SOURCE", default_value = "1")]
    pub rear_source: String,
    /// Capture library.
    #[arg(long = "capture-backend", value_enum, default_value_t = CaptureBackend::Ffmpeg)]
    pub backend: CaptureBackend,
    /// Scan device indices 0-4 for a working front camera if the requested one fails.
    #[arg(long = "hunt", action = clap::ArgAction::SetTrue)]
    pub hunt: bool,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: i32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: i32,
    /// JPEG quality used for published frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 85)]
    pub jpeg_quality: i32,
    /// TorchScript detector weights.
    #[arg(long = "model", value_name = "PATH", default_value = "models/yolo26s.torchscript")]
    pub model_path: PathBuf,
    /// Confidence threshold for front camera detections.
    #[arg(long = "front-confidence", value_name = "SCORE", default_value_t = 0.30)]
    pub front_confidence: f32,
    /// Confidence threshold for rear camera detections.
    #[arg(long = "rear-confidence", value_name = "SCORE", default_value_t = 0.30)]
    pub rear_confidence: f32,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    #[arg(long = "capture-interval-ms", value_name = "MS", default_value_t = 100)]
    pub capture_interval_ms: u64,
    #[arg(long = "detect-interval-ms", value_name = "MS", default_value_t = 50)]
    pub detect_interval_ms: u64,
    #[arg(long = "narrate-interval-ms", value_name = "MS", default_value_t = 100)]
    pub narrate_interval_ms: u64,
    /// Extra pause after each utterance.
    #[arg(long = "cooldown-ms", value_name = "MS", default_value_t = 2_000)]
    pub cooldown_ms: u64,
    /// Delay between starting the rear and the front camera.
    #[arg(long = "camera-settle-ms", value_name = "MS", default_value_t = 3_000)]
    pub camera_settle_ms: u64,
    /// Ollama base URL.
    #[arg(long = "llm-url", value_name = "URL", default_value = "http://127.0.0.1:11434")]
    pub llm_url: String,
    /// Ollama model name.
    #[arg(long = "llm-model", value_name = "NAME", default_value = "qwen2.5:0.5b")]
    pub llm_model: String,
    /// Speech synthesizer; reads text on stdin and writes WAV to stdout.
    #[arg(long = "tts-command", value_name = "PROGRAM", default_value = "espeak-ng")]
    pub tts_command: String,
    /// Argument passed to the speech synthesizer (repeatable).
    #[arg(
        long = "tts-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        default_values_t = [String::from("--stdout")]
    )]
    pub tts_args: Vec<String>,
    /// Gateway listen address.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,
    /// Report a loop as stale after this much silence.
    #[arg(long = "stale-after-ms", value_name = "MS", default_value_t = 10_000)]
    pub stale_after_ms: u64,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<ExplorerCliArgs> for ExplorerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ExplorerCliArgs) -> Result<Self> {
        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        for (flag, value) in [
            ("--front-confidence", args.front_confidence),
            ("--rear-confidence", args.rear_confidence),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                bail!("{flag} must be in (0, 1], got {value}");
            }
        }
        for (flag, value) in [
            ("--capture-interval-ms", args.capture_interval_ms),
            ("--detect-interval-ms", args.detect_interval_ms),
            ("--narrate-interval-ms", args.narrate_interval_ms),
        ] {
            if value == 0 {
                bail!("{flag} must be at least 1");
            }
        }
        if args.hunt && parse_device_index(&args.front_source).is_none() {
            bail!(
                "--hunt needs a device index for --front-source, got {:?}",
                args.front_source
            );
        }
        if args.backend == CaptureBackend::Opencv && !cfg!(feature = "with-opencv") {
            bail!("--capture-backend opencv requires building with --features with-opencv");
        }
        if args.tts_command.trim().is_empty() {
            bail!("--tts-command must not be empty");
        }

        Ok(Self {
            cameras: PerCamera::new(
                CameraConfig {
                    source: args.front_source,
                    hunt: args.hunt,
                },
                CameraConfig {
                    source: args.rear_source,
                    hunt: false,
                },
            ),
            backend: args.backend,
            frame_size: (args.width, args.height),
            jpeg_quality: args.jpeg_quality as u8,
            model_path: args.model_path,
            use_cpu: args.use_cpu,
            thresholds: PerCamera::new(args.front_confidence, args.rear_confidence),
            cadence: Cadence {
                capture: Duration::from_millis(args.capture_interval_ms),
                capture_backoff: CAPTURE_BACKOFF,
                detect: Duration::from_millis(args.detect_interval_ms),
                busy_pause: BUSY_PAUSE,
                narrate: Duration::from_millis(args.narrate_interval_ms),
                cooldown: Duration::from_millis(args.cooldown_ms),
                camera_settle: Duration::from_millis(args.camera_settle_ms),
            },
            llm_url: args.llm_url,
            llm_model: args.llm_model,
            max_thought_words: MAX_THOUGHT_WORDS,
            tts_command: args.tts_command,
            tts_args: args.tts_args,
            bind: args.bind,
            stale_after: Duration::from_millis(args.stale_after_ms),
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}
