//! Dual-camera perception and narration loop with a browser gateway.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `state`: The single-lock aggregate every loop reads and writes.
//! - `pipeline`: Startup order and component ownership.
//! - `camera`: Per-camera capture, overlay and publish loop.
//! - `detection`: Ping-pong object detection with busy backpressure.
//! - `narration`: Scene change detection, thought, speech and publish.
//! - `scene`: Canonical scene text from per-camera boxes.
//! - `annotation`: Box and label drawing plus JPEG encode.
//! - `pacing`: Shared fixed-cadence loop driver.
//! - `server`: Actix Web gateway.
//! - `watchdog`: Heartbeats and stale loop reporting.
//! - `backends`: Concrete capture, detector and voice construction.

/// Re-export settings so callers can configure runs without reaching into
/// submodules.
pub(crate) use config::{CaptureBackend, ExplorerCliArgs, ExplorerConfig, TelemetryOptions};
/// Launch the explorer with a ready-made configuration.
pub(crate) use pipeline::run;

mod annotation;
pub(crate) mod backends;
mod camera;
mod config;
mod detection;
mod narration;
mod pacing;
mod pipeline;
mod scene;
mod server;
mod state;
pub(crate) mod telemetry;
mod watchdog;
