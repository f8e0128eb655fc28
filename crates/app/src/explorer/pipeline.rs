//! Explorer supervisor: builds the shared state, starts every loop in order and
//! serves the gateway until the process exits.
//!
//! Only startup can fail. Once running, loops absorb their own errors and the
//! process runs until it is killed.

use std::{sync::Arc, thread};

use anyhow::{Context, Result, anyhow, bail};
use tracing::info;

use crate::explorer::{
    ExplorerConfig, backends,
    camera::FrameSource,
    detection::DetectionLoop,
    narration::Narrator,
    pacing::spawn_loop,
    server::spawn_gateway,
    state::{Camera, SharedState},
    telemetry,
    watchdog::{PipelineHealth, spawn_watchdog},
};

/// Handles of every running component, held for the life of the process.
struct Explorer {
    loops: Vec<thread::JoinHandle<()>>,
    gateway: thread::JoinHandle<()>,
}

/// Run the explorer until the gateway stops.
pub(crate) fn run(config: ExplorerConfig) -> Result<()> {
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let _ = telemetry::init_metrics_recorder();
    let explorer_span = tracing::info_span!(
        "explorer",
        front = %config.cameras.front.source,
        rear = %config.cameras.rear.source,
        width = config.frame_size.0,
        height = config.frame_size.1,
        backend = ?config.backend,
        use_cpu = config.use_cpu,
        bind = %config.bind,
    );
    let _explorer_span_guard = explorer_span.enter();

    let explorer = start(&config)?;
    info!(
        "explorer running: {} loops, dashboard at http://{}",
        explorer.loops.len(),
        config.bind
    );

    explorer
        .gateway
        .join()
        .map_err(|_| anyhow!("gateway thread panicked"))?;
    bail!("gateway stopped; shutting down")
}

fn start(config: &ExplorerConfig) -> Result<Explorer> {
    let state = Arc::new(SharedState::new());
    let health = Arc::new(PipelineHealth::new(config.stale_after));

    let detector = backends::load_detector(config)?;
    let (generator, synthesizer) =
        backends::build_voice(config).context("failed to configure narration")?;

    let mut loops = Vec::new();

    // The rear camera claims its device first; the front one may hunt for a
    // free index once it has settled.
    loops.push(start_frame_source(config, Camera::Rear, &state, &health)?);
    info!(
        "waiting {:?} for the rear camera to settle",
        config.cadence.camera_settle
    );
    thread::sleep(config.cadence.camera_settle);
    loops.push(start_frame_source(config, Camera::Front, &state, &health)?);

    loops.push(
        spawn_loop(
            "explorer-detector",
            DetectionLoop::new(
                state.clone(),
                detector,
                config.thresholds.clone(),
                config.cadence.detect,
                config.cadence.busy_pause,
            ),
            health.clone(),
        )
        .context("failed to spawn detector thread")?,
    );
    loops.push(
        spawn_loop(
            "explorer-narrator",
            Narrator::new(
                state.clone(),
                generator,
                synthesizer,
                config.cadence.narrate,
                config.cadence.cooldown,
            ),
            health.clone(),
        )
        .context("failed to spawn narrator thread")?,
    );
    loops.push(spawn_watchdog(health.clone()).context("failed to spawn watchdog thread")?);

    let gateway = spawn_gateway(config.bind, state, health)?;
    Ok(Explorer { loops, gateway })
}

fn start_frame_source(
    config: &ExplorerConfig,
    camera: Camera,
    state: &Arc<SharedState>,
    health: &Arc<PipelineHealth>,
) -> Result<thread::JoinHandle<()>> {
    let grabber = backends::open_camera(config, camera);
    let source = FrameSource::new(
        camera,
        grabber,
        state.clone(),
        config.jpeg_quality,
        config.cadence.capture,
        config.cadence.capture_backoff,
    );
    spawn_loop(&format!("explorer-{camera}-camera"), source, health.clone())
        .with_context(|| format!("failed to spawn {camera} camera thread"))
}
