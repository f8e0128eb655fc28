//! Actix Web gateway exposing the dashboard, both camera feeds, the narration
//! status and the latest utterance.
//!
//! The server runs on a dedicated thread with its own Actix system so the
//! loops stay plain threads. Handlers only copy data out of the shared state;
//! none of them holds the lock across an await.

use std::{net::SocketAddr, sync::Arc, thread, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result, anyhow};
use async_stream::stream;
use crossbeam_channel::bounded;
use tracing::{error, info};

use crate::explorer::{
    state::{Camera, SharedState},
    telemetry::{self, spawn_thread},
    watchdog::PipelineHealth,
};

/// Pause between parts of an MJPEG feed.
pub(crate) const STREAM_CADENCE: Duration = Duration::from_millis(40);
/// Pause before re-checking a camera that has not published yet.
pub(crate) const STREAM_RETRY: Duration = Duration::from_millis(100);
pub(crate) const AUDIO_FILENAME: &str = "nemo_voice.wav";

/// Shared state backing HTTP handlers.
pub(crate) struct GatewayState {
    pub(crate) shared: Arc<SharedState>,
    pub(crate) health: Arc<PipelineHealth>,
}

/// Register every gateway route.
pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/feed_front", web::get().to(feed_front))
        .route("/feed_rear", web::get().to(feed_rear))
        .route("/status", web::get().to(status_handler))
        .route("/latest_audio", web::get().to(latest_audio_handler))
        .route("/detections", web::get().to(detections_handler))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Bind the gateway and serve it from a dedicated thread. Returns once the
/// listener is bound, so a port conflict surfaces as a startup error.
pub(crate) fn spawn_gateway(
    bind: SocketAddr,
    shared: Arc<SharedState>,
    health: Arc<PipelineHealth>,
) -> Result<thread::JoinHandle<()>> {
    let (bound_tx, bound_rx) = bounded::<std::io::Result<()>>(1);
    let handle = spawn_thread("explorer-gateway", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(GatewayState {
                        shared: shared.clone(),
                        health: health.clone(),
                    }))
                    .configure(routes)
            })
            .disable_signals()
            .bind(bind);

            let server = match server {
                Ok(server) => {
                    let _ = bound_tx.send(Ok(()));
                    server
                }
                Err(err) => {
                    let _ = bound_tx.send(Err(err));
                    return Ok(());
                }
            };
            server.run().await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn gateway thread")?;

    bound_rx
        .recv()
        .map_err(|_| anyhow!("gateway thread exited before binding"))?
        .with_context(|| format!("failed to bind gateway on {bind}"))?;
    info!("gateway listening on http://{bind}");
    Ok(handle)
}

/// Wrap one JPEG as a `multipart/x-mixed-replace` part.
pub(crate) fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 48);
    payload.extend_from_slice(b"--frame\r\n");
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

/// Stream `camera`'s latest frame until the client disconnects. A slow client
/// simply sees fewer frames; each part is the newest frame at that moment.
fn mjpeg_feed(state: web::Data<GatewayState>, camera: Camera) -> HttpResponse {
    let shared = state.shared.clone();
    let stream = stream! {
        loop {
            match shared.latest_frame(camera) {
                Some(jpeg) => {
                    yield Ok::<Bytes, actix_web::Error>(multipart_part(&jpeg));
                    actix_web::rt::time::sleep(STREAM_CADENCE).await;
                }
                None => actix_web::rt::time::sleep(STREAM_RETRY).await,
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .content_type("multipart/x-mixed-replace; boundary=frame")
        .streaming(stream)
}

async fn feed_front(state: web::Data<GatewayState>) -> HttpResponse {
    mjpeg_feed(state, Camera::Front)
}

async fn feed_rear(state: web::Data<GatewayState>) -> HttpResponse {
    mjpeg_feed(state, Camera::Rear)
}

/// Serve the dashboard.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::INDEX_HTML)
}

async fn status_handler(state: web::Data<GatewayState>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(state.shared.status())
}

async fn latest_audio_handler(state: web::Data<GatewayState>) -> HttpResponse {
    match state.shared.latest_audio() {
        Some(clip) => HttpResponse::Ok()
            .content_type("audio/wav")
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{AUDIO_FILENAME}\""),
            ))
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .insert_header(("X-Audio-Id", clip.version.to_string()))
            .body(clip.wav),
        None => HttpResponse::NotFound().body("No audio"),
    }
}

/// Current boxes for both cameras plus the busy flag.
async fn detections_handler(state: web::Data<GatewayState>) -> HttpResponse {
    HttpResponse::Ok().json(state.shared.detections())
}

async fn health_handler(state: web::Data<GatewayState>) -> HttpResponse {
    HttpResponse::Ok().json(state.health.report())
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}
