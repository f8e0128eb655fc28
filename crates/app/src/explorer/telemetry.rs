//! Telemetry helpers for tracing spans, Prometheus metrics and optional Chrome traces.

use std::{io, path::Path, sync::OnceLock, thread, time::Duration};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    layer::SubscriberExt,
    prelude::*,
};

use crate::explorer::config::TelemetryOptions;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PROM_UPKEEP_THREAD: OnceLock<thread::JoinHandle<()>> = OnceLock::new();

/// Guard returned when a telemetry subscriber has been installed for the current thread.
pub(crate) struct TelemetryGuard {
    _default_guard: tracing::subscriber::DefaultGuard,
    _chrome_guard: Option<tracing_chrome::FlushGuard>,
}

/// Install the Prometheus recorder once and return its handle. When another
/// recorder already owns the global slot the handle still renders, just empty.
pub(crate) fn init_metrics_recorder() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        if let Err(err) = metrics::set_global_recorder(recorder) {
            warn!("metrics recorder not installed: {err}");
            return handle;
        }

        let upkeep_handle = handle.clone();
        match spawn_thread("prometheus-upkeep", move || {
            loop {
                thread::sleep(Duration::from_secs(5));
                upkeep_handle.run_upkeep();
            }
        }) {
            Ok(upkeep) => {
                let _ = PROM_UPKEEP_THREAD.set(upkeep);
            }
            Err(err) => warn!("failed to spawn prometheus upkeep thread: {err}"),
        }

        handle
    })
}

/// Access the Prometheus handle when already initialised.
pub(crate) fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Install tracing subscribers for the current thread. Threads started through
/// [`spawn_thread`] inherit them.
pub(crate) fn enter_runtime(opts: &TelemetryOptions) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (chrome_layer, chrome_guard) = match opts.chrome_trace_path.as_ref() {
        Some(path) => match build_chrome_layer(path) {
            Ok((layer, guard)) => (Some(layer), Some(guard)),
            Err(err) => {
                warn!(
                    "failed to initialise chrome trace writer at {}: {err}",
                    path.display()
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let span_only_filter = filter_fn(|metadata| metadata.is_span());

    let default_guard = tracing::subscriber::set_default(
        tracing_subscriber::registry()
            .with(chrome_layer.map(|chrome| chrome.with_filter(span_only_filter)))
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(fmt::time::uptime())
                    .with_filter(env_filter),
            )
            .with(tracing_error::ErrorLayer::default()),
    );

    TelemetryGuard {
        _default_guard: default_guard,
        _chrome_guard: chrome_guard,
    }
}

/// Spawn a named thread that inherits the current tracing dispatcher.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn build_chrome_layer(
    path: &Path,
) -> io::Result<(
    tracing_chrome::ChromeLayer<tracing_subscriber::Registry>,
    tracing_chrome::FlushGuard,
)> {
    let file = std::fs::File::create(path)?;
    let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(tracing_chrome::TraceStyle::Threaded)
        .build();
    Ok((layer, guard))
}
