//! Fixed-cadence driver shared by the frame sources, the detector and the
//! narrator. Each loop body is a [`Cycle`]; the driver isolates panics, beats
//! the watchdog and sleeps for whatever pause the cycle asked for.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::Duration,
};

use tracing::error;

use crate::explorer::{
    telemetry::spawn_thread,
    watchdog::{HealthComponent, PipelineHealth},
};

const PANIC_BACKOFF: Duration = Duration::from_secs(1);

pub(crate) trait Cycle {
    fn component(&self) -> HealthComponent;

    /// Run one iteration and return how long to sleep before the next.
    fn cycle(&mut self) -> Duration;
}

/// Run one cycle with panic isolation. A panicking cycle is logged, counted and
/// followed by a short backoff; the loop itself keeps going.
pub(crate) fn step<C: Cycle>(worker: &mut C) -> Duration {
    match panic::catch_unwind(AssertUnwindSafe(|| worker.cycle())) {
        Ok(pause) => pause,
        Err(payload) => {
            let component = worker.component().label();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(component, "loop iteration panicked: {message}");
            metrics::counter!("explorer_loop_panics_total", "component" => component).increment(1);
            PANIC_BACKOFF
        }
    }
}

pub(crate) fn run_forever<C: Cycle>(mut worker: C, health: Arc<PipelineHealth>) {
    let component = worker.component();
    let loop_span = tracing::info_span!("explorer.loop", component = component.label());
    let _loop_span_guard = loop_span.enter();
    loop {
        let pause = tracing::info_span!("cycle").in_scope(|| step(&mut worker));
        health.beat(component);
        thread::sleep(pause);
    }
}

pub(crate) fn spawn_loop<C>(
    name: &str,
    worker: C,
    health: Arc<PipelineHealth>,
) -> io::Result<thread::JoinHandle<()>>
where
    C: Cycle + Send + 'static,
{
    spawn_thread(name, move || run_forever(worker, health))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        calls: u32,
    }

    impl Cycle for Flaky {
        fn component(&self) -> HealthComponent {
            HealthComponent::Detector
        }

        fn cycle(&mut self) -> Duration {
            self.calls += 1;
            if self.calls == 1 {
                panic!("first cycle fails");
            }
            Duration::from_millis(50)
        }
    }

    #[test]
    fn panicking_cycle_is_contained() {
        let mut worker = Flaky { calls: 0 };
        assert_eq!(step(&mut worker), PANIC_BACKOFF);
        assert_eq!(step(&mut worker), Duration::from_millis(50));
        assert_eq!(worker.calls, 2);
    }
}
