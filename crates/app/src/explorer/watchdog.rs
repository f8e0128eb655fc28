use std::{
    collections::BTreeMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::explorer::{state::Camera, telemetry::spawn_thread};

pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HealthComponent {
    FrontCamera,
    RearCamera,
    Detector,
    Narrator,
}

impl HealthComponent {
    pub(crate) const ALL: [HealthComponent; 4] = [
        HealthComponent::FrontCamera,
        HealthComponent::RearCamera,
        HealthComponent::Detector,
        HealthComponent::Narrator,
    ];

    pub(crate) fn camera(camera: Camera) -> Self {
        match camera {
            Camera::Front => HealthComponent::FrontCamera,
            Camera::Rear => HealthComponent::RearCamera,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            HealthComponent::FrontCamera => "front_camera",
            HealthComponent::RearCamera => "rear_camera",
            HealthComponent::Detector => "detector",
            HealthComponent::Narrator => "narrator",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Payload of `/health`: milliseconds since each loop last completed a cycle.
#[derive(Debug, Serialize)]
pub(crate) struct HealthReport {
    pub(crate) components: BTreeMap<&'static str, u64>,
    pub(crate) stale: Vec<&'static str>,
}

/// Last-heartbeat timestamps for every background loop.
pub(crate) struct PipelineHealth {
    beats: [AtomicU64; 4],
    stale_after_ms: u64,
}

impl PipelineHealth {
    pub(crate) fn new(stale_after: Duration) -> Self {
        let grace_deadline = current_millis().saturating_add(WATCHDOG_STARTUP_GRACE_MS);
        Self {
            beats: std::array::from_fn(|_| AtomicU64::new(grace_deadline)),
            stale_after_ms: stale_after.as_millis() as u64,
        }
    }

    pub(crate) fn beat(&self, component: HealthComponent) {
        self.beats[component.slot()].store(current_millis(), Ordering::Relaxed);
    }

    pub(crate) fn since_last_beat(&self, component: HealthComponent, now: u64) -> u64 {
        now.saturating_sub(self.beats[component.slot()].load(Ordering::Relaxed))
    }

    pub(crate) fn stale_components(&self, now: u64) -> Vec<HealthComponent> {
        HealthComponent::ALL
            .into_iter()
            .filter(|&component| self.since_last_beat(component, now) > self.stale_after_ms)
            .collect()
    }

    pub(crate) fn report(&self) -> HealthReport {
        let now = current_millis();
        HealthReport {
            components: HealthComponent::ALL
                .into_iter()
                .map(|component| (component.label(), self.since_last_beat(component, now)))
                .collect(),
            stale: self
                .stale_components(now)
                .into_iter()
                .map(HealthComponent::label)
                .collect(),
        }
    }
}

/// Log loops that stop beating, and log again when they recover. Nothing is
/// restarted; a wedged loop is an operator problem.
pub(crate) fn spawn_watchdog(health: Arc<PipelineHealth>) -> io::Result<thread::JoinHandle<()>> {
    spawn_thread("explorer-watchdog", move || {
        let mut reported: Vec<HealthComponent> = Vec::new();
        loop {
            thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
            let now = current_millis();
            let stale = health.stale_components(now);
            for component in &stale {
                if !reported.contains(component) {
                    warn!(
                        "watchdog: {} loop silent for {}ms",
                        component.label(),
                        health.since_last_beat(*component, now)
                    );
                }
            }
            for component in &reported {
                if !stale.contains(component) {
                    info!("watchdog: {} loop recovered", component.label());
                }
            }
            reported = stale;
        }
    })
}

pub(crate) fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_is_stale_during_startup_grace() {
        let health = PipelineHealth::new(Duration::from_millis(100));
        assert!(health.stale_components(current_millis()).is_empty());
    }

    #[test]
    fn silent_components_go_stale() {
        let health = PipelineHealth::new(Duration::from_millis(100));
        health.beat(HealthComponent::Detector);
        let later = current_millis() + WATCHDOG_STARTUP_GRACE_MS + 1_000;
        health.beat(HealthComponent::Narrator);
        let stale = health.stale_components(later);
        assert!(stale.contains(&HealthComponent::FrontCamera));
        assert!(stale.contains(&HealthComponent::Detector));

        let fresh = current_millis() + 50;
        assert!(!health.stale_components(fresh).contains(&HealthComponent::Detector));
    }

    #[test]
    fn report_lists_every_component() {
        let health = PipelineHealth::new(Duration::from_secs(10));
        health.beat(HealthComponent::RearCamera);
        let report = health.report();
        assert_eq!(report.components.len(), 4);
        assert!(report.components.contains_key("rear_camera"));
        assert!(report.stale.is_empty());
    }
}
