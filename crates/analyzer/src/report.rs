// Pipeline counters and the periodic status reporter.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Shared counters bumped by the orchestrator and snapshotted by the
/// reporter and the introspection endpoint.
pub struct Counters {
    startup_time: DateTime<Utc>,
    total_events: AtomicU64,
    error_events: AtomicU64,
    latest_event_micros: AtomicI64,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            startup_time: Utc::now(),
            total_events: AtomicU64::new(0),
            error_events: AtomicU64::new(0),
            latest_event_micros: AtomicI64::new(0),
        })
    }

    pub fn record_event(&self, event_time: DateTime<Utc>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.latest_event_micros
            .store(event_time.timestamp_micros(), Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let now = Utc::now();
        let running = (now - self.startup_time).to_std().unwrap_or(Duration::ZERO);
        let total = self.total_events.load(Ordering::Relaxed);
        let latest_micros = self.latest_event_micros.load(Ordering::Relaxed);
        StatusSnapshot {
            startup_time: self.startup_time,
            running_time: humantime::format_duration(Duration::from_secs(running.as_secs()))
                .to_string(),
            total_event_count: total,
            error_event_count: self.error_events.load(Ordering::Relaxed),
            avg_event_rate: total / running.as_secs().max(1),
            latest_event_time: DateTime::from_timestamp_micros(latest_micros)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub startup_time: DateTime<Utc>,
    pub running_time: String,
    pub total_event_count: u64,
    pub error_event_count: u64,
    pub avg_event_rate: u64,
    pub latest_event_time: DateTime<Utc>,
}

/// Emit a JSON status line on a fixed ticker until shutdown.
pub fn spawn_reporter(
    counters: Arc<Counters>,
    interval: Duration,
    shutdown: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the first
        // report covers a full interval.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("status reporter exiting by shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    let snapshot = counters.snapshot();
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => info!("running status: {json}"),
                        Err(err) => info!(%err, "status snapshot serialization failed"),
                    }
                }
            }
        }
    })
}
