//! Runtime state model

use crate::models::SystemMetrics;
use crate::storage::StoreCounts;
use crate::tor::TorStats;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Request counters for the current metrics window
#[derive(Debug, Default)]
pub struct Counters {
    requests: AtomicU64,
    errors: AtomicU64,
    response_time_ms: AtomicU64,
}

/// Counter values taken at the end of a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub response_time_ms: u64,
}

impl CounterSnapshot {
    /// Share of requests that failed
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }

    /// Mean latency of successful requests, in seconds
    pub fn avg_response_secs(&self) -> f64 {
        let ok = self.requests.saturating_sub(self.errors);
        if ok == 0 {
            0.0
        } else {
            self.response_time_ms as f64 / ok as f64 / 1000.0
        }
    }

    pub fn per_minute(&self, window: Duration) -> f64 {
        let minutes = window.as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            0.0
        } else {
            self.requests as f64 / minutes
        }
    }
}

impl Counters {
    pub fn record_success(&self, elapsed: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.response_time_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peek(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            response_time_ms: self.response_time_ms.load(Ordering::Relaxed),
        }
    }

    /// Read and reset
    pub fn take(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.requests.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
            response_time_ms: self.response_time_ms.swap(0, Ordering::Relaxed),
        }
    }
}

/// Shared runtime state
#[derive(Debug)]
pub struct RuntimeState {
    pub counters: Counters,
    started_at: Instant,
    window_started: Mutex<Instant>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeState {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            counters: Counters::default(),
            started_at: now,
            window_started: Mutex::new(now),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Close the current metrics window and start the next one
    pub fn take_window(&self) -> (CounterSnapshot, Duration) {
        let now = Instant::now();
        let mut started = self
            .window_started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = now.duration_since(*started);
        *started = now;
        drop(started);
        (self.counters.take(), window)
    }
}

/// Assemble a metrics row
pub fn build_metrics(
    tor: Option<TorStats>,
    counts: StoreCounts,
    snapshot: CounterSnapshot,
    window: Duration,
) -> SystemMetrics {
    let to_i64 = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
    SystemMetrics {
        timestamp: Utc::now(),
        circuits_active: tor.map_or(0, |t| to_i64(t.active_circuits)),
        circuits_total: tor.map_or(0, |t| to_i64(t.total_circuits)),
        sites_discovered: counts.sites,
        sites_classified: counts.classified,
        safety_checks_performed: counts.safety_checks,
        requests_per_minute: snapshot.per_minute(window),
        error_rate: snapshot.error_rate(),
        avg_response_time: snapshot.avg_response_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = Counters::default();
        counters.record_success(Duration::from_millis(400));
        counters.record_success(Duration::from_millis(600));
        counters.record_error();

        let snapshot = counters.take();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.errors, 1);
        assert!((snapshot.error_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert!((snapshot.avg_response_secs() - 0.5).abs() < 1e-9);
        assert!((snapshot.per_minute(Duration::from_secs(30)) - 6.0).abs() < 1e-9);

        assert_eq!(counters.peek(), CounterSnapshot::default());
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = CounterSnapshot::default();
        assert_eq!(snapshot.error_rate(), 0.0);
        assert_eq!(snapshot.avg_response_secs(), 0.0);
        assert_eq!(snapshot.per_minute(Duration::ZERO), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window() {
        let state = RuntimeState::new();
        state.counters.record_error();
        tokio::time::advance(Duration::from_secs(60)).await;

        let (snapshot, window) = state.take_window();
        assert_eq!(window, Duration::from_secs(60));
        assert_eq!(snapshot.requests, 1);

        let (snapshot, window) = state.take_window();
        assert_eq!(window, Duration::ZERO);
        assert_eq!(snapshot.requests, 0);
    }

    #[test]
    fn test_build_metrics() {
        let tor = TorStats {
            total_circuits: 4,
            active_circuits: 3,
            healthy_circuits: 3,
            sessions_cached: 2,
        };
        let counts = StoreCounts {
            sites: 10,
            classified: 7,
            safety_checks: 9,
            pending_jobs: 1,
        };
        let snapshot = CounterSnapshot {
            requests: 20,
            errors: 5,
            response_time_ms: 30_000,
        };
        let metrics = build_metrics(Some(tor), counts, snapshot, Duration::from_secs(120));
        assert_eq!(metrics.circuits_active, 3);
        assert_eq!(metrics.circuits_total, 4);
        assert_eq!(metrics.sites_classified, 7);
        assert!((metrics.requests_per_minute - 10.0).abs() < 1e-9);
        assert!((metrics.error_rate - 0.25).abs() < 1e-9);
        assert!((metrics.avg_response_time - 2.0).abs() < 1e-9);
    }
}
