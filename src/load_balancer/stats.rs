//! Per-backend call statistics.
//!
//! # Responsibilities
//! - Track in-flight calls (for Least Connections)
//! - Track totals, errors and cumulative response time (for Fastest Response)
//! - Hand out RAII guards so the in-flight count cannot leak

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rolling counters for one backend key.
#[derive(Debug, Default)]
pub struct BackendStats {
    /// Calls currently in flight.
    pub active: AtomicUsize,
    pub total: AtomicU64,
    pub successes: AtomicU64,
    pub errors: AtomicU64,
    /// Sum of observed response times, in microseconds.
    pub response_time_us: AtomicU64,
}

impl BackendStats {
    pub fn active_calls(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.response_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.response_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Mean response time in milliseconds, `None` before the first sample.
    pub fn average_response_ms(&self) -> Option<f64> {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return None;
        }
        Some(self.response_time_us.load(Ordering::Relaxed) as f64 / total as f64 / 1000.0)
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.errors.load(Ordering::Relaxed) as f64 / total as f64
        }
    }
}

/// Serializable view of [`BackendStats`].
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatsSnapshot {
    pub backend: String,
    pub active: usize,
    pub total: u64,
    pub successes: u64,
    pub errors: u64,
    pub average_response_ms: Option<f64>,
    pub error_rate: f64,
}

/// Backend key → stats.
#[derive(Debug, Default)]
pub struct StatsTable {
    entries: DashMap<String, Arc<BackendStats>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for `key`, created on first use.
    pub fn entry(&self, key: &str) -> Arc<BackendStats> {
        if let Some(stats) = self.entries.get(key) {
            return stats.clone();
        }
        self.entries.entry(key.to_string()).or_default().clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<BackendStats>> {
        self.entries.get(key).map(|s| s.clone())
    }

    pub fn active_calls(&self, key: &str) -> usize {
        self.get(key).map(|s| s.active_calls()).unwrap_or(0)
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn snapshot(&self) -> Vec<BackendStatsSnapshot> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|e| {
                let s = e.value();
                BackendStatsSnapshot {
                    backend: e.key().clone(),
                    active: s.active_calls(),
                    total: s.total.load(Ordering::Relaxed),
                    successes: s.successes.load(Ordering::Relaxed),
                    errors: s.errors.load(Ordering::Relaxed),
                    average_response_ms: s.average_response_ms(),
                    error_rate: s.error_rate(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.backend.cmp(&b.backend));
        out
    }
}

/// Holds one in-flight slot on a backend until dropped.
#[derive(Debug)]
pub struct CallGuard {
    stats: Arc<BackendStats>,
}

impl CallGuard {
    pub fn new(stats: Arc<BackendStats>) -> Self {
        stats.active.fetch_add(1, Ordering::Relaxed);
        Self { stats }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}
