//! Per-backend health record.
//!
//! # States
//! - Healthy: consecutive failures below the open threshold
//! - Unhealthy: consecutive failures at or above it (circuit open)
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive_failures >= open_threshold
//! Unhealthy → Healthy: any success resets the streak (half-open),
//!                      close_threshold successes finish recovery (closed)
//! ```
//!
//! # Design Decisions
//! - Plain atomics; concurrent updates commute
//! - Created lazily on first observation, purged once stale
//! - Registry mirrors are numbered; only the newest one may be written

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::Instant;

use crate::registry::BackendInstance;
use crate::resilience::{CircuitState, Thresholds};

#[derive(Debug)]
pub struct HealthRecord {
    pub key: String,
    pub service: String,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    successes_since_failure: AtomicU64,
    last_check: Mutex<Instant>,
    last_error: Mutex<Option<String>>,
    /// Set once the streak reaches the open threshold, cleared on full recovery.
    tripped: AtomicBool,
    /// Set while this engine has written `healthy = false` into the registry.
    mirrored_unhealthy: AtomicBool,
    mirror_seq: AtomicU64,
    mirror_gate: AsyncMutex<()>,
}

/// Counter values read at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub successes_since_failure: u64,
    pub tripped: bool,
}

impl HealthRecord {
    pub fn new(instance: &BackendInstance) -> Self {
        Self {
            key: instance.key(),
            service: instance.service.clone(),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            successes_since_failure: AtomicU64::new(0),
            last_check: Mutex::new(Instant::now()),
            last_error: Mutex::new(None),
            tripped: AtomicBool::new(false),
            mirrored_unhealthy: AtomicBool::new(false),
            mirror_seq: AtomicU64::new(0),
            mirror_gate: AsyncMutex::new(()),
        }
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.successes_since_failure.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_failure(&self, cause: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.successes_since_failure.store(0, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(cause.to_string());
        }
        self.touch();
    }

    /// Zero every counter, as if the backend had never been observed.
    pub fn reset(&self) {
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.successes_since_failure.store(0, Ordering::Relaxed);
        self.tripped.store(false, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = None;
        }
        self.touch();
    }

    /// Latch or release the trip flag from the current counters.
    pub fn update_trip(&self, thresholds: Thresholds) {
        let c = self.counters();
        if c.consecutive_failures >= thresholds.open as u64 {
            self.tripped.store(true, Ordering::Relaxed);
        } else if c.successes_since_failure >= thresholds.close as u64 {
            self.tripped.store(false, Ordering::Relaxed);
        }
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_check.lock() {
            *last = Instant::now();
        }
    }

    pub fn counters(&self) -> Counters {
        Counters {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            successes_since_failure: self.successes_since_failure.load(Ordering::Relaxed),
            tripped: self.tripped.load(Ordering::Relaxed),
        }
    }

    pub fn is_healthy(&self, open_threshold: u32) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) < open_threshold as u64
    }

    pub fn since_last_check(&self) -> Duration {
        self.last_check
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    pub fn mirrored_unhealthy(&self) -> bool {
        self.mirrored_unhealthy.load(Ordering::Relaxed)
    }

    pub(crate) fn set_mirrored_unhealthy(&self, value: bool) {
        self.mirrored_unhealthy.store(value, Ordering::Relaxed);
    }

    /// Number the next registry mirror.
    pub(crate) fn next_mirror(&self) -> u64 {
        self.mirror_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn is_latest_mirror(&self, seq: u64) -> bool {
        self.mirror_seq.load(Ordering::SeqCst) == seq
    }

    /// Serializes registry writes for this backend.
    pub(crate) async fn lock_mirror(&self) -> AsyncMutexGuard<'_, ()> {
        self.mirror_gate.lock().await
    }
}

/// Serializable view of a [`HealthRecord`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub backend: String,
    pub service: String,
    pub healthy: bool,
    pub circuit: CircuitState,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub successes_since_failure: u64,
    pub last_check_ms_ago: u64,
    pub last_error: Option<String>,
}

/// Aggregate over all records.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub health_ratio: f64,
}
