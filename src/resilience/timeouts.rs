//! Timeout enforcement.
//!
//! # Responsibilities
//! - Carry one budget through a multi-stage call
//! - Reserve half of it for connection establishment
//! - Report which stage ran out
//!
//! # Design Decisions
//! - Uses Tokio's clock so paused-time tests see the same deadlines
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::error::{RouterError, RouterResult};

/// A fixed budget started at construction.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Absolute point at which the budget runs out.
    pub fn expires_at(&self) -> Instant {
        self.started + self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Share of the budget granted to connection establishment.
    pub fn connect_budget(&self) -> Duration {
        (self.budget / 2).min(self.remaining())
    }

    /// Run `fut` within what is left of the budget.
    pub async fn run<T, F>(&self, stage: &'static str, fut: F) -> RouterResult<T>
    where
        F: Future<Output = RouterResult<T>>,
    {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(RouterError::timeout(stage, self.budget));
        }
        match time::timeout(remaining, fut).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::timeout(stage, self.budget)),
        }
    }
}
