//! Per-target circuit breaker.

use std::time::{Duration, Instant};

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Circuit closed, call freely.
    Closed,
    /// Circuit was open long enough to half-open; one trial call allowed.
    HalfOpen,
    /// Circuit open, do not touch the network.
    Open,
}

/// Read-only view of a breaker, for dashboards and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub consecutive_failures: u32,
    pub open: bool,
}

/// Counts consecutive request-level failures for one target. Opens at the
/// failure threshold, stays open for the cooldown, then half-opens; a
/// single success closes it, a failure while half-open reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    /// May a call proceed right now?
    pub fn gate(&mut self, now: Instant) -> Gate {
        match self.open_until {
            Some(until) if now < until => Gate::Open,
            Some(_) => Gate::HalfOpen,
            None => Gate::Closed,
        }
    }

    /// Record a request-level success.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    /// Record a request-level failure (all retries already spent).
    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold {
            self.open_until = Some(now + self.cooldown);
        }
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        BreakerSnapshot {
            consecutive_failures: self.consecutive_failures,
            open: matches!(self.open_until, Some(until) if now < until),
        }
    }
}
