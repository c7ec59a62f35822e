//! Per-domain circuit breaker.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Breaker state machine: Closed ↔ Open ↔ HalfOpen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow normally.
    Closed,
    /// Domain suspended; requests refused until the cooldown elapses.
    Open,
    /// One probe request is in flight; its outcome decides the next state.
    HalfOpen,
}

/// Circuit breaker for one domain.
///
/// Trips immediately on 403/429 or after three consecutive failures. After
/// the cooldown, exactly one caller passes as the HalfOpen probe; a recorded
/// success closes the breaker, any recorded failure reopens it with a fresh
/// cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    opened_at: Option<Instant>,
    cooldown: Duration,
    failure_count: u32,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            opened_at: None,
            cooldown,
            failure_count: 0,
            failure_threshold: 3,
        }
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// Gate one acquire attempt.
    ///
    /// `Ok(())` lets the request through; in Open state this transitions to
    /// HalfOpen once the cooldown has elapsed, admitting exactly one probe.
    /// `Err(remaining)` carries the time left before the next probe
    /// (zero while a probe is already in flight).
    pub fn poll(&mut self) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Err(Duration::ZERO),
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened_at.elapsed();
                if elapsed >= self.cooldown {
                    debug!("circuit breaker entering half-open probe");
                    self.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            debug!("half-open probe succeeded, closing breaker");
        }
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.failure_count = 0;
    }

    pub fn record_failure(&mut self, status_code: Option<u16>) {
        match status_code {
            Some(403 | 429) => self.trip(),
            _ => {
                if self.state == BreakerState::HalfOpen {
                    self.trip();
                    return;
                }
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    self.trip();
                }
            }
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.failure_count = 0;
    }

    /// Manual reset, regardless of cooldown.
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.failure_count = 0;
    }
}
