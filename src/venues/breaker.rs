use crate::core::config::BreakerConfig;
use crate::core::events::CircuitState;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{info, warn};

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_transition: DateTime<Utc>,
}

impl BreakerInner {
    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.last_transition = Utc::now();
    }

    /// Apply the Open -> HalfOpen transition once the cool-down has
    /// elapsed. Called under the lock by every observer so the state
    /// seen outside is always the effective one.
    fn settle(&mut self, cooldown: std::time::Duration) {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= cooldown {
                    self.transition(CircuitState::HalfOpen);
                    self.probe_in_flight = false;
                }
            }
        }
    }
}

/// Per-venue circuit breaker gating calls to the venue.
///
/// Closed passes requests through; a run of consecutive failures
/// reaching the threshold opens the circuit; after the cool-down
/// exactly one probe request is admitted. The whole state record
/// lives under one lock, so every transition is a single atomic
/// compare-and-update.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                last_transition: Utc::now(),
            }),
        }
    }

    /// Whether a call may proceed right now. In HalfOpen only the
    /// first caller is admitted; everyone else is refused until the
    /// probe completes.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.settle(self.config.cooldown);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a completed successful request
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            info!("circuit breaker closed after successful probe");
            inner.transition(CircuitState::Closed);
            inner.opened_at = None;
        }
    }

    /// Record a completed failed request
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.settle(self.config.cooldown);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    inner.transition(CircuitState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("probe failed, circuit breaker reopened");
                inner.transition(CircuitState::Open);
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            CircuitState::Open => {
                // A straggling in-flight call failed; restart the cool-down
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    /// Effective state (Open reported as HalfOpen once the cool-down
    /// has elapsed)
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        inner.settle(self.config.cooldown);
        inner.state
    }

    /// Whether the venue may be offered work: Closed, or HalfOpen with
    /// the probe slot free
    pub fn is_eligible(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.settle(self.config.cooldown);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.probe_in_flight,
            CircuitState::Open => false,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    /// Timestamp of the most recent state transition
    pub fn last_transition(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().last_transition
    }
}
