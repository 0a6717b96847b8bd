//! Circuit breaker for the upstream API.
//!
//! States: Closed (normal) -> Open (failing) -> HalfOpen (testing).
//!
//! Failures come in two kinds. Transient failures (5xx, transport) open the
//! circuit briefly after a threshold of consecutive hits, shedding load while
//! the upstream recovers. A quota failure opens the circuit immediately for a
//! long cool-down: every further call fails fast as `QuotaExceeded` instead
//! of burning retry attempts against a daily limit that will not reset soon.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing - requests are blocked
    Open,
    /// Testing - limited requests allowed to probe recovery
    HalfOpen,
}

/// Why the circuit opened. Determines the error callers fail fast with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Quota,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before opening
    pub failure_threshold: u32,
    /// How long the circuit stays open after transient failures
    pub open_duration: Duration,
    /// How long the circuit stays open after a quota failure
    pub quota_open_duration: Duration,
    /// Successful probes needed to close from half-open
    pub success_threshold: u32,
    /// Concurrent probes allowed in half-open state
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            quota_open_duration: Duration::from_secs(3600),
            success_threshold: 3,
            half_open_max_requests: 3,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    open_reason: RwLock<Option<FailureKind>>,
    last_failure_time: RwLock<Option<Instant>>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_requests: AtomicU32,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            open_reason: RwLock::new(None),
            last_failure_time: RwLock::new(None),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_requests: AtomicU32::new(0),
            trips: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    /// The failure kind that opened the circuit, while it is open/half-open.
    pub fn open_reason(&self) -> Option<FailureKind> {
        *self.open_reason.read()
    }

    fn open_duration_for(&self, kind: FailureKind) -> Duration {
        match kind {
            FailureKind::Transient => self.config.open_duration,
            FailureKind::Quota => self.config.quota_open_duration,
        }
    }

    /// Checks whether a request may proceed, transitioning Open -> HalfOpen
    /// once the cool-down has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.write();

        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = match (*self.last_failure_time.read(), *self.open_reason.read()) {
                    (Some(at), Some(kind)) => at.elapsed() >= self.open_duration_for(kind),
                    _ => false,
                };
                if cooled_down {
                    info!(circuit = %self.name, "Circuit transitioning from Open to HalfOpen");
                    *state = CircuitState::HalfOpen;
                    self.half_open_requests.store(0, Ordering::Relaxed);
                    self.success_count.store(0, Ordering::Relaxed);
                    return self.try_half_open_request();
                }
                debug!(circuit = %self.name, "Circuit is Open - request blocked");
                false
            }
            CircuitState::HalfOpen => self.try_half_open_request(),
        }
    }

    fn try_half_open_request(&self) -> bool {
        let current = self.half_open_requests.fetch_add(1, Ordering::Relaxed);
        if current < self.config.half_open_max_requests {
            true
        } else {
            self.half_open_requests.fetch_sub(1, Ordering::Relaxed);
            debug!(circuit = %self.name, "HalfOpen probe limit reached - blocking");
            false
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write();

        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.config.success_threshold {
                    info!(circuit = %self.name, successes, "Circuit recovered - transitioning to Closed");
                    *state = CircuitState::Closed;
                    *self.open_reason.write() = None;
                    self.failure_count.store(0, Ordering::Relaxed);
                    self.success_count.store(0, Ordering::Relaxed);
                }
            }
            CircuitState::Open => {
                *state = CircuitState::Closed;
                *self.open_reason.write() = None;
                self.failure_count.store(0, Ordering::Relaxed);
            }
        }
    }

    pub fn record_failure(&self, kind: FailureKind) {
        *self.last_failure_time.write() = Some(Instant::now());

        let mut state = self.state.write();

        // Quota failures trip the long cool-down regardless of counts.
        if kind == FailureKind::Quota {
            if *state != CircuitState::Open {
                warn!(
                    circuit = %self.name,
                    cooldown_secs = self.config.quota_open_duration.as_secs(),
                    "Quota failure - circuit opening for long cool-down"
                );
                *state = CircuitState::Open;
                self.trips.fetch_add(1, Ordering::Relaxed);
            }
            *self.open_reason.write() = Some(FailureKind::Quota);
            self.success_count.store(0, Ordering::Relaxed);
            return;
        }

        match *state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures,
                        threshold = self.config.failure_threshold,
                        "Circuit tripped - transitioning to Open"
                    );
                    *state = CircuitState::Open;
                    *self.open_reason.write() = Some(FailureKind::Transient);
                    self.trips.fetch_add(1, Ordering::Relaxed);
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Failure in HalfOpen state - back to Open");
                *state = CircuitState::Open;
                *self.open_reason.write() = Some(FailureKind::Transient);
                self.trips.fetch_add(1, Ordering::Relaxed);
                self.success_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.write();
        info!(circuit = %self.name, "Circuit manually reset");
        *state = CircuitState::Closed;
        *self.open_reason.write() = None;
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.half_open_requests.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            open_reason: self.open_reason(),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            trips: self.trips.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub open_reason: Option<FailureKind>,
    pub failure_count: u32,
    pub trips: u64,
}
