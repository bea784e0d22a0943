//! Per-source circuit breaker.
//!
//! closed -> open after N consecutive failures or a single hard blocker
//! (captcha / rate limit); open -> half-open after the cooldown; half-open
//! -> closed on one success, back to open on any failure. The registry is
//! session-scoped and resets after a configurable idle period.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub last_attempt_at: Option<Instant>,
    pub attempts_since_open: u32,
}

impl Default for CircuitSnapshot {
    fn default() -> Self {
        CircuitSnapshot {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_attempt_at: None,
            attempts_since_open: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allow,
    Blocked,
}

struct Registry {
    sources: HashMap<String, CircuitSnapshot>,
    last_activity: Instant,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    idle_reset: Duration,
    inner: Mutex<Registry>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration, idle_reset: Duration) -> Self {
        CircuitBreaker {
            failure_threshold,
            cooldown,
            idle_reset,
            inner: Mutex::new(Registry {
                sources: HashMap::new(),
                last_activity: Instant::now(),
            }),
        }
    }

    fn touch(&self, registry: &mut Registry) {
        let now = Instant::now();
        if now.duration_since(registry.last_activity) >= self.idle_reset
            && !registry.sources.is_empty()
        {
            info!("circuit registry idle past reset window, clearing");
            registry.sources.clear();
        }
        registry.last_activity = now;
    }

    /// Gate for the next attempt against `source`. An open circuit whose
    /// cooldown has elapsed transitions to half-open and allows one probe.
    pub fn check(&self, source: &str) -> Gate {
        let mut registry = self.inner.lock();
        self.touch(&mut registry);
        let snapshot = registry.sources.entry(source.to_string()).or_default();
        let now = Instant::now();
        match snapshot.state {
            BreakerState::Closed | BreakerState::HalfOpen => {
                snapshot.last_attempt_at = Some(now);
                Gate::Allow
            }
            BreakerState::Open => {
                let elapsed = snapshot
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    snapshot.state = BreakerState::HalfOpen;
                    snapshot.last_attempt_at = Some(now);
                    snapshot.attempts_since_open += 1;
                    info!(source, "circuit half-open, probing");
                    Gate::Allow
                } else {
                    Gate::Blocked
                }
            }
        }
    }

    pub fn record_success(&self, source: &str) {
        let mut registry = self.inner.lock();
        self.touch(&mut registry);
        let snapshot = registry.sources.entry(source.to_string()).or_default();
        if snapshot.state != BreakerState::Closed {
            info!(source, "circuit closed after success");
        }
        snapshot.state = BreakerState::Closed;
        snapshot.consecutive_failures = 0;
        snapshot.opened_at = None;
        snapshot.attempts_since_open = 0;
    }

    /// Records a failed attempt. `hard` failures (captcha, rate limit)
    /// open the circuit immediately.
    pub fn record_failure(&self, source: &str, hard: bool) {
        let mut registry = self.inner.lock();
        self.touch(&mut registry);
        let snapshot = registry.sources.entry(source.to_string()).or_default();
        snapshot.consecutive_failures += 1;
        let should_open = hard
            || snapshot.state == BreakerState::HalfOpen
            || snapshot.consecutive_failures >= self.failure_threshold;
        if should_open && snapshot.state != BreakerState::Open {
            warn!(
                source,
                hard,
                failures = snapshot.consecutive_failures,
                "circuit opened"
            );
        }
        if should_open {
            snapshot.state = BreakerState::Open;
            snapshot.opened_at = Some(Instant::now());
        }
    }

    pub fn snapshot(&self, source: &str) -> CircuitSnapshot {
        self.inner
            .lock()
            .sources
            .get(source)
            .cloned()
            .unwrap_or_default()
    }
}
