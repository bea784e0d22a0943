//! Per-source rate budget: a minimum spacing between requests plus a daily
//! cap. Coarse-grained on purpose; the circuit breaker handles anything
//! the budget misses.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use time::{Date, OffsetDateTime};
use tracing::warn;

use crate::config::RateBudget;
use crate::extract::Blocker;

struct RateState {
    last_request: Option<Instant>,
    day: Date,
    used_today: u32,
}

pub struct RateLimiter {
    min_interval: Duration,
    daily_cap: u32,
    state: Mutex<RateState>,
}

impl RateLimiter {
    pub fn new(budget: RateBudget) -> Self {
        let min_interval = if budget.requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / budget.requests_per_second)
        } else {
            Duration::ZERO
        };
        RateLimiter {
            min_interval,
            daily_cap: budget.daily_cap,
            state: Mutex::new(RateState {
                last_request: None,
                day: OffsetDateTime::now_utc().date(),
                used_today: 0,
            }),
        }
    }

    /// Waits out the inter-request spacing and spends one unit of today's
    /// budget. Returns a rate-limited blocker when the daily cap is spent.
    pub async fn throttle(&self) -> std::result::Result<(), Blocker> {
        let wait = {
            let mut state = self.state.lock();
            let today = OffsetDateTime::now_utc().date();
            if state.day != today {
                state.day = today;
                state.used_today = 0;
            }
            if state.used_today >= self.daily_cap {
                warn!(cap = self.daily_cap, "daily request cap spent");
                return Err(Blocker::RateLimited);
            }
            state.used_today += 1;
            let now = Instant::now();
            let wait = match state.last_request {
                Some(last) => self.min_interval.saturating_sub(now - last),
                None => Duration::ZERO,
            };
            state.last_request = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            // Jittered so request spacing does not look metronomic.
            let jitter = rand::thread_rng().gen_range(1.0..1.25);
            tokio::time::sleep(wait.mul_f64(jitter)).await;
        }
        Ok(())
    }

    pub fn used_today(&self) -> u32 {
        self.state.lock().used_today
    }
}
