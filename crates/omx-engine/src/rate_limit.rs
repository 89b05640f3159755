//! Per-venue rate-limit backoff.
//!
//! Centralizes 429 handling: every control cycle asks `before_cycle` for a
//! decision, and any component that observes a rate-limit error reports it
//! via `register_rate_limit`. Purely observational; never errors.

use tracing::{debug, warn};

/// Backoff ceiling.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Decision for the upcoming control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDecision {
    /// Proceed normally.
    Run,
    /// Last cycle saw a rate limit and less than one refresh interval has
    /// elapsed; sit this one out.
    Skip,
    /// Inside the backoff window.
    Paused,
}

#[derive(Debug)]
pub struct RateLimitController {
    refresh_interval_ms: u64,
    consecutive_429: u32,
    pause_until_ms: Option<u64>,
    last_cycle_rate_limited: bool,
    last_cycle_end_ms: Option<u64>,
}

impl RateLimitController {
    pub fn new(refresh_interval_ms: u64) -> Self {
        Self {
            refresh_interval_ms,
            consecutive_429: 0,
            pause_until_ms: None,
            last_cycle_rate_limited: false,
            last_cycle_end_ms: None,
        }
    }

    /// Gate for the next control cycle.
    pub fn before_cycle(&self, now_ms: u64) -> CycleDecision {
        if let Some(until) = self.pause_until_ms {
            if now_ms < until {
                return CycleDecision::Paused;
            }
        }
        if self.last_cycle_rate_limited {
            if let Some(end) = self.last_cycle_end_ms {
                if now_ms.saturating_sub(end) < self.refresh_interval_ms {
                    return CycleDecision::Skip;
                }
            }
        }
        CycleDecision::Run
    }

    /// Record the outcome of a finished cycle. A clean cycle decays the
    /// consecutive-429 counter by one (floor zero).
    pub fn on_cycle_complete(&mut self, now_ms: u64, had_rate_limit: bool) {
        self.last_cycle_rate_limited = had_rate_limit;
        self.last_cycle_end_ms = Some(now_ms);
        if !had_rate_limit && self.consecutive_429 > 0 {
            self.consecutive_429 -= 1;
            debug!(
                consecutive_429 = self.consecutive_429,
                "Clean cycle, decaying rate-limit counter"
            );
        }
    }

    /// Report an observed rate-limit error.
    ///
    /// Re-arms the pause deadline monotonically: a later registration with a
    /// smaller backoff never shortens an existing pause.
    pub fn register_rate_limit(&mut self, now_ms: u64, source: &str) {
        self.consecutive_429 += 1;
        let backoff = self.backoff_ms(self.consecutive_429);
        let candidate = now_ms.saturating_add(backoff);
        let pause_until = match self.pause_until_ms {
            Some(prev) => prev.max(candidate),
            None => candidate,
        };
        self.pause_until_ms = Some(pause_until);
        warn!(
            source = source,
            consecutive_429 = self.consecutive_429,
            backoff_ms = backoff,
            pause_until_ms = pause_until,
            "Rate limit registered, backing off"
        );
    }

    /// Entries are suppressed while any 429 debt remains; reduce-only
    /// closes stay allowed.
    pub fn should_block_entries(&self) -> bool {
        self.consecutive_429 >= 1
    }

    pub fn is_paused(&self, now_ms: u64) -> bool {
        self.pause_until_ms.is_some_and(|until| now_ms < until)
    }

    pub fn consecutive_429(&self) -> u32 {
        self.consecutive_429
    }

    /// Exponential backoff: base = 2x refresh interval, doubling per
    /// consecutive 429, capped at 60s.
    fn backoff_ms(&self, consecutive: u32) -> u64 {
        let base = 2 * self.refresh_interval_ms;
        let shift = consecutive.saturating_sub(1).min(16);
        base.saturating_mul(1u64 << shift).min(MAX_BACKOFF_MS)
    }
}
