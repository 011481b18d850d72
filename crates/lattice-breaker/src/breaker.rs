//! Circuit breaker state machine.
//!
//! One breaker guards one edge. The machine is pure: every method takes
//! the current time explicitly, so transitions are fully deterministic
//! under test. [`crate::manager::BreakerManager`] supplies the wall clock
//! and the per-edge locking.
//!
//! ```text
//!            failure_threshold reached
//!   CLOSED ──────────────────────────────► OPEN
//!     ▲                                      │ first can_execute() after
//!     │ success_threshold                    │ recovery_timeout
//!     │ trial successes                      ▼
//!     └────────────────────────────────── HALF_OPEN
//!                  any trial failure ──────► OPEN
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure pressure that opens a CLOSED breaker.
    pub failure_threshold: u32,
    /// How long an OPEN breaker rejects calls before trialing recovery.
    pub recovery_timeout: Duration,
    /// Consecutive trial successes that close a HALF_OPEN breaker. Also
    /// the number of trial calls HALF_OPEN admits.
    pub success_threshold: u32,
    /// Window for the derived success rate and latency statistics.
    pub stats_window: Duration,
    /// Upper bound on retained outcomes.
    pub history_limit: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            stats_window: Duration::from_secs(300),
            history_limit: 256,
        }
    }
}

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow through; failures build pressure.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// A limited number of trial calls decide recovery.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Derived view of one breaker, never authoritative.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    /// Outcomes inside the stats window.
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    /// successes / total within the window; `None` without traffic.
    pub success_rate: Option<f64>,
    /// Mean latency within the window, in milliseconds.
    pub avg_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    success: bool,
    latency: Duration,
}

/// Per-edge circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    /// Failure pressure while CLOSED; successes bleed it off, never below 0.
    failure_count: u32,
    /// Consecutive successes while HALF_OPEN.
    trial_successes: u32,
    /// Trial calls admitted since entering HALF_OPEN.
    trials_admitted: u32,
    /// When the breaker last entered OPEN.
    opened_at: Option<Instant>,
    /// Recent outcomes, bounded by `history_limit`.
    history: VecDeque<Outcome>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failure_count: 0,
            trial_successes: 0,
            trials_admitted: 0,
            opened_at: None,
            history: VecDeque::new(),
        }
    }

    /// Whether a call over this edge may proceed at `now`.
    ///
    /// The first admission after an OPEN breaker's recovery timeout flips
    /// it to HALF_OPEN and counts as the first trial call.
    pub fn can_execute(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let waited = self
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or(self.config.recovery_timeout);
                if waited >= self.config.recovery_timeout {
                    self.state = BreakerState::HalfOpen;
                    self.trial_successes = 0;
                    self.trials_admitted = 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.trials_admitted < self.config.success_threshold {
                    self.trials_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call that completed at `now`.
    pub fn record_success(&mut self, now: Instant, latency: Duration) {
        self.push_outcome(now, true, latency);
        match self.state {
            BreakerState::Closed => {
                self.failure_count = self.failure_count.saturating_sub(1);
            }
            BreakerState::HalfOpen => {
                self.trial_successes += 1;
                if self.trial_successes >= self.config.success_threshold {
                    self.state = BreakerState::Closed;
                    self.failure_count = 0;
                    self.trial_successes = 0;
                    self.trials_admitted = 0;
                    self.opened_at = None;
                }
            }
            // A call admitted earlier may complete after a force-open.
            BreakerState::Open => {}
        }
    }

    /// Record a failed call that completed at `now`.
    pub fn record_failure(&mut self, now: Instant, latency: Duration) {
        self.push_outcome(now, false, latency);
        match self.state {
            BreakerState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            // No partial credit: one trial failure reopens.
            BreakerState::HalfOpen => self.open(now),
            BreakerState::Open => {}
        }
    }

    /// Open immediately, regardless of state.
    pub fn force_open(&mut self, now: Instant) {
        self.open(now);
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Derived statistics over the configured window ending at `now`.
    pub fn stats(&self, now: Instant) -> BreakerStats {
        let window = self.config.stats_window;
        let mut total = 0usize;
        let mut successes = 0usize;
        let mut latency_sum = Duration::ZERO;
        for outcome in &self.history {
            if now.duration_since(outcome.at) > window {
                continue;
            }
            total += 1;
            if outcome.success {
                successes += 1;
            }
            latency_sum += outcome.latency;
        }

        BreakerStats {
            state: self.state,
            total,
            successes,
            failures: total - successes,
            success_rate: (total > 0).then(|| successes as f64 / total as f64),
            avg_latency_ms: (total > 0)
                .then(|| latency_sum.as_secs_f64() * 1000.0 / total as f64),
        }
    }

    fn open(&mut self, now: Instant) {
        if self.state != BreakerState::Open {
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
            self.trial_successes = 0;
            self.trials_admitted = 0;
        }
    }

    fn push_outcome(&mut self, at: Instant, success: bool, latency: Duration) {
        self.history.push_back(Outcome {
            at,
            success,
            latency,
        });
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn breaker(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold,
            recovery_timeout,
            ..Default::default()
        })
    }

    #[test]
    fn starts_closed_and_admits() {
        let mut cb = CircuitBreaker::new(BreakerConfig::default());
        let now = Instant::now();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.can_execute(now));
    }

    #[test]
    fn opens_at_threshold_and_stays_open_until_timeout() {
        let mut cb = breaker(5, Duration::from_secs(60));
        let t0 = Instant::now();

        for _ in 0..4 {
            cb.record_failure(t0, MS);
        }
        assert_eq!(cb.state(), BreakerState::Closed);

        cb.record_failure(t0, MS);
        assert_eq!(cb.state(), BreakerState::Open);

        // OPEN is time-gated, not call-gated: any number of attempts
        // before the timeout stays rejected.
        for i in 0..10 {
            assert!(!cb.can_execute(t0 + Duration::from_secs(i)));
        }
        assert!(!cb.can_execute(t0 + Duration::from_secs(59)));
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn closed_success_bleeds_failure_pressure() {
        let mut cb = breaker(5, Duration::from_secs(60));
        let t0 = Instant::now();

        for _ in 0..4 {
            cb.record_failure(t0, MS);
        }
        cb.record_success(t0, MS);
        assert_eq!(cb.failure_count(), 3);

        // Back to 4, still closed.
        cb.record_failure(t0, MS);
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure(t0, MS);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn failure_pressure_clamps_at_zero() {
        let mut cb = breaker(5, Duration::from_secs(60));
        let t0 = Instant::now();

        for _ in 0..20 {
            cb.record_success(t0, MS);
        }
        assert_eq!(cb.failure_count(), 0);

        // Still takes the full threshold to open.
        for _ in 0..4 {
            cb.record_failure(t0, MS);
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure(t0, MS);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn recovery_timeout_admits_one_half_open_transition() {
        let mut cb = breaker(5, Duration::from_secs(60));
        let t0 = Instant::now();
        for _ in 0..5 {
            cb.record_failure(t0, MS);
        }

        let later = t0 + Duration::from_secs(61);
        assert!(cb.can_execute(later));
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        // Further admissions stay in HALF_OPEN; no second transition.
        assert!(cb.can_execute(later));
        assert!(cb.can_execute(later));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_admits_exactly_the_trial_budget() {
        let mut cb = breaker(2, Duration::from_secs(10));
        let t0 = Instant::now();
        cb.record_failure(t0, MS);
        cb.record_failure(t0, MS);

        let later = t0 + Duration::from_secs(11);
        // success_threshold defaults to 3 trial slots.
        assert!(cb.can_execute(later));
        assert!(cb.can_execute(later));
        assert!(cb.can_execute(later));
        assert!(!cb.can_execute(later));
    }

    #[test]
    fn trial_failure_reopens_without_partial_credit() {
        let mut cb = breaker(2, Duration::from_secs(10));
        let t0 = Instant::now();
        cb.record_failure(t0, MS);
        cb.record_failure(t0, MS);

        let later = t0 + Duration::from_secs(11);
        assert!(cb.can_execute(later));
        cb.record_success(later, MS);
        cb.record_success(later, MS);

        // Two of three trials passed; one failure discards them.
        cb.record_failure(later, MS);
        assert_eq!(cb.state(), BreakerState::Open);

        // The new OPEN window starts at the reopen time.
        assert!(!cb.can_execute(later + Duration::from_secs(9)));
        assert!(cb.can_execute(later + Duration::from_secs(10)));
    }

    #[test]
    fn trial_successes_close_and_reset_pressure() {
        let mut cb = breaker(5, Duration::from_secs(60));
        let t0 = Instant::now();
        for _ in 0..5 {
            cb.record_failure(t0, MS);
        }

        let later = t0 + Duration::from_secs(61);
        assert!(cb.can_execute(later));
        cb.record_success(later, MS);
        cb.record_success(later, MS);
        cb.record_success(later, MS);
        assert_eq!(cb.state(), BreakerState::Closed);

        // Counter was reset: four more failures stay closed, the fifth opens.
        for _ in 0..4 {
            cb.record_failure(later, MS);
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure(later, MS);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn force_open_rejects_immediately() {
        let mut cb = CircuitBreaker::new(BreakerConfig::default());
        let t0 = Instant::now();
        assert!(cb.can_execute(t0));

        cb.force_open(t0);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.can_execute(t0 + Duration::from_secs(59)));
        assert!(cb.can_execute(t0 + Duration::from_secs(60)));
    }

    #[test]
    fn stats_cover_only_the_window() {
        let mut cb = CircuitBreaker::new(BreakerConfig {
            stats_window: Duration::from_secs(300),
            ..Default::default()
        });
        let t0 = Instant::now();

        cb.record_success(t0, Duration::from_millis(20));
        cb.record_failure(t0 + Duration::from_secs(600), Duration::from_millis(40));

        // Read at t0+600: the success at t0 has aged out.
        let stats = cb.stats(t0 + Duration::from_secs(600));
        assert_eq!(stats.total, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.success_rate, Some(0.0));
        assert_eq!(stats.avg_latency_ms, Some(40.0));
    }

    #[test]
    fn stats_without_traffic_are_empty() {
        let cb = CircuitBreaker::new(BreakerConfig::default());
        let stats = cb.stats(Instant::now());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, None);
        assert_eq!(stats.avg_latency_ms, None);
    }

    #[test]
    fn history_is_bounded() {
        let mut cb = CircuitBreaker::new(BreakerConfig {
            history_limit: 16,
            failure_threshold: u32::MAX,
            ..Default::default()
        });
        let t0 = Instant::now();
        for _ in 0..100 {
            cb.record_failure(t0, MS);
        }
        let stats = cb.stats(t0);
        assert_eq!(stats.total, 16);
    }
}
