//! Per-edge breaker map.
//!
//! Breakers are created lazily on first use and live for the process
//! lifetime; a registry reload never resets them. Each breaker sits
//! behind its own lock so edges never contend with each other. The
//! manager supplies the wall clock and logs state transitions with the
//! edge attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use lattice_registry::Edge;

use crate::breaker::{BreakerConfig, BreakerState, BreakerStats, CircuitBreaker};

/// Lazily-populated map of per-edge breakers sharing one config.
pub struct BreakerManager {
    config: BreakerConfig,
    breakers: RwLock<HashMap<Edge, Arc<Mutex<CircuitBreaker>>>>,
}

impl BreakerManager {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a call over `edge` may proceed right now.
    pub fn can_execute(&self, edge: &Edge) -> bool {
        let slot = self.slot(edge);
        let mut breaker = slot.lock().expect("breaker lock");
        let before = breaker.state();
        let allowed = breaker.can_execute(Instant::now());
        self.note_transition(edge, before, breaker.state());
        if !allowed {
            // Expected recoverable signal, interesting only as a rate.
            debug!(%edge, "call short-circuited by open breaker");
        }
        allowed
    }

    /// Record a successful call over `edge`.
    pub fn record_success(&self, edge: &Edge, latency: Duration) {
        let slot = self.slot(edge);
        let mut breaker = slot.lock().expect("breaker lock");
        let before = breaker.state();
        breaker.record_success(Instant::now(), latency);
        self.note_transition(edge, before, breaker.state());
    }

    /// Record a failed call over `edge`.
    pub fn record_failure(&self, edge: &Edge, latency: Duration) {
        let slot = self.slot(edge);
        let mut breaker = slot.lock().expect("breaker lock");
        let before = breaker.state();
        breaker.record_failure(Instant::now(), latency);
        self.note_transition(edge, before, breaker.state());
    }

    /// Open one edge immediately.
    pub fn force_open(&self, edge: &Edge) {
        let slot = self.slot(edge);
        let mut breaker = slot.lock().expect("breaker lock");
        let before = breaker.state();
        breaker.force_open(Instant::now());
        if before != BreakerState::Open {
            warn!(%edge, "circuit forced open");
        }
    }

    /// Open every existing edge that targets `callee`.
    ///
    /// Wired to the health monitor: when a service turns unhealthy, calls
    /// toward it start failing fast instead of burning their retries.
    pub fn force_open_callee(&self, callee: &str) {
        let matching: Vec<Edge> = {
            let breakers = self.breakers.read().expect("breaker map lock");
            breakers
                .keys()
                .filter(|edge| edge.callee == callee)
                .cloned()
                .collect()
        };
        if matching.is_empty() {
            debug!(%callee, "no breakers to force open");
            return;
        }
        for edge in &matching {
            self.force_open(edge);
        }
    }

    /// Current state of one edge, if a breaker exists for it.
    pub fn state(&self, edge: &Edge) -> Option<BreakerState> {
        self.breakers
            .read()
            .expect("breaker map lock")
            .get(edge)
            .map(|slot| slot.lock().expect("breaker lock").state())
    }

    /// Derived statistics for one edge, if a breaker exists for it.
    pub fn statistics(&self, edge: &Edge) -> Option<BreakerStats> {
        self.breakers
            .read()
            .expect("breaker map lock")
            .get(edge)
            .map(|slot| slot.lock().expect("breaker lock").stats(Instant::now()))
    }

    /// Statistics for every edge, sorted for stable output.
    pub fn all_statistics(&self) -> Vec<(Edge, BreakerStats)> {
        let now = Instant::now();
        let breakers = self.breakers.read().expect("breaker map lock");
        let mut stats: Vec<(Edge, BreakerStats)> = breakers
            .iter()
            .map(|(edge, slot)| {
                (
                    edge.clone(),
                    slot.lock().expect("breaker lock").stats(now),
                )
            })
            .collect();
        stats.sort_by_key(|(edge, _)| edge.to_string());
        stats
    }

    fn slot(&self, edge: &Edge) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(slot) = self.breakers.read().expect("breaker map lock").get(edge) {
            return slot.clone();
        }
        let mut breakers = self.breakers.write().expect("breaker map lock");
        breakers
            .entry(edge.clone())
            .or_insert_with(|| {
                debug!(%edge, "breaker created");
                Arc::new(Mutex::new(CircuitBreaker::new(self.config.clone())))
            })
            .clone()
    }

    fn note_transition(&self, edge: &Edge, from: BreakerState, to: BreakerState) {
        if from == to {
            return;
        }
        match to {
            BreakerState::Open => warn!(%edge, %from, "circuit opened"),
            BreakerState::HalfOpen => info!(%edge, "circuit trialing recovery"),
            BreakerState::Closed => info!(%edge, "circuit closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn manager(failure_threshold: u32, recovery_timeout: Duration) -> BreakerManager {
        BreakerManager::new(BreakerConfig {
            failure_threshold,
            recovery_timeout,
            ..Default::default()
        })
    }

    #[test]
    fn breakers_appear_lazily() {
        let mgr = BreakerManager::new(BreakerConfig::default());
        let edge = Edge::to("prometheus");
        assert_eq!(mgr.state(&edge), None);
        assert!(mgr.statistics(&edge).is_none());

        assert!(mgr.can_execute(&edge));
        assert_eq!(mgr.state(&edge), Some(BreakerState::Closed));
    }

    #[test]
    fn edges_fail_independently() {
        let mgr = manager(2, Duration::from_secs(60));
        let prom = Edge::between("grafana", "prometheus");
        let influx = Edge::between("grafana", "influxdb");

        mgr.record_failure(&prom, MS);
        mgr.record_failure(&prom, MS);

        assert!(!mgr.can_execute(&prom));
        assert!(mgr.can_execute(&influx));
    }

    #[test]
    fn force_open_callee_targets_matching_edges() {
        let mgr = BreakerManager::new(BreakerConfig::default());
        let a_x = Edge::between("a", "x");
        let b_x = Edge::between("b", "x");
        let a_y = Edge::between("a", "y");
        for edge in [&a_x, &b_x, &a_y] {
            assert!(mgr.can_execute(edge));
        }

        mgr.force_open_callee("x");

        assert_eq!(mgr.state(&a_x), Some(BreakerState::Open));
        assert_eq!(mgr.state(&b_x), Some(BreakerState::Open));
        assert_eq!(mgr.state(&a_y), Some(BreakerState::Closed));
    }

    #[test]
    fn grafana_prometheus_trip_and_recover() {
        // failure_threshold 3 with a short real recovery window.
        let mgr = manager(3, Duration::from_millis(50));
        let edge = Edge::between("grafana", "prometheus");

        for _ in 0..3 {
            assert!(mgr.can_execute(&edge));
            mgr.record_failure(&edge, MS);
        }
        assert_eq!(mgr.state(&edge), Some(BreakerState::Open));

        // A call before the timeout is short-circuited.
        assert!(!mgr.can_execute(&edge));

        std::thread::sleep(Duration::from_millis(60));

        // Past the timeout: trial admissions succeed and close the circuit.
        for _ in 0..3 {
            assert!(mgr.can_execute(&edge));
            mgr.record_success(&edge, MS);
        }
        assert_eq!(mgr.state(&edge), Some(BreakerState::Closed));
    }

    #[test]
    fn all_statistics_sorted_by_edge() {
        let mgr = BreakerManager::new(BreakerConfig::default());
        mgr.record_success(&Edge::between("b", "z"), MS);
        mgr.record_success(&Edge::between("a", "z"), MS);
        mgr.record_failure(&Edge::to("api"), MS);

        let stats = mgr.all_statistics();
        let keys: Vec<String> = stats.iter().map(|(e, _)| e.to_string()).collect();
        assert_eq!(keys, vec!["a->z", "api", "b->z"]);
        assert_eq!(stats[1].1.failures, 1);
    }
}
