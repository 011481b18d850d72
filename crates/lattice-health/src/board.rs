//! Shared health board.
//!
//! One record per service, written by the probe loops and read by the
//! dispatcher, breaker wiring and orchestrator. Records are partitioned
//! per service behind a briefly-held map lock: writers and readers of
//! different services never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use lattice_registry::{HealthVerdict, ServiceName};

const WAIT_POLL: Duration = Duration::from_millis(25);

/// Mutable health state for one service.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub verdict: HealthVerdict,
    /// Completion time of the last probe. Strictly increases across writes.
    pub probed_at: Option<Instant>,
    pub consecutive_failures: u32,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            verdict: HealthVerdict::Unknown,
            probed_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Serializable per-service health summary.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub service: ServiceName,
    pub verdict: HealthVerdict,
    pub consecutive_failures: u32,
    /// Milliseconds since the last probe completed, if one ever ran.
    pub probe_age_ms: Option<u64>,
}

/// Board of per-service health records.
///
/// `Clone` shares the underlying records; probe loops write through one
/// handle while consumers read through others.
#[derive(Debug, Clone, Default)]
pub struct HealthBoard {
    records: Arc<RwLock<HashMap<ServiceName, Arc<Mutex<HealthRecord>>>>>,
}

impl HealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record for a service if missing (verdict starts Unknown).
    pub fn track(&self, name: &str) {
        self.slot(name);
    }

    /// Record a probe verdict, returning `(previous, current)`.
    pub fn record(&self, name: &str, verdict: HealthVerdict) -> (HealthVerdict, HealthVerdict) {
        let slot = self.slot(name);
        let mut record = slot.lock().expect("health record lock");

        let previous = record.verdict;
        record.verdict = verdict;
        // Keep timestamps strictly increasing even on coarse clocks.
        let now = Instant::now();
        record.probed_at = Some(match record.probed_at {
            Some(prev) if now <= prev => prev + Duration::from_nanos(1),
            _ => now,
        });
        match verdict {
            HealthVerdict::Healthy => record.consecutive_failures = 0,
            HealthVerdict::Unhealthy => record.consecutive_failures += 1,
            HealthVerdict::Unknown => {}
        }
        (previous, verdict)
    }

    /// Last known verdict; `Unknown` for services never tracked.
    pub fn verdict(&self, name: &str) -> HealthVerdict {
        match self.records.read().expect("health board lock").get(name) {
            Some(slot) => slot.lock().expect("health record lock").verdict,
            None => HealthVerdict::Unknown,
        }
    }

    /// Last known verdict as a bool, fail-closed: a service that has never
    /// been probed is not healthy.
    pub fn is_healthy(&self, name: &str) -> bool {
        self.verdict(name).is_healthy()
    }

    /// Copy of the current record for one service.
    pub fn snapshot(&self, name: &str) -> Option<HealthRecord> {
        self.records
            .read()
            .expect("health board lock")
            .get(name)
            .map(|slot| slot.lock().expect("health record lock").clone())
    }

    /// Poll the record until the service reports healthy; false on timeout.
    pub async fn wait_until_healthy(&self, name: &str, timeout: Duration) -> bool {
        self.wait_until_verdict(name, HealthVerdict::Healthy, timeout)
            .await
    }

    /// Poll the record until it reads `verdict`; false on timeout.
    pub async fn wait_until_verdict(
        &self,
        name: &str,
        verdict: HealthVerdict,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.verdict(name) != verdict {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(WAIT_POLL.min(deadline - now)).await;
        }
        true
    }

    /// Drop the record for a service removed from the registry.
    pub fn remove(&self, name: &str) {
        self.records
            .write()
            .expect("health board lock")
            .remove(name);
    }

    /// Per-service summaries, sorted by service name.
    pub fn report(&self) -> Vec<HealthSummary> {
        let records = self.records.read().expect("health board lock");
        let mut report: Vec<HealthSummary> = records
            .iter()
            .map(|(name, slot)| {
                let record = slot.lock().expect("health record lock");
                HealthSummary {
                    service: name.clone(),
                    verdict: record.verdict,
                    consecutive_failures: record.consecutive_failures,
                    probe_age_ms: record.probed_at.map(|t| t.elapsed().as_millis() as u64),
                }
            })
            .collect();
        report.sort_by(|a, b| a.service.cmp(&b.service));
        report
    }

    /// Names with a record on the board.
    pub fn services(&self) -> Vec<ServiceName> {
        self.records
            .read()
            .expect("health board lock")
            .keys()
            .cloned()
            .collect()
    }

    fn slot(&self, name: &str) -> Arc<Mutex<HealthRecord>> {
        if let Some(slot) = self.records.read().expect("health board lock").get(name) {
            return slot.clone();
        }
        let mut records = self.records.write().expect("health board lock");
        records
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HealthRecord::new())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_service_is_fail_closed() {
        let board = HealthBoard::new();
        assert_eq!(board.verdict("ghost"), HealthVerdict::Unknown);
        assert!(!board.is_healthy("ghost"));
    }

    #[test]
    fn tracked_service_starts_unknown() {
        let board = HealthBoard::new();
        board.track("api");
        assert_eq!(board.verdict("api"), HealthVerdict::Unknown);
        assert!(!board.is_healthy("api"));
    }

    #[test]
    fn record_reports_previous_and_current() {
        let board = HealthBoard::new();
        let (prev, cur) = board.record("api", HealthVerdict::Healthy);
        assert_eq!(prev, HealthVerdict::Unknown);
        assert_eq!(cur, HealthVerdict::Healthy);
        assert!(board.is_healthy("api"));

        let (prev, cur) = board.record("api", HealthVerdict::Unhealthy);
        assert_eq!(prev, HealthVerdict::Healthy);
        assert_eq!(cur, HealthVerdict::Unhealthy);
    }

    #[test]
    fn failures_count_consecutively_and_reset() {
        let board = HealthBoard::new();
        board.record("api", HealthVerdict::Unhealthy);
        board.record("api", HealthVerdict::Unhealthy);
        assert_eq!(board.snapshot("api").unwrap().consecutive_failures, 2);

        board.record("api", HealthVerdict::Healthy);
        assert_eq!(board.snapshot("api").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn probe_timestamps_strictly_increase() {
        let board = HealthBoard::new();
        board.record("api", HealthVerdict::Healthy);
        let first = board.snapshot("api").unwrap().probed_at.unwrap();
        board.record("api", HealthVerdict::Healthy);
        let second = board.snapshot("api").unwrap().probed_at.unwrap();
        assert!(second > first);
    }

    #[test]
    fn report_is_sorted_by_name() {
        let board = HealthBoard::new();
        board.record("zipkin", HealthVerdict::Healthy);
        board.record("api", HealthVerdict::Unhealthy);
        board.track("mid");

        let report = board.report();
        let names: Vec<&str> = report.iter().map(|s| s.service.as_str()).collect();
        assert_eq!(names, vec!["api", "mid", "zipkin"]);
        assert!(report[0].probe_age_ms.is_some());
        assert!(report[1].probe_age_ms.is_none());
    }

    #[test]
    fn remove_drops_the_record() {
        let board = HealthBoard::new();
        board.record("api", HealthVerdict::Healthy);
        board.remove("api");
        assert_eq!(board.verdict("api"), HealthVerdict::Unknown);
        assert!(board.report().is_empty());
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_healthy() {
        let board = HealthBoard::new();
        board.record("api", HealthVerdict::Healthy);
        assert!(board.wait_until_healthy("api", Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_times_out_on_unhealthy_service() {
        let board = HealthBoard::new();
        board.record("api", HealthVerdict::Unhealthy);
        assert!(
            !board
                .wait_until_healthy("api", Duration::from_millis(60))
                .await
        );
    }

    #[tokio::test]
    async fn wait_observes_recovery() {
        let board = HealthBoard::new();
        board.record("api", HealthVerdict::Unhealthy);

        let writer = board.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.record("api", HealthVerdict::Healthy);
        });

        assert!(
            board
                .wait_until_healthy("api", Duration::from_secs(2))
                .await
        );
    }
}
