//! Per-edge sliding windows.
//!
//! Every dispatched request lands here as a [`RequestRecord`]. Samples are
//! bounded twice: by age (the sliding window) and by count, so a hot edge
//! cannot grow without limit. Windows are partitioned per edge behind a
//! briefly-held map lock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use lattice_registry::{Edge, ErrorClass};

use crate::issues::{CommIssue, IssueThresholds, evaluate_edge};

/// Telemetry tuning knobs.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Sliding window length.
    pub window: Duration,
    /// Upper bound on retained samples per edge.
    pub sample_limit: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30 * 60),
            sample_limit: 2048,
        }
    }
}

/// One dispatched request, as reported by the dispatcher.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub edge: Edge,
    pub success: bool,
    /// Set when `success` is false.
    pub error: Option<ErrorClass>,
    pub latency: Duration,
}

/// Aggregates over one edge's window.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeStats {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    /// failures / total; 0.0 without traffic.
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
}

/// `EdgeStats` paired with its edge, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeSummary {
    pub edge: Edge,
    #[serde(flatten)]
    pub stats: EdgeStats,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    success: bool,
    latency: Duration,
}

/// Sliding window for one edge.
#[derive(Debug, Default)]
pub(crate) struct EdgeWindow {
    samples: VecDeque<Sample>,
}

impl EdgeWindow {
    fn push(&mut self, now: Instant, success: bool, latency: Duration, config: &TelemetryConfig) {
        self.samples.push_back(Sample {
            at: now,
            success,
            latency,
        });
        while self.samples.len() > config.sample_limit {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > config.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn stats(&self, now: Instant, window: Duration) -> EdgeStats {
        let mut total = 0usize;
        let mut successes = 0usize;
        let mut latency_sum = Duration::ZERO;
        let mut latencies: Vec<u64> = Vec::with_capacity(self.samples.len());

        for sample in &self.samples {
            if now.duration_since(sample.at) > window {
                continue;
            }
            total += 1;
            if sample.success {
                successes += 1;
            }
            latency_sum += sample.latency;
            latencies.push(sample.latency.as_micros() as u64);
        }

        let failures = total - successes;
        EdgeStats {
            total,
            successes,
            failures,
            error_rate: if total > 0 {
                failures as f64 / total as f64
            } else {
                0.0
            },
            avg_latency_ms: if total > 0 {
                latency_sum.as_secs_f64() * 1000.0 / total as f64
            } else {
                0.0
            },
            p95_latency_ms: percentile_ms(&mut latencies, 0.95),
        }
    }
}

/// Compute a percentile from microsecond samples, in milliseconds.
fn percentile_ms(latencies: &mut [u64], pct: f64) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    latencies.sort_unstable();
    let idx = (latencies.len() as f64 * pct) as usize;
    latencies[idx.min(latencies.len() - 1)] as f64 / 1000.0
}

/// Ingests request records and answers statistics queries.
///
/// Purely advisory: nothing here feeds back into breakers or dispatch.
#[derive(Debug, Default)]
pub struct TelemetryHub {
    config: TelemetryConfig,
    windows: RwLock<HashMap<Edge, Arc<Mutex<EdgeWindow>>>>,
}

impl TelemetryHub {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Append one request record to its edge window.
    pub fn record(&self, record: RequestRecord) {
        self.record_at(Instant::now(), record);
    }

    fn record_at(&self, now: Instant, record: RequestRecord) {
        let slot = self.slot(&record.edge);
        let mut window = slot.lock().expect("edge window lock");
        window.push(now, record.success, record.latency, &self.config);
    }

    /// Statistics for one edge, if it has ever seen traffic.
    pub fn stats(&self, edge: &Edge) -> Option<EdgeStats> {
        let windows = self.windows.read().expect("telemetry map lock");
        windows
            .get(edge)
            .map(|slot| slot.lock().expect("edge window lock").stats(Instant::now(), self.config.window))
    }

    /// Statistics for every edge, sorted for stable output.
    pub fn all_statistics(&self) -> Vec<EdgeSummary> {
        let now = Instant::now();
        let windows = self.windows.read().expect("telemetry map lock");
        let mut summaries: Vec<EdgeSummary> = windows
            .iter()
            .map(|(edge, slot)| EdgeSummary {
                edge: edge.clone(),
                stats: slot
                    .lock()
                    .expect("edge window lock")
                    .stats(now, self.config.window),
            })
            .collect();
        summaries.sort_by_key(|s| s.edge.to_string());
        summaries
    }

    /// Scan every edge against the thresholds.
    pub fn detect_issues(&self, thresholds: &IssueThresholds) -> Vec<CommIssue> {
        let mut issues: Vec<CommIssue> = Vec::new();
        for summary in self.all_statistics() {
            issues.extend(evaluate_edge(&summary.edge, &summary.stats, thresholds));
        }
        issues
    }

    /// Edges with at least one recorded request.
    pub fn edges(&self) -> Vec<Edge> {
        self.windows
            .read()
            .expect("telemetry map lock")
            .keys()
            .cloned()
            .collect()
    }

    fn slot(&self, edge: &Edge) -> Arc<Mutex<EdgeWindow>> {
        if let Some(slot) = self.windows.read().expect("telemetry map lock").get(edge) {
            return slot.clone();
        }
        let mut windows = self.windows.write().expect("telemetry map lock");
        windows
            .entry(edge.clone())
            .or_insert_with(|| Arc::new(Mutex::new(EdgeWindow::default())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(edge: &Edge, success: bool, latency: Duration) -> RequestRecord {
        RequestRecord {
            edge: edge.clone(),
            success,
            error: (!success).then_some(ErrorClass::Server),
            latency,
        }
    }

    #[test]
    fn stats_aggregate_counts_and_latency() {
        let hub = TelemetryHub::new(TelemetryConfig::default());
        let edge = Edge::between("grafana", "prometheus");

        hub.record(record(&edge, true, Duration::from_millis(10)));
        hub.record(record(&edge, true, Duration::from_millis(20)));
        hub.record(record(&edge, true, Duration::from_millis(30)));
        hub.record(record(&edge, false, Duration::from_millis(40)));

        let stats = hub.stats(&edge).unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successes, 3);
        assert_eq!(stats.failures, 1);
        assert!((stats.error_rate - 0.25).abs() < f64::EPSILON);
        assert!((stats.avg_latency_ms - 25.0).abs() < 0.01);
    }

    #[test]
    fn unknown_edge_has_no_stats() {
        let hub = TelemetryHub::new(TelemetryConfig::default());
        assert!(hub.stats(&Edge::to("ghost")).is_none());
    }

    #[test]
    fn p95_over_distribution() {
        let hub = TelemetryHub::new(TelemetryConfig::default());
        let edge = Edge::to("api");
        for ms in 1..=100u64 {
            hub.record(record(&edge, true, Duration::from_millis(ms)));
        }

        let stats = hub.stats(&edge).unwrap();
        assert!(
            stats.p95_latency_ms >= 94.0 && stats.p95_latency_ms <= 97.0,
            "p95 was {}",
            stats.p95_latency_ms
        );
    }

    #[test]
    fn samples_age_out_of_the_window() {
        let config = TelemetryConfig {
            window: Duration::from_secs(60),
            ..Default::default()
        };
        let mut window = EdgeWindow::default();
        let t0 = Instant::now();

        window.push(t0, false, Duration::from_millis(5), &config);
        window.push(t0 + Duration::from_secs(90), true, Duration::from_millis(5), &config);

        // The failure at t0 is outside the window by t0+90.
        let stats = window.stats(t0 + Duration::from_secs(90), config.window);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn sample_count_is_bounded() {
        let config = TelemetryConfig {
            sample_limit: 32,
            ..Default::default()
        };
        let hub = TelemetryHub::new(config);
        let edge = Edge::to("api");
        for _ in 0..200 {
            hub.record(record(&edge, true, Duration::from_millis(1)));
        }
        assert_eq!(hub.stats(&edge).unwrap().total, 32);
    }

    #[test]
    fn all_statistics_sorted_by_edge() {
        let hub = TelemetryHub::new(TelemetryConfig::default());
        hub.record(record(&Edge::between("b", "z"), true, Duration::from_millis(1)));
        hub.record(record(&Edge::between("a", "z"), true, Duration::from_millis(1)));

        let all = hub.all_statistics();
        let keys: Vec<String> = all.iter().map(|s| s.edge.to_string()).collect();
        assert_eq!(keys, vec!["a->z", "b->z"]);
    }
}
