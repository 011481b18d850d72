//! Issue detection over edge statistics.
//!
//! Flags edges whose recent traffic looks wrong. Purely advisory: the
//! output feeds operators and recovery tooling, never the breakers.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use lattice_registry::Edge;

use crate::window::EdgeStats;

/// Detection thresholds.
#[derive(Debug, Clone)]
pub struct IssueThresholds {
    /// Error rate above this is a warning.
    pub error_rate_warning: f64,
    /// Error rate above this is critical.
    pub error_rate_critical: f64,
    /// Average latency above this is a warning.
    pub slow_avg_warning: Duration,
    /// Average latency above this is critical.
    pub slow_avg_critical: Duration,
    /// Edges with fewer samples than this are skipped.
    pub min_samples: usize,
}

impl Default for IssueThresholds {
    fn default() -> Self {
        Self {
            error_rate_warning: 0.10,
            error_rate_critical: 0.50,
            slow_avg_warning: Duration::from_secs(5),
            slow_avg_critical: Duration::from_secs(10),
            min_samples: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Critical,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueSeverity::Warning => write!(f, "warning"),
            IssueSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighErrorRate,
    SlowResponse,
}

/// One flagged edge condition.
#[derive(Debug, Clone, Serialize)]
pub struct CommIssue {
    pub edge: Edge,
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    /// Human-readable summary of the measurement.
    pub detail: String,
}

/// Evaluate one edge's stats against the thresholds.
pub(crate) fn evaluate_edge(
    edge: &Edge,
    stats: &EdgeStats,
    thresholds: &IssueThresholds,
) -> Vec<CommIssue> {
    let mut issues = Vec::new();
    if stats.total < thresholds.min_samples {
        return issues;
    }

    if stats.error_rate > thresholds.error_rate_warning {
        let severity = if stats.error_rate > thresholds.error_rate_critical {
            IssueSeverity::Critical
        } else {
            IssueSeverity::Warning
        };
        issues.push(CommIssue {
            edge: edge.clone(),
            kind: IssueKind::HighErrorRate,
            severity,
            detail: format!(
                "error rate {:.1}% over {} requests",
                stats.error_rate * 100.0,
                stats.total
            ),
        });
    }

    let avg = Duration::from_secs_f64(stats.avg_latency_ms / 1000.0);
    if avg > thresholds.slow_avg_warning {
        let severity = if avg > thresholds.slow_avg_critical {
            IssueSeverity::Critical
        } else {
            IssueSeverity::Warning
        };
        issues.push(CommIssue {
            edge: edge.clone(),
            kind: IssueKind::SlowResponse,
            severity,
            detail: format!(
                "average latency {:.0}ms over {} requests",
                stats.avg_latency_ms, stats.total
            ),
        });
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{RequestRecord, TelemetryConfig, TelemetryHub};
    use lattice_registry::ErrorClass;

    fn hub_with(edge: &Edge, successes: usize, failures: usize, latency: Duration) -> TelemetryHub {
        let hub = TelemetryHub::new(TelemetryConfig::default());
        for _ in 0..successes {
            hub.record(RequestRecord {
                edge: edge.clone(),
                success: true,
                error: None,
                latency,
            });
        }
        for _ in 0..failures {
            hub.record(RequestRecord {
                edge: edge.clone(),
                success: false,
                error: Some(ErrorClass::Server),
                latency,
            });
        }
        hub
    }

    #[test]
    fn quiet_edge_raises_nothing() {
        let edge = Edge::to("api");
        let hub = hub_with(&edge, 20, 0, Duration::from_millis(15));
        assert!(hub.detect_issues(&IssueThresholds::default()).is_empty());
    }

    #[test]
    fn error_rate_exactly_at_threshold_is_not_flagged() {
        // 1 failure in 10 = exactly 10%.
        let edge = Edge::to("api");
        let hub = hub_with(&edge, 9, 1, Duration::from_millis(15));
        assert!(hub.detect_issues(&IssueThresholds::default()).is_empty());
    }

    #[test]
    fn elevated_error_rate_is_a_warning() {
        // 2 failures in 10 = 20%.
        let edge = Edge::between("grafana", "prometheus");
        let hub = hub_with(&edge, 8, 2, Duration::from_millis(15));

        let issues = hub.detect_issues(&IssueThresholds::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::HighErrorRate);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
        assert_eq!(issues[0].edge, edge);
        assert!(issues[0].detail.contains("20.0%"));
    }

    #[test]
    fn majority_failures_are_critical() {
        // 6 failures in 10 = 60%.
        let edge = Edge::to("api");
        let hub = hub_with(&edge, 4, 6, Duration::from_millis(15));

        let issues = hub.detect_issues(&IssueThresholds::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
    }

    #[test]
    fn slow_average_latency_is_flagged() {
        let edge = Edge::to("warehouse");
        let hub = hub_with(&edge, 5, 0, Duration::from_secs(7));

        let issues = hub.detect_issues(&IssueThresholds::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::SlowResponse);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);

        let hub = hub_with(&edge, 5, 0, Duration::from_secs(12));
        let issues = hub.detect_issues(&IssueThresholds::default());
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
    }

    #[test]
    fn one_edge_can_raise_both_kinds() {
        let edge = Edge::to("api");
        let hub = hub_with(&edge, 2, 8, Duration::from_secs(11));

        let issues = hub.detect_issues(&IssueThresholds::default());
        let kinds: Vec<IssueKind> = issues.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&IssueKind::HighErrorRate));
        assert!(kinds.contains(&IssueKind::SlowResponse));
    }

    #[test]
    fn min_samples_suppresses_thin_edges() {
        let edge = Edge::to("api");
        let hub = hub_with(&edge, 0, 2, Duration::from_millis(15));

        let thresholds = IssueThresholds {
            min_samples: 5,
            ..Default::default()
        };
        assert!(hub.detect_issues(&thresholds).is_empty());
        // With the default of 1 the same traffic is critical.
        let issues = hub.detect_issues(&IssueThresholds::default());
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
    }
}
