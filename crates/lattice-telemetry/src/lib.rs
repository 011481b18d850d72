//! lattice-telemetry — who talks to whom, and how well.
//!
//! The dispatcher reports every request over an edge; this crate keeps a
//! bounded sliding window per edge and derives totals, error rates and
//! latency aggregates from it. [`TelemetryHub::detect_issues`] flags edges
//! that look unhealthy. Everything here is advisory: breakers make their
//! own decisions from their own counters.

pub mod issues;
pub mod window;

pub use issues::{CommIssue, IssueKind, IssueSeverity, IssueThresholds};
pub use window::{EdgeStats, EdgeSummary, RequestRecord, TelemetryConfig, TelemetryHub};
