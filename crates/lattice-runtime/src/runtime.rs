//! Mesh runtime — one value that owns the whole control plane.
//!
//! `MeshRuntime` assembles the subsystems around a shared registry:
//! - Health board + per-service probe loops
//! - Breaker manager, one circuit per communication edge
//! - Telemetry hub with sliding per-edge windows
//! - Dispatcher tying them together for outbound calls
//!
//! Nothing is process-global. Two runtimes in one process stay fully
//! independent, which the tests lean on heavily.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::info;

use lattice_breaker::{BreakerConfig, BreakerManager, BreakerStats};
use lattice_dispatch::{
    DispatchError, DispatchPolicy, DispatchResponse, Dispatcher, HttpTransport, PoolConfig,
    RequestSpec, Transport,
};
use lattice_health::{HealthBoard, HealthCallback, HealthMonitor, HealthSummary};
use lattice_orchestrator::{Lifecycle, Orchestrator, OrchestratorConfig};
use lattice_registry::{HealthVerdict, RegistrySnapshot, ServiceName, SharedRegistry};
use lattice_telemetry::{CommIssue, EdgeStats, IssueThresholds, TelemetryConfig, TelemetryHub};

/// Configures and assembles a [`MeshRuntime`].
pub struct MeshRuntimeBuilder {
    breaker_config: BreakerConfig,
    telemetry_config: TelemetryConfig,
    pool_config: PoolConfig,
    policy: DispatchPolicy,
    orchestrator_config: OrchestratorConfig,
    transport: Option<Arc<dyn Transport>>,
    open_breakers_on_unhealthy: bool,
}

impl Default for MeshRuntimeBuilder {
    fn default() -> Self {
        Self {
            breaker_config: BreakerConfig::default(),
            telemetry_config: TelemetryConfig::default(),
            pool_config: PoolConfig::default(),
            policy: DispatchPolicy::default(),
            orchestrator_config: OrchestratorConfig::default(),
            transport: None,
            open_breakers_on_unhealthy: true,
        }
    }
}

impl MeshRuntimeBuilder {
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn telemetry_config(mut self, config: TelemetryConfig) -> Self {
        self.telemetry_config = config;
        self
    }

    /// Connection pool knobs for the default HTTP transport. Ignored
    /// when a transport is injected.
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Name recorded as the caller side of every dispatched edge.
    pub fn local_identity(mut self, name: impl Into<ServiceName>) -> Self {
        self.policy.local_identity = Some(name.into());
        self
    }

    pub fn orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator_config = config;
        self
    }

    /// Replace the HTTP transport, e.g. with a scripted one in tests.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Whether an unhealthy probe verdict force-opens every breaker
    /// targeting that service. On by default.
    pub fn open_breakers_on_unhealthy(mut self, enabled: bool) -> Self {
        self.open_breakers_on_unhealthy = enabled;
        self
    }

    pub fn build(self, snapshot: RegistrySnapshot) -> MeshRuntime {
        let registry = SharedRegistry::new(snapshot);
        let board = HealthBoard::default();
        let breakers = Arc::new(BreakerManager::new(self.breaker_config));
        let telemetry = Arc::new(TelemetryHub::new(self.telemetry_config));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new(self.pool_config)));

        let monitor = if self.open_breakers_on_unhealthy {
            let breaker_handle = Arc::clone(&breakers);
            let callback: HealthCallback = Arc::new(move |name, verdict| {
                let breakers = Arc::clone(&breaker_handle);
                Box::pin(async move {
                    if verdict == HealthVerdict::Unhealthy {
                        breakers.force_open_callee(&name);
                    }
                })
            });
            HealthMonitor::new(board.clone()).with_callback(callback)
        } else {
            HealthMonitor::new(board.clone())
        };

        let dispatcher = Dispatcher::new(
            registry.clone(),
            Arc::clone(&breakers),
            Arc::clone(&telemetry),
            board.clone(),
            transport,
            self.policy,
        );

        MeshRuntime {
            registry,
            board,
            monitor,
            breakers,
            telemetry,
            dispatcher,
            orchestrator_config: self.orchestrator_config,
            running: AtomicBool::new(false),
        }
    }
}

/// Combined per-edge view of breaker state and traffic statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeReport {
    pub edge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic: Option<EdgeStats>,
}

/// The assembled control plane for one mesh.
pub struct MeshRuntime {
    registry: SharedRegistry,
    board: HealthBoard,
    monitor: HealthMonitor,
    breakers: Arc<BreakerManager>,
    telemetry: Arc<TelemetryHub>,
    dispatcher: Dispatcher,
    orchestrator_config: OrchestratorConfig,
    running: AtomicBool,
}

impl MeshRuntime {
    pub fn builder() -> MeshRuntimeBuilder {
        MeshRuntimeBuilder::default()
    }

    /// Runtime with default configuration over `snapshot`.
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self::builder().build(snapshot)
    }

    /// Spawn a probe loop for every service in the current snapshot.
    pub async fn start(&self) {
        let snapshot = self.registry.current();
        for service in snapshot.services() {
            self.monitor.watch(service).await;
        }
        self.running.store(true, Ordering::SeqCst);
        info!(services = snapshot.len(), "mesh runtime started");
    }

    /// Stop all probe loops. Health records and breaker state stay.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.monitor.stop_all().await;
        info!("mesh runtime stopped");
    }

    /// Swap in a new snapshot and reconcile the probe loops: added
    /// services get a loop, removed ones lose theirs, changed
    /// descriptors get a fresh loop. Breakers and telemetry persist,
    /// keyed by edge rather than snapshot.
    pub async fn reload(&self, snapshot: RegistrySnapshot) {
        let previous = self.registry.swap(snapshot);
        let current = self.registry.current();

        if !self.running.load(Ordering::SeqCst) {
            info!(services = current.len(), "registry reloaded before start");
            return;
        }

        let mut stopped = 0usize;
        for name in previous.names() {
            if !current.contains(name) {
                self.monitor.unwatch(name).await;
                stopped += 1;
            }
        }
        let mut started = 0usize;
        for service in current.services() {
            match previous.get(&service.name) {
                Some(old) if old == service => {}
                _ => {
                    self.monitor.watch(service).await;
                    started += 1;
                }
            }
        }
        info!(
            services = current.len(),
            started, stopped, "registry reloaded"
        );
    }

    /// Orchestrator wired to this runtime's registry and health board.
    pub fn orchestrator(&self, lifecycle: Arc<dyn Lifecycle>) -> Orchestrator {
        Orchestrator::new(
            self.registry.clone(),
            self.board.clone(),
            lifecycle,
            self.orchestrator_config.clone(),
        )
    }

    /// Dispatch one request through the guarded pipeline.
    pub async fn execute(
        &self,
        callee: &str,
        spec: RequestSpec,
    ) -> Result<DispatchResponse, DispatchError> {
        self.dispatcher.execute(callee, spec).await
    }

    // ── Read-only views ────────────────────────────────────────────

    /// Health of every tracked service, sorted by name.
    pub fn service_health_report(&self) -> Vec<HealthSummary> {
        self.board.report()
    }

    /// Every edge either subsystem knows about, breaker and traffic
    /// sides merged, sorted by edge label.
    pub fn edge_statistics(&self) -> Vec<EdgeReport> {
        let mut merged: BTreeMap<String, EdgeReport> = BTreeMap::new();
        for (edge, stats) in self.breakers.all_statistics() {
            let key = edge.to_string();
            merged.insert(
                key.clone(),
                EdgeReport {
                    edge: key,
                    breaker: Some(stats),
                    traffic: None,
                },
            );
        }
        for summary in self.telemetry.all_statistics() {
            let key = summary.edge.to_string();
            merged
                .entry(key.clone())
                .or_insert_with(|| EdgeReport {
                    edge: key,
                    breaker: None,
                    traffic: None,
                })
                .traffic = Some(summary.stats);
        }
        merged.into_values().collect()
    }

    /// Edges currently violating the given thresholds.
    pub fn detect_issues(&self, thresholds: &IssueThresholds) -> Vec<CommIssue> {
        self.telemetry.detect_issues(thresholds)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn health(&self) -> &HealthBoard {
        &self.board
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn breakers(&self) -> &BreakerManager {
        &self.breakers
    }

    pub fn telemetry(&self) -> &TelemetryHub {
        &self.telemetry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lattice_dispatch::ScriptedTransport;
    use lattice_registry::{Edge, HealthProtocol, RetryPolicy, ServiceDescriptor};

    fn descriptor(name: &str, port: u16) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            health_path: "/health".to_string(),
            health_protocol: HealthProtocol::Http,
            probe_interval: Duration::from_millis(50),
            timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_retries: 0,
                ..RetryPolicy::default()
            },
            depends_on: Vec::new(),
        }
    }

    fn snapshot(services: Vec<ServiceDescriptor>) -> RegistrySnapshot {
        RegistrySnapshot::from_descriptors(services).unwrap()
    }

    #[tokio::test]
    async fn start_and_shutdown_manage_probe_loops() {
        let runtime = MeshRuntime::builder()
            .transport(Arc::new(ScriptedTransport::always_ok()))
            .build(snapshot(vec![descriptor("api", 1), descriptor("db", 1)]));

        runtime.start().await;
        let mut active = runtime.monitor().active().await;
        active.sort();
        assert_eq!(active, vec!["api", "db"]);

        runtime.shutdown().await;
        assert!(runtime.monitor().active().await.is_empty());
    }

    #[tokio::test]
    async fn reload_reconciles_probe_loops_and_keeps_breakers() {
        let runtime = MeshRuntime::builder()
            .transport(Arc::new(ScriptedTransport::always_ok()))
            .build(snapshot(vec![descriptor("api", 1), descriptor("db", 1)]));
        runtime.start().await;

        runtime.breakers().force_open(&Edge::to("db"));

        // api removed, db re-declared on a new port, cache added.
        runtime
            .reload(snapshot(vec![descriptor("db", 2), descriptor("cache", 1)]))
            .await;

        let mut active = runtime.monitor().active().await;
        active.sort();
        assert_eq!(active, vec!["cache", "db"]);
        assert!(runtime.health().verdict("api") == HealthVerdict::Unknown);

        // Breaker state is keyed by edge, not by snapshot.
        assert_eq!(
            runtime.breakers().state(&Edge::to("db")),
            Some(lattice_breaker::BreakerState::Open)
        );

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn reload_before_start_spawns_no_loops() {
        let runtime = MeshRuntime::builder()
            .transport(Arc::new(ScriptedTransport::always_ok()))
            .build(snapshot(vec![descriptor("api", 1)]));

        runtime
            .reload(snapshot(vec![descriptor("api", 1), descriptor("db", 1)]))
            .await;
        assert!(runtime.monitor().active().await.is_empty());
        assert_eq!(runtime.registry().current().len(), 2);
    }

    #[tokio::test]
    async fn unhealthy_verdict_force_opens_breakers_for_the_callee() {
        // Port 1 refuses connections, so the first probe turns the
        // service unhealthy almost immediately.
        let runtime = MeshRuntime::builder()
            .transport(Arc::new(ScriptedTransport::always_ok()))
            .build(snapshot(vec![descriptor("api", 1)]));

        // Seed a breaker on the edge so there is something to open.
        runtime
            .breakers()
            .record_success(&Edge::to("api"), Duration::from_millis(5));

        runtime.start().await;
        assert!(
            runtime
                .health()
                .wait_until_verdict("api", HealthVerdict::Unhealthy, Duration::from_secs(2))
                .await
        );

        // The callback runs on the probe task; give it a moment.
        let mut opened = false;
        for _ in 0..40 {
            if runtime.breakers().state(&Edge::to("api"))
                == Some(lattice_breaker::BreakerState::Open)
            {
                opened = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(opened, "breaker never opened after unhealthy verdict");

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn local_identity_flows_through_to_edges() {
        let transport = Arc::new(ScriptedTransport::always_ok());
        let runtime = MeshRuntime::builder()
            .transport(transport)
            .local_identity("gateway")
            .build(snapshot(vec![descriptor("api", 1)]));

        runtime.execute("api", RequestSpec::get("/users")).await.unwrap();

        let stats = runtime
            .telemetry()
            .stats(&Edge::between("gateway", "api"))
            .unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn edge_statistics_merge_breaker_and_traffic_views() {
        let transport = Arc::new(ScriptedTransport::always_ok());
        let runtime = MeshRuntime::builder()
            .transport(transport)
            .build(snapshot(vec![descriptor("api", 1)]));

        // One dispatched call populates both sides for api; a forced
        // breaker on an unrelated edge populates only the breaker side.
        runtime.execute("api", RequestSpec::get("/users")).await.unwrap();
        runtime.breakers().force_open(&Edge::to("zzz"));

        let report = runtime.edge_statistics();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].edge, "api");
        assert!(report[0].breaker.is_some());
        assert!(report[0].traffic.is_some());
        assert_eq!(report[1].edge, "zzz");
        assert!(report[1].breaker.is_some());
        assert!(report[1].traffic.is_none());
    }
}
