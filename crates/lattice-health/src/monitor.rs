//! Health monitor — one background probe loop per registered service.
//!
//! Each loop probes its service at the descriptor's interval and writes
//! the verdict to the shared [`HealthBoard`]. Verdict changes fire an
//! optional callback; the runtime uses it to open circuit breakers when a
//! dependency turns unhealthy.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use lattice_registry::{HealthVerdict, ServiceDescriptor, ServiceName};

use crate::board::HealthBoard;
use crate::probe::probe_service;

/// Callback invoked when a service's verdict changes.
pub type HealthCallback = Arc<dyn Fn(ServiceName, HealthVerdict) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Per-service monitor state.
struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Manages the probe loops for all registered services.
pub struct HealthMonitor {
    board: HealthBoard,
    /// Active loops: service → slot.
    monitors: Arc<RwLock<HashMap<ServiceName, MonitorSlot>>>,
    /// Optional callback fired on verdict changes.
    on_change: Option<HealthCallback>,
}

impl HealthMonitor {
    pub fn new(board: HealthBoard) -> Self {
        Self {
            board,
            monitors: Arc::new(RwLock::new(HashMap::new())),
            on_change: None,
        }
    }

    /// Set a callback for verdict changes.
    pub fn with_callback(mut self, callback: HealthCallback) -> Self {
        self.on_change = Some(callback);
        self
    }

    pub fn board(&self) -> &HealthBoard {
        &self.board
    }

    /// Start the probe loop for a service, replacing any existing loop.
    pub async fn watch(&self, service: &ServiceDescriptor) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let descriptor = service.clone();
        let board = self.board.clone();
        let callback = self.on_change.clone();

        let handle = tokio::spawn(async move {
            run_probe_loop(descriptor, board, callback, shutdown_rx).await;
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            service.name.clone(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(
            service = %service.name,
            interval = ?service.probe_interval,
            "probe loop started"
        );
    }

    /// Stop the probe loop for a service and drop its board record.
    pub async fn unwatch(&self, name: &str) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(name) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            self.board.remove(name);
            info!(service = %name, "probe loop stopped");
        }
    }

    /// Stop every probe loop. Board records stay readable.
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (name, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(service = %name, "probe loop stopped");
        }
        info!("all probe loops stopped");
    }

    /// Names with an active probe loop.
    pub async fn active(&self) -> Vec<ServiceName> {
        let monitors = self.monitors.read().await;
        monitors.keys().cloned().collect()
    }

    pub async fn is_watching(&self, name: &str) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(name)
    }
}

/// The probe loop for a single service. Probes immediately, then at the
/// descriptor's interval until shut down.
async fn run_probe_loop(
    service: ServiceDescriptor,
    board: HealthBoard,
    callback: Option<HealthCallback>,
    mut shutdown: watch::Receiver<bool>,
) {
    board.track(&service.name);
    debug!(service = %service.name, "probe loop starting");

    loop {
        let outcome = probe_service(&service).await;
        let (previous, current) = board.record(&service.name, outcome.verdict());

        if previous != current {
            info!(
                service = %service.name,
                from = %previous,
                to = %current,
                "health verdict changed"
            );
            if let Some(ref cb) = callback {
                cb(service.name.clone(), current).await;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(service.probe_interval) => {}
            _ = shutdown.changed() => {
                debug!(service = %service.name, "probe loop shutting down");
                break;
            }
        }
    }
}
