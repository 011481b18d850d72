//! Transport seam.
//!
//! The dispatcher never talks to sockets directly: it hands a resolved
//! descriptor and a request spec to a [`Transport`]. Production uses
//! [`HttpTransport`] (pooled hyper client, keyed per host:port);
//! tests use [`ScriptedTransport`] for deterministic outcomes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::debug;

use lattice_registry::{ErrorClass, ServiceDescriptor};

/// What a caller asks the dispatcher to do.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub body: Option<Bytes>,
    /// Per-attempt timeout; defaults to the descriptor's timeout.
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            timeout: None,
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body.into()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A completed exchange, whatever the status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl DispatchResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: body.into(),
        }
    }
}

/// Failures below the HTTP layer. A 5xx response is not a transport
/// error; the dispatcher classifies it separately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("attempt timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Timeout => ErrorClass::Timeout,
            TransportError::Connect(_) => ErrorClass::Connect,
            TransportError::Protocol(_) => ErrorClass::Protocol,
        }
    }
}

/// One attempt against one service. Implementations must bound the
/// attempt by `timeout`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        service: &ServiceDescriptor,
        spec: &RequestSpec,
        timeout: Duration,
    ) -> Result<DispatchResponse, TransportError>;
}

/// Connection pool knobs for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long an idle connection stays keyed to its host:port.
    pub idle_timeout: Duration,
    /// Idle connections kept per host:port.
    pub max_idle_per_host: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 8,
        }
    }
}

/// Pooled HTTP/1.1 transport.
///
/// The hyper legacy client keeps idle connections keyed per host:port,
/// which is exactly the per-service pooling the dispatcher wants.
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpTransport {
    pub fn new(pool: PoolConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(pool.idle_timeout)
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .build_http();
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        service: &ServiceDescriptor,
        spec: &RequestSpec,
        timeout: Duration,
    ) -> Result<DispatchResponse, TransportError> {
        let uri = format!("http://{}{}", service.address(), spec.path);
        let body = spec.body.clone().unwrap_or_default();

        let request = http::Request::builder()
            .method(spec.method.clone())
            .uri(&uri)
            .header("host", service.address())
            .header("user-agent", "lattice-dispatch/0.1")
            .body(Full::new(body))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let exchange = async {
            let response = self.client.request(request).await.map_err(|e| {
                if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Protocol(e.to_string())
                }
            })?;

            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| TransportError::Protocol(e.to_string()))?
                .to_bytes();
            Ok(DispatchResponse { status, body })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(service = %service.name, %uri, "attempt timed out");
                Err(TransportError::Timeout)
            }
        }
    }
}

/// One call as seen by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub callee: String,
    pub path: String,
    pub timeout: Duration,
    pub at: Instant,
}

/// Deterministic transport for tests.
///
/// Serves enqueued results in order, then falls back to a fixed result.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<DispatchResponse, TransportError>>>,
    fallback: Result<DispatchResponse, TransportError>,
    log: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedTransport {
    /// Transport that always answers `fallback` once the script runs out.
    pub fn replying(fallback: Result<DispatchResponse, TransportError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Transport that always succeeds with 200.
    pub fn always_ok() -> Self {
        Self::replying(Ok(DispatchResponse::ok("ok")))
    }

    /// Transport that always fails the same way.
    pub fn always_failing(error: TransportError) -> Self {
        Self::replying(Err(error))
    }

    /// Queue a result served before the fallback kicks in.
    pub fn enqueue(&self, result: Result<DispatchResponse, TransportError>) {
        self.script.lock().expect("script lock").push_back(result);
    }

    /// Number of calls attempted so far.
    pub fn calls(&self) -> usize {
        self.log.lock().expect("script log lock").len()
    }

    /// Every call attempted so far, in order.
    pub fn log(&self) -> Vec<ScriptedCall> {
        self.log.lock().expect("script log lock").clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        service: &ServiceDescriptor,
        spec: &RequestSpec,
        timeout: Duration,
    ) -> Result<DispatchResponse, TransportError> {
        self.log.lock().expect("script log lock").push(ScriptedCall {
            callee: service.name.clone(),
            path: spec.path.clone(),
            timeout,
            at: Instant::now(),
        });
        let scripted = self.script.lock().expect("script lock").pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
