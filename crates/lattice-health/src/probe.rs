//! One-shot health probes.
//!
//! HTTP probes expect a 2xx from `GET {health_path}`; TCP probes only
//! require the connection to open. A probe that cannot run folds into the
//! unhealthy verdict and is logged at debug, never surfaced to callers.

use std::time::Duration;

use tracing::debug;

use lattice_registry::{HealthProtocol, HealthVerdict, ServiceDescriptor};

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 2xx response (HTTP) or accepted connection (TCP).
    Up,
    /// The endpoint answered with a non-2xx status.
    Degraded,
    /// The endpoint could not be reached before the timeout.
    Unreachable,
}

impl ProbeOutcome {
    /// Fold the outcome into the verdict recorded on the board.
    pub fn verdict(self) -> HealthVerdict {
        match self {
            ProbeOutcome::Up => HealthVerdict::Healthy,
            ProbeOutcome::Degraded | ProbeOutcome::Unreachable => HealthVerdict::Unhealthy,
        }
    }
}

/// Probe a service once, honoring its declared protocol and timeout.
pub async fn probe_service(service: &ServiceDescriptor) -> ProbeOutcome {
    let address = service.address();
    match service.health_protocol {
        HealthProtocol::Http => {
            http_probe(&service.name, &address, &service.health_path, service.timeout).await
        }
        HealthProtocol::Tcp => tcp_probe(&service.name, &address, service.timeout).await,
    }
}

/// HTTP GET probe against `http://{address}{path}`.
pub async fn http_probe(
    service: &str,
    address: &str,
    path: &str,
    timeout: Duration,
) -> ProbeOutcome {
    let uri = format!("http://{address}{path}");

    let attempt = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(%service, error = %e, "probe connection failed");
                return ProbeOutcome::Unreachable;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(%service, error = %e, "probe handshake failed");
                return ProbeOutcome::Unreachable;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "lattice-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .expect("static probe request");

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeOutcome::Up,
            Ok(resp) => {
                debug!(%service, status = %resp.status(), "probe non-2xx");
                ProbeOutcome::Degraded
            }
            Err(e) => {
                debug!(%service, error = %e, "probe request failed");
                ProbeOutcome::Unreachable
            }
        }
    })
    .await;

    match attempt {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(%service, %uri, "probe timed out");
            ProbeOutcome::Unreachable
        }
    }
}

/// TCP connect probe: an accepted connection within the timeout is healthy.
pub async fn tcp_probe(service: &str, address: &str, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => ProbeOutcome::Up,
        Ok(Err(e)) => {
            debug!(%service, error = %e, "tcp probe failed");
            ProbeOutcome::Unreachable
        }
        Err(_) => {
            debug!(%service, "tcp probe timed out");
            ProbeOutcome::Unreachable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn canned_server(response: &'static [u8]) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = sock.read(&mut buf).await;
                    let _ = sock.write_all(response).await;
                });
            }
        });
        addr
    }

    #[test]
    fn outcome_folds_into_verdict() {
        assert_eq!(ProbeOutcome::Up.verdict(), HealthVerdict::Healthy);
        assert_eq!(ProbeOutcome::Degraded.verdict(), HealthVerdict::Unhealthy);
        assert_eq!(ProbeOutcome::Unreachable.verdict(), HealthVerdict::Unhealthy);
    }

    #[tokio::test]
    async fn http_probe_reads_2xx() {
        let addr =
            canned_server(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok").await;
        let outcome = http_probe("svc", &addr, "/health", Duration::from_secs(1)).await;
        assert_eq!(outcome, ProbeOutcome::Up);
    }

    #[tokio::test]
    async fn http_probe_non_2xx_is_degraded() {
        let addr =
            canned_server(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
                .await;
        let outcome = http_probe("svc", &addr, "/health", Duration::from_secs(1)).await;
        assert_eq!(outcome, ProbeOutcome::Degraded);
    }

    #[tokio::test]
    async fn http_probe_to_closed_port_is_unreachable() {
        // Port 1 is never listening.
        let outcome =
            http_probe("svc", "127.0.0.1:1", "/health", Duration::from_millis(200)).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }

    #[tokio::test]
    async fn tcp_probe_accepts_open_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let outcome = tcp_probe("svc", &addr, Duration::from_secs(1)).await;
        assert_eq!(outcome, ProbeOutcome::Up);
    }

    #[tokio::test]
    async fn tcp_probe_to_closed_port_is_unreachable() {
        let outcome = tcp_probe("svc", "127.0.0.1:1", Duration::from_millis(200)).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }
}
