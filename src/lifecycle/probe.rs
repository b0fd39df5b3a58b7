//! Host port and health probes.

use async_trait::async_trait;
use std::time::Duration;

/// Reports whether a host port is currently bound by anything.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_bound(&self, host: &str, port: u16) -> bool;
}

/// Probes by attempting to bind the port locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPortProbe;

#[async_trait]
impl PortProbe for LocalPortProbe {
    async fn is_bound(&self, host: &str, port: u16) -> bool {
        match tokio::net::TcpListener::bind((host, port)).await {
            Ok(listener) => {
                drop(listener);
                false
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::AddrInUse {
                    tracing::debug!(port, error = %e, "port probe failed, treating port as bound");
                }
                true
            }
        }
    }
}

/// Reports whether a service answers its health endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_healthy(&self, url: &str) -> bool;
}

pub struct HttpHealthProbe {
    http: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!(url, error = %e, "health check failed");
                false
            }
        }
    }
}
