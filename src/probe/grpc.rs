//! gRPC probe engine.
//!
//! Connection-state tracking here is a deliberately simplified model of
//! gRPC's own connectivity semantics:
//! `Idle`/`Connecting`/`Ready`/`TransientFailure`/`Shutdown`. `tonic`'s
//! public `Channel` API does not expose the underlying connectivity state
//! directly, so the state is tracked explicitly by this engine's own
//! connect attempts rather than queried from the transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use crate::domain::{GrpcCheckType, GrpcConfig};
use crate::error::ProbeError;

use super::ProbeEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

/// A long-lived handle to one service's gRPC endpoint, reused across checks
/// for the lifetime of its scheduler job.
pub struct GrpcConnection {
    endpoint: String,
    tls: bool,
    insecure_tls: bool,
    state: Mutex<ConnState>,
    channel: Mutex<Option<Channel>>,
}

impl GrpcConnection {
    pub fn new(endpoint: impl Into<String>, tls: bool, insecure_tls: bool) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls,
            insecure_tls,
            state: Mutex::new(ConnState::Idle),
            channel: Mutex::new(None),
        }
    }

    fn build_endpoint(&self) -> Result<Endpoint, ProbeError> {
        let scheme = if self.tls || self.insecure_tls { "https" } else { "http" };
        let uri = format!("{scheme}://{}", self.endpoint);
        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| ProbeError::config(format!("invalid gRPC endpoint '{}': {e}", self.endpoint)))?;
        if self.tls || self.insecure_tls {
            // tonic's safe public API does not expose a certificate-verification
            // bypass; `insecure_tls` is accepted for forward compatibility and
            // currently behaves the same as `tls` (see DESIGN.md).
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| ProbeError::config(format!("tls config error: {e}")))?;
        }
        Ok(endpoint)
    }

    /// Ensure the channel is `Ready`, per spec's state table: `Ready` ⇒
    /// proceed, `Idle` ⇒ connect and wait up to 3s, `Connecting` ⇒ wait up
    /// to 5s, `TransientFailure`/`Shutdown` ⇒ fail.
    async fn ensure_ready(&self) -> Result<Channel, ProbeError> {
        let current = *self.state.lock();
        match current {
            ConnState::Ready => {
                if let Some(channel) = self.channel.lock().clone() {
                    return Ok(channel);
                }
            }
            ConnState::TransientFailure | ConnState::Shutdown => {
                return Err(ProbeError::dial(format!(
                    "grpc channel for {} is in {current:?}",
                    self.endpoint
                )));
            }
            _ => {}
        }

        let wait = if current == ConnState::Connecting {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(3)
        };
        *self.state.lock() = ConnState::Connecting;

        let endpoint = self.build_endpoint()?;
        match tokio::time::timeout(wait, endpoint.connect()).await {
            Ok(Ok(channel)) => {
                *self.state.lock() = ConnState::Ready;
                *self.channel.lock() = Some(channel.clone());
                Ok(channel)
            }
            Ok(Err(e)) => {
                *self.state.lock() = ConnState::TransientFailure;
                Err(ProbeError::dial(format!("connect to {} failed: {e}", self.endpoint)))
            }
            Err(_) => {
                *self.state.lock() = ConnState::TransientFailure;
                Err(ProbeError::timeout(format!(
                    "connect to {} timed out after {wait:?}",
                    self.endpoint
                )))
            }
        }
    }

    /// Mark the channel closed; called when the owning scheduler job is
    /// removed.
    pub fn shutdown(&self) {
        *self.state.lock() = ConnState::Shutdown;
        *self.channel.lock() = None;
    }
}

pub struct GrpcEngine {
    config: GrpcConfig,
    connection: Arc<GrpcConnection>,
}

impl GrpcEngine {
    pub fn new(config: GrpcConfig, connection: Arc<GrpcConnection>) -> Self {
        Self { config, connection }
    }
}

#[async_trait]
impl ProbeEngine for GrpcEngine {
    #[tracing::instrument(skip(self))]
    async fn check(&self, timeout: Duration) -> Result<(), ProbeError> {
        let channel = self.connection.ensure_ready().await?;

        match self.config.check_type {
            GrpcCheckType::Health => {
                let mut client = HealthClient::new(channel);
                let request = HealthCheckRequest {
                    service: self.config.service_name.clone().unwrap_or_default(),
                };
                let response = tokio::time::timeout(timeout, client.check(request))
                    .await
                    .map_err(|_| ProbeError::timeout("health RPC timed out"))?
                    .map_err(|e| ProbeError::protocol(format!("health RPC failed: {e}")))?;
                let status = response.into_inner().status;
                if status == ServingStatus::Serving as i32 {
                    Ok(())
                } else {
                    Err(ProbeError::protocol(format!(
                        "health status is not SERVING (raw={status})"
                    )))
                }
            }
            // `connectivity` and `reflection` both degenerate to re-verifying
            // Ready; a full reflection round-trip is a permitted future
            // upgrade, not implemented here.
            GrpcCheckType::Connectivity | GrpcCheckType::Reflection => {
                self.connection.ensure_ready().await.map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_failure_is_classified_as_dial() {
        let connection = Arc::new(GrpcConnection::new("127.0.0.1:1", false, false));
        let engine = GrpcEngine::new(
            GrpcConfig {
                endpoint: "127.0.0.1:1".to_string(),
                check_type: GrpcCheckType::Connectivity,
                service_name: None,
                tls: false,
                insecure_tls: false,
            },
            connection,
        );
        let err = engine.check(Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(
            err.class,
            crate::error::ProbeErrorClass::Dial | crate::error::ProbeErrorClass::Timeout
        ));
    }

    #[test]
    fn shutdown_resets_state_and_drops_channel() {
        let connection = GrpcConnection::new("example.invalid:443", false, false);
        connection.shutdown();
        assert!(connection.channel.lock().is_none());
    }
}
