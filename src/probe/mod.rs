//! Protocol probe engines.
//!
//! Each engine implements a single check against one service's configured
//! protocol. Engines are stateless except for `grpc`, which holds a
//! long-lived channel reused across checks for one service.

pub mod condition;
pub mod grpc;
pub mod http;
pub mod jsonpath;
pub mod tcp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ProtocolConfig;
use crate::error::ProbeError;

pub use grpc::GrpcConnection;

/// One protocol-specific check. `check` returns `Ok(())` on success; any
/// `Err` (including a matched `Condition` anomaly) counts as a failed probe.
#[async_trait]
pub trait ProbeEngine: Send + Sync {
    async fn check(&self, timeout: Duration) -> Result<(), ProbeError>;
}

/// Build the engine for a service's protocol config. `grpc_connection` is
/// `None` for non-gRPC protocols, and must be the job's own long-lived
/// connection handle for gRPC (see `Scheduler`).
pub fn build_engine(
    config: &ProtocolConfig,
    http_client: reqwest::Client,
    grpc_connection: Option<Arc<GrpcConnection>>,
) -> Box<dyn ProbeEngine> {
    match config {
        ProtocolConfig::Http(cfg) => Box::new(http::HttpEngine::new(http_client, cfg.clone())),
        ProtocolConfig::Tcp(cfg) => Box::new(tcp::TcpEngine::new(cfg.clone())),
        ProtocolConfig::Grpc(cfg) => {
            let connection = grpc_connection.unwrap_or_else(|| {
                Arc::new(GrpcConnection::new(
                    cfg.endpoint.clone(),
                    cfg.tls,
                    cfg.insecure_tls,
                ))
            });
            Box::new(grpc::GrpcEngine::new(cfg.clone(), connection))
        }
    }
}
