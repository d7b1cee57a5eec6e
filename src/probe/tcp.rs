//! TCP probe engine.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::domain::TcpConfig;
use crate::error::ProbeError;

use super::ProbeEngine;

const EXPECT_READ_BUF: usize = 1024;

pub struct TcpEngine {
    config: TcpConfig,
}

impl TcpEngine {
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProbeEngine for TcpEngine {
    #[tracing::instrument(skip(self), fields(endpoint = %self.config.endpoint))]
    async fn check(&self, timeout: Duration) -> Result<(), ProbeError> {
        let deadline = Instant::now() + timeout;

        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(&self.config.endpoint))
            .await
            .map_err(|_| ProbeError::timeout(format!("dial {} timed out", self.config.endpoint)))?
            .map_err(|e| ProbeError::dial(format!("dial {}: {e}", self.config.endpoint)))?;

        if let Some(send) = &self.config.send_data {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::timeout(remaining, stream.write_all(send.as_bytes()))
                .await
                .map_err(|_| ProbeError::timeout("write timed out"))?
                .map_err(|e| ProbeError::dial(format!("write failed: {e}")))?;
        }

        if let Some(expect) = &self.config.expect_data {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut buf = vec![0u8; EXPECT_READ_BUF];
            let n = tokio::time::timeout(remaining, stream.read(&mut buf))
                .await
                .map_err(|_| ProbeError::timeout("read timed out"))?
                .map_err(|e| ProbeError::protocol(format!("read failed: {e}")))?;
            let received = String::from_utf8_lossy(&buf[..n]);
            if !received.contains(expect.as_str()) {
                return Err(ProbeError::protocol(format!(
                    "expected data '{expect}' not found in response '{received}'"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    async fn echo_server(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(reply.as_bytes()).await;
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn matching_reply_succeeds() {
        let addr = echo_server("PONG\n").await;
        let engine = TcpEngine::new(TcpConfig {
            endpoint: addr,
            send_data: Some("PING\n".to_string()),
            expect_data: Some("PONG".to_string()),
        });
        assert!(engine.check(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn mismatched_reply_fails_with_protocol_class() {
        let addr = echo_server("ERR").await;
        let engine = TcpEngine::new(TcpConfig {
            endpoint: addr,
            send_data: Some("PING\n".to_string()),
            expect_data: Some("PONG".to_string()),
        });
        let err = engine.check(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.class, crate::error::ProbeErrorClass::Protocol);
    }

    #[tokio::test]
    async fn dial_failure_is_classified_as_dial() {
        let engine = TcpEngine::new(TcpConfig {
            endpoint: "127.0.0.1:1".to_string(),
            send_data: None,
            expect_data: None,
        });
        let err = engine.check(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(
            err.class,
            crate::error::ProbeErrorClass::Dial | crate::error::ProbeErrorClass::Timeout
        ));
    }
}
