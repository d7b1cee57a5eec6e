//! Notification port: fan alerts/recoveries out to N sinks
//! concurrently, each under its own timeout, and classify the outcome as
//! success, partial failure, or total failure.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{Incident, Service};
use crate::error::NotificationError;

const SINK_TIMEOUT: Duration = Duration::from_secs(30);

/// One delivery channel (email, Slack webhook, PagerDuty, ...). The actual
/// transports are external; this crate ships only the `LoggingSink` default.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send_alert(&self, service: &Service, incident: &Incident) -> anyhow::Result<()>;
    async fn send_recovery(&self, service: &Service, incident: &Incident) -> anyhow::Result<()>;
}

/// What the monitor core calls on a DOWN/UP transition.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send_alert(&self, service: &Service, incident: &Incident) -> Result<(), NotificationError>;
    async fn send_recovery(&self, service: &Service, incident: &Incident) -> Result<(), NotificationError>;
}

/// Fans a call out to every registered sink concurrently, each racing its
/// own 30s deadline.
pub struct FanoutNotifier {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    fn summarize(total: usize, failures: Vec<String>) -> Result<(), NotificationError> {
        if failures.is_empty() {
            Ok(())
        } else if failures.len() == total {
            Err(NotificationError::Total {
                total,
                details: failures.join("; "),
            })
        } else {
            Err(NotificationError::Partial {
                failed: failures.len(),
                total,
                details: failures.join("; "),
            })
        }
    }
}

#[async_trait]
impl NotificationPort for FanoutNotifier {
    async fn send_alert(&self, service: &Service, incident: &Incident) -> Result<(), NotificationError> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let attempts = self.sinks.iter().map(|sink| async move {
            match tokio::time::timeout(SINK_TIMEOUT, sink.send_alert(service, incident)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{}: {e}", sink.name())),
                Err(_) => Err(format!("{}: timed out after {SINK_TIMEOUT:?}", sink.name())),
            }
        });
        let outcomes = futures::future::join_all(attempts).await;
        let total = outcomes.len();
        Self::summarize(total, outcomes.into_iter().filter_map(Result::err).collect())
    }

    async fn send_recovery(&self, service: &Service, incident: &Incident) -> Result<(), NotificationError> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let attempts = self.sinks.iter().map(|sink| async move {
            match tokio::time::timeout(SINK_TIMEOUT, sink.send_recovery(service, incident)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{}: {e}", sink.name())),
                Err(_) => Err(format!("{}: timed out after {SINK_TIMEOUT:?}", sink.name())),
            }
        });
        let outcomes = futures::future::join_all(attempts).await;
        let total = outcomes.len();
        Self::summarize(total, outcomes.into_iter().filter_map(Result::err).collect())
    }
}

/// Zero-configuration default sink: logs through `tracing`. Lets the crate
/// and its demo binary run without a real transport configured, the
/// notification-port analogue of `InMemoryPersistence`.
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    fn name(&self) -> &str {
        "logging"
    }

    async fn send_alert(&self, service: &Service, incident: &Incident) -> anyhow::Result<()> {
        warn!(service = %service.name, incident = %incident.id, error = %incident.error, "service is down");
        Ok(())
    }

    async fn send_recovery(&self, service: &Service, incident: &Incident) -> anyhow::Result<()> {
        info!(service = %service.name, incident = %incident.id, "service recovered");
        Ok(())
    }
}
