//! Monitor core: mediates scheduler outcomes and the
//! persistence/notification ports, and exposes service CRUD plus manual
//! triggers to the external API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tracing::{error, warn};

use crate::broker::{Broker, TriggerEvent};
use crate::domain::{
    Incident, IncidentFilter, Page, Paging, Service, ServiceFilter, ServiceRequest, ServiceState,
};
use crate::error::{NotFoundError, SentinelError};
use crate::notification::NotificationPort;
use crate::persistence::PersistencePort;

/// Aggregate statistics for one service over a time window.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub total_incidents: u64,
    pub total_downtime: chrono::Duration,
    pub uptime_percentage: f64,
    pub avg_response_time_nanos: u64,
    pub period: chrono::Duration,
}

pub struct MonitorCore {
    persistence: Arc<dyn PersistencePort>,
    notifier: Arc<dyn NotificationPort>,
    broker: Broker,
}

impl MonitorCore {
    pub fn new(persistence: Arc<dyn PersistencePort>, notifier: Arc<dyn NotificationPort>, broker: Broker) -> Self {
        Self {
            persistence,
            notifier,
            broker,
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    // ---- Service CRUD ----

    pub async fn create_service(&self, request: ServiceRequest) -> Result<Service, SentinelError> {
        request.validate()?;
        let service = request.into_service(Utc::now());
        let created = self.persistence.create_service(service).await?;
        self.broker.publish(TriggerEvent::ServiceCreated(created.clone()));
        Ok(created)
    }

    pub async fn get_service(&self, id: &str) -> Result<Service, SentinelError> {
        self.persistence
            .get_service(id)
            .await?
            .ok_or_else(|| NotFoundError::new("service", id).into())
    }

    pub async fn find_services(
        &self,
        filter: &ServiceFilter,
        paging: Paging,
    ) -> Result<Page<Service>, SentinelError> {
        Ok(self.persistence.find_services_paged(filter, paging).await?)
    }

    pub async fn update_service(&self, id: &str, request: ServiceRequest) -> Result<Service, SentinelError> {
        request.validate()?;
        let mut service = self.get_service(id).await?;
        request.apply_to(&mut service, Utc::now());
        let updated = self.persistence.update_service(service).await?;
        self.broker.publish(TriggerEvent::ServiceUpdated(updated.clone()));
        Ok(updated)
    }

    pub async fn delete_service(&self, id: &str) -> Result<(), SentinelError> {
        self.get_service(id).await?;
        self.persistence.delete_service(id).await?;
        self.broker.publish(TriggerEvent::ServiceDeleted {
            service_id: id.to_string(),
        });
        Ok(())
    }

    // ---- Check outcomes ----

    pub async fn record_success(&self, service_id: &str, response_time: Duration) -> Result<(), SentinelError> {
        let service = self.get_service(service_id).await?;
        let now = Utc::now();
        let mut state = self
            .persistence
            .get_state(service_id)
            .await?
            .unwrap_or_else(|| ServiceState::unknown(service_id.to_string()));
        let was_down = state.status == crate::domain::Status::Down;
        state.apply_success(now, response_time);
        histogram!("sentinel_check_latency_ms").record(response_time.as_millis() as f64);
        counter!("sentinel_checks_total", "protocol" => service.protocol().to_string(), "outcome" => "success").increment(1);

        let resolved_incident = if was_down {
            match self.find_unique_unresolved_incident(service_id).await {
                Some(mut incident) => {
                    incident.resolve(now);
                    Some(incident)
                }
                None => {
                    warn!(service_id, "DOWN->UP transition with no unresolved incident on record");
                    None
                }
            }
        } else {
            None
        };

        self.persistence
            .apply_success_transition(state.clone(), resolved_incident.clone())
            .await?;

        if let Some(incident) = &resolved_incident {
            if let Err(e) = self.notifier.send_recovery(&service, incident).await {
                warn!(service_id, error = %e, "recovery notification fan-out did not fully succeed");
            }
            self.broker.publish(TriggerEvent::IncidentResolved(incident.clone()));
            counter!("sentinel_incidents_resolved_total").increment(1);
        }

        self.broker.publish(TriggerEvent::StateUpdated(state));
        Ok(())
    }

    pub async fn record_failure(
        &self,
        service_id: &str,
        error: impl Into<String>,
        response_time: Duration,
    ) -> Result<(), SentinelError> {
        let service = self.get_service(service_id).await?;
        let now = Utc::now();
        let error_message = error.into();
        let mut state = self
            .persistence
            .get_state(service_id)
            .await?
            .unwrap_or_else(|| ServiceState::unknown(service_id.to_string()));
        let was_up_or_unknown = state.status != crate::domain::Status::Down;
        state.apply_failure(now, response_time, error_message.clone());
        histogram!("sentinel_check_latency_ms").record(response_time.as_millis() as f64);
        counter!("sentinel_checks_total", "protocol" => service.protocol().to_string(), "outcome" => "failure").increment(1);

        let new_incident = if was_up_or_unknown {
            Some(Incident::open(service_id.to_string(), error_message, now))
        } else {
            None
        };

        self.persistence
            .apply_failure_transition(state.clone(), new_incident.clone())
            .await?;

        if let Some(incident) = &new_incident {
            if let Err(e) = self.notifier.send_alert(&service, incident).await {
                warn!(service_id, error = %e, "alert notification fan-out did not fully succeed");
            }
            self.broker.publish(TriggerEvent::IncidentOpened(incident.clone()));
            counter!("sentinel_incidents_opened_total").increment(1);
        }

        self.broker.publish(TriggerEvent::StateUpdated(state));
        Ok(())
    }

    async fn find_unique_unresolved_incident(&self, service_id: &str) -> Option<Incident> {
        match self.persistence.list_unresolved_incidents(service_id).await {
            Ok(mut incidents) => {
                if incidents.len() > 1 {
                    error!(service_id, count = incidents.len(), "more than one unresolved incident for this service");
                }
                incidents.pop()
            }
            Err(e) => {
                error!(service_id, error = %e, "failed to load unresolved incidents during DOWN->UP transition");
                None
            }
        }
    }

    /// Request an out-of-band check outside the service's normal cadence.
    /// Publishes on the broker; the scheduler's lifecycle subscriber turns
    /// this into an immediate, single-flight-respecting probe.
    pub async fn trigger_check(&self, service_id: &str) -> Result<(), SentinelError> {
        self.get_service(service_id).await?;
        self.broker.publish(TriggerEvent::Check {
            service_id: service_id.to_string(),
        });
        Ok(())
    }

    // ---- Operator actions ----

    /// Resolve every unresolved incident for a service without requiring an
    /// UP transition. Does not touch `ServiceState`.
    pub async fn force_resolve(&self, service_id: &str) -> Result<Vec<Incident>, SentinelError> {
        self.get_service(service_id).await?;
        let now = Utc::now();
        let unresolved = self
            .persistence
            .list_unresolved_incidents(service_id)
            .await?;
        let mut resolved = Vec::with_capacity(unresolved.len());
        for mut incident in unresolved {
            incident.resolve(now);
            let incident = self.persistence.update_incident(incident).await?;
            self.broker.publish(TriggerEvent::IncidentResolved(incident.clone()));
            resolved.push(incident);
        }
        Ok(resolved)
    }

    pub async fn find_incidents(
        &self,
        filter: &IncidentFilter,
        paging: Paging,
    ) -> Result<Page<Incident>, SentinelError> {
        Ok(self.persistence.find_incidents_paged(filter, paging).await?)
    }

    pub async fn get_all_service_states(&self) -> Result<Vec<ServiceState>, SentinelError> {
        Ok(self.persistence.list_states().await?)
    }

    /// Statistics over `[since, now)`. Clips any incident crossing the
    /// window boundary rather than counting the whole incident (see
    /// DESIGN.md's Open Question notes).
    pub async fn statistics(&self, service_id: &str, since: DateTime<Utc>) -> Result<Statistics, SentinelError> {
        let now = Utc::now();
        let window = now - since;

        let incidents_page = self
            .persistence
            .find_incidents_paged(
                &IncidentFilter {
                    service_id: Some(service_id.to_string()),
                    resolved: None,
                    since: None,
                    until: None,
                },
                Paging {
                    page: 1,
                    page_size: u32::MAX,
                },
            )
            .await?;

        let overlapping: Vec<&Incident> = incidents_page
            .items
            .iter()
            .filter(|i| i.start_time < now && i.end_time.unwrap_or(now) > since)
            .collect();

        let total_downtime = overlapping.iter().fold(chrono::Duration::zero(), |acc, incident| {
            let end = incident.end_time.unwrap_or(now).min(now);
            let start = incident.start_time.max(since);
            acc + (end - start).max(chrono::Duration::zero())
        });

        let uptime_percentage = if window > chrono::Duration::zero() {
            let ratio = total_downtime.num_milliseconds() as f64 / window.num_milliseconds() as f64;
            (100.0 * (1.0 - ratio)).clamp(0.0, 100.0)
        } else {
            100.0
        };

        // No per-check history is stored (only the running `ServiceState`
        // totals), so this always falls back to the most-recent response
        // time rather than a windowed mean.
        let avg_response_time_nanos = self
            .persistence
            .get_state(service_id)
            .await?
            .map(|s| s.response_time_nanos)
            .unwrap_or(0);

        Ok(Statistics {
            total_incidents: overlapping.len() as u64,
            total_downtime,
            uptime_percentage,
            avg_response_time_nanos,
            period: window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProtocolConfig, TcpConfig};
    use crate::notification::LoggingSink;
    use crate::notification::NotificationSink;
    use crate::persistence::InMemoryPersistence;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tcp_request(name: &str) -> ServiceRequest {
        ServiceRequest {
            name: name.to_string(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            retries: 3,
            tags: HashSet::new(),
            config: ProtocolConfig::Tcp(TcpConfig {
                endpoint: "127.0.0.1:80".to_string(),
                send_data: None,
                expect_data: None,
            }),
            is_enabled: true,
        }
    }

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl NotificationSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }
        async fn send_alert(&self, _: &Service, _: &Incident) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn send_recovery(&self, _: &Service, _: &Incident) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn core_with_counting(calls: Arc<AtomicUsize>) -> MonitorCore {
        let persistence = Arc::new(InMemoryPersistence::new());
        let notifier = Arc::new(crate::notification::FanoutNotifier::new(vec![Box::new(
            CountingSink(calls),
        )]));
        MonitorCore::new(persistence, notifier, Broker::new())
    }

    fn core() -> MonitorCore {
        let persistence = Arc::new(InMemoryPersistence::new());
        let notifier = Arc::new(crate::notification::FanoutNotifier::new(vec![Box::new(LoggingSink)]));
        MonitorCore::new(persistence, notifier, Broker::new())
    }

    #[tokio::test]
    async fn first_failure_opens_incident_and_sends_alert() {
        let calls = Arc::new(AtomicUsize::new(0));
        let core = core_with_counting(calls.clone());
        let service = core.create_service(tcp_request("web")).await.unwrap();

        core.record_failure(&service.id, "dial refused", Duration::from_millis(1))
            .await
            .unwrap();

        let state = core.persistence.get_state(&service.id).await.unwrap().unwrap();
        assert_eq!(state.status, crate::domain::Status::Down);
        let unresolved = core.persistence.list_unresolved_incidents(&service.id).await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovery_resolves_the_open_incident_and_sends_recovery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let core = core_with_counting(calls.clone());
        let service = core.create_service(tcp_request("web")).await.unwrap();

        core.record_failure(&service.id, "dial refused", Duration::from_millis(1))
            .await
            .unwrap();
        core.record_success(&service.id, Duration::from_millis(2)).await.unwrap();

        let state = core.persistence.get_state(&service.id).await.unwrap().unwrap();
        assert_eq!(state.status, crate::domain::Status::Up);
        let unresolved = core.persistence.list_unresolved_incidents(&service.id).await.unwrap();
        assert!(unresolved.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_failures_do_not_open_a_second_incident() {
        let core = core();
        let service = core.create_service(tcp_request("web")).await.unwrap();
        core.record_failure(&service.id, "a", Duration::from_millis(1)).await.unwrap();
        core.record_failure(&service.id, "b", Duration::from_millis(1)).await.unwrap();
        let unresolved = core.persistence.list_unresolved_incidents(&service.id).await.unwrap();
        assert_eq!(unresolved.len(), 1);
    }

    #[tokio::test]
    async fn force_resolve_clears_incidents_without_recovery_notification() {
        let calls = Arc::new(AtomicUsize::new(0));
        let core = core_with_counting(calls.clone());
        let service = core.create_service(tcp_request("web")).await.unwrap();
        core.record_failure(&service.id, "a", Duration::from_millis(1)).await.unwrap();

        let resolved = core.force_resolve(&service.id).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].resolved);
        // one alert sent for the failure, no recovery sent by force-resolve
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let state = core.persistence.get_state(&service.id).await.unwrap().unwrap();
        assert_eq!(state.status, crate::domain::Status::Down);
    }

    #[tokio::test]
    async fn deleting_unknown_service_is_not_found() {
        let core = core();
        let err = core.delete_service("does-not-exist").await.unwrap_err();
        assert!(matches!(err, SentinelError::NotFound(_)));
    }

    #[tokio::test]
    async fn trigger_check_publishes_a_check_event_for_an_existing_service() {
        let core = core();
        let service = core.create_service(tcp_request("web")).await.unwrap();
        let mut sub = core.broker().subscribe();

        core.trigger_check(&service.id).await.unwrap();

        let event = sub.receiver.recv().await.unwrap();
        assert!(matches!(event, crate::broker::TriggerEvent::Check { service_id } if service_id == service.id));
    }

    #[tokio::test]
    async fn trigger_check_on_unknown_service_is_not_found() {
        let core = core();
        let err = core.trigger_check("does-not-exist").await.unwrap_err();
        assert!(matches!(err, SentinelError::NotFound(_)));
    }
}
