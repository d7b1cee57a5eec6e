//! End-to-end scenario tests exercising the public API the way an external
//! REST layer would: `MonitorCore` + `InMemoryPersistence` + a recording
//! `NotificationPort`, driven directly with simulated probe outcomes. One
//! scenario additionally drives the real HTTP engine against `httpmock`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::Method::GET;
use httpmock::MockServer;

use sentinel_core::domain::{
    HttpConfig, HttpEndpoint, HttpMethod, IncidentFilter, Paging, ProtocolConfig, TcpConfig,
};
use sentinel_core::error::ProbeErrorClass;
use sentinel_core::probe::http::{build_client, HttpEngine};
use sentinel_core::probe::ProbeEngine;
use sentinel_core::{
    Broker, FanoutNotifier, Incident, InMemoryPersistence, MonitorCore, NotificationSink, Service,
    ServiceRequest, Status,
};

fn tcp_request(name: &str) -> ServiceRequest {
    ServiceRequest {
        name: name.to_string(),
        interval: Duration::from_secs(1),
        timeout: Duration::from_millis(500),
        retries: 2,
        tags: HashSet::new(),
        config: ProtocolConfig::Tcp(TcpConfig {
            endpoint: "127.0.0.1:1".to_string(),
            send_data: None,
            expect_data: None,
        }),
        is_enabled: true,
    }
}

struct RecordingSink {
    alerts: Arc<AtomicUsize>,
    recoveries: Arc<AtomicUsize>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_alert(&self, _service: &Service, _incident: &Incident) -> anyhow::Result<()> {
        self.alerts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_recovery(&self, _service: &Service, _incident: &Incident) -> anyhow::Result<()> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn recording_core() -> (MonitorCore, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let alerts = Arc::new(AtomicUsize::new(0));
    let recoveries = Arc::new(AtomicUsize::new(0));
    let notifier = Arc::new(FanoutNotifier::new(vec![Box::new(RecordingSink {
        alerts: alerts.clone(),
        recoveries: recoveries.clone(),
    })]));
    let core = MonitorCore::new(Arc::new(InMemoryPersistence::new()), notifier, Broker::new());
    (core, alerts, recoveries)
}

fn incidents_for(service_id: &str) -> IncidentFilter {
    IncidentFilter {
        service_id: Some(service_id.to_string()),
        ..Default::default()
    }
}

/// S1 — UP -> DOWN -> UP transitions with exactly one alert and one recovery.
#[tokio::test]
async fn s1_up_down_up_transition_sequence() {
    let (core, alerts, recoveries) = recording_core();
    let service = core.create_service(tcp_request("web")).await.unwrap();

    core.record_success(&service.id, Duration::from_millis(5)).await.unwrap();
    let state = core
        .get_all_service_states()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.service_id == service.id)
        .unwrap();
    assert_eq!(state.status, Status::Up);
    assert_eq!(state.consecutive_success, 1);
    assert_eq!(state.total_checks, 1);

    core.record_failure(&service.id, "HTTP 500", Duration::from_millis(5))
        .await
        .unwrap();
    let incidents = core
        .find_incidents(&incidents_for(&service.id), Paging::default())
        .await
        .unwrap();
    assert_eq!(incidents.items.len(), 1);
    assert!(!incidents.items[0].resolved);
    assert!(incidents.items[0].error.contains("500"));
    assert_eq!(alerts.load(Ordering::SeqCst), 1);

    core.record_success(&service.id, Duration::from_millis(5)).await.unwrap();
    let incidents = core
        .find_incidents(&incidents_for(&service.id), Paging::default())
        .await
        .unwrap();
    assert!(incidents.items[0].resolved);
    assert!(incidents.items[0].duration().unwrap() >= chrono::Duration::zero());
    assert_eq!(recoveries.load(Ordering::SeqCst), 1);

    let state = core
        .get_all_service_states()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.service_id == service.id)
        .unwrap();
    assert_eq!(state.status, Status::Up);
    assert_eq!(state.consecutive_fails, 0);
}

/// S2 — HTTP condition anomaly: two endpoints returning JSON whose
/// extracted values differ by more than 10 fail the check with class
/// `Condition`. Drives the real HTTP engine against a mock server, then
/// feeds the resulting error through the monitor core the way the
/// scheduler would.
#[tokio::test]
async fn s2_http_condition_anomaly_fails_the_check() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/a");
            then.status(200).body(r#"{"n": 10}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/b");
            then.status(200).body(r#"{"n": 25}"#);
        })
        .await;

    let endpoint = |name: &str, path: &str| HttpEndpoint {
        name: name.to_string(),
        url: format!("{}{}", server.base_url(), path),
        method: HttpMethod::Get,
        headers: Default::default(),
        body: String::new(),
        expected_status: 200,
        json_path: Some("n".to_string()),
        basic_auth: None,
    };

    let config = HttpConfig {
        timeout: None,
        condition: Some("Math.abs(results.a.value - results.b.value) > 10".to_string()),
        endpoints: vec![endpoint("a", "/a"), endpoint("b", "/b")],
    };

    let engine = HttpEngine::new(build_client().unwrap(), config.clone());
    let err = engine.check(Duration::from_secs(2)).await.unwrap_err();
    assert_eq!(err.class, ProbeErrorClass::Condition);

    let (core, alerts, _) = recording_core();
    let service = core
        .create_service(ServiceRequest {
            name: "conditional".to_string(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            retries: 1,
            tags: HashSet::new(),
            config: ProtocolConfig::Http(config),
            is_enabled: true,
        })
        .await
        .unwrap();

    core.record_failure(&service.id, err.message, Duration::from_millis(10))
        .await
        .unwrap();
    let incidents = core
        .find_incidents(&incidents_for(&service.id), Paging::default())
        .await
        .unwrap();
    assert_eq!(incidents.items.len(), 1);
    assert_eq!(alerts.load(Ordering::SeqCst), 1);
}

/// S6 — force-resolve clears an incident without requiring an UP transition
/// or sending a recovery notification, and a subsequent successful probe
/// does not create a second resolution.
#[tokio::test]
async fn s6_force_resolve_without_recovery() {
    let (core, alerts, recoveries) = recording_core();
    let service = core.create_service(tcp_request("web")).await.unwrap();

    core.record_failure(&service.id, "dial refused", Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(alerts.load(Ordering::SeqCst), 1);

    let resolved = core.force_resolve(&service.id).await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].resolved);
    assert_eq!(recoveries.load(Ordering::SeqCst), 0);

    let state = core
        .get_all_service_states()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.service_id == service.id)
        .unwrap();
    assert_eq!(state.status, Status::Down);

    // A later successful probe transitions DOWN->UP but must not try to
    // resolve the already-resolved incident a second time.
    core.record_success(&service.id, Duration::from_millis(5)).await.unwrap();
    assert_eq!(recoveries.load(Ordering::SeqCst), 0);

    let resolved_incidents = core
        .find_incidents(
            &IncidentFilter {
                service_id: Some(service.id.clone()),
                resolved: Some(true),
                ..Default::default()
            },
            Paging::default(),
        )
        .await
        .unwrap();
    assert_eq!(resolved_incidents.items.len(), 1);
}
