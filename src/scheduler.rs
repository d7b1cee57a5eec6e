//! Scheduler: one job per enabled service, subscribed to
//! lifecycle events on the broker, single-flight probing with linear
//! backoff retries.
//!
//! The job loop follows the actor-per-service shape the reference corpus's
//! `ServiceMonitorActor`/`ServiceHandle` pair uses: a spawned task owns the
//! probing loop, a small command channel carries out-of-band triggers, and
//! a cancellation handle tears the actor down.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::broker::TriggerEvent;
use crate::domain::{Paging, ProtocolConfig, Service, ServiceFilter};
use crate::error::{PersistenceError, ProbeError};
use crate::monitor::MonitorCore;
use crate::persistence::PersistencePort;
use crate::probe::{self, GrpcConnection, ProbeEngine};

enum JobCommand {
    Check,
}

struct Job {
    command_tx: mpsc::Sender<JobCommand>,
    cancel: CancellationToken,
}

/// Owns the `serviceId -> job` map.
pub struct Scheduler {
    jobs: Arc<DashMap<String, Job>>,
    monitor: Arc<MonitorCore>,
    persistence: Arc<dyn PersistencePort>,
    http_client: reqwest::Client,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(monitor: Arc<MonitorCore>, persistence: Arc<dyn PersistencePort>) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            monitor,
            persistence,
            http_client: probe::http::build_client().expect("failed to build reqwest client"),
            shutdown: CancellationToken::new(),
        }
    }

    /// Load all enabled services and spawn one job for each; disabled
    /// services are skipped.
    pub async fn start(&self) -> Result<(), PersistenceError> {
        let page = self
            .persistence
            .find_services_paged(
                &ServiceFilter::default(),
                Paging {
                    page: 1,
                    page_size: u32::MAX,
                },
            )
            .await?;
        for service in page.items {
            if service.is_enabled {
                self.spawn_job(service);
            }
        }
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn spawn_job(&self, service: Service) {
        let (command_tx, command_rx) = mpsc::channel(8);
        let cancel = self.shutdown.child_token();
        let service_id = service.id.clone();

        let grpc_connection = match &service.config {
            ProtocolConfig::Grpc(cfg) => Some(Arc::new(GrpcConnection::new(
                cfg.endpoint.clone(),
                cfg.tls,
                cfg.insecure_tls,
            ))),
            _ => None,
        };

        tokio::spawn(run_job(
            service,
            self.monitor.clone(),
            self.persistence.clone(),
            self.http_client.clone(),
            grpc_connection,
            command_rx,
            cancel.clone(),
            self.jobs.clone(),
        ));

        self.jobs.insert(service_id, Job { command_tx, cancel });
    }

    fn remove_job(&self, service_id: &str) {
        if let Some((_, job)) = self.jobs.remove(service_id) {
            job.cancel.cancel();
        }
    }

    /// Manually trigger an out-of-band check; a no-op if no job exists for
    /// this service.
    pub async fn trigger_check(&self, service_id: &str) {
        let sender = self.jobs.get(service_id).map(|job| job.command_tx.clone());
        if let Some(sender) = sender {
            let _ = sender.send(JobCommand::Check).await;
        }
    }

    /// Drive broker lifecycle events into job add/replace/remove. Exits
    /// when the scheduler shuts down or the channel closes.
    pub async fn run_lifecycle_subscriber(&self, mut receiver: mpsc::Receiver<TriggerEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = receiver.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        TriggerEvent::ServiceCreated(service) if service.is_enabled => {
                            self.spawn_job(service);
                        }
                        TriggerEvent::ServiceUpdated(service) => {
                            self.remove_job(&service.id);
                            if service.is_enabled {
                                self.spawn_job(service);
                            }
                        }
                        TriggerEvent::ServiceDeleted { service_id } => {
                            self.remove_job(&service_id);
                        }
                        TriggerEvent::Check { service_id } => {
                            self.trigger_check(&service_id).await;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Cancel every job and wait up to `grace` for their loops to exit
    /// and for in-flight attempts to return.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(grace, async {
            while !self.jobs.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }
}

async fn run_job(
    service: Service,
    monitor: Arc<MonitorCore>,
    persistence: Arc<dyn PersistencePort>,
    http_client: reqwest::Client,
    grpc_connection: Option<Arc<GrpcConnection>>,
    mut command_rx: mpsc::Receiver<JobCommand>,
    cancel: CancellationToken,
    jobs: Arc<DashMap<String, Job>>,
) {
    let service_id = service.id.clone();
    let in_progress = Arc::new(AtomicBool::new(false));
    let mut ticker = tokio::time::interval(service.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    perform_check(
        &service_id,
        &monitor,
        &persistence,
        &http_client,
        &grpc_connection,
        &cancel,
        &in_progress,
    )
    .await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                perform_check(&service_id, &monitor, &persistence, &http_client, &grpc_connection, &cancel, &in_progress).await;
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(JobCommand::Check) => {
                        perform_check(&service_id, &monitor, &persistence, &http_client, &grpc_connection, &cancel, &in_progress).await;
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(connection) = &grpc_connection {
        connection.shutdown();
    }
    jobs.remove(&service_id);
    debug!(service_id, "scheduler job stopped");
}

/// Single-flight wrapper: drops the tick if the previous check for this
/// service is still running.
#[tracing::instrument(skip(monitor, persistence, http_client, grpc_connection, cancel, in_progress))]
async fn perform_check(
    service_id: &str,
    monitor: &Arc<MonitorCore>,
    persistence: &Arc<dyn PersistencePort>,
    http_client: &reqwest::Client,
    grpc_connection: &Option<Arc<GrpcConnection>>,
    cancel: &CancellationToken,
    in_progress: &Arc<AtomicBool>,
) {
    if in_progress.swap(true, Ordering::SeqCst) {
        debug!(service_id, "skipping tick: previous check still in progress");
        return;
    }
    let result = run_check(service_id, monitor, persistence, http_client, grpc_connection, cancel).await;
    in_progress.store(false, Ordering::SeqCst);
    if let Err(e) = result {
        error!(service_id, error = %e, "scheduler failed to load service during check");
    }
}

/// One full attempt cycle: fetch the authoritative record, build an
/// engine, retry up to `Retries` times with `attempt * 1s` linear backoff
///.
async fn run_check(
    service_id: &str,
    monitor: &Arc<MonitorCore>,
    persistence: &Arc<dyn PersistencePort>,
    http_client: &reqwest::Client,
    grpc_connection: &Option<Arc<GrpcConnection>>,
    cancel: &CancellationToken,
) -> Result<(), PersistenceError> {
    let Some(service) = persistence.get_service(service_id).await? else {
        warn!(service_id, "service vanished before its scheduled check; skipping");
        return Ok(());
    };
    if !service.is_enabled {
        return Ok(());
    }

    let engine = probe::build_engine(&service.config, http_client.clone(), grpc_connection.clone());
    let retries = service.retries.max(1);

    let mut last_error = None;
    let mut last_duration = Duration::ZERO;

    for attempt in 1..=retries {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let start = Instant::now();
        let outcome = run_attempt(engine.as_ref(), service.timeout).await;
        last_duration = start.elapsed();

        match outcome {
            Ok(()) => {
                if let Err(e) = monitor.record_success(service_id, last_duration).await {
                    error!(service_id, error = %e, "failed to record a successful check");
                }
                return Ok(());
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < retries {
                    let backoff = Duration::from_secs(attempt as u64);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Ok(()),
                    }
                }
            }
        }
    }

    if let Some(error) = last_error {
        if let Err(e) = monitor.record_failure(service_id, error.message, last_duration).await {
            error!(service_id, error = %e, "failed to record a failed check");
        }
    }
    Ok(())
}

/// Run one probe attempt with unwind isolation: a panicking engine (a bug in
/// a protocol-specific `ProbeEngine` impl) becomes a `Protocol`-classed
/// `ProbeError` instead of taking down the owning scheduler job's task.
async fn run_attempt(engine: &dyn ProbeEngine, timeout: Duration) -> Result<(), ProbeError> {
    match AssertUnwindSafe(engine.check(timeout)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ProbeError::protocol(format!(
            "probe panicked: {}",
            panic_message(&panic)
        ))),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
