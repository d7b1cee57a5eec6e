use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use sentinel_core::broadcaster::{spawn_broadcaster, BroadcastHub};
use sentinel_core::config::{init_logging, load_config, Config};
use sentinel_core::domain::{HttpConfig, HttpEndpoint, HttpMethod, ProtocolConfig, ServiceRequest};
use sentinel_core::{Broker, FanoutNotifier, InMemoryPersistence, LoggingSink, MonitorCore, Scheduler};

#[derive(Debug, Parser)]
#[command(
    name = "sentinel-demo",
    version,
    about = "Runs Sentinel against a small set of seed services, logging state transitions"
)]
struct Cli {
    /// Path to a config file (json|yaml). Falls back to built-in defaults.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// How long to run before shutting down cleanly.
    #[arg(long, default_value = "30")]
    run_seconds: u64,
}

fn seed_requests() -> Vec<ServiceRequest> {
    vec![ServiceRequest {
        name: "example-http".to_string(),
        interval: Duration::from_secs(10),
        timeout: Duration::from_secs(3),
        retries: 3,
        tags: HashSet::from(["demo".to_string()]),
        config: ProtocolConfig::Http(HttpConfig {
            timeout: None,
            condition: None,
            endpoints: vec![HttpEndpoint {
                name: "root".to_string(),
                url: "https://example.com".to_string(),
                method: HttpMethod::Get,
                headers: Default::default(),
                body: String::new(),
                expected_status: 200,
                json_path: None,
                basic_auth: None,
            }],
        }),
        is_enabled: true,
    }]
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    init_logging(&cfg);

    let persistence = Arc::new(InMemoryPersistence::new());
    for request in seed_requests() {
        persistence.seed_service(request.into_service(chrono::Utc::now()));
    }

    let broker = Broker::new();
    let notifier = Arc::new(FanoutNotifier::new(vec![Box::new(LoggingSink)]));
    let monitor = Arc::new(MonitorCore::new(persistence.clone(), notifier, broker.clone()));

    let hub = BroadcastHub::new();
    spawn_broadcaster(hub, &broker);

    let scheduler = Arc::new(Scheduler::new(monitor.clone(), persistence.clone()));
    scheduler.start().await?;

    let lifecycle_sub = broker.subscribe_with_capacity(cfg.broker_mailbox_size);
    let lifecycle_scheduler = scheduler.clone();
    tokio::spawn(async move {
        lifecycle_scheduler.run_lifecycle_subscriber(lifecycle_sub.receiver).await;
    });

    info!(run_seconds = cli.run_seconds, "sentinel demo running");
    tokio::time::sleep(Duration::from_secs(cli.run_seconds)).await;

    info!("shutting down");
    scheduler
        .shutdown(Duration::from_millis(cfg.shutdown_grace_ms))
        .await;
    Ok(())
}
