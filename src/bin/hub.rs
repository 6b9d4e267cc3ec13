use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use redfish_monitoring::{
    actors::{CoordinatorHandle, CoordinatorSettings, FleetPipeline, FleetScheduler, NotifierHandle, ScanPolicy},
    alerts::AlertReconciler,
    analyzer::{AnalyzerSettings, HealthAnalyzer},
    config::{Config, read_config_file},
    credentials::ConfigCredentialStore,
    devices::InMemoryDeviceRegistry,
    log_collector::LogCollector,
    monitors::SystemProbe,
    realtime::{HEARTBEAT_INTERVAL, RealtimeNotifier, open_bus, start_heartbeat},
    redfish::RedfishClient,
    storage::{self, AlertStore, UrgencyRule},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("redfish_monitoring", LevelFilter::DEBUG),
        ("redfish_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    info!("monitoring {} devices", config.devices.len());

    let store = storage::open(config.storage.as_ref())
        .await
        .context("failed to open alert storage")?;
    seed_urgency_rules(&config, store.as_ref()).await?;

    // realtime fan-out
    let bus = open_bus(&config.bus)?;
    let notifier = Arc::new(RealtimeNotifier::new(bus.clone()));
    let bus_listener = notifier.spawn_bus_listener();
    let heartbeat = start_heartbeat(notifier.clone(), HEARTBEAT_INTERVAL);
    let notifications = NotifierHandle::spawn(notifier.clone());

    // scan pipeline
    let credentials = Arc::new(ConfigCredentialStore::new(config.credentials.clone()));
    let client = RedfishClient::new(&config.redfish).context("failed to build redfish client")?;
    let analyzer = Arc::new(HealthAnalyzer::new(
        Arc::new(SystemProbe::new(&config.connectivity)),
        credentials.clone(),
        client.clone(),
        AnalyzerSettings::from_config(&config.analyzer, &config.connectivity, &config.redfish),
    ));
    let scheduler = Arc::new(FleetScheduler::new(
        analyzer.clone(),
        ScanPolicy::from(&config.scan),
    ));
    let registry = Arc::new(InMemoryDeviceRegistry::from_config(config.devices.clone()));
    let log_collector = Arc::new(LogCollector::new(
        client,
        credentials,
        store.clone(),
        config.scan.log_max_entries,
    ));

    let pipeline = FleetPipeline {
        registry: registry.clone(),
        scheduler,
        reconciler: AlertReconciler::new(store.clone()),
        notifier: notifications.clone(),
        log_collector: config.scan.collect_logs.then(|| log_collector.clone()),
    };
    let coordinator = CoordinatorHandle::spawn(pipeline, coordinator_settings(&config));

    #[cfg(feature = "api")]
    if let Some(section) = &config.api {
        use redfish_monitoring::api::{ApiConfig, ApiState, spawn_api_server};

        let state = ApiState {
            registry,
            store: store.clone(),
            coordinator: coordinator.clone(),
            analyzer,
            log_collector,
            notifier: notifier.clone(),
            notifications: notifications.clone(),
        };
        let addr = spawn_api_server(ApiConfig::from_section(section), state).await?;
        info!("api available at http://{addr}/api/v1");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    if let Err(e) = coordinator.shutdown().await {
        warn!("coordinator shutdown failed: {e}");
    }
    if let Err(e) = notifications.shutdown().await {
        warn!("notification worker shutdown failed: {e}");
    }
    notifier.shutdown_all().await;
    bus_listener.abort();
    heartbeat.abort();
    bus.shutdown().await;

    if let Err(e) = store.close().await {
        error!("failed to close storage: {e}");
    }

    debug!("shutdown complete");
    Ok(())
}

fn coordinator_settings(config: &Config) -> CoordinatorSettings {
    CoordinatorSettings {
        scan_interval: config.scan.interval_secs.map(Duration::from_secs),
        min_trigger_interval: Duration::from_secs(config.scan.min_trigger_interval_secs),
        resolved_retention_days: config.resolved_retention_days(),
    }
}

async fn seed_urgency_rules(config: &Config, store: &dyn AlertStore) -> anyhow::Result<()> {
    for rule in &config.urgency_rules {
        store
            .put_urgency_rule(UrgencyRule {
                business_type: rule.business_type.clone(),
                hardware_type: rule.hardware_type.clone(),
                urgency_level: rule.urgency,
            })
            .await
            .with_context(|| {
                format!(
                    "failed to store urgency rule {}/{}",
                    rule.business_type, rule.hardware_type
                )
            })?;
    }
    debug!("seeded {} urgency rules", config.urgency_rules.len());
    Ok(())
}
