use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use whalewatch::alerts::{AlertDispatcher, EmailChannel, NotificationChannel, TelegramChannel};
use whalewatch::config::Config;
use whalewatch::detection::Engine;
use whalewatch::scheduler::{JobKind, Scheduler};
use whalewatch::storage::Storage;
use whalewatch::subscriptions::SqliteSubscriptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Arc::new(Config::load(&config_path));
    info!("Starting whalewatch (config: {})", config_path);

    let storage = Arc::new(Storage::connect(&config.database.url).await?);
    let subscriptions = Arc::new(SqliteSubscriptions::new(storage.clone()));

    let channels: Vec<Arc<dyn NotificationChannel>> = vec![
        Arc::new(TelegramChannel::new(&config.channels)),
        Arc::new(EmailChannel::new(&config.channels)),
    ];
    for channel in &channels {
        if !channel.is_configured() {
            warn!("Channel {} has no credentials, deliveries on it will fail", channel.name());
        }
    }

    let dispatcher = Arc::new(AlertDispatcher::new(
        storage.clone(),
        subscriptions.clone(),
        channels,
        config.alerting.clone(),
    ));
    let engine = Arc::new(Engine::new(
        storage,
        config.clone(),
        subscriptions,
        dispatcher,
    ));

    let mut scheduler = Scheduler::new();
    {
        let engine = engine.clone();
        scheduler.register(
            JobKind::Detect,
            Duration::from_secs(config.detection.cadence_secs),
            move || {
                let engine = engine.clone();
                async move { engine.run_detection().await.map(|_| ()) }
            },
        );
    }
    {
        let engine = engine.clone();
        scheduler.register(
            JobKind::Discover,
            Duration::from_secs(config.detection.discovery_cadence_secs),
            move || {
                let engine = engine.clone();
                async move { engine.run_discovery().await.map(|_| ()) }
            },
        );
    }
    {
        let engine = engine.clone();
        scheduler.register(
            JobKind::AlertSweep,
            Duration::from_secs(config.alerting.sweep_cadence_secs),
            move || {
                let engine = engine.clone();
                async move { engine.process_pending_alerts().await }
            },
        );
    }

    let handles = scheduler.spawn_all();
    info!("Scheduler running with {} jobs", handles.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping jobs");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
