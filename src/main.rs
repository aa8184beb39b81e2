use log::{error, info};
use std::sync::Arc;

use farmtech_telemetry_sync::channels::ChannelTable;
use farmtech_telemetry_sync::report::ConsoleReport;
use farmtech_telemetry_sync::store::{JsonFileStore, Reconciler};
use farmtech_telemetry_sync::{ClientConfig, TelemetryClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match ClientConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let channels = Arc::new(ChannelTable::load()?);
    let mut engine = Reconciler::new(
        channels.clone(),
        Box::new(JsonFileStore::new(config.cache_path.clone())),
    )
    .with_server_offset(config.server_offset);
    engine.subscribe(Box::new(ConsoleReport::new(channels, config.display_category)));
    engine.restore();

    let (client, handle) = TelemetryClient::new(&config, engine);
    let mut task = tokio::spawn(client.run());
    handle.connect();

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        let _ = tx.send(());
    });

    // Run client or wait for shutdown signal
    tokio::select! {
        result = &mut task => {
            if let Err(e) = result {
                error!("Telemetry client stopped unexpectedly: {}", e);
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
            handle.shutdown();
            match task.await {
                Ok(engine) => info!(
                    "Final model: {} devices, {} readings",
                    engine.model().devices().len(),
                    engine.model().readings().len()
                ),
                Err(e) => error!("Telemetry client failed during shutdown: {}", e),
            }
        }
    }

    Ok(())
}
