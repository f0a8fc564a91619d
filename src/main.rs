use tracing::{error, info};

use rss_monitor::{Config, MonitorService};

#[tokio::main]
async fn main() {
    // Load configuration
    let mut config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = rss_monitor::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        rss_monitor::logging::init_console_only(&config.logging.level);
    }

    info!("RSS Monitor - feed synchronization daemon");
    info!("Data directory: {}", config.storage.data_dir);

    let service = match MonitorService::from_config(&config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start monitor service: {e}");
            std::process::exit(1);
        }
    };

    match service.schedule_all().await {
        Ok(count) => info!("Monitoring {count} subscriptions"),
        Err(e) => error!("Failed to schedule stored subscriptions: {e}"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down");
    if let Err(e) = service.shutdown().await {
        error!("Shutdown failed: {e}");
    }
}
