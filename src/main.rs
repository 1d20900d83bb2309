use anyhow::Context;
use regen_db::config::Config;
use regen_db::logging::init_logging;
use regen_db::manager::ConnectionManager;
use regen_db::mongo::MongoDriver;
use regen_db::{registry, server};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first to get the log level
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            error!("Failed to load configuration: {}", e.user_message());
            error!("Configuration error details: {}", e.detailed_message());
            return Err(e).context("loading configuration");
        }
    };

    init_logging(&config.server.log_level, config.server.environment);

    info!("Starting regen-db");
    info!("Environment: {}", config.server.environment);
    info!("Database connection: {}", config.database.masked_uri());
    info!(
        "Pool size: {}-{}, server selection timeout: {}ms",
        config.database.min_pool_size,
        config.database.max_pool_size,
        config.database.server_selection_timeout_ms
    );

    let manager = ConnectionManager::from_config(MongoDriver::with_app_name("regen-db"), &config);
    registry::install(manager.clone()).context("installing connection manager")?;

    match registry::connect_db().await {
        Ok(_) => info!("Database connection established"),
        Err(e) if e.is_bypass() => warn!("{}", e.user_message()),
        Err(e) => {
            // Serve degraded; later connect_db() calls retry.
            error!("Starting without a database connection: {}", e.user_message());
        }
    }

    server::serve(manager, &config.server, shutdown_signal())
        .await
        .context("serving health endpoint")?;

    registry::disconnect_db()
        .await
        .context("closing database connection")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
