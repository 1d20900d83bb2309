//! Process-wide access to the MongoDB connection manager
//!
//! The binary installs one manager at startup; request handlers reach it
//! through the free functions below.

use crate::health::HealthStatus;
use crate::manager::ConnectionManager;
use crate::mongo::{MongoDriver, MongoTransport};
use crate::{Result, ServerError};
use std::sync::{Arc, OnceLock};

static MANAGER: OnceLock<ConnectionManager<MongoDriver>> = OnceLock::new();

/// Install the process-wide manager. Fails if one is already installed.
pub fn install(manager: ConnectionManager<MongoDriver>) -> Result<()> {
    MANAGER.set(manager).map_err(|_| {
        ServerError::internal_error("Connection manager is already installed", None)
    })
}

/// The installed manager, if any
pub fn installed() -> Option<&'static ConnectionManager<MongoDriver>> {
    MANAGER.get()
}

fn manager() -> Result<&'static ConnectionManager<MongoDriver>> {
    installed().ok_or_else(|| {
        ServerError::internal_error(
            "Connection manager has not been installed",
            Some("call registry::install during startup".to_string()),
        )
    })
}

/// Connect through the installed manager
pub async fn connect_db() -> Result<Arc<MongoTransport>> {
    manager()?.connect().await
}

/// Health of the installed manager; reports disconnected when none is installed
pub async fn check_mongo_health() -> HealthStatus {
    match installed() {
        Some(manager) => manager.check_health().await,
        None => HealthStatus::disconnected("Connection manager has not been installed", 0),
    }
}

/// Disconnect the installed manager; a no-op when none is installed
pub async fn disconnect_db() -> Result<()> {
    match installed() {
        Some(manager) => manager.disconnect().await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::health::ConnectionStatus;

    // Single test so installation order is deterministic within this binary.
    #[tokio::test]
    async fn test_registry_lifecycle() {
        let health = check_mongo_health().await;
        assert_eq!(health.status, ConnectionStatus::Disconnected);
        assert!(connect_db().await.is_err());
        assert!(disconnect_db().await.is_ok());

        let mut config = Config::default();
        config.database.bypass = true;
        install(ConnectionManager::from_config(MongoDriver::new(), &config)).unwrap();
        assert!(install(ConnectionManager::from_config(MongoDriver::new(), &config)).is_err());

        let err = connect_db().await.err().unwrap();
        assert!(err.is_bypass());

        let health = check_mongo_health().await;
        assert_eq!(health.status, ConnectionStatus::Disconnected);
        assert!(health.ping_millis.is_none());
        assert!(disconnect_db().await.is_ok());
    }
}
