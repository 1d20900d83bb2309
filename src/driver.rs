//! Seams between the connection manager and a document database client

use crate::config::DatabaseConfig;
use crate::error::DriverError;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Asynchronous state change reported by a live transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Reconnected,
    Error(DriverError),
}

impl TransportEvent {
    pub fn kind(&self) -> TransportEventKind {
        match self {
            TransportEvent::Connected => TransportEventKind::Connected,
            TransportEvent::Disconnected => TransportEventKind::Disconnected,
            TransportEvent::Reconnected => TransportEventKind::Reconnected,
            TransportEvent::Error(_) => TransportEventKind::Error,
        }
    }
}

/// Discriminant of [`TransportEvent`], used to register one listener per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    Connected,
    Error,
    Disconnected,
    Reconnected,
}

impl TransportEventKind {
    pub const ALL: [TransportEventKind; 4] = [
        TransportEventKind::Connected,
        TransportEventKind::Error,
        TransportEventKind::Disconnected,
        TransportEventKind::Reconnected,
    ];
}

/// An established connection handle (client plus its pool)
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// One of the [`ready_state`](crate::health::ready_state) constants
    fn ready_state(&self) -> u8;

    /// Lightweight administrative round trip
    async fn ping(&self) -> Result<(), DriverError>;

    /// Pooled connections currently open
    fn active_connections(&self) -> u32;

    /// Collections registered through this handle
    fn collection_names(&self) -> Vec<String>;

    /// Receive transport events from now on
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Close gracefully
    async fn close(&self) -> Result<(), DriverError>;
}

/// Produces transports. One `connect` call is one attempt.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Transport: Transport;

    /// Attempt a connection, bounded by the configured server-selection timeout
    async fn connect(&self, config: &DatabaseConfig) -> Result<Self::Transport, DriverError>;
}
