//! Regen DB
//!
//! Resilient MongoDB connection management for the regeneration tracker:
//! a cached single-flight connection with bounded exponential-backoff
//! retries, structured failure diagnostics, lifecycle listeners and a
//! non-throwing health probe.

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod health;
pub mod listeners;
pub mod logging;
pub mod manager;
pub mod mongo;
pub mod registry;
pub mod retry;
pub mod server;

pub use config::{Config, DatabaseConfig, Environment, RetryConfig, ServerConfig};
pub use driver::{Driver, Transport, TransportEvent, TransportEventKind};
pub use error::{DriverError, DriverErrorKind, Result, ServerError};
pub use health::{ConnectionStatus, HealthStatus};
pub use manager::ConnectionManager;
pub use retry::RetrySchedule;
