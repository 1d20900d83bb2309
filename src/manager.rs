//! Connection cache, single-flight connect with bounded retries, health probing
//!
//! One [`ConnectionManager`] owns at most one live transport. Concurrent
//! `connect()` callers that arrive while an attempt is in flight await that
//! same attempt instead of starting their own.

use crate::config::{Config, DatabaseConfig, Environment};
use crate::diagnostics::{ErrorLogger, Operation};
use crate::driver::{Driver, Transport, TransportEvent, TransportEventKind};
use crate::error::DriverError;
use crate::health::{ready_state, ConnectionStatus, HealthStatus};
use crate::listeners::ListenerSet;
use crate::retry::RetrySchedule;
use crate::{Result, ServerError};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

type ConnectAttempt<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

struct PendingAttempt<T> {
    generation: u64,
    attempt: ConnectAttempt<T>,
}

struct CacheState<T> {
    connection: Option<Arc<T>>,
    pending: Option<PendingAttempt<T>>,
    /// Consecutive failed attempts since the last success
    retry_count: u32,
    /// Attempts made in the current or most recent cycle
    attempt_count: u32,
    last_error: Option<String>,
    last_connected_at: Option<DateTime<Utc>>,
    listeners: ListenerSet,
    /// Bumped by disconnect/reset so superseded attempts can tell
    generation: u64,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            connection: None,
            pending: None,
            retry_count: 0,
            attempt_count: 0,
            last_error: None,
            last_connected_at: None,
            listeners: ListenerSet::new(),
            generation: 0,
        }
    }
}

struct Inner<D: Driver> {
    driver: D,
    config: DatabaseConfig,
    schedule: RetrySchedule,
    logger: ErrorLogger,
    state: Mutex<CacheState<D::Transport>>,
}

/// Process-wide connection owner. Cloning shares the same cache.
pub struct ConnectionManager<D: Driver> {
    inner: Arc<Inner<D>>,
}

impl<D: Driver> Clone for ConnectionManager<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> ConnectionManager<D> {
    pub fn new(
        driver: D,
        config: DatabaseConfig,
        schedule: RetrySchedule,
        environment: Environment,
    ) -> Self {
        let logger = ErrorLogger::new(&config.uri, environment);
        Self {
            inner: Arc::new(Inner {
                driver,
                config,
                schedule,
                logger,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn from_config(driver: D, config: &Config) -> Self {
        Self::new(
            driver,
            config.database.clone(),
            config.retry.schedule(),
            config.server.environment,
        )
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.inner.schedule
    }

    /// Return the cached connection, join an in-flight attempt, or start one.
    ///
    /// Fails immediately with [`ServerError::Bypass`] when bypass mode is set.
    pub async fn connect(&self) -> Result<Arc<D::Transport>> {
        if self.inner.config.bypass {
            return Err(ServerError::bypass(
                "SKIP_DATABASE is enabled; serve fallback data instead",
            ));
        }

        let attempt = {
            let mut state = self.inner.state.lock();

            if let Some(connection) = &state.connection {
                if connection.ready_state() == ready_state::CONNECTED {
                    return Ok(Arc::clone(connection));
                }
            }

            match &state.pending {
                Some(pending) => {
                    debug!("Joining in-flight connection attempt");
                    pending.attempt.clone()
                }
                None => {
                    let generation = state.generation;
                    let inner = Arc::clone(&self.inner);
                    let attempt = async move { inner.establish(generation).await }
                        .boxed()
                        .shared();
                    state.pending = Some(PendingAttempt {
                        generation,
                        attempt: attempt.clone(),
                    });
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Probe the cached connection. Never fails and never connects.
    pub async fn check_health(&self) -> HealthStatus {
        self.inner.check_health().await
    }

    /// Close the cached connection, if any. Calling it again is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let connection = {
            let mut state = self.inner.state.lock();
            state.pending = None;
            state.generation += 1;
            state.connection.clone()
        };

        let Some(connection) = connection else {
            debug!("No connection to close");
            return Ok(());
        };

        info!("Closing database connection");
        match connection.close().await {
            Ok(()) => {
                let mut state = self.inner.state.lock();
                if state
                    .connection
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &connection))
                {
                    state.connection = None;
                    state.listeners.detach_all();
                }
                info!("Database connection closed successfully");
                Ok(())
            }
            Err(err) => {
                self.inner
                    .log_connection_error(&err, Operation::Disconnect, None);
                Err(ServerError::disconnect_error(err))
            }
        }
    }

    /// Drop every cached field without any I/O
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        let generation = state.generation + 1;
        *state = CacheState::default();
        state.generation = generation;
        debug!("Connection cache reset");
    }

    /// Build, emit and remember a diagnostic record
    pub fn log_connection_error(&self, error: &DriverError, operation: Operation, attempt: Option<u32>) {
        self.inner.log_connection_error(error, operation, attempt);
    }

    /// Cached connection whose transport reports connected
    pub fn is_connected(&self) -> bool {
        self.inner
            .state
            .lock()
            .connection
            .as_ref()
            .is_some_and(|c| c.ready_state() == ready_state::CONNECTED)
    }

    pub fn has_pending_attempt(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.state.lock().retry_count
    }

    pub fn attempt_count(&self) -> u32 {
        self.inner.state.lock().attempt_count
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_connected_at
    }

    /// Number of attached lifecycle listeners
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }
}

impl<D: Driver> Inner<D> {
    /// Run one attempt cycle and publish its outcome into the cache.
    ///
    /// A cycle superseded by `disconnect()`/`reset()` stops at its next
    /// checkpoint and leaves the counters to the cycle that replaced it.
    async fn establish(self: Arc<Self>, generation: u64) -> Result<Arc<D::Transport>> {
        self.release_stale(generation).await;

        let max_attempts = self.schedule.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return Err(cancelled());
                }
                state.attempt_count = attempt + 1;
            }
            info!(
                attempt = attempt + 1,
                max_attempts,
                uri = %self.logger.masked_uri(),
                "Connecting to MongoDB"
            );

            let err = match self.driver.connect(&self.config).await {
                Ok(transport) => return self.install(generation, transport).await,
                Err(err) => err,
            };

            if !self.is_current(generation) {
                debug!("Discarding failure from superseded connection attempt");
                return Err(cancelled());
            }
            self.log_connection_error(&err, Operation::Connect, Some(attempt + 1));
            {
                let mut state = self.state.lock();
                if state.generation == generation {
                    state.retry_count += 1;
                }
            }

            if !err.is_retryable() {
                self.finish_attempt(generation);
                return Err(ServerError::configuration_error("database.uri", err.message));
            }

            if attempt + 1 >= max_attempts {
                self.finish_attempt(generation);
                return Err(ServerError::connection_error(max_attempts, err));
            }

            let delay = self.schedule.backoff_after(attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Connection attempt failed, retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    /// Close a cached handle that is no longer connected before replacing it
    async fn release_stale(&self, generation: u64) {
        let stale = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.listeners.detach_all();
            state.connection.take()
        };

        if let Some(stale) = stale {
            debug!("Releasing stale connection before reconnecting");
            if let Err(err) = stale.close().await {
                self.log_connection_error(&err, Operation::Disconnect, None);
            }
        }
    }

    async fn install(
        self: &Arc<Self>,
        generation: u64,
        transport: D::Transport,
    ) -> Result<Arc<D::Transport>> {
        let transport = Arc::new(transport);

        let superseded = {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.connection = Some(Arc::clone(&transport));
                state.retry_count = 0;
                state.last_error = None;
                state.last_connected_at = Some(Utc::now());
                state.pending = None;
                self.attach_listeners(&mut state.listeners, transport.as_ref());
                false
            } else {
                true
            }
        };

        if superseded {
            warn!("Connection attempt superseded by disconnect, closing new connection");
            if let Err(err) = transport.close().await {
                self.log_connection_error(&err, Operation::Disconnect, None);
            }
            return Err(cancelled());
        }

        info!(uri = %self.logger.masked_uri(), "Connected to MongoDB");
        Ok(transport)
    }

    fn finish_attempt(&self, generation: u64) {
        let mut state = self.state.lock();
        if state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == generation)
        {
            state.pending = None;
        }
    }

    fn attach_listeners(self: &Arc<Self>, listeners: &mut ListenerSet, transport: &D::Transport) {
        listeners.detach_all();
        for kind in TransportEventKind::ALL {
            let weak: Weak<Self> = Arc::downgrade(self);
            listeners.attach(kind, transport.subscribe(), move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_event(event);
                }
            });
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let mut state = self.state.lock();
                state.last_connected_at = Some(Utc::now());
                state.last_error = None;
                info!("MongoDB connected");
            }
            TransportEvent::Error(err) => {
                self.log_connection_error(&err, Operation::RuntimeError, None);
            }
            TransportEvent::Disconnected => {
                info!("MongoDB disconnected; the next connect() call will reconnect");
            }
            TransportEvent::Reconnected => {
                let mut state = self.state.lock();
                state.retry_count = 0;
                state.last_connected_at = Some(Utc::now());
                state.last_error = None;
                info!("MongoDB reconnected");
            }
        }
    }

    fn log_connection_error(&self, error: &DriverError, operation: Operation, attempt: Option<u32>) {
        let record = self.logger.log(error, operation, attempt);
        self.state.lock().last_error = Some(record.message);
    }

    async fn check_health(&self) -> HealthStatus {
        let (connection, attempt_count, last_error) = {
            let state = self.state.lock();
            (
                state.connection.clone(),
                state.attempt_count,
                state.last_error.clone(),
            )
        };

        let Some(connection) = connection else {
            return HealthStatus::disconnected(
                last_error.unwrap_or_else(|| "No active database connection".to_string()),
                attempt_count,
            );
        };

        let status = ConnectionStatus::from_ready_state(connection.ready_state());
        let mut ping_millis = None;
        let mut report_error = None;

        match status {
            ConnectionStatus::Connected => {
                let ping_timeout = self.config.ping_timeout();
                let started = Instant::now();
                match timeout(ping_timeout, connection.ping()).await {
                    Ok(Ok(())) => {
                        let elapsed = started.elapsed();
                        ping_millis = Some(elapsed.as_millis() as u64);
                        if elapsed > self.config.slow_ping_threshold() {
                            report_error = Some(format!(
                                "Slow ping: {}ms exceeds {}ms threshold",
                                elapsed.as_millis(),
                                self.config.slow_ping_threshold_ms
                            ));
                        }
                    }
                    Ok(Err(err)) => {
                        self.log_connection_error(&err, Operation::HealthCheck, None);
                        report_error = Some(format!("Ping failed: {}", err.message));
                    }
                    Err(_) => {
                        let err = DriverError::transient(format!(
                            "Ping timed out after {}ms",
                            ping_timeout.as_millis()
                        ))
                        .with_code("PingTimeout");
                        self.log_connection_error(&err, Operation::HealthCheck, None);
                        report_error = Some(err.message);
                    }
                }
            }
            ConnectionStatus::Disconnected => {
                report_error = Some(
                    last_error.unwrap_or_else(|| "Database transport is disconnected".to_string()),
                );
            }
            ConnectionStatus::Connecting => {}
        }

        let mut registered_collections = connection.collection_names();
        registered_collections.sort();
        registered_collections.dedup();

        HealthStatus {
            status,
            ping_millis,
            active_connections: connection.active_connections(),
            registered_collections,
            last_error: report_error.map(|message| crate::diagnostics::mask_credentials(&message)),
            attempt_count,
        }
    }
}

fn cancelled() -> ServerError {
    ServerError::internal_error("Connection attempt was cancelled by disconnect", None)
}
