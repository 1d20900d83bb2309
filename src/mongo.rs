//! MongoDB driver backed by the official `mongodb` crate

use crate::config::DatabaseConfig;
use crate::driver::{Driver, Transport, TransportEvent};
use crate::error::DriverError;
use crate::health::ready_state;
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::event::cmap::CmapEvent;
use mongodb::event::sdam::SdamEvent;
use mongodb::event::EventHandler;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database, ServerType};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Database used when the URI names none
pub const DEFAULT_DATABASE: &str = "regen-tracker";

const EVENT_CAPACITY: usize = 64;

/// Connects to MongoDB; each call builds a fresh client and proves it with a ping
#[derive(Debug, Clone, Default)]
pub struct MongoDriver {
    app_name: Option<String>,
}

impl MongoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported to the server in the connection handshake
    pub fn with_app_name(app_name: impl Into<String>) -> Self {
        Self {
            app_name: Some(app_name.into()),
        }
    }
}

#[async_trait]
impl Driver for MongoDriver {
    type Transport = MongoTransport;

    async fn connect(&self, config: &DatabaseConfig) -> Result<MongoTransport, DriverError> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| classify(&e))?;

        options.min_pool_size = Some(config.min_pool_size);
        options.max_pool_size = Some(config.max_pool_size);
        options.max_idle_time = Some(config.max_idle_time());
        options.server_selection_timeout = Some(config.server_selection_timeout());
        // The Rust driver has no socket timeout; it bounds connection establishment instead.
        options.connect_timeout = Some(config.socket_timeout());
        if self.app_name.is_some() {
            options.app_name = self.app_name.clone();
        }

        let shared = Arc::new(TransportShared::new());
        let sdam = Arc::clone(&shared);
        options.sdam_event_handler = Some(EventHandler::callback(move |event| sdam.on_sdam(event)));
        let cmap = Arc::clone(&shared);
        options.cmap_event_handler = Some(EventHandler::callback(move |event| cmap.on_cmap(event)));

        let database_name = options
            .default_database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let client = Client::with_options(options).map_err(|e| classify(&e))?;

        if let Err(e) = client.database("admin").run_command(doc! { "ping": 1 }).await {
            shared.closed.store(true, Ordering::SeqCst);
            shared.state.store(ready_state::DISCONNECTED, Ordering::SeqCst);
            client.shutdown().await;
            return Err(classify(&e));
        }

        // Nobody is subscribed yet; the manager records the connected
        // transition itself when it installs the transport.
        shared.state.store(ready_state::CONNECTED, Ordering::SeqCst);
        info!(database = %database_name, "MongoDB client ready");

        Ok(MongoTransport {
            client,
            database_name,
            shared,
        })
    }
}

/// State updated from driver event callbacks
struct TransportShared {
    state: AtomicU8,
    closed: AtomicBool,
    pooled: AtomicU32,
    collections: Mutex<BTreeSet<String>>,
    events: broadcast::Sender<TransportEvent>,
}

impl TransportShared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: AtomicU8::new(ready_state::CONNECTING),
            closed: AtomicBool::new(false),
            pooled: AtomicU32::new(0),
            collections: Mutex::new(BTreeSet::new()),
            events,
        }
    }

    fn emit(&self, event: TransportEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn on_sdam(&self, event: SdamEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match event {
            SdamEvent::TopologyDescriptionChanged(changed) => {
                let available = any_available(
                    changed
                        .new_description
                        .servers()
                        .values()
                        .map(|server| server.server_type()),
                );
                let previous = self.state.load(Ordering::SeqCst);
                let (next, announce) = topology_transition(previous, available);
                if next != previous {
                    self.state.store(next, Ordering::SeqCst);
                }
                if let Some(announce) = announce {
                    self.emit(announce);
                }
            }
            SdamEvent::ServerHeartbeatFailed(failed) => {
                // One member failing does not make the deployment unreachable.
                self.emit(TransportEvent::Error(classify(&failed.failure)));
            }
            _ => {}
        }
    }

    fn on_cmap(&self, event: CmapEvent) {
        match event {
            CmapEvent::ConnectionCreated(_) => {
                self.pooled.fetch_add(1, Ordering::SeqCst);
            }
            CmapEvent::ConnectionClosed(_) => {
                let _ = self
                    .pooled
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            }
            _ => {}
        }
    }
}

/// A connected MongoDB client plus its collection registry
pub struct MongoTransport {
    client: Client,
    database_name: String,
    shared: Arc<TransportShared>,
}

impl MongoTransport {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The database named by the URI, or [`DEFAULT_DATABASE`]
    pub fn database(&self) -> Database {
        self.client.database(&self.database_name)
    }

    /// Typed collection handle; the name is recorded for health reporting
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.shared.collections.lock().insert(name.to_string());
        self.database().collection(name)
    }
}

#[async_trait]
impl Transport for MongoTransport {
    fn ready_state(&self) -> u8 {
        self.shared.state.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<(), DriverError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    fn active_connections(&self) -> u32 {
        self.shared.pooled.load(Ordering::SeqCst)
    }

    fn collection_names(&self) -> Vec<String> {
        self.shared.collections.lock().iter().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared
            .state
            .store(ready_state::DISCONNECTING, Ordering::SeqCst);
        self.client.clone().shutdown().await;
        self.shared
            .state
            .store(ready_state::DISCONNECTED, Ordering::SeqCst);
        self.shared.pooled.store(0, Ordering::SeqCst);
        debug!("MongoDB client shut down");
        Ok(())
    }
}

/// Whether any deployment member is reachable. `Unknown` is the state the
/// driver assigns to members it cannot talk to.
fn any_available(server_types: impl IntoIterator<Item = ServerType>) -> bool {
    server_types
        .into_iter()
        .any(|server_type| server_type != ServerType::Unknown)
}

/// Next ready state and the event to announce when the topology changes.
/// Connecting and disconnecting are owned by `connect`/`close`.
fn topology_transition(previous: u8, available: bool) -> (u8, Option<TransportEvent>) {
    match (previous, available) {
        (ready_state::CONNECTED, false) => {
            (ready_state::DISCONNECTED, Some(TransportEvent::Disconnected))
        }
        (ready_state::DISCONNECTED, true) => {
            (ready_state::CONNECTED, Some(TransportEvent::Reconnected))
        }
        _ => (previous, None),
    }
}

/// Map a driver error onto the retry classification
pub fn classify(err: &MongoError) -> DriverError {
    let message = err.to_string();
    match err.kind.as_ref() {
        ErrorKind::InvalidArgument { .. } => {
            DriverError::configuration(message).with_code("InvalidArgument")
        }
        ErrorKind::Authentication { .. } => {
            DriverError::configuration(message).with_code("AuthenticationFailed")
        }
        ErrorKind::Command(command) => DriverError::transient(message).with_code(command.code_name.clone()),
        ErrorKind::ServerSelection { .. } => {
            DriverError::transient(message).with_code("ServerSelectionError")
        }
        ErrorKind::DnsResolve { .. } => DriverError::transient(message).with_code("DnsResolveError"),
        ErrorKind::Io(_) => DriverError::transient(message).with_code("NetworkError"),
        _ => DriverError::transient(message),
    }
}
