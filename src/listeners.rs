//! Lifecycle listener bookkeeping
//!
//! Listeners are tracked as task handles so a reconnect can detach every
//! previous handler before attaching a fresh set.

use crate::driver::{TransportEvent, TransportEventKind};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ListenerSet {
    handles: Vec<(TransportEventKind, JoinHandle<()>)>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Kinds currently listened for
    pub fn kinds(&self) -> Vec<TransportEventKind> {
        self.handles.iter().map(|(kind, _)| *kind).collect()
    }

    /// Spawn a handler that runs for every event of `kind` on `events`.
    /// Must be called from within a Tokio runtime.
    pub fn attach<F>(
        &mut self,
        kind: TransportEventKind,
        mut events: broadcast::Receiver<TransportEvent>,
        handler: F,
    ) where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.kind() == kind => handler(event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(?kind, skipped, "Transport listener lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(?kind, "Transport event stream closed");
        });
        self.handles.push((kind, handle));
    }

    /// Abort every tracked listener
    pub fn detach_all(&mut self) {
        for (_, handle) in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        self.detach_all();
    }
}
