//! Registry of connected listeners.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use radiocast_ipc::SessionEvent;

use crate::sink::{channel_sink, ClientStream, Sink};
use crate::DEFAULT_CLIENT_BUFFER_CHUNKS;

/// Opaque identifier for one connected listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared set of listener sinks keyed by [`ClientId`].
///
/// Thread-safe via `RwLock`. Each add or remove is atomic; readers only
/// ever see fully registered entries.
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<dyn Sink>>>,
    buffer_chunks: usize,
    event_tx: Option<Sender<SessionEvent>>,
}

impl ClientRegistry {
    /// Create an empty registry whose channel sinks buffer `buffer_chunks` chunks.
    pub fn new(buffer_chunks: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            buffer_chunks,
            event_tx: None,
        }
    }

    /// Report joins and departures on `event_tx`.
    pub fn with_events(mut self, event_tx: Sender<SessionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Register a new listener backed by a channel sink.
    ///
    /// Returns the listener's id and the consumer half to hand to the
    /// transport.
    pub fn add(&self) -> (ClientId, ClientStream) {
        let (sink, stream) = channel_sink(self.buffer_chunks);
        let id = self.insert(Arc::new(sink));
        (id, stream)
    }

    /// Register an arbitrary sink under a fresh id.
    pub fn insert(&self, sink: Arc<dyn Sink>) -> ClientId {
        let id = ClientId::new();
        let listeners = {
            let mut clients = self.clients.write();
            clients.insert(id, sink);
            clients.len()
        };

        info!(client_id = %id, listeners, "Listener added");
        self.send_event(SessionEvent::ListenerJoined {
            client_id: id.to_string(),
            listeners,
        });

        id
    }

    /// Deregister a listener.
    ///
    /// Removing an unknown or already removed id is a no-op. Returns
    /// whether an entry was actually removed.
    pub fn remove(&self, id: &ClientId) -> bool {
        let (removed, listeners) = {
            let mut clients = self.clients.write();
            let removed = clients.remove(id).is_some();
            (removed, clients.len())
        };

        if removed {
            info!(client_id = %id, listeners, "Listener removed");
            self.send_event(SessionEvent::ListenerLeft {
                client_id: id.to_string(),
                listeners,
            });
        } else {
            debug!(client_id = %id, "Listener already removed");
        }

        removed
    }

    /// Deregister every listener.
    ///
    /// Dropping the registry's sinks ends each listener's stream once no
    /// broadcast cycle still holds them. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed: Vec<ClientId> = self.clients.write().drain().map(|(id, _)| id).collect();

        for (i, id) in removed.iter().enumerate() {
            self.send_event(SessionEvent::ListenerLeft {
                client_id: id.to_string(),
                listeners: removed.len() - i - 1,
            });
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "All listeners removed");
        }

        removed.len()
    }

    /// Copy out the current listeners for one broadcast cycle.
    pub fn snapshot(&self) -> Vec<(ClientId, Arc<dyn Sink>)> {
        self.clients
            .read()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect()
    }

    /// Check whether `id` is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.read().contains_key(id)
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    fn send_event(&self, event: SessionEvent) {
        if let Some(ref tx) = self.event_tx {
            if let Err(e) = tx.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_BUFFER_CHUNKS)
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("listeners", &self.len())
            .field("buffer_chunks", &self.buffer_chunks)
            .finish()
    }
}
