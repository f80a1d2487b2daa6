//! Event hub: connected clients, channel routing and event fan-out.
//!
//! Every emitted [`RealtimeEvent`] goes to the clients whose subscriptions
//! match its channel and to in-process listeners on a broadcast channel.
//! Clients whose receiver is gone are pruned on the next emit that reaches
//! them.

use crate::client::{create_client, Client, ClientId, ClientMetadata, ClientReceiver};
use crate::error::RealtimeError;
use crate::event::{EventKind, RealtimeEvent};
use crate::subscription::Channel;
use eng_types::UserId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the in-process broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Maximum number of concurrent connections.
const MAX_CONNECTIONS: usize = 10000;

/// Routes events to subscribed WebSocket clients.
#[derive(Debug)]
pub struct EventHub {
    clients: RwLock<HashMap<ClientId, Arc<Client>>>,
    event_tx: broadcast::Sender<RealtimeEvent>,
    total_connections: AtomicU64,
    total_subscriptions: AtomicU64,
    total_events: AtomicU64,
    dropped_messages: AtomicU64,
}

impl EventHub {
    /// Create a new event hub.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            clients: RwLock::new(HashMap::new()),
            event_tx,
            total_connections: AtomicU64::new(0),
            total_subscriptions: AtomicU64::new(0),
            total_events: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Registers a connection, optionally on behalf of a user, and returns
    /// the receiver its socket task should drain.
    pub fn connect(
        &self,
        user: Option<UserId>,
    ) -> Result<(Arc<Client>, ClientReceiver), RealtimeError> {
        let mut clients = self.clients.write();
        if clients.len() >= MAX_CONNECTIONS {
            return Err(RealtimeError::TooManyConnections(MAX_CONNECTIONS));
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        let (client, receiver) = create_client(client_id.clone(), ClientMetadata::now(user));
        clients.insert(client_id.clone(), client.clone());
        drop(clients);
        self.total_connections.fetch_add(1, Ordering::Relaxed);

        info!(
            client_id = %client_id,
            user = ?client.user().map(ToString::to_string),
            "Client connected"
        );
        Ok((client, receiver))
    }

    /// Removes a connection and its subscriptions.
    pub fn disconnect(&self, client_id: &str) {
        if let Some(client) = self.clients.write().remove(client_id) {
            client.clear_subscriptions();
            info!(client_id = %client_id, "Client disconnected");
        }
    }

    /// Get a client by ID.
    pub fn get_client(&self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.read().get(client_id).cloned()
    }

    /// Connections currently open for `user`.
    pub fn user_connections(&self, user: &UserId) -> Vec<Arc<Client>> {
        self.clients
            .read()
            .values()
            .filter(|c| c.user() == Some(user))
            .cloned()
            .collect()
    }

    /// Subscribes a connected client to a channel on its behalf.
    pub fn subscribe_client(&self, client_id: &str, channel: Channel) -> Result<bool, RealtimeError> {
        let client = self
            .get_client(client_id)
            .ok_or_else(|| RealtimeError::ClientNotFound(client_id.to_string()))?;
        self.add_subscription(&client, channel)
    }

    fn add_subscription(&self, client: &Client, channel: Channel) -> Result<bool, RealtimeError> {
        let name = channel.to_string();
        let is_new = client.subscribe(channel)?;
        if is_new {
            self.total_subscriptions.fetch_add(1, Ordering::Relaxed);
            debug!(client_id = %client.id, channel = %name, "Client subscribed");
        }
        Ok(is_new)
    }

    /// Applies a command sent by a client.
    ///
    /// Confirmations echo the channel in canonical form.
    pub fn handle_command(
        &self,
        client: &Arc<Client>,
        command: ClientCommand,
    ) -> Result<ServerMessage, RealtimeError> {
        match command {
            ClientCommand::Subscribe { channel } => {
                let parsed = Channel::parse(&channel)?;
                let channel = parsed.to_string();
                self.add_subscription(client, parsed)?;
                Ok(ServerMessage::Subscribed { channel })
            }
            ClientCommand::Unsubscribe { channel } => {
                let parsed = Channel::parse(&channel)?;
                if client.unsubscribe(&parsed) {
                    debug!(client_id = %client.id, channel = %parsed, "Client unsubscribed");
                }
                Ok(ServerMessage::Unsubscribed {
                    channel: parsed.to_string(),
                })
            }
            ClientCommand::Ping => Ok(ServerMessage::Pong),
        }
    }

    /// Emit an event to all subscribed clients.
    pub fn emit(&self, event: RealtimeEvent) {
        self.emit_except(event, None);
    }

    /// Emit an event to all subscribed clients except `skip`, typically
    /// the connection the change came from.
    pub fn emit_except(&self, event: RealtimeEvent, skip: Option<&str>) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                debug!(channel = %event.channel, error = %e, "Dropping unserializable event");
                return;
            }
        };

        let mut delivered = 0usize;
        let mut dead = Vec::new();
        for client in self.clients.read().values() {
            if skip == Some(client.id.as_str()) || !client.matches_event(&event.channel) {
                continue;
            }
            match client.send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(client.id.clone()),
            }
        }

        if !dead.is_empty() {
            self.dropped_messages
                .fetch_add(dead.len() as u64, Ordering::Relaxed);
            for client_id in &dead {
                self.disconnect(client_id);
            }
        }

        debug!(
            channel = %event.channel,
            event = %event.event,
            recipients = delivered,
            pruned = dead.len(),
            "Event broadcast"
        );
        self.total_events.fetch_add(1, Ordering::Relaxed);
        // No in-process listener is not an error.
        let _ = self.event_tx.send(event);
    }

    /// Emit an event with the given parameters.
    pub fn emit_event(&self, channel: String, event: EventKind, data: serde_json::Value) {
        self.emit(RealtimeEvent::new(channel, event, data));
    }

    /// In-process listener for every emitted event.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.event_tx.subscribe()
    }

    /// Get current connection count.
    pub fn connection_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Snapshot of the hub counters.
    pub fn stats(&self) -> HubStats {
        HubStats {
            current_connections: self.connection_count(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_subscriptions: self.total_subscriptions.load(Ordering::Relaxed),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands that clients can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    /// Keepalive.
    Ping,
}

/// Direct replies to a [`ClientCommand`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Pong,
    Error { message: String },
}

/// Hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub current_connections: usize,
    /// Since start.
    pub total_connections: u64,
    pub total_subscriptions: u64,
    pub total_events: u64,
    /// Deliveries to connections whose socket task had already gone.
    pub dropped_messages: u64,
}
