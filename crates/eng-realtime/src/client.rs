//! One WebSocket connection as seen by the hub.

use crate::error::RealtimeError;
use crate::subscription::{Channel, ClientSubscriptions};
use eng_types::{unix_now, UserId};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection id, a v4 UUID.
pub type ClientId = String;

/// Outbound queue drained by the connection's socket task.
pub type ClientReceiver = mpsc::UnboundedReceiver<String>;

/// A connected client: an outbound queue plus its channel subscriptions.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub metadata: ClientMetadata,
    outbound: mpsc::UnboundedSender<String>,
    subscriptions: RwLock<ClientSubscriptions>,
}

impl Client {
    pub fn new(id: ClientId, outbound: mpsc::UnboundedSender<String>, metadata: ClientMetadata) -> Self {
        Self {
            id,
            metadata,
            outbound,
            subscriptions: RwLock::new(ClientSubscriptions::new()),
        }
    }

    /// Queues a serialized message. Fails once the socket task has gone.
    pub fn send(&self, message: String) -> Result<(), RealtimeError> {
        self.outbound
            .send(message)
            .map_err(|_| RealtimeError::ChannelClosed)
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// User the connection acts for.
    pub fn user(&self) -> Option<&UserId> {
        self.metadata.user_id.as_ref()
    }

    /// Adds a subscription; false if it was already present.
    pub fn subscribe(&self, channel: Channel) -> Result<bool, RealtimeError> {
        self.subscriptions.write().subscribe(channel)
    }

    pub fn unsubscribe(&self, channel: &Channel) -> bool {
        self.subscriptions.write().unsubscribe(channel)
    }

    pub fn is_subscribed(&self, channel: &Channel) -> bool {
        self.subscriptions.read().is_subscribed(channel)
    }

    /// Whether an event published on `event_channel` should reach this
    /// client.
    pub fn matches_event(&self, event_channel: &str) -> bool {
        self.subscriptions.read().matches_event(event_channel)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().count()
    }

    /// Canonical names of the current subscriptions, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .subscriptions
            .read()
            .channels()
            .map(|c| c.to_string())
            .collect();
        names.sort();
        names
    }

    pub fn clear_subscriptions(&self) {
        self.subscriptions.write().clear();
    }
}

/// Connection metadata.
#[derive(Debug, Default, Clone)]
pub struct ClientMetadata {
    /// Unix seconds.
    pub connected_at: u64,
    pub user_id: Option<UserId>,
}

impl ClientMetadata {
    /// Metadata stamped with the current time.
    pub fn now(user_id: Option<UserId>) -> Self {
        Self {
            connected_at: unix_now(),
            user_id,
        }
    }
}

/// Builds a client and the receiver for its outbound queue.
pub fn create_client(id: ClientId, metadata: ClientMetadata) -> (Arc<Client>, ClientReceiver) {
    let (outbound, receiver) = mpsc::unbounded_channel();
    (Arc::new(Client::new(id, outbound, metadata)), receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (Arc<Client>, ClientReceiver) {
        create_client("test-client".to_string(), ClientMetadata::now(None))
    }

    #[test]
    fn test_client_subscribe_and_unsubscribe() {
        let (client, _rx) = client();
        let channel = Channel::parse("project:gearbox").unwrap();

        assert!(client.subscribe(channel.clone()).unwrap());
        assert!(client.is_subscribed(&channel));
        assert_eq!(client.subscription_count(), 1);

        assert!(client.unsubscribe(&channel));
        assert!(!client.is_subscribed(&channel));
    }

    #[test]
    fn test_client_matches_event() {
        let (client, _rx) = client();
        client
            .subscribe(Channel::parse("project:gearbox").unwrap())
            .unwrap();

        client.subscribe(Channel::session("s1")).unwrap();
        assert_eq!(client.channels(), vec!["project:gearbox", "session:s1"]);

        assert!(client.matches_event("project:gearbox"));
        assert!(client.matches_event("project:gearbox/pulls"));
        assert!(!client.matches_event("project:rover"));
    }

    #[test]
    fn test_client_send_after_receiver_dropped() {
        let (client, mut rx) = client();
        client.send("hello".to_string()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");

        drop(rx);
        assert!(client.is_closed());
        assert!(matches!(
            client.send("lost".to_string()),
            Err(RealtimeError::ChannelClosed)
        ));
    }

    #[test]
    fn test_client_metadata() {
        let user = UserId::parse("alice").unwrap();
        let (client, _rx) =
            create_client("c1".to_string(), ClientMetadata::now(Some(user.clone())));
        assert_eq!(client.user(), Some(&user));
        assert!(client.metadata.connected_at > 0);
    }
}
