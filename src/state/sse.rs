use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// Per-session SSE hubs, created lazily when the first client subscribes.
pub struct SessionChannels {
    hubs: DashMap<String, SseHub>,
    capacity: usize,
}

impl SessionChannels {
    /// Build an empty registry whose hubs buffer up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to the hub of `session_id`, creating it if needed.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ServerEvent> {
        self.hubs
            .entry(session_id.to_owned())
            .or_insert_with(|| SseHub::new(self.capacity))
            .subscribe()
    }

    /// Send an event to the subscribers of `session_id`. No-op when nobody listens.
    pub fn broadcast(&self, session_id: &str, event: ServerEvent) {
        if let Some(hub) = self.hubs.get(session_id) {
            hub.broadcast(event);
        }
    }

    /// Send an event to every session hub.
    pub fn broadcast_all(&self, event: ServerEvent) {
        for hub in self.hubs.iter() {
            hub.broadcast(event.clone());
        }
    }

    /// Drop the hub of `session_id` once its last subscriber is gone.
    pub fn prune(&self, session_id: &str) {
        self.hubs
            .remove_if(session_id, |_, hub| hub.receiver_count() == 0);
    }

    /// Drop the hub of `session_id`, closing every open stream.
    pub fn close(&self, session_id: &str) {
        self.hubs.remove(session_id);
    }

    /// Number of sessions with a live hub.
    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    /// Whether no session currently has a hub.
    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> ServerEvent {
        ServerEvent::new(Some(name.to_owned()), "{}".to_owned())
    }

    #[tokio::test]
    async fn events_only_reach_their_session() {
        let channels = SessionChannels::new(4);
        let mut s1 = channels.subscribe("s1");
        let mut s2 = channels.subscribe("s2");

        channels.broadcast("s1", event("phase.changed"));
        channels.broadcast("unknown", event("phase.changed"));

        assert_eq!(
            s1.recv().await.unwrap().event.as_deref(),
            Some("phase.changed")
        );
        assert!(s2.try_recv().is_err());
    }

    #[test]
    fn prune_keeps_hubs_with_listeners() {
        let channels = SessionChannels::new(4);
        let listener = channels.subscribe("s1");
        channels.prune("s1");
        assert_eq!(channels.len(), 1);

        drop(listener);
        channels.prune("s1");
        assert!(channels.is_empty());
    }

    #[tokio::test]
    async fn close_ends_open_streams() {
        let channels = SessionChannels::new(4);
        let mut listener = channels.subscribe("s1");
        channels.close("s1");
        assert!(matches!(
            listener.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
