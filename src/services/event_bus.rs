use tokio::sync::broadcast;
use tracing::debug;

use crate::models::chat::SessionId;
use crate::models::protocol::ServerEvent;

/// One event on a session's broadcast group. The channel is process-wide;
/// subscribers filter on `session_id`.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub event: ServerEvent,
}

/// Broadcast group for live chat events. Every connection to a session
/// subscribes; turn tasks publish. Publishing with no subscribers is normal
/// (the client may have disconnected mid-turn) and is not an error.
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, session_id: SessionId, event: ServerEvent) {
        let session_event = SessionEvent { session_id, event };
        if self.tx.send(session_event).is_err() {
            debug!("No live subscribers for session {}", session_id);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(1, ServerEvent::AssistantResponseStart);
        bus.publish(1, ServerEvent::AssistantResponseChunk {
            message: "hi".to_string(),
        });
        bus.publish(1, ServerEvent::AssistantResponseEnd);

        assert_eq!(rx.recv().await.unwrap().event, ServerEvent::AssistantResponseStart);
        assert_eq!(
            rx.recv().await.unwrap().event,
            ServerEvent::AssistantResponseChunk {
                message: "hi".to_string()
            }
        );
        assert_eq!(rx.recv().await.unwrap().event, ServerEvent::AssistantResponseEnd);
    }

    #[tokio::test]
    async fn events_carry_session_id_for_filtering() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(7, ServerEvent::AssistantResponseStart);
        bus.publish(9, ServerEvent::AssistantResponseStart);

        assert_eq!(rx.recv().await.unwrap().session_id, 7);
        assert_eq!(rx.recv().await.unwrap().session_id, 9);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(1, ServerEvent::AssistantResponseEnd);
    }
}
