//! Event emission
//!
//! Events raised during a tick are buffered and only handed to the sink once
//! the tick's status write has been accepted.

use dbop_types::{ClusterEvent, DeploymentId, EventEnvelope};
use tokio::sync::broadcast;
use tracing::debug;

/// One-way sink for human-relevant events
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: EventEnvelope);
}

/// Fans events out to any number of subscribers
pub struct BroadcastEventSink {
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, envelope: EventEnvelope) {
        debug!(
            deployment_id = %envelope.deployment_id,
            event = ?envelope.event,
            "Emitting event"
        );
        // No subscribers is fine
        let _ = self.tx.send(envelope);
    }
}

/// Events collected during one tick
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<ClusterEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ClusterEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Drop everything pushed after the first `len` events.
    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    pub fn events(&self) -> &[ClusterEvent] {
        &self.events
    }

    /// Hand every buffered event to the sink.
    pub fn flush(self, deployment_id: &DeploymentId, sink: &dyn EventSink) {
        for event in self.events {
            sink.emit(EventEnvelope::new(deployment_id.clone(), event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbop_types::{MemberId, ServerGroup};

    #[tokio::test]
    async fn test_flush_delivers_in_order() {
        let sink = BroadcastEventSink::default();
        let mut rx = sink.subscribe();
        let id = DeploymentId::generate();

        let mut buffer = EventBuffer::new();
        buffer.push(ClusterEvent::MemberCreated {
            group: ServerGroup::Agents,
            member_id: MemberId::new("AGNT-1"),
        });
        buffer.push(ClusterEvent::PlanningBlocked {
            reason: "agents down".into(),
        });
        buffer.flush(&id, &sink);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.event, ClusterEvent::MemberCreated { .. }));
        assert_eq!(first.deployment_id, id);
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, ClusterEvent::PlanningBlocked { .. }));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let sink = BroadcastEventSink::new(1);
        sink.emit(EventEnvelope::new(
            DeploymentId::generate(),
            ClusterEvent::PlanningBlocked { reason: "x".into() },
        ));
    }
}
