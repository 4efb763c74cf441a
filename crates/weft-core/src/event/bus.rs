//! Broadcast event bus for distributing `WorkflowEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing with no active subscribers is a no-op.
//! A slow subscriber lags and loses events; callers that need every event
//! of one run use the executor's stream instead.

use tokio::sync::broadcast;
use weft_types::event::WorkflowEvent;

use super::hooks::RunHooks;

/// Multi-consumer bus for workflow events from any number of runs.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl RunHooks for EventBus {
    fn on_event(&self, event: &WorkflowEvent) {
        self.publish(event.clone());
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn started(step: &str) -> WorkflowEvent {
        WorkflowEvent::StepStarted {
            run_id: Uuid::now_v7(),
            step: step.to_string(),
            iteration: 1,
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(started("a"));

        assert_eq!(rx1.recv().await.unwrap().step(), Some("a"));
        assert_eq!(rx2.recv().await.unwrap().step(), Some("a"));
    }

    #[test]
    fn publish_with_no_subscribers_is_a_noop() {
        let bus = EventBus::new(4);
        bus.publish(started("a"));
        bus.on_event(&started("b"));
    }

    #[tokio::test]
    async fn hooks_forward_to_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let hooks: &dyn RunHooks = &bus;
        hooks.on_event(&started("hooked"));
        assert_eq!(rx.recv().await.unwrap().step(), Some("hooked"));
    }

    #[test]
    fn lagged_receiver_handles_gracefully() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(started(&format!("s{i}")));
        }
        match rx.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn debug_impl() {
        let bus = EventBus::new(16);
        let _rx = bus.subscribe();
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("receiver_count"));
    }
}
