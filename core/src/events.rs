use backend_api::{BackendEvent, Topic};
use std::collections::HashMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Topic fan-out for backend notifications. Each subscriber gets one
/// channel covering all of its topics, so events reach it in publish order.
pub struct EventBus {
    subscribers: HashMap<Topic, Vec<UnboundedSender<BackendEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }

    /// Subscribe to a set of topics, returning a receiver for their events.
    pub fn subscribe(&mut self, topics: &[Topic]) -> UnboundedReceiver<BackendEvent> {
        let (tx, rx) = unbounded_channel();
        for topic in topics {
            self.subscribers.entry(*topic).or_default().push(tx.clone());
        }
        rx
    }

    /// Subscribe to every topic.
    pub fn subscribe_all(&mut self) -> UnboundedReceiver<BackendEvent> {
        self.subscribe(&[Topic::Auth, Topic::Profiles, Topic::Messages])
    }

    /// Publish an event to the subscribers of its topic. Closed receivers
    /// are dropped.
    pub fn publish(&mut self, event: BackendEvent) {
        if let Some(list) = self.subscribers.get_mut(&event.topic()) {
            list.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers.get(&topic).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
