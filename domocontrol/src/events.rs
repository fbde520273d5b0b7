//! Event bus fanning registry and subscription events out to API consumers.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Multi-consumer broadcast bus: each subscriber gets its own channel,
/// dead subscribers are dropped on the next broadcast.
#[derive(Clone)]
pub struct EventBus<T: Clone + Send> {
    subscribers: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T: Clone + Send> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded::<T>();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn broadcast(&self, event: T) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn broadcast_all(&self, events: impl IntoIterator<Item = T>) {
        for event in events {
            self.broadcast(event);
        }
    }
}

impl<T: Clone + Send> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_the_event() {
        let bus: EventBus<u32> = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.broadcast(7);
        assert_eq!(a.recv().unwrap(), 7);
        assert_eq!(b.recv().unwrap(), 7);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus: EventBus<u32> = EventBus::new();
        let a = bus.subscribe();
        drop(bus.subscribe());
        bus.broadcast(1);
        assert_eq!(a.recv().unwrap(), 1);
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }
}
