use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::RelayError;
use crate::platform::{Message, Sink};
use crate::relay::observer::{RelayEvent, RelayObserver};

/// Optional dedup shared by both ingestion paths.
///
/// Without a gate the poll and stream paths deliver independently, and a
/// message seen by both reaches the sinks twice.
pub trait DedupGate: Send + Sync {
    /// True the first time `id` is offered.
    fn first_sighting(&self, id: i64) -> bool;
}

/// Remembers the most recent `capacity` message ids.
pub struct SeenIds {
    capacity: usize,
    inner: Mutex<SeenInner>,
}

#[derive(Default)]
struct SeenInner {
    ids: HashSet<i64>,
    order: VecDeque<i64>,
}

impl SeenIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(SeenInner::default()),
        }
    }
}

impl DedupGate for SeenIds {
    fn first_sighting(&self, id: i64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.ids.insert(id) {
            return false;
        }
        inner.order.push_back(id);
        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Fans one message out to every sink.
pub struct Dispatcher {
    sinks: Vec<Arc<dyn Sink>>,
    observer: Arc<dyn RelayObserver>,
    dedup: Option<Arc<dyn DedupGate>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, observer: Arc<dyn RelayObserver>) -> Self {
        Self {
            sinks,
            observer,
            dedup: None,
        }
    }

    pub fn with_dedup(mut self, gate: Arc<dyn DedupGate>) -> Self {
        self.dedup = Some(gate);
        self
    }

    pub fn observer(&self) -> &dyn RelayObserver {
        self.observer.as_ref()
    }

    pub fn report(&self, err: RelayError) {
        self.observer.on_event(RelayEvent::Failed(err));
    }

    /// Deliver `message` to every sink, one after another.
    ///
    /// Never fails: each sink's error is reported and the next sink still
    /// gets the message. Failed sends are not retried.
    pub async fn relay(&self, message: &Message) {
        if let Some(gate) = &self.dedup {
            if !gate.first_sighting(message.id()) {
                self.observer.on_event(RelayEvent::DuplicateSkipped {
                    message_id: message.id(),
                });
                return;
            }
        }

        for sink in &self.sinks {
            match sink.send(message).await {
                Ok(()) => self.observer.on_event(RelayEvent::Delivered {
                    sink: sink.name().to_string(),
                    message_id: message.id(),
                }),
                Err(e) => self.report(e),
            }
        }
    }
}
