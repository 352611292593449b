//! Event dispatch queue and notification sinks.
//!
//! Events are queued into an [`Outbox`] while locks are held and delivered to
//! the registered [`NotificationSink`]s by [`Outbox::flush`], which must run
//! only after the flushing thread has released every engine lock. Delivery
//! is FIFO: the order in which events were queued is the order every sink
//! observes.

use crate::lockset::held_lock_count;
use parking_lot::{Mutex, RwLock};
use pool_common::element::ElementId;
use pool_common::event::ElementEvent;
use std::collections::VecDeque;
use std::sync::Arc;

/// Receiver of element events.
///
/// Sinks are called from the worker threads, never while an engine lock is
/// held. They may start new operations.
pub trait NotificationSink: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called once per event, in queue order.
    fn notify(&self, event: &ElementEvent);
}

/// Set of registered sinks. Cloning shares the set.
#[derive(Clone, Default)]
pub struct Listeners {
    sinks: Arc<RwLock<Vec<Arc<dyn NotificationSink>>>>,
}

impl Listeners {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink. It receives every event flushed from now on.
    pub fn subscribe(&self, sink: Arc<dyn NotificationSink>) {
        tracing::debug!("Listener '{}' subscribed", sink.name());
        self.sinks.write().push(sink);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn NotificationSink>> {
        self.sinks.read().clone()
    }
}

/// FIFO queue of events produced under locks.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<ElementEvent>,
}

impl Outbox {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one event.
    pub fn enqueue(&mut self, event: ElementEvent) {
        self.queue.push_back(event);
    }

    /// Queue an optional event (the result of a state or value update).
    pub fn push(&mut self, event: Option<ElementEvent>) {
        if let Some(event) = event {
            self.enqueue(event);
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ElementEvent> {
        self.queue.iter()
    }

    /// Deliver every queued event, oldest first. Returns the number of events
    /// delivered.
    pub fn flush(&mut self, listeners: &Listeners) -> usize {
        debug_assert_eq!(
            held_lock_count(),
            0,
            "outbox flushed while holding engine locks"
        );
        let sinks = listeners.snapshot();
        let count = self.queue.len();
        while let Some(event) = self.queue.pop_front() {
            for sink in &sinks {
                sink.notify(&event);
            }
        }
        count
    }
}

/// Sink recording every event, in delivery order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ElementEvent>>,
}

impl EventLog {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event received so far.
    pub fn events(&self) -> Vec<ElementEvent> {
        self.events.lock().clone()
    }

    /// Events of one element.
    pub fn for_element(&self, id: ElementId) -> Vec<ElementEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.element == id)
            .cloned()
            .collect()
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl NotificationSink for EventLog {
    fn name(&self) -> &str {
        "event-log"
    }

    fn notify(&self, event: &ElementEvent) {
        self.events.lock().push(event.clone());
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
