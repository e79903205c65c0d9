//! Local publish/subscribe bus keyed by event label.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::topic::TopicParams;
use crate::transport::ListenerId;

/// A notification raised locally
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub label: String,
    pub data: Value,
    /// Wildcard captures of the topic the event arrived on
    pub params: TopicParams,
}

impl Event {
    #[inline]
    pub fn new<L: Into<String>>(label: L, data: Value) -> Self {
        Self { label: label.into(), data, params: TopicParams::new() }
    }

    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

pub type EventListener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Anything application code can attach event listeners to
pub trait EventSource {
    fn on(&self, label: &str, listener: EventListener) -> ListenerId;

    fn off(&self, id: ListenerId);
}

#[derive(Default)]
struct Listeners {
    next_id: ListenerId,
    by_id: BTreeMap<ListenerId, (String, EventListener)>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls every listener of `event.label` in registration order.
    /// Listeners run without the bus lock held, so they may call `on`/`off`.
    pub fn emit(&self, event: &Event) -> usize {
        let listeners = {
            let listeners = self.listeners.lock();
            listeners
                .by_id
                .values()
                .filter(|(label, _)| *label == event.label)
                .map(|(_, l)| l.clone())
                .collect::<Vec<_>>()
        };
        for listener in listeners.iter() {
            listener(event);
        }
        listeners.len()
    }

    #[inline]
    pub fn clear(&self) {
        self.listeners.lock().by_id.clear();
    }

    #[inline]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().by_id.len()
    }
}

impl EventSource for EventBus {
    fn on(&self, label: &str, listener: EventListener) -> ListenerId {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.by_id.insert(id, (label.to_owned(), listener));
        id
    }

    #[inline]
    fn off(&self, id: ListenerId) {
        self.listeners.lock().by_id.remove(&id);
    }
}
