//! Event fan-out: listeners registered with `on_event`, called in registration order.

use super::protocol::GatewayEvent;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub type EventHandler = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

/// Registered listeners keyed by a monotonically increasing id, so iteration order is
/// registration order.
#[derive(Default)]
pub struct EventListeners {
    inner: Mutex<ListenerMap>,
}

#[derive(Default)]
struct ListenerMap {
    next_id: u64,
    handlers: BTreeMap<u64, EventHandler>,
}

impl EventListeners {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        let mut map = self.lock();
        let id = map.next_id;
        map.next_id += 1;
        map.handlers.insert(id, Arc::new(handler));
        drop(map);
        Subscription {
            listeners: Arc::downgrade(self),
            id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListenerMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) -> bool {
        self.lock().handlers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<EventHandler> {
        self.lock().handlers.values().cloned().collect()
    }

    /// Deliver to every listener registered at call time. A panicking listener is logged and
    /// skipped; the rest still receive the event. Listeners may unsubscribe from inside.
    pub fn dispatch(&self, event: &GatewayEvent) {
        for handler in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::warn!("event listener panicked on {}", event.event);
            }
        }
    }
}

/// Returned by `on_event`; call [`Subscription::unsubscribe`] to stop receiving events.
/// Dropping it leaves the listener registered.
pub struct Subscription {
    listeners: Weak<EventListeners>,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.listeners
            .upgrade()
            .map_or(false, |listeners| listeners.remove(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str) -> GatewayEvent {
        GatewayEvent::new(name, Some(json!({})))
    }

    #[test]
    fn delivers_in_registration_order() {
        let listeners = EventListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            let _ = listeners.add(move |ev| seen.lock().unwrap().push(format!("{}:{}", tag, ev.event)));
        }
        listeners.dispatch(&event("tick"));
        assert_eq!(*seen.lock().unwrap(), vec!["a:tick", "b:tick", "c:tick"]);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let listeners = EventListeners::new();
        let count = Arc::new(Mutex::new(0));
        let _ = listeners.add(|_| panic!("listener bug"));
        let c = count.clone();
        let _ = listeners.add(move |_| *c.lock().unwrap() += 1);
        listeners.dispatch(&event("one"));
        listeners.dispatch(&event("two"));
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let listeners = EventListeners::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let sub = listeners.add(move |_| *c.lock().unwrap() += 1);
        listeners.dispatch(&event("x"));
        assert!(sub.unsubscribe());
        listeners.dispatch(&event("x"));
        assert_eq!(*count.lock().unwrap(), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn unsubscribe_after_listeners_dropped() {
        let listeners = EventListeners::new();
        let sub = listeners.add(|_| {});
        drop(listeners);
        assert!(!sub.unsubscribe());
    }
}
