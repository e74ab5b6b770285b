//! Listener registry: per-event callback sets with identity-based removal.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::events::{EventType, OrderEvent};

/// Callback invoked with each matching event payload.
pub type EventCallback = Arc<dyn Fn(&OrderEvent) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::add`].
///
/// Removal is by this identity, not by event type alone, so two components
/// registered for the same event type never interfere with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventType, Vec<(ListenerId, EventCallback)>>>,
    panics: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
            panics: AtomicU64::new(0),
        }
    }

    pub fn add(
        &self,
        event: EventType,
        callback: impl Fn(&OrderEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(event)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove(&self, event: EventType, id: ListenerId) {
        let mut map = self.listeners.lock();
        if let Some(list) = map.get_mut(&event) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                map.remove(&event);
            }
        }
    }

    /// Invoke every callback registered for `event` with `payload`.
    ///
    /// Each invocation is isolated: a panicking subscriber is logged and the
    /// remaining callbacks still run. Returns the number delivered.
    pub fn dispatch(&self, event: EventType, payload: &OrderEvent) -> usize {
        // Snapshot under the lock, invoke outside it, so a callback may
        // re-enter the registry (add/remove) without deadlocking.
        let callbacks: Vec<(ListenerId, EventCallback)> = {
            let map = self.listeners.lock();
            match map.get(&event) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };
        let mut delivered = 0;
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.panics.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        listener = id.0,
                        event = event.name(),
                        "listener panicked during dispatch"
                    );
                }
            }
        }
        delivered
    }

    pub fn count(&self, event: EventType) -> usize {
        self.listeners.lock().get(&event).map_or(0, Vec::len)
    }

    /// Total listener panics swallowed since construction.
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::realtime::events::OrderStatus;

    fn sample_event() -> OrderEvent {
        OrderEvent {
            id: "ord_1".to_string(),
            status: OrderStatus::Confirmed,
            order_id: None,
            table_id: None,
            venue_id: Some("ven_1".to_string()),
            organization_id: None,
            timestamp: Utc::now(),
            message: "Order confirmed".to_string(),
        }
    }

    #[test]
    fn removal_is_by_identity() {
        let registry = ListenerRegistry::new();
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));

        let a = {
            let hits = hits_a.clone();
            registry.add(EventType::NewOrder, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _b = {
            let hits = hits_b.clone();
            registry.add(EventType::NewOrder, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        // Removing A must not touch B, even though both share the event type.
        registry.remove(EventType::NewOrder, a);
        assert_eq!(registry.count(EventType::NewOrder), 1);

        let delivered = registry.dispatch(EventType::NewOrder, &sample_event());
        assert_eq!(delivered, 1);
        assert_eq!(hits_a.load(Ordering::SeqCst), 0);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.add(EventType::OrderUpdated, |_| panic!("subscriber bug"));
        {
            let hits = hits.clone();
            registry.add(EventType::OrderUpdated, move |event| {
                assert_eq!(event.id, "ord_1");
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let delivered = registry.dispatch(EventType::OrderUpdated, &sample_event());
        assert_eq!(delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.panic_count(), 1);
    }

    #[test]
    fn dispatch_without_listeners_is_a_noop() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.dispatch(EventType::NewOrder, &sample_event()), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let registry = ListenerRegistry::new();
        registry.add(EventType::NewOrder, |_| {});
        registry.add(EventType::OrderUpdated, |_| {});
        registry.clear();
        assert_eq!(registry.count(EventType::NewOrder), 0);
        assert_eq!(registry.count(EventType::OrderUpdated), 0);
    }

    #[test]
    fn listener_may_remove_itself_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let id = {
            let registry = registry.clone();
            let slot = slot.clone();
            registry.clone().add(EventType::NewOrder, move |_| {
                if let Some(id) = *slot.lock() {
                    registry.remove(EventType::NewOrder, id);
                }
            })
        };
        *slot.lock() = Some(id);

        assert_eq!(registry.dispatch(EventType::NewOrder, &sample_event()), 1);
        assert_eq!(registry.count(EventType::NewOrder), 0);
    }
}
