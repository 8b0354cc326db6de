//! In-process topic pub/sub bus.
//!
//! Subscriber table is guarded by a single `parking_lot::Mutex`. `publish`
//! snapshots the subscriber list for a topic under the lock, releases it, then
//! invokes handlers on the caller's thread. This gives re-entrant `publish`
//! and `unsubscribe`-from-inside-a-handler the snapshot semantics the bus
//! promises: a handler added mid-delivery is not invoked for the in-flight
//! message, a handler removed mid-delivery but not yet reached still is.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Message = Value;

/// A subscribed handler. Boxed so the bus can hold handlers of different
/// closures under one type; `Send + Sync` so `publish` can be called from any
/// thread.
pub type Handler = dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync;

struct Subscription {
    id: u64,
    handler: Arc<Handler>,
}

/// Topic-keyed publish/subscribe bus. Cheap to clone (wrap in `Arc`); modules
/// hold a non-owning `Arc<MessageBus>`.
pub struct MessageBus {
    subscribers: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `handler` to `topic`. Never fails; returns a unique
    /// subscription id usable with [`Self::unsubscribe`].
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> u64
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.subscribers.lock();
        subs.entry(topic.into()).or_default().push(Subscription {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a subscription by id. Returns `true` if it was found and
    /// removed, `false` otherwise. Safe to call from inside a handler that is
    /// itself receiving delivery.
    pub fn unsubscribe(&self, subscription_id: u64) -> bool {
        let mut subs = self.subscribers.lock();
        for list in subs.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == subscription_id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Publish `payload` to `topic`, invoking subscribers in subscription
    /// order on the caller's thread. A handler that returns `Err` is logged
    /// and does not stop delivery to the rest; failures never propagate to
    /// the publisher.
    pub fn publish(&self, topic: &str, payload: Message) {
        let snapshot: Vec<Arc<Handler>> = {
            let subs = self.subscribers.lock();
            match subs.get(topic) {
                Some(list) => list.iter().map(|s| s.handler.clone()).collect(),
                None => return,
            }
        };

        for handler in snapshot {
            if let Err(err) = handler(&payload) {
                tracing::error!(topic, error = %err, "bus handler failed");
            }
        }
    }

    /// Current set of topics with at least one subscriber. Diagnostics/tests
    /// only; never grows unboundedly since empty topics are pruned lazily by
    /// `unsubscribe` being a no-op for a topic nobody holds a key for anymore.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.subscribers
            .lock()
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn publish_with_no_subscribers_is_a_noop() {
        let bus = MessageBus::new();
        bus.publish("nobody.home", json!({}));
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn subscribers_receive_delivery_in_order() {
        let bus = MessageBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe("t", move |_| {
            o1.lock().push(1);
            Ok(())
        });
        let o2 = order.clone();
        bus.subscribe("t", move |_| {
            o2.lock().push(2);
            Ok(())
        });

        bus.publish("t", json!({"v": 1}));
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_by_id_stops_delivery() {
        let bus = MessageBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.subscribe("t", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.unsubscribe(id));
        bus.publish("t", json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!bus.unsubscribe(id), "double unsubscribe must return false");
    }

    #[test]
    fn handler_added_during_delivery_is_not_invoked_for_the_in_flight_message() {
        let bus = Arc::new(MessageBus::new());
        let late_invocations = Arc::new(AtomicUsize::new(0));

        let bus_for_handler = bus.clone();
        let late = late_invocations.clone();
        bus.subscribe("t", move |_| {
            let late = late.clone();
            bus_for_handler.subscribe("t", move |_| {
                late.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        bus.publish("t", json!({}));
        assert_eq!(late_invocations.load(Ordering::SeqCst), 0);

        bus.publish("t", json!({}));
        assert_eq!(late_invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_unsubscribed_mid_delivery_but_not_yet_reached_still_fires_once() {
        let bus = Arc::new(MessageBus::new());
        let second_fired = Arc::new(AtomicUsize::new(0));

        let second_id_cell: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
        let bus_for_first = bus.clone();
        let second_id_for_first = second_id_cell.clone();
        bus.subscribe("t", move |_| {
            if let Some(id) = *second_id_for_first.lock() {
                bus_for_first.unsubscribe(id);
            }
            Ok(())
        });

        let fired = second_fired.clone();
        let second_id = bus.subscribe("t", move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        *second_id_cell.lock() = Some(second_id);

        bus.publish("t", json!({}));
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);

        bus.publish("t", json!({}));
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_handler_failing_does_not_affect_others_or_the_publisher() {
        let bus = MessageBus::new();
        let observed = Arc::new(Mutex::new(None));

        bus.subscribe("t", |_| anyhow::bail!("boom"));
        let o = observed.clone();
        bus.subscribe("t", move |payload| {
            *o.lock() = Some(payload.clone());
            Ok(())
        });

        bus.publish("t", json!({"v": 1}));
        assert_eq!(*observed.lock(), Some(json!({"v": 1})));
    }

    #[test]
    fn same_handler_subscribed_twice_yields_two_distinct_ids_and_two_deliveries() {
        let bus = MessageBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        let id1 = bus.subscribe("t", move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let c2 = count.clone();
        let id2 = bus.subscribe("t", move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_ne!(id1, id2);
        bus.publish("t", json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reentrant_publish_from_a_handler_completes_before_outer_delivery_resumes() {
        let bus = Arc::new(MessageBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let bus_inner = bus.clone();
        let o1 = order.clone();
        bus.subscribe("outer", move |_| {
            o1.lock().push("outer-start");
            bus_inner.publish("inner", json!({}));
            o1.lock().push("outer-end");
            Ok(())
        });
        let o2 = order.clone();
        bus.subscribe("inner", move |_| {
            o2.lock().push("inner");
            Ok(())
        });

        bus.publish("outer", json!({}));
        assert_eq!(*order.lock(), vec!["outer-start", "inner", "outer-end"]);
    }
}
