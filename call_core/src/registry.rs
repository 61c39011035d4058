//! Publish/subscribe fan-out for [`CallEvent`]s.
//!
//! Every subscriber owns one typed channel and picks the categories it wants.
//! Events are delivered to subscribers in registration order.

use crate::events::{CallEvent, EventCategory};
use log::{debug, trace};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Handle used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A live subscription: its id and the receiving end of its channel.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
}

struct Subscriber {
    id: SubscriptionId,
    categories: HashSet<EventCategory>,
    sender: mpsc::UnboundedSender<CallEvent>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Registry of event subscribers, shared by the orchestrator and the audio
/// routing coordinator.
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to the given categories.
    pub fn subscribe(&self, categories: &[EventCategory]) -> Subscription {
        let (sender, events) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subscribers.push(Subscriber {
            id,
            categories: categories.iter().copied().collect(),
            sender,
        });
        debug!("Subscriber {:?} registered for {:?}", id, categories);
        Subscription { id, events }
    }

    /// Subscribe to every category.
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&EventCategory::ALL)
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != id);
        let removed = inner.subscribers.len() != before;
        if removed {
            debug!("Subscriber {:?} unregistered", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Deliver an event to every subscriber of its category. Subscribers whose
    /// receiver was dropped are pruned.
    pub fn publish(&self, event: CallEvent) {
        let category = event.category();
        let mut inner = self.lock();
        trace!("Publishing {:?} event to {} subscribers", category, inner.subscribers.len());
        inner.subscribers.retain(|s| {
            if !s.categories.contains(&category) {
                return true;
            }
            match s.sender.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    debug!("Dropping closed subscriber {:?}", s.id);
                    false
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionId;

    fn closed_event() -> CallEvent {
        CallEvent::SessionClosed {
            session_id: SessionId::new(),
        }
    }

    #[test_log::test]
    fn delivers_only_subscribed_categories() {
        let registry = EventRegistry::new();
        let mut sdp_only = registry.subscribe(&[EventCategory::Sdp]);
        let mut connection = registry.subscribe(&[EventCategory::Connection]);

        registry.publish(closed_event());

        assert!(sdp_only.events.try_recv().is_err());
        assert!(matches!(
            connection.events.try_recv(),
            Ok(CallEvent::SessionClosed { .. })
        ));
    }

    #[test_log::test]
    fn multiple_subscribers_per_category_each_get_a_copy() {
        let registry = EventRegistry::new();
        let mut first = registry.subscribe_all();
        let mut second = registry.subscribe_all();

        let event = closed_event();
        registry.publish(event.clone());

        assert_eq!(first.events.try_recv().unwrap(), event);
        assert_eq!(second.events.try_recv().unwrap(), event);
    }

    #[test_log::test]
    fn unsubscribe_stops_delivery() {
        let registry = EventRegistry::new();
        let mut sub = registry.subscribe_all();

        assert!(registry.unsubscribe(sub.id));
        assert!(!registry.unsubscribe(sub.id));

        registry.publish(closed_event());
        // Sender was dropped with the subscriber
        assert!(sub.events.try_recv().is_err());
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test_log::test]
    fn dropped_receivers_are_pruned() {
        let registry = EventRegistry::new();
        let sub = registry.subscribe_all();
        let _keep = registry.subscribe_all();
        drop(sub);

        registry.publish(closed_event());
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test_log::test]
    fn events_keep_publication_order() {
        let registry = EventRegistry::new();
        let mut sub = registry.subscribe_all();
        let ids: Vec<SessionId> = (0..5).map(|_| SessionId::new()).collect();

        for id in &ids {
            registry.publish(CallEvent::SessionClosed { session_id: *id });
        }

        for id in ids {
            assert_eq!(
                sub.events.try_recv().unwrap(),
                CallEvent::SessionClosed { session_id: id }
            );
        }
    }
}
