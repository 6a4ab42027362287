//! Subscription table: (event class, subscription element) → active subscriptions.
//!
//! Lookups are keyed by the pair rather than by event class alone, so fan-out
//! cost is proportional to the subscribers of the mutated element. A single
//! `RwLock` lets lookups proceed concurrently while register/unregister are
//! serialised; [`SubscriptionTable::matching`] copies the active subscriptions
//! out under one read critical section.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::addr::Addr;
use crate::error::{SubscriptionError, SubscriptionResult};

use super::{ElementaryEvent, EventClass};

/// Callback invoked for every event delivered to a subscription.
pub type Callback = Arc<dyn Fn(&ElementaryEvent) + Send + Sync>;

/// Table-unique subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// A registered callback for one event class at one element.
pub struct Subscription {
    id: SubscriptionId,
    subscriber: String,
    event_class: EventClass,
    element: Addr,
    callback: Callback,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Identity of the subscriber (agent name for agent subscriptions).
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn event_class(&self) -> EventClass {
        self.event_class
    }

    pub fn element(&self) -> Addr {
        self.element
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Run the callback unless the subscription was deactivated meanwhile.
    ///
    /// Returns whether the callback ran.
    pub fn deliver(&self, event: &ElementaryEvent) -> bool {
        if !self.is_active() {
            return false;
        }
        (self.callback)(event);
        true
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("subscriber", &self.subscriber)
            .field("event_class", &self.event_class)
            .field("element", &self.element)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handle returned by [`SubscriptionTable::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub event_class: EventClass,
    pub element: Addr,
}

type Key = (EventClass, Addr);

/// Concurrent registry of active subscriptions.
pub struct SubscriptionTable {
    by_key: RwLock<HashMap<Key, Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            by_key: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback` for `event_class` events at `element`.
    ///
    /// Fails with `DuplicateSubscription` if `subscriber` already has an active
    /// subscription for the same class and element.
    pub fn register(
        &self,
        subscriber: impl Into<String>,
        event_class: EventClass,
        element: Addr,
        callback: Callback,
    ) -> SubscriptionResult<SubscriptionHandle> {
        let subscriber = subscriber.into();
        let mut table = self.by_key.write().expect("subscription lock poisoned");
        let entries = table.entry((event_class, element)).or_default();
        if entries.iter().any(|s| s.subscriber == subscriber) {
            return Err(SubscriptionError::DuplicateSubscription {
                subscriber,
                event_class,
                element: element.get(),
            });
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push(Arc::new(Subscription {
            id,
            subscriber,
            event_class,
            element,
            callback,
            active: AtomicBool::new(true),
        }));
        Ok(SubscriptionHandle {
            id,
            event_class,
            element,
        })
    }

    /// Deactivate and remove a subscription.
    ///
    /// Returns immediately: a callback already running for this subscription
    /// finishes, but no queued delivery starts after this call.
    pub fn unregister(&self, handle: &SubscriptionHandle) -> SubscriptionResult<()> {
        let mut table = self.by_key.write().expect("subscription lock poisoned");
        let key = (handle.event_class, handle.element);
        let entries = table
            .get_mut(&key)
            .ok_or(SubscriptionError::NotSubscribed {
                subscription: handle.id.get(),
            })?;
        let position = entries
            .iter()
            .position(|s| s.id == handle.id)
            .ok_or(SubscriptionError::NotSubscribed {
                subscription: handle.id.get(),
            })?;

        let removed = entries.remove(position);
        removed.deactivate();
        if entries.is_empty() {
            table.remove(&key);
        }
        Ok(())
    }

    /// Snapshot of the active subscriptions for `event_class` at `element`.
    pub fn matching(&self, event_class: EventClass, element: Addr) -> Vec<Arc<Subscription>> {
        let table = self.by_key.read().expect("subscription lock poisoned");
        table
            .get(&(event_class, element))
            .map(|entries| entries.iter().filter(|s| s.is_active()).cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `handle` still names an active subscription.
    pub fn is_active(&self, handle: &SubscriptionHandle) -> bool {
        let table = self.by_key.read().expect("subscription lock poisoned");
        table
            .get(&(handle.event_class, handle.element))
            .is_some_and(|entries| entries.iter().any(|s| s.id == handle.id && s.is_active()))
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        let table = self.by_key.read().expect("subscription lock poisoned");
        table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deactivate and drop every subscription.
    pub fn clear(&self) {
        let mut table = self.by_key.write().expect("subscription lock poisoned");
        for subscription in table.values().flatten() {
            subscription.deactivate();
        }
        table.clear();
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("active", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn addr(raw: u64) -> Addr {
        Addr::new(raw).unwrap()
    }

    fn counting() -> (Arc<AtomicUsize>, Callback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            count,
            Arc::new(move |_: &ElementaryEvent| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn event_at(element: Addr) -> ElementaryEvent {
        ElementaryEvent {
            class: EventClass::AfterGenerateOutgoingArc,
            subscription_element: element,
            connector: None,
            connector_type: None,
            other_element: None,
        }
    }

    #[test]
    fn register_and_match() {
        let table = SubscriptionTable::new();
        let (_, cb) = counting();
        table
            .register("a", EventClass::AfterGenerateOutgoingArc, addr(1), cb.clone())
            .unwrap();
        table
            .register("b", EventClass::AfterGenerateOutgoingArc, addr(1), cb.clone())
            .unwrap();
        table
            .register("a", EventClass::AfterGenerateIncomingArc, addr(1), cb)
            .unwrap();

        assert_eq!(table.matching(EventClass::AfterGenerateOutgoingArc, addr(1)).len(), 2);
        assert_eq!(table.matching(EventClass::AfterGenerateIncomingArc, addr(1)).len(), 1);
        assert!(table.matching(EventClass::AfterGenerateOutgoingArc, addr(2)).is_empty());
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn duplicate_is_rejected_until_unregistered() {
        let table = SubscriptionTable::new();
        let (_, cb) = counting();
        let handle = table
            .register("a", EventClass::BeforeEraseElement, addr(5), cb.clone())
            .unwrap();
        let err = table
            .register("a", EventClass::BeforeEraseElement, addr(5), cb.clone())
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::DuplicateSubscription { element: 5, .. }));

        table.unregister(&handle).unwrap();
        assert!(!table.is_active(&handle));
        let again = table
            .register("a", EventClass::BeforeEraseElement, addr(5), cb)
            .unwrap();
        assert_ne!(again.id, handle.id);
        assert!(table.is_active(&again));
    }

    #[test]
    fn unregister_twice_fails() {
        let table = SubscriptionTable::new();
        let (_, cb) = counting();
        let handle = table
            .register("a", EventClass::BeforeEraseElement, addr(5), cb)
            .unwrap();
        table.unregister(&handle).unwrap();
        assert!(matches!(
            table.unregister(&handle),
            Err(SubscriptionError::NotSubscribed { .. })
        ));
    }

    #[test]
    fn snapshot_taken_before_unregister_does_not_deliver() {
        let table = SubscriptionTable::new();
        let (count, cb) = counting();
        let handle = table
            .register("a", EventClass::AfterGenerateOutgoingArc, addr(1), cb)
            .unwrap();
        let snapshot = table.matching(EventClass::AfterGenerateOutgoingArc, addr(1));
        table.unregister(&handle).unwrap();

        assert!(!snapshot[0].deliver(&event_at(addr(1))));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clear_deactivates_everything() {
        let table = SubscriptionTable::new();
        let (_, cb) = counting();
        table
            .register("a", EventClass::AfterGenerateOutgoingArc, addr(1), cb)
            .unwrap();
        let snapshot = table.matching(EventClass::AfterGenerateOutgoingArc, addr(1));
        table.clear();
        assert!(table.is_empty());
        assert!(!snapshot[0].is_active());
    }
}
