//! Bridge from graph mutations to dispatched callbacks.

use std::collections::HashSet;
use std::sync::Arc;

use crate::addr::Addr;
use crate::dispatch::DispatchRuntime;
use crate::graph::{Mutation, MutationObserver};

use super::{ElementaryEvent, SubscriptionTable};

/// Observes the graph and fans each mutation out to matching subscriptions.
///
/// Runs on the mutating thread, so it only looks up subscriptions and queues
/// jobs; callbacks execute on the dispatch runtime.
///
/// Deliveries are ordered per subscription element. Events at a *spread*
/// element are ordered per far element instead, so a hub such as
/// `action_initiated` does not funnel every action onto one lane.
pub struct EventEmitter {
    subscriptions: Arc<SubscriptionTable>,
    runtime: Arc<DispatchRuntime>,
    spread: HashSet<Addr>,
}

impl EventEmitter {
    pub fn new(subscriptions: Arc<SubscriptionTable>, runtime: Arc<DispatchRuntime>) -> Self {
        Self {
            subscriptions,
            runtime,
            spread: HashSet::new(),
        }
    }

    /// Order events at `element` by their far element.
    pub fn spread_at(mut self, element: Addr) -> Self {
        self.spread.insert(element);
        self
    }

    fn lane_key(&self, event: &ElementaryEvent) -> Addr {
        match event.other_element {
            Some(other) if self.spread.contains(&event.subscription_element) => other,
            _ => event.subscription_element,
        }
    }

    /// Queue `event` for every active subscription at its class and element.
    ///
    /// Returns the number of deliveries queued.
    pub fn emit(&self, event: ElementaryEvent) -> usize {
        let matching = self
            .subscriptions
            .matching(event.class, event.subscription_element);
        let key = self.lane_key(&event);
        let mut queued = 0;
        for subscription in matching {
            let job = Box::new(move || {
                subscription.deliver(&event);
            });
            match self.runtime.submit(key, job) {
                Ok(()) => queued += 1,
                Err(e) => {
                    tracing::warn!(
                        class = %event.class,
                        element = %event.subscription_element,
                        error = %e,
                        "event dropped"
                    );
                    break;
                }
            }
        }
        if queued > 0 {
            tracing::trace!(
                class = %event.class,
                element = %event.subscription_element,
                queued,
                "event emitted"
            );
        }
        queued
    }
}

impl MutationObserver for EventEmitter {
    fn on_mutation(&self, mutation: &Mutation) {
        for event in ElementaryEvent::from_mutation(mutation) {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::dispatch::DispatchMode;
    use crate::event::EventClass;
    use crate::graph::{ConnectorType, Constness, GraphAccess, MemoryGraph};

    fn setup() -> (MemoryGraph, Arc<SubscriptionTable>, Arc<DispatchRuntime>) {
        let graph = MemoryGraph::new();
        let table = Arc::new(SubscriptionTable::new());
        let runtime = Arc::new(DispatchRuntime::new(DispatchMode::Sequential, 1).unwrap());
        graph.set_observer(Some(Arc::new(EventEmitter::new(
            Arc::clone(&table),
            Arc::clone(&runtime),
        ))));
        (graph, table, runtime)
    }

    #[test]
    fn connector_creation_reaches_both_ends() {
        let (graph, table, runtime) = setup();
        let a = graph.create_node(Constness::Const).unwrap();
        let b = graph.create_node(Constness::Const).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for (class, element) in [
            (EventClass::AfterGenerateOutgoingArc, a),
            (EventClass::AfterGenerateIncomingArc, b),
        ] {
            let seen = Arc::clone(&seen);
            table
                .register(
                    "probe",
                    class,
                    element,
                    Arc::new(move |e: &ElementaryEvent| seen.lock().unwrap().push(*e)),
                )
                .unwrap();
        }

        let c = graph
            .create_connector(ConnectorType::ACCESS_CONST, a, b)
            .unwrap();
        assert!(runtime.quiesce(Duration::from_secs(5)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.connector == Some(c)));
        assert_eq!(seen[0].other_element, Some(b));
        assert_eq!(seen[1].other_element, Some(a));
    }

    #[test]
    fn emit_after_shutdown_queues_nothing() {
        let (graph, table, runtime) = setup();
        let a = graph.create_node(Constness::Const).unwrap();
        table
            .register(
                "probe",
                EventClass::BeforeEraseElement,
                a,
                Arc::new(|_: &ElementaryEvent| {}),
            )
            .unwrap();
        runtime.shutdown();

        let emitter = EventEmitter::new(Arc::clone(&table), Arc::clone(&runtime));
        let queued = emitter.emit(ElementaryEvent {
            class: EventClass::BeforeEraseElement,
            subscription_element: a,
            connector: None,
            connector_type: None,
            other_element: None,
        });
        assert_eq!(queued, 0);
    }

    #[test]
    fn spread_elements_key_by_far_element() {
        let table = Arc::new(SubscriptionTable::new());
        let runtime = Arc::new(DispatchRuntime::new(DispatchMode::Parallel, 2).unwrap());
        let hub = Addr::new(1).unwrap();
        let plain = Addr::new(2).unwrap();
        let far = Addr::new(3).unwrap();
        let emitter = EventEmitter::new(table, runtime).spread_at(hub);

        let event = |element| ElementaryEvent {
            class: EventClass::AfterGenerateOutgoingArc,
            subscription_element: element,
            connector: Addr::new(9),
            connector_type: Some(ConnectorType::ACCESS_CONST),
            other_element: Some(far),
        };
        assert_eq!(emitter.lane_key(&event(hub)), far);
        assert_eq!(emitter.lane_key(&event(plain)), plain);
    }
}
