//! Well-known elements the reactor reads and writes by role.
//!
//! Keynodes are resolved once per reactor by system identifier, creating them
//! when the graph does not have them yet.

use crate::addr::Addr;
use crate::error::GraphResult;
use crate::event::EventClass;
use crate::graph::GraphAccess;

/// Addresses of the relations, classes and event classes the reactor uses.
#[derive(Debug, Clone)]
pub struct Keynodes {
    pub nrel_inclusion: Addr,
    pub nrel_primary_initiation_condition: Addr,
    pub nrel_sc_agent_action_class: Addr,
    pub nrel_initiation_condition_and_result: Addr,
    pub nrel_answer: Addr,
    pub abstract_sc_agent: Addr,
    pub action: Addr,
    pub action_initiated: Addr,
    pub action_finished: Addr,
    pub action_finished_successfully: Addr,
    pub action_finished_unsuccessfully: Addr,
    pub action_finished_with_error: Addr,
    /// Class of the action records the runtime creates for event agents.
    pub event_record: Addr,
    /// `rrel_1..=rrel_N`; index 0 holds `rrel_1`.
    ordinals: Vec<Addr>,
    /// One per [`EventClass`], in [`EventClass::ALL`] order.
    event_classes: Vec<(EventClass, Addr)>,
}

impl Keynodes {
    /// Resolve every keynode, creating missing ones.
    pub fn resolve<G: GraphAccess + ?Sized>(graph: &G, max_ordinal: usize) -> GraphResult<Self> {
        let ordinals = (1..=max_ordinal)
            .map(|n| graph.resolve_identifier(&format!("rrel_{n}")))
            .collect::<GraphResult<Vec<_>>>()?;
        let event_classes = EventClass::ALL
            .iter()
            .map(|class| Ok((*class, graph.resolve_identifier(class.identifier())?)))
            .collect::<GraphResult<Vec<_>>>()?;

        Ok(Self {
            nrel_inclusion: graph.resolve_identifier("nrel_inclusion")?,
            nrel_primary_initiation_condition: graph
                .resolve_identifier("nrel_primary_initiation_condition")?,
            nrel_sc_agent_action_class: graph.resolve_identifier("nrel_sc_agent_action_class")?,
            nrel_initiation_condition_and_result: graph
                .resolve_identifier("nrel_initiation_condition_and_result")?,
            nrel_answer: graph.resolve_identifier("nrel_answer")?,
            abstract_sc_agent: graph.resolve_identifier("abstract_sc_agent")?,
            action: graph.resolve_identifier("action")?,
            action_initiated: graph.resolve_identifier("action_initiated")?,
            action_finished: graph.resolve_identifier("action_finished")?,
            action_finished_successfully: graph
                .resolve_identifier("action_finished_successfully")?,
            action_finished_unsuccessfully: graph
                .resolve_identifier("action_finished_unsuccessfully")?,
            action_finished_with_error: graph.resolve_identifier("action_finished_with_error")?,
            event_record: graph.resolve_identifier("event_record")?,
            ordinals,
            event_classes,
        })
    }

    /// The `rrel_n` role relation, if `n` is within the resolved range.
    pub fn ordinal(&self, n: usize) -> Option<Addr> {
        n.checked_sub(1).and_then(|i| self.ordinals.get(i)).copied()
    }

    /// Inverse of [`Keynodes::ordinal`].
    pub fn ordinal_of(&self, relation: Addr) -> Option<usize> {
        self.ordinals.iter().position(|r| *r == relation).map(|i| i + 1)
    }

    /// Highest resolved ordinal.
    pub fn max_ordinal(&self) -> usize {
        self.ordinals.len()
    }

    /// Keynode of an event class.
    pub fn event_class(&self, class: EventClass) -> Addr {
        // Declaration order of `EventClass` is the order of `ALL`.
        self.event_classes[class as usize].1
    }

    /// Event class named by a keynode.
    pub fn event_class_of(&self, addr: Addr) -> Option<EventClass> {
        self.event_classes
            .iter()
            .find(|(_, a)| *a == addr)
            .map(|(class, _)| *class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;

    #[test]
    fn resolution_is_idempotent() {
        let g = MemoryGraph::new();
        let first = Keynodes::resolve(&g, 3).unwrap();
        let second = Keynodes::resolve(&g, 3).unwrap();
        assert_eq!(first.action_initiated, second.action_initiated);
        assert_eq!(first.ordinal(2), second.ordinal(2));
        assert_eq!(g.find_by_identifier("rrel_3"), first.ordinal(3));
        assert_eq!(g.find_by_identifier("event_record"), Some(first.event_record));
    }

    #[test]
    fn ordinals_are_one_based() {
        let g = MemoryGraph::new();
        let k = Keynodes::resolve(&g, 2).unwrap();
        assert!(k.ordinal(0).is_none());
        assert!(k.ordinal(3).is_none());
        let rrel_2 = k.ordinal(2).unwrap();
        assert_eq!(k.ordinal_of(rrel_2), Some(2));
        assert_eq!(k.max_ordinal(), 2);
    }

    #[test]
    fn event_classes_round_trip() {
        let g = MemoryGraph::new();
        let k = Keynodes::resolve(&g, 1).unwrap();
        for class in EventClass::ALL {
            assert_eq!(k.event_class_of(k.event_class(class)), Some(class));
        }
        assert_eq!(k.event_class_of(k.action), None);
    }
}
