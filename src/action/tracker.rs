//! Completion tracking for actions.
//!
//! An action gets a slot while an agent runs it or a caller waits on it: a
//! mutex-guarded [`ActionState`] plus a condvar. Finishing an action writes
//! the terminal state into the graph, updates the slot and wakes the waiters
//! in one critical section. A waiter re-reads the graph under the same lock,
//! so a finish that happened before its slot existed is never missed.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use dashmap::DashMap;

use crate::addr::Addr;
use crate::error::{ActionError, ActionResult};
use crate::graph::{ConnectorPattern, ConnectorType, GraphAccess};
use crate::keynodes::Keynodes;

use super::{ActionState, Completion};

struct Slot {
    state: Mutex<ActionState>,
    changed: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(ActionState::Initiated),
            changed: Condvar::new(),
        }
    }
}

/// Registry of in-flight actions and their waiters.
pub struct ActionTracker {
    graph: Arc<dyn GraphAccess>,
    keynodes: Arc<Keynodes>,
    slots: DashMap<Addr, Arc<Slot>>,
}

impl ActionTracker {
    pub fn new(graph: Arc<dyn GraphAccess>, keynodes: Arc<Keynodes>) -> Self {
        Self {
            graph,
            keynodes,
            slots: DashMap::new(),
        }
    }

    /// Record that an agent picked the action up.
    pub fn mark_running(&self, action: Addr) {
        let slot = self.slot(action);
        let mut state = slot.state.lock().expect("action slot poisoned");
        if matches!(*state, ActionState::Initiated) {
            *state = ActionState::Running;
        }
    }

    /// Current state as known to the tracker or recorded in the graph.
    pub fn state(&self, action: Addr) -> Option<ActionState> {
        if let Some(completion) = self.completion_in_graph(action) {
            return Some(ActionState::Finished(completion));
        }
        if let Some(slot) = self.slots.get(&action) {
            return Some(*slot.state.lock().expect("action slot poisoned"));
        }
        self.is_initiated_in_graph(action)
            .then_some(ActionState::Initiated)
    }

    /// Write the terminal state of `action` and wake every waiter.
    ///
    /// Fails with `ActionAlreadyFinished` if a terminal state was already
    /// written; the earlier completion is kept.
    pub fn finish(&self, action: Addr, completion: Completion) -> ActionResult<()> {
        let slot = self.slot(action);
        let written = {
            let mut state = slot.state.lock().expect("action slot poisoned");
            if matches!(*state, ActionState::Finished(_))
                || self.completion_in_graph(action).is_some()
            {
                Err(ActionError::ActionAlreadyFinished {
                    action: action.get(),
                })
            } else {
                let written = self.write_completion(action, completion);
                if written.is_ok() {
                    *state = ActionState::Finished(completion);
                    slot.changed.notify_all();
                }
                written
            }
        };
        // Finished now or earlier: no waiter can still block on this slot.
        if !matches!(written, Err(ActionError::Graph(_))) {
            self.release(action, &slot);
        }
        written?;
        tracing::debug!(%action, ?completion, "action finished");
        Ok(())
    }

    /// Block until `action` finishes or `timeout` elapses.
    pub fn wait(&self, action: Addr, timeout: Duration) -> ActionResult<Completion> {
        let existing = self.slots.get(&action).map(|s| Arc::clone(s.value()));
        let slot = match existing {
            Some(slot) => slot,
            None => {
                if let Some(completion) = self.completion_in_graph(action) {
                    return Ok(completion);
                }
                self.slot(action)
            }
        };

        let state = slot.state.lock().expect("action slot poisoned");
        let done = match *state {
            ActionState::Finished(completion) => Some(completion),
            _ => self.completion_in_graph(action),
        };
        if let Some(completion) = done {
            drop(state);
            self.release(action, &slot);
            return Ok(completion);
        }

        let (state, _) = slot
            .changed
            .wait_timeout_while(state, timeout, |s| !matches!(s, ActionState::Finished(_)))
            .expect("action slot poisoned");
        match *state {
            ActionState::Finished(completion) => Ok(completion),
            _ => Err(ActionError::Timeout {
                action: action.get(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Number of actions with a live slot.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Terminal state recorded in the graph, if any.
    pub fn completion_in_graph(&self, action: Addr) -> Option<Completion> {
        let k = &self.keynodes;
        if !self.is_member(k.action_finished, action) {
            return None;
        }
        [
            (k.action_finished_successfully, Completion::Success),
            (k.action_finished_unsuccessfully, Completion::Unsuccessful),
            (k.action_finished_with_error, Completion::Error),
        ]
        .into_iter()
        .find(|(class, _)| self.is_member(*class, action))
        .map(|(_, completion)| completion)
    }

    pub fn is_initiated_in_graph(&self, action: Addr) -> bool {
        self.is_member(self.keynodes.action_initiated, action)
    }

    /// Completion class first, then `action_finished`, so the action never
    /// reads as finished without a class. A failed second write takes the
    /// first one back.
    fn write_completion(&self, action: Addr, completion: Completion) -> ActionResult<()> {
        let class_arc = self.graph.create_connector(
            ConnectorType::ACCESS_CONST,
            self.completion_class(completion),
            action,
        )?;
        if let Err(e) = self.graph.create_connector(
            ConnectorType::ACCESS_CONST,
            self.keynodes.action_finished,
            action,
        ) {
            if let Err(undo) = self.graph.erase_element(class_arc) {
                tracing::warn!(%action, error = %undo, "could not undo completion class");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn completion_class(&self, completion: Completion) -> Addr {
        match completion {
            Completion::Success => self.keynodes.action_finished_successfully,
            Completion::Unsuccessful => self.keynodes.action_finished_unsuccessfully,
            Completion::Error => self.keynodes.action_finished_with_error,
        }
    }

    fn is_member(&self, class: Addr, element: Addr) -> bool {
        !self
            .graph
            .iterate_connectors(&ConnectorPattern::triple(
                class,
                ConnectorType::ACCESS_CONST,
                element,
            ))
            .is_empty()
    }

    /// Drop the slot if it is still the one registered for `action`.
    fn release(&self, action: Addr, slot: &Arc<Slot>) {
        self.slots.remove_if(&action, |_, s| Arc::ptr_eq(s, slot));
    }

    fn slot(&self, action: Addr) -> Arc<Slot> {
        Arc::clone(
            self.slots
                .entry(action)
                .or_insert_with(|| Arc::new(Slot::new()))
                .value(),
        )
    }
}

impl std::fmt::Debug for ActionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTracker")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::graph::{Constness, MemoryGraph};

    fn setup() -> (Arc<dyn GraphAccess>, ActionTracker, Addr) {
        let graph: Arc<dyn GraphAccess> = Arc::new(MemoryGraph::new());
        let keynodes = Arc::new(Keynodes::resolve(graph.as_ref(), 3).unwrap());
        let action = graph.create_node(Constness::Const).unwrap();
        let tracker = ActionTracker::new(Arc::clone(&graph), keynodes);
        (graph, tracker, action)
    }

    #[test]
    fn finish_wakes_waiter() {
        let (_graph, tracker, action) = setup();
        let tracker = Arc::new(tracker);

        let t = Arc::clone(&tracker);
        let finisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            t.finish(action, Completion::Success).unwrap();
        });
        let completion = tracker.wait(action, Duration::from_secs(5)).unwrap();
        finisher.join().unwrap();

        assert_eq!(completion, Completion::Success);
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(
            tracker.state(action),
            Some(ActionState::Finished(Completion::Success))
        );
    }

    #[test]
    fn wait_after_finish_returns_immediately() {
        let (_graph, tracker, action) = setup();
        tracker.finish(action, Completion::Unsuccessful).unwrap();
        let started = Instant::now();
        assert_eq!(
            tracker.wait(action, Duration::from_secs(5)).unwrap(),
            Completion::Unsuccessful
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn second_finish_is_rejected() {
        let (_graph, tracker, action) = setup();
        tracker.finish(action, Completion::Success).unwrap();
        assert!(matches!(
            tracker.finish(action, Completion::Error),
            Err(ActionError::ActionAlreadyFinished { .. })
        ));
        assert_eq!(tracker.completion_in_graph(action), Some(Completion::Success));
    }

    #[test]
    fn wait_times_out() {
        let (_graph, tracker, action) = setup();
        let err = tracker.wait(action, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, ActionError::Timeout { timeout_ms: 30, .. }));
    }

    #[test]
    fn running_state_is_visible() {
        let (_graph, tracker, action) = setup();
        assert_eq!(tracker.state(action), None);
        tracker.mark_running(action);
        assert_eq!(tracker.state(action), Some(ActionState::Running));
        tracker.finish(action, Completion::Success).unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn every_waiter_is_released_once() {
        let (_graph, tracker, action) = setup();
        let tracker = Arc::new(tracker);
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&tracker);
                thread::spawn(move || t.wait(action, Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        tracker.finish(action, Completion::Unsuccessful).unwrap();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap().unwrap(), Completion::Unsuccessful);
        }
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn finished_actions_leave_no_slots() {
        let (graph, tracker, _) = setup();
        for _ in 0..20 {
            let action = graph.create_node(Constness::Const).unwrap();
            tracker.mark_running(action);
            tracker.finish(action, Completion::Success).unwrap();
            // Waiting and finishing again after the fact must not re-create a slot.
            assert_eq!(
                tracker.wait(action, Duration::from_secs(1)).unwrap(),
                Completion::Success
            );
            assert!(tracker.finish(action, Completion::Error).is_err());
        }
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn failed_terminal_write_leaves_no_completion_class() {
        let graph: Arc<dyn GraphAccess> = Arc::new(MemoryGraph::new());
        let keynodes = Arc::new(Keynodes::resolve(graph.as_ref(), 3).unwrap());
        let action = graph.create_node(Constness::Const).unwrap();
        let tracker = ActionTracker::new(Arc::clone(&graph), Arc::clone(&keynodes));

        graph.erase_element(keynodes.action_finished).unwrap();
        let err = tracker.finish(action, Completion::Success).unwrap_err();
        assert!(matches!(err, ActionError::Graph(_)));
        assert!(
            graph
                .iterate_connectors(&ConnectorPattern::triple(
                    keynodes.action_finished_successfully,
                    ConnectorType::ACCESS_CONST,
                    action,
                ))
                .is_empty()
        );
        assert_eq!(tracker.state(action), Some(ActionState::Initiated));
    }
}
