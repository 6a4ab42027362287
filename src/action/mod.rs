//! Actions: graph-resident requests with ordered arguments, an answer and a
//! lifecycle state.
//!
//! An action is a node belonging to its action class and to the `action` class.
//! Argument `n` is an access connector `action -c-> arg` marked by `rrel_n -> c`;
//! the answer is `action =c=> answer` marked by `nrel_answer -> c`. Lifecycle
//! states are memberships of `action_initiated`, `action_finished` and one of
//! the three `action_finished_*` classes.
//!
//! - [`ActionBuilder`]: create, bind arguments, initiate, optionally wait
//! - [`Action`]: a read/write view over an existing action
//! - [`ActionTracker`]: completion slots backing `initiate_and_wait`

pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::addr::Addr;
use crate::error::{ActionError, ActionResult, GraphError};
use crate::graph::{ConnectorPattern, ConnectorType, Constness, GraphAccess};
use crate::keynodes::Keynodes;

pub use tracker::ActionTracker;

/// How an action finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The agent ran and its result condition holds.
    Success,
    /// The agent ran but could not produce the requested result.
    Unsuccessful,
    /// The agent failed (error or panic).
    Error,
}

impl std::fmt::Display for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Unsuccessful => f.write_str("unsuccessful"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Lifecycle state. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Initiated,
    Running,
    Finished(Completion),
}

impl ActionState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// View over an action element.
#[derive(Clone)]
pub struct Action {
    addr: Addr,
    graph: Arc<dyn GraphAccess>,
    keynodes: Arc<Keynodes>,
    tracker: Arc<ActionTracker>,
}

impl Action {
    pub(crate) fn new(
        addr: Addr,
        graph: Arc<dyn GraphAccess>,
        keynodes: Arc<Keynodes>,
        tracker: Arc<ActionTracker>,
    ) -> Self {
        Self {
            addr,
            graph,
            keynodes,
            tracker,
        }
    }

    /// Create a fresh, non-initiated action of `class`.
    pub(crate) fn create(
        class: Addr,
        graph: Arc<dyn GraphAccess>,
        keynodes: Arc<Keynodes>,
        tracker: Arc<ActionTracker>,
    ) -> ActionResult<Self> {
        Self::create_marked(class, None, graph, keynodes, tracker)
    }

    /// [`Action::create`], adding the node to `marker` before any other
    /// connector touches it.
    pub(crate) fn create_marked(
        class: Addr,
        marker: Option<Addr>,
        graph: Arc<dyn GraphAccess>,
        keynodes: Arc<Keynodes>,
        tracker: Arc<ActionTracker>,
    ) -> ActionResult<Self> {
        if !graph.is_element(class) {
            return Err(GraphError::ElementNotFound { addr: class.get() }.into());
        }
        let addr = graph.create_node(Constness::Const)?;
        if let Some(marker) = marker {
            graph.create_connector(ConnectorType::ACCESS_CONST, marker, addr)?;
        }
        graph.create_connector(ConnectorType::ACCESS_CONST, keynodes.action, addr)?;
        if class != keynodes.action {
            graph.create_connector(ConnectorType::ACCESS_CONST, class, addr)?;
        }
        Ok(Self::new(addr, graph, keynodes, tracker))
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// Whether the action belongs to `class`.
    pub fn belongs_to(&self, class: Addr) -> bool {
        !self
            .graph
            .iterate_connectors(&ConnectorPattern::triple(
                class,
                ConnectorType::ACCESS_CONST,
                self.addr,
            ))
            .is_empty()
    }

    /// Bind argument `ordinal`, replacing any argument already at that position.
    pub fn set_argument(&self, ordinal: usize, argument: Addr) -> ActionResult<()> {
        let role = self.keynodes.ordinal(ordinal).ok_or(ActionError::InvalidArgumentOrdinal {
            ordinal,
            max: self.keynodes.max_ordinal(),
        })?;
        if !self.graph.is_element(argument) {
            return Err(ActionError::InvalidArgumentAddress {
                addr: argument.get(),
            });
        }

        for existing in self.argument_connectors(role) {
            self.graph.erase_element(existing)?;
        }
        let connector =
            self.graph
                .create_connector(ConnectorType::ACCESS_CONST, self.addr, argument)?;
        self.graph
            .create_connector(ConnectorType::ACCESS_CONST, role, connector)?;
        Ok(())
    }

    /// Bind `arguments` to ordinals `1..=arguments.len()`.
    pub fn set_arguments(&self, arguments: &[Addr]) -> ActionResult<()> {
        if arguments.len() > self.keynodes.max_ordinal() {
            return Err(ActionError::InvalidArgumentOrdinal {
                ordinal: arguments.len(),
                max: self.keynodes.max_ordinal(),
            });
        }
        for (i, argument) in arguments.iter().enumerate() {
            self.set_argument(i + 1, *argument)?;
        }
        Ok(())
    }

    /// Argument at `ordinal`, if bound.
    pub fn argument(&self, ordinal: usize) -> Option<Addr> {
        let role = self.keynodes.ordinal(ordinal)?;
        self.argument_connectors(role)
            .first()
            .and_then(|c| self.graph.connector(*c).ok())
            .map(|c| c.target)
    }

    /// Every bound argument as `(ordinal, element)`, ordered by ordinal.
    pub fn arguments(&self) -> Vec<(usize, Addr)> {
        let mut arguments: Vec<(usize, Addr)> = self
            .graph
            .iterate_connectors(&ConnectorPattern::outgoing(
                self.addr,
                ConnectorType::ACCESS_CONST,
            ))
            .into_iter()
            .filter_map(|arc| {
                self.graph
                    .iterate_connectors(&ConnectorPattern::incoming(
                        ConnectorType::ACCESS_CONST,
                        arc.addr,
                    ))
                    .iter()
                    .find_map(|marker| self.keynodes.ordinal_of(marker.source))
                    .map(|ordinal| (ordinal, arc.target))
            })
            .collect();
        arguments.sort_by_key(|(ordinal, _)| *ordinal);
        arguments
    }

    /// Attach `answer` as the result structure, replacing a previous answer.
    pub fn set_answer(&self, answer: Addr) -> ActionResult<()> {
        if !self.graph.is_element(answer) {
            return Err(ActionError::InvalidArgumentAddress { addr: answer.get() });
        }
        for existing in self.answer_connectors() {
            self.graph.erase_element(existing)?;
        }
        let connector =
            self.graph
                .create_connector(ConnectorType::D_COMMON_CONST, self.addr, answer)?;
        self.graph.create_connector(
            ConnectorType::ACCESS_CONST,
            self.keynodes.nrel_answer,
            connector,
        )?;
        Ok(())
    }

    pub fn answer(&self) -> Option<Addr> {
        self.answer_connectors()
            .first()
            .and_then(|c| self.graph.connector(*c).ok())
            .map(|c| c.target)
    }

    pub fn state(&self) -> Option<ActionState> {
        self.tracker.state(self.addr)
    }

    pub fn is_initiated(&self) -> bool {
        self.tracker.is_initiated_in_graph(self.addr)
    }

    pub fn is_finished(&self) -> bool {
        self.tracker.completion_in_graph(self.addr).is_some()
    }

    /// Write the terminal state. Agents normally leave this to the runtime.
    pub fn finish(&self, completion: Completion) -> ActionResult<()> {
        self.tracker.finish(self.addr, completion)
    }

    fn argument_connectors(&self, role: Addr) -> Vec<Addr> {
        self.marked_connectors(ConnectorType::ACCESS_CONST, role)
    }

    fn answer_connectors(&self) -> Vec<Addr> {
        self.marked_connectors(ConnectorType::D_COMMON_CONST, self.keynodes.nrel_answer)
    }

    /// Outgoing connectors of type `ty` that `marker` points at.
    fn marked_connectors(&self, ty: ConnectorType, marker: Addr) -> Vec<Addr> {
        self.graph
            .iterate_connectors(&ConnectorPattern::outgoing(self.addr, ty))
            .into_iter()
            .filter(|arc| {
                !self
                    .graph
                    .iterate_connectors(&ConnectorPattern::triple(
                        marker,
                        ConnectorType::ACCESS_CONST,
                        arc.addr,
                    ))
                    .is_empty()
            })
            .map(|arc| arc.addr)
            .collect()
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("addr", &self.addr).finish()
    }
}

/// Fluent construction of an action followed by initiation.
pub struct ActionBuilder {
    action: Action,
    default_timeout: Duration,
}

impl ActionBuilder {
    pub(crate) fn new(action: Action, default_timeout: Duration) -> Self {
        Self {
            action,
            default_timeout,
        }
    }

    pub fn addr(&self) -> Addr {
        self.action.addr
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn set_argument(self, ordinal: usize, argument: Addr) -> ActionResult<Self> {
        self.action.set_argument(ordinal, argument)?;
        Ok(self)
    }

    pub fn set_arguments(self, arguments: &[Addr]) -> ActionResult<Self> {
        self.action.set_arguments(arguments)?;
        Ok(self)
    }

    /// Mark the action initiated, triggering subscribed action agents.
    pub fn initiate(self) -> ActionResult<Action> {
        self.mark_initiated()?;
        Ok(self.action)
    }

    /// Initiate and block until the action finishes or `timeout` elapses.
    ///
    /// A timeout does not cancel the action.
    pub fn initiate_and_wait(self, timeout: Duration) -> ActionResult<Completion> {
        self.mark_initiated()?;
        self.action.tracker.wait(self.action.addr, timeout)
    }

    /// [`ActionBuilder::initiate_and_wait`] with the configured default timeout.
    pub fn initiate_and_wait_default(self) -> ActionResult<Completion> {
        let timeout = self.default_timeout;
        self.initiate_and_wait(timeout)
    }

    fn mark_initiated(&self) -> ActionResult<()> {
        let action = &self.action;
        if action.is_initiated() {
            return Err(ActionError::AlreadyInitiated {
                action: action.addr.get(),
            });
        }
        if action.is_finished() {
            return Err(ActionError::ActionAlreadyFinished {
                action: action.addr.get(),
            });
        }
        action.graph.create_connector(
            ConnectorType::ACCESS_CONST,
            action.keynodes.action_initiated,
            action.addr,
        )?;
        tracing::debug!(action = %action.addr, "action initiated");
        Ok(())
    }
}

impl std::fmt::Debug for ActionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBuilder")
            .field("action", &self.action.addr)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;

    struct Fixture {
        graph: Arc<dyn GraphAccess>,
        keynodes: Arc<Keynodes>,
        tracker: Arc<ActionTracker>,
    }

    impl Fixture {
        fn new() -> Self {
            let graph: Arc<dyn GraphAccess> = Arc::new(MemoryGraph::new());
            let keynodes = Arc::new(Keynodes::resolve(graph.as_ref(), 4).unwrap());
            let tracker = Arc::new(ActionTracker::new(
                Arc::clone(&graph),
                Arc::clone(&keynodes),
            ));
            Self {
                graph,
                keynodes,
                tracker,
            }
        }

        fn node(&self) -> Addr {
            self.graph.create_node(Constness::Const).unwrap()
        }

        fn action(&self, class: Addr) -> Action {
            Action::create(
                class,
                Arc::clone(&self.graph),
                Arc::clone(&self.keynodes),
                Arc::clone(&self.tracker),
            )
            .unwrap()
        }
    }

    #[test]
    fn created_action_belongs_to_its_classes() {
        let f = Fixture::new();
        let class = f.node();
        let action = f.action(class);
        assert!(action.belongs_to(class));
        assert!(action.belongs_to(f.keynodes.action));
        assert!(!action.is_initiated());
        assert_eq!(action.state(), None);
    }

    #[test]
    fn arguments_are_ordered_and_replaceable() {
        let f = Fixture::new();
        let action = f.action(f.node());
        let (a, b, c) = (f.node(), f.node(), f.node());

        action.set_arguments(&[a, b]).unwrap();
        assert_eq!(action.arguments(), vec![(1, a), (2, b)]);

        action.set_argument(1, c).unwrap();
        assert_eq!(action.argument(1), Some(c));
        assert_eq!(action.arguments(), vec![(1, c), (2, b)]);
        // The old argument element itself survives; only its binding is gone.
        assert!(f.graph.is_element(a));
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let f = Fixture::new();
        let action = f.action(f.node());
        let err = action.set_argument(0, f.node()).unwrap_err();
        assert!(matches!(err, ActionError::InvalidArgumentOrdinal { ordinal: 0, max: 4 }));
        let err = action.set_argument(5, f.node()).unwrap_err();
        assert!(matches!(err, ActionError::InvalidArgumentOrdinal { ordinal: 5, .. }));

        let gone = f.node();
        f.graph.erase_element(gone).unwrap();
        let err = action.set_argument(1, gone).unwrap_err();
        assert!(matches!(err, ActionError::InvalidArgumentAddress { .. }));
    }

    #[test]
    fn answer_is_replaced() {
        let f = Fixture::new();
        let action = f.action(f.node());
        let (first, second) = (f.node(), f.node());
        assert_eq!(action.answer(), None);
        action.set_answer(first).unwrap();
        action.set_answer(second).unwrap();
        assert_eq!(action.answer(), Some(second));
    }

    #[test]
    fn initiate_twice_fails() {
        let f = Fixture::new();
        let action = f.action(f.node());
        let builder = ActionBuilder::new(action.clone(), Duration::from_millis(10));
        let initiated = builder.initiate().unwrap();
        assert!(initiated.is_initiated());
        assert_eq!(initiated.state(), Some(ActionState::Initiated));

        let again = ActionBuilder::new(action, Duration::from_millis(10));
        assert!(matches!(
            again.initiate(),
            Err(ActionError::AlreadyInitiated { .. })
        ));
    }

    #[test]
    fn wait_without_agent_times_out() {
        let f = Fixture::new();
        let action = f.action(f.node());
        let err = ActionBuilder::new(action.clone(), Duration::from_millis(20))
            .initiate_and_wait_default()
            .unwrap_err();
        assert!(matches!(err, ActionError::Timeout { timeout_ms: 20, .. }));
        assert!(action.is_initiated());
        assert!(!action.is_finished());
    }

    #[test]
    fn finished_state_is_read_from_graph() {
        let f = Fixture::new();
        let action = f.action(f.node());
        action.finish(Completion::Unsuccessful).unwrap();
        assert!(action.is_finished());
        assert_eq!(
            action.state(),
            Some(ActionState::Finished(Completion::Unsuccessful))
        );
        assert!(action.belongs_to(f.keynodes.action_finished_unsuccessfully));
    }
}
