//! Agent layer: reactive handlers bound to graph events.
//!
//! An agent implements [`Agent`]: an initiation check, a program and a result
//! check. Where it watches, and which conditions gate it, is declared as data
//! in the graph and resolved into an [`AgentDescriptor`]; agents subscribed
//! without an implementation element get a descriptor built from the agent
//! itself.
//!
//! - **Event agents** react to any event class at their subscription elements
//!   and get a fresh action record per accepted event
//! - **Action agents** react to actions of their class being initiated
//! - [`AgentSpecBuilder`] writes a specification into the graph
//! - [`AgentModule`] registers a group of agents as one unit

pub mod descriptor;
pub mod error;
pub mod module;
pub(crate) mod runner;
pub mod spec;

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionBuilder, Completion};
use crate::addr::Addr;
use crate::error::ActionResult;
use crate::event::{ElementaryEvent, EventClass};
use crate::graph::GraphAccess;
use crate::keynodes::Keynodes;
use crate::reactor::ReactorCore;

pub use descriptor::{AgentDescriptor, DescriptorCache};
pub use error::{AgentError, AgentResult};
pub use module::AgentModule;
pub use spec::{AgentSpecBuilder, StructureBuilder};

/// Outcome of an agent program.
///
/// `Ok(Success)` is downgraded to `Unsuccessful` when the result condition
/// does not hold; `Err(_)` finishes the action as `Error`.
pub type ProgramResult = AgentResult<Completion>;

/// What an agent reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    /// Events of this class at the agent's subscription elements.
    Event(EventClass),
    /// Initiation of actions belonging to the agent's action class.
    Action,
}

impl Trigger {
    pub fn kind(self) -> AgentKind {
        match self {
            Self::Event(_) => AgentKind::Event,
            Self::Action => AgentKind::Action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Event,
    Action,
}

/// A reactive handler.
///
/// `name` is the agent's identity: one agent may hold at most one active
/// subscription per event class and element.
pub trait Agent: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn trigger(&self) -> Trigger;

    /// Action class used when the agent is subscribed without an
    /// implementation element. Required for action agents in that case.
    fn action_class(&self) -> Option<Addr> {
        None
    }

    /// Whether the agent accepts `event`. Defaults to the declared
    /// initiation condition.
    fn check_initiation(&self, cx: &AgentContext<'_>, event: &ElementaryEvent) -> bool {
        cx.initiation_condition_holds(event)
    }

    fn run(&self, cx: &AgentContext<'_>, event: &ElementaryEvent, action: &Action)
    -> ProgramResult;

    /// Whether the program produced the expected result. Defaults to the
    /// declared result condition.
    fn check_result(
        &self,
        cx: &AgentContext<'_>,
        event: &ElementaryEvent,
        _action: &Action,
    ) -> bool {
        cx.result_condition_holds(event)
    }
}

/// What an agent can reach while handling one event.
pub struct AgentContext<'a> {
    core: &'a ReactorCore,
    descriptor: &'a AgentDescriptor,
}

impl<'a> AgentContext<'a> {
    pub(crate) fn new(core: &'a ReactorCore, descriptor: &'a AgentDescriptor) -> Self {
        Self { core, descriptor }
    }

    pub fn graph(&self) -> &dyn GraphAccess {
        self.core.graph.as_ref()
    }

    pub fn keynodes(&self) -> &Keynodes {
        &self.core.keynodes
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        self.descriptor
    }

    /// Start a nested action.
    pub fn create_action(&self, class: Addr) -> ActionResult<ActionBuilder> {
        self.core.create_action(class)
    }

    /// View over an existing action.
    pub fn action(&self, addr: Addr) -> ActionResult<Action> {
        self.core.action(addr)
    }

    pub fn initiation_condition_holds(&self, event: &ElementaryEvent) -> bool {
        runner::condition_holds(
            self.graph(),
            self.descriptor.initiation_template.as_ref(),
            event,
        )
    }

    pub fn result_condition_holds(&self, event: &ElementaryEvent) -> bool {
        runner::condition_holds(self.graph(), self.descriptor.result_template.as_ref(), event)
    }
}

impl std::fmt::Debug for AgentContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent", &self.descriptor.agent)
            .finish()
    }
}
