// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # graph-reactor
//!
//! A reactive agent runtime over a semantic graph. Every mutation of the
//! graph produces elementary events; agents subscribe to event classes at
//! graph elements and run when their initiation condition holds. Work is
//! expressed as actions stored in the graph itself, which agents pick up when
//! they are initiated and mark finished when done.
//!
//! ## Architecture
//!
//! - **Graph** (`graph`): typed nodes, links and connectors with template search
//! - **Keynodes** (`keynodes`): well-known elements resolved by identifier
//! - **Events** (`event`): event classes, the subscription table and the emitter
//! - **Dispatch** (`dispatch`): worker lanes with per-element ordering
//! - **Agents** (`agent`): descriptors resolved from the graph, runners, modules
//! - **Actions** (`action`): arguments, answers, lifecycle and initiate-and-wait
//! - **Reactor** (`reactor`): the facade tying them together
//!
//! ## Library usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use graph_reactor::config::ReactorConfig;
//! use graph_reactor::reactor::Reactor;
//! use graph_reactor::graph::Constness;
//!
//! let reactor = Reactor::new(ReactorConfig::default()).unwrap();
//! let class = reactor.graph().create_node(Constness::Const).unwrap();
//! let completion = reactor
//!     .create_action(class)
//!     .unwrap()
//!     .initiate_and_wait(Duration::from_millis(100));
//! // No agent handles `class`, so the wait times out.
//! assert!(completion.is_err());
//! ```

pub mod action;
pub mod addr;
pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod graph;
pub mod keynodes;
pub mod reactor;

pub use action::{Action, ActionBuilder, ActionState, Completion};
pub use addr::Addr;
pub use agent::{Agent, AgentContext, AgentKind, AgentModule, ProgramResult, Trigger};
pub use config::ReactorConfig;
pub use error::{ReactorError, ReactorResult};
pub use event::{ElementaryEvent, EventClass};
pub use reactor::{AgentHandle, Reactor};
