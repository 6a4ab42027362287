//! Agent modules: named groups of agents registered and unregistered together.

use std::sync::Arc;

use crate::addr::Addr;
use crate::error::ReactorResult;
use crate::reactor::{AgentHandle, Reactor};

use super::Agent;

enum Registration {
    /// Listens where the agent itself says, at the given elements.
    Static {
        agent: Arc<dyn Agent>,
        elements: Vec<Addr>,
    },
    /// Listens where the implementation's graph specification says.
    Implemented {
        agent: Arc<dyn Agent>,
        implementation: Addr,
    },
}

impl Registration {
    fn agent_name(&self) -> &str {
        match self {
            Self::Static { agent, .. } | Self::Implemented { agent, .. } => agent.name(),
        }
    }
}

/// A named collection of agents.
///
/// `register` subscribes every agent in declaration order and rolls back the
/// ones already subscribed if one fails. `unregister` unsubscribes every
/// handle and reports the first failure after attempting all of them.
pub struct AgentModule {
    name: String,
    registrations: Vec<Registration>,
    handles: Vec<AgentHandle>,
}

impl AgentModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registrations: Vec::new(),
            handles: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an agent subscribed at `elements` without an implementation element.
    pub fn agent(mut self, agent: impl Agent, elements: &[Addr]) -> Self {
        self.registrations.push(Registration::Static {
            agent: Arc::new(agent),
            elements: elements.to_vec(),
        });
        self
    }

    /// Add an agent whose specification lives at `implementation`.
    pub fn implemented_agent(mut self, agent: impl Agent, implementation: Addr) -> Self {
        self.registrations.push(Registration::Implemented {
            agent: Arc::new(agent),
            implementation,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn is_registered(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Subscribe every agent in the module.
    pub fn register(&mut self, reactor: &Reactor) -> ReactorResult<()> {
        if self.is_registered() {
            tracing::debug!(module = %self.name, "module already registered");
            return Ok(());
        }

        let mut handles = Vec::with_capacity(self.registrations.len());
        for registration in &self.registrations {
            let subscribed = match registration {
                Registration::Static { agent, elements } => {
                    reactor.subscribe_shared(Arc::clone(agent), None, elements)
                }
                Registration::Implemented {
                    agent,
                    implementation,
                } => reactor.subscribe_shared(Arc::clone(agent), Some(*implementation), &[]),
            };
            match subscribed {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::warn!(
                        module = %self.name,
                        agent = registration.agent_name(),
                        error = %e,
                        "module registration failed; rolling back"
                    );
                    for handle in &handles {
                        if let Err(rollback) = reactor.unsubscribe_agent(handle) {
                            tracing::warn!(error = %rollback, "rollback unsubscribe failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(module = %self.name, agents = handles.len(), "module registered");
        self.handles = handles;
        Ok(())
    }

    /// Unsubscribe every agent in the module.
    pub fn unregister(&mut self, reactor: &Reactor) -> ReactorResult<()> {
        let mut first_error = None;
        for handle in self.handles.drain(..) {
            if let Err(e) = reactor.unsubscribe_agent(&handle) {
                tracing::warn!(module = %self.name, agent = handle.agent(), error = %e, "unsubscribe failed");
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(module = %self.name, "module unregistered");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for AgentModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentModule")
            .field("name", &self.name)
            .field(
                "agents",
                &self
                    .registrations
                    .iter()
                    .map(Registration::agent_name)
                    .collect::<Vec<_>>(),
            )
            .field("registered", &self.is_registered())
            .finish()
    }
}
