//! Agent descriptors: where an agent listens and what gates it.
//!
//! [`AgentDescriptor::resolve`] reads an agent specification from the graph
//! with four read-only lookups:
//!
//! 1. `abstract =c=> implementation`, `nrel_inclusion -> c`
//! 2. `abstract =c=> (event_class =p=> element)`, `nrel_primary_initiation_condition -> c`
//! 3. `implementation =c=> class`, `nrel_sc_agent_action_class -> c`
//! 4. `abstract =c=> (initiation =p=> result)`, `nrel_initiation_condition_and_result -> c`
//!
//! Resolution has no side effects. [`DescriptorCache`] keeps the last
//! resolved descriptor per (agent, implementation) until it is explicitly
//! invalidated or re-resolved.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::addr::Addr;
use crate::error::{ResolveError, ResolveResult};
use crate::event::EventClass;
use crate::graph::{ConnectorPattern, ConnectorType, GraphAccess, Template};
use crate::keynodes::Keynodes;

use super::{Agent, AgentKind, Trigger};

/// Everything the dispatcher needs to know about one agent subscription.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDescriptor {
    pub agent: String,
    pub kind: AgentKind,
    pub abstract_agent: Option<Addr>,
    pub implementation: Option<Addr>,
    pub event_class: EventClass,
    pub subscription_elements: Vec<Addr>,
    pub action_class: Option<Addr>,
    pub initiation_condition: Option<Addr>,
    pub result_condition: Option<Addr>,
    #[serde(skip)]
    pub initiation_template: Option<Template>,
    #[serde(skip)]
    pub result_template: Option<Template>,
}

impl AgentDescriptor {
    /// Read the specification of `implementation` from the graph.
    ///
    /// The action class is only required when `kind` is [`AgentKind::Action`].
    pub fn resolve<G: GraphAccess + ?Sized>(
        graph: &G,
        keynodes: &Keynodes,
        agent: &str,
        kind: AgentKind,
        implementation: Addr,
    ) -> ResolveResult<Self> {
        let abstract_agent = related_from(graph, implementation, keynodes.nrel_inclusion).ok_or(
            ResolveError::NoAbstractAgent {
                implementation: implementation.get(),
            },
        )?;

        let primary = related_to(
            graph,
            abstract_agent,
            keynodes.nrel_primary_initiation_condition,
        )
        .and_then(|pair| graph.connector(pair).ok())
        .ok_or(ResolveError::NoInitiationCondition {
            abstract_agent: abstract_agent.get(),
        })?;
        let event_class = keynodes
            .event_class_of(primary.source)
            .ok_or(ResolveError::UnknownEventClass {
                addr: primary.source.get(),
            })?;

        let action_class =
            related_to(graph, implementation, keynodes.nrel_sc_agent_action_class);
        if kind == AgentKind::Action && action_class.is_none() {
            return Err(ResolveError::NoActionClass {
                agent: agent.to_string(),
            });
        }

        let conditions = related_to(
            graph,
            abstract_agent,
            keynodes.nrel_initiation_condition_and_result,
        )
        .and_then(|pair| graph.connector(pair).ok());
        let (initiation_condition, result_condition) = match conditions {
            Some(pair) => (Some(pair.source), Some(pair.target)),
            None => (None, None),
        };
        let initiation_template = initiation_condition
            .map(|s| Template::from_structure(graph, s))
            .transpose()?;
        let result_template = result_condition
            .map(|s| Template::from_structure(graph, s))
            .transpose()?;

        Ok(Self {
            agent: agent.to_string(),
            kind,
            abstract_agent: Some(abstract_agent),
            implementation: Some(implementation),
            event_class,
            subscription_elements: vec![primary.target],
            action_class,
            initiation_condition,
            result_condition,
            initiation_template,
            result_template,
        })
    }

    /// Descriptor for an agent subscribed without an implementation element.
    ///
    /// Action agents listen at `action_initiated` unless `elements` says
    /// otherwise; event agents listen exactly at `elements`.
    pub fn for_agent(
        agent: &dyn Agent,
        keynodes: &Keynodes,
        elements: &[Addr],
    ) -> ResolveResult<Self> {
        let (kind, event_class, subscription_elements) = match agent.trigger() {
            Trigger::Event(class) => (AgentKind::Event, class, elements.to_vec()),
            Trigger::Action => {
                let elements = if elements.is_empty() {
                    vec![keynodes.action_initiated]
                } else {
                    elements.to_vec()
                };
                (AgentKind::Action, EventClass::AfterGenerateOutgoingArc, elements)
            }
        };
        let action_class = agent.action_class();
        if kind == AgentKind::Action && action_class.is_none() {
            return Err(ResolveError::NoActionClass {
                agent: agent.name().to_string(),
            });
        }

        Ok(Self {
            agent: agent.name().to_string(),
            kind,
            abstract_agent: None,
            implementation: None,
            event_class,
            subscription_elements,
            action_class,
            initiation_condition: None,
            result_condition: None,
            initiation_template: None,
            result_template: None,
        })
    }

    /// This descriptor with `extra` subscription elements appended.
    pub fn with_elements(mut self, extra: &[Addr]) -> Self {
        for element in extra {
            if !self.subscription_elements.contains(element) {
                self.subscription_elements.push(*element);
            }
        }
        self
    }
}

/// `source =c=> x` with `relation -> c`; returns `x`.
fn related_to<G: GraphAccess + ?Sized>(graph: &G, source: Addr, relation: Addr) -> Option<Addr> {
    graph
        .iterate_connectors(&ConnectorPattern::outgoing(
            source,
            ConnectorType::D_COMMON_CONST,
        ))
        .into_iter()
        .find(|c| has_role(graph, relation, c.addr))
        .map(|c| c.target)
}

/// `x =c=> target` with `relation -> c`; returns `x`.
fn related_from<G: GraphAccess + ?Sized>(
    graph: &G,
    target: Addr,
    relation: Addr,
) -> Option<Addr> {
    graph
        .iterate_connectors(&ConnectorPattern::incoming(
            ConnectorType::D_COMMON_CONST,
            target,
        ))
        .into_iter()
        .find(|c| has_role(graph, relation, c.addr))
        .map(|c| c.source)
}

fn has_role<G: GraphAccess + ?Sized>(graph: &G, relation: Addr, connector: Addr) -> bool {
    !graph
        .iterate_connectors(&ConnectorPattern::triple(
            relation,
            ConnectorType::ACCESS_CONST,
            connector,
        ))
        .is_empty()
}

/// Last-resolved-wins cache keyed by (agent name, implementation).
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: DashMap<(String, Addr), Arc<AgentDescriptor>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, agent: &str, implementation: Addr) -> Option<Arc<AgentDescriptor>> {
        self.entries
            .get(&(agent.to_string(), implementation))
            .map(|e| Arc::clone(e.value()))
    }

    /// Cached descriptor, or the result of `resolve` stored for next time.
    /// With `force` the cache is bypassed and overwritten.
    pub fn get_or_resolve<F>(
        &self,
        agent: &str,
        implementation: Addr,
        force: bool,
        resolve: F,
    ) -> ResolveResult<Arc<AgentDescriptor>>
    where
        F: FnOnce() -> ResolveResult<AgentDescriptor>,
    {
        if !force && let Some(hit) = self.get(agent, implementation) {
            return Ok(hit);
        }
        let descriptor = Arc::new(resolve()?);
        self.entries.insert(
            (agent.to_string(), implementation),
            Arc::clone(&descriptor),
        );
        tracing::debug!(agent, %implementation, force, "agent descriptor resolved");
        Ok(descriptor)
    }

    /// Drop a cached descriptor. Returns whether one was present.
    pub fn invalidate(&self, agent: &str, implementation: Addr) -> bool {
        self.entries
            .remove(&(agent.to_string(), implementation))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
