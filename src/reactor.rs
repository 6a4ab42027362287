//! Reactor facade: top-level API for graph-reactor.
//!
//! The `Reactor` owns the subscription table, the dispatch runtime, the
//! action tracker and the descriptor cache, and installs the event emitter on
//! the graph it is built over. Dropping it detaches the emitter and drains
//! the runtime.

use std::sync::Arc;
use std::time::Duration;

use crate::action::{Action, ActionBuilder, ActionTracker};
use crate::addr::Addr;
use crate::agent::runner::AgentBinding;
use crate::agent::{Agent, AgentDescriptor, AgentKind, AgentSpecBuilder, DescriptorCache};
use crate::config::ReactorConfig;
use crate::dispatch::DispatchRuntime;
use crate::error::{
    ActionError, ActionResult, ReactorResult, ResolveResult, SubscriptionError,
};
use crate::event::subscription::Callback;
use crate::event::{EventClass, EventEmitter, SubscriptionHandle, SubscriptionTable};
use crate::graph::{GraphAccess, MemoryGraph};
use crate::keynodes::Keynodes;

/// State shared between the reactor and every bound agent.
pub(crate) struct ReactorCore {
    pub(crate) graph: Arc<dyn GraphAccess>,
    pub(crate) keynodes: Arc<Keynodes>,
    pub(crate) actions: Arc<ActionTracker>,
    pub(crate) default_timeout: Duration,
}

impl ReactorCore {
    pub(crate) fn create_action(&self, class: Addr) -> ActionResult<ActionBuilder> {
        let action = Action::create(
            class,
            Arc::clone(&self.graph),
            Arc::clone(&self.keynodes),
            Arc::clone(&self.actions),
        )?;
        Ok(ActionBuilder::new(action, self.default_timeout))
    }

    /// Action record for one event delivered to an event agent.
    pub(crate) fn create_event_record(&self, class: Addr) -> ActionResult<Action> {
        Action::create_marked(
            class,
            Some(self.keynodes.event_record),
            Arc::clone(&self.graph),
            Arc::clone(&self.keynodes),
            Arc::clone(&self.actions),
        )
    }

    /// View over `addr` without checking that it is an action.
    pub(crate) fn action_view(&self, addr: Addr) -> Action {
        Action::new(
            addr,
            Arc::clone(&self.graph),
            Arc::clone(&self.keynodes),
            Arc::clone(&self.actions),
        )
    }

    pub(crate) fn action(&self, addr: Addr) -> ActionResult<Action> {
        let view = self.action_view(addr);
        if !self.graph.is_element(addr) || !view.belongs_to(self.keynodes.action) {
            return Err(ActionError::UnknownAction {
                action: addr.get(),
            });
        }
        Ok(view)
    }
}

/// Subscriptions made for one agent.
#[derive(Debug)]
pub struct AgentHandle {
    agent: String,
    descriptor: Arc<AgentDescriptor>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl AgentHandle {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// The descriptor the agent was bound with.
    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn subscriptions(&self) -> &[SubscriptionHandle] {
        &self.subscriptions
    }
}

/// The graph-reactor runtime.
pub struct Reactor {
    config: ReactorConfig,
    core: Arc<ReactorCore>,
    subscriptions: Arc<SubscriptionTable>,
    runtime: Arc<DispatchRuntime>,
    descriptors: DescriptorCache,
}

impl Reactor {
    /// Reactor over a fresh in-memory graph.
    pub fn new(config: ReactorConfig) -> ReactorResult<Self> {
        Self::with_graph(config, Arc::new(MemoryGraph::new()))
    }

    /// Reactor over `graph`. The graph's mutation observer is replaced.
    pub fn with_graph(config: ReactorConfig, graph: Arc<dyn GraphAccess>) -> ReactorResult<Self> {
        config.validate()?;
        tracing::info!(
            mode = %config.dispatch.mode,
            workers = config.dispatch.workers,
            max_argument_ordinal = config.actions.max_argument_ordinal,
            "initializing reactor"
        );

        let keynodes = Arc::new(Keynodes::resolve(
            graph.as_ref(),
            config.actions.max_argument_ordinal,
        )?);
        let runtime = Arc::new(DispatchRuntime::new(
            config.dispatch.mode,
            config.dispatch.workers,
        )?);
        let subscriptions = Arc::new(SubscriptionTable::new());
        let actions = Arc::new(ActionTracker::new(
            Arc::clone(&graph),
            Arc::clone(&keynodes),
        ));

        // Every initiation lands on `action_initiated`; order those per action.
        let emitter = EventEmitter::new(Arc::clone(&subscriptions), Arc::clone(&runtime))
            .spread_at(keynodes.action_initiated);
        graph.set_observer(Some(Arc::new(emitter)));

        let core = Arc::new(ReactorCore {
            graph,
            keynodes,
            actions,
            default_timeout: config.default_wait_timeout(),
        });
        Ok(Self {
            config,
            core,
            subscriptions,
            runtime,
            descriptors: DescriptorCache::new(),
        })
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<dyn GraphAccess> {
        &self.core.graph
    }

    pub fn keynodes(&self) -> &Keynodes {
        &self.core.keynodes
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn runtime(&self) -> &DispatchRuntime {
        &self.runtime
    }

    pub fn actions(&self) -> &ActionTracker {
        &self.core.actions
    }

    // -----------------------------------------------------------------------
    // Raw subscriptions
    // -----------------------------------------------------------------------

    /// Register a plain callback for `event_class` at `element`.
    pub fn subscribe(
        &self,
        subscriber: impl Into<String>,
        event_class: EventClass,
        element: Addr,
        callback: Callback,
    ) -> ReactorResult<SubscriptionHandle> {
        self.check_element(element)?;
        Ok(self
            .subscriptions
            .register(subscriber, event_class, element, callback)?)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> ReactorResult<()> {
        Ok(self.subscriptions.unregister(handle)?)
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    /// Subscribe `agent`.
    ///
    /// With an implementation element the agent's event class, subscription
    /// element, action class and conditions are resolved from the graph;
    /// `elements` are added as further subscription points. Without one the
    /// agent listens at `elements` (action agents default to
    /// `action_initiated`).
    pub fn subscribe_agent(
        &self,
        agent: impl Agent,
        implementation: Option<Addr>,
        elements: &[Addr],
    ) -> ReactorResult<AgentHandle> {
        self.subscribe_shared(Arc::new(agent), implementation, elements)
    }

    /// [`Reactor::subscribe_agent`] for an agent that is already shared.
    pub fn subscribe_shared(
        &self,
        agent: Arc<dyn Agent>,
        implementation: Option<Addr>,
        elements: &[Addr],
    ) -> ReactorResult<AgentHandle> {
        let descriptor = match implementation {
            Some(implementation) => {
                let resolved = self.resolve_descriptor(
                    agent.name(),
                    agent.trigger().kind(),
                    implementation,
                    false,
                )?;
                if elements.is_empty() {
                    resolved
                } else {
                    Arc::new((*resolved).clone().with_elements(elements))
                }
            }
            None => Arc::new(AgentDescriptor::for_agent(
                agent.as_ref(),
                &self.core.keynodes,
                elements,
            )?),
        };

        if descriptor.subscription_elements.is_empty() {
            return Err(SubscriptionError::NoSubscriptionElements {
                agent: agent.name().to_string(),
            }
            .into());
        }
        for element in &descriptor.subscription_elements {
            self.check_element(*element)?;
        }

        let name = agent.name().to_string();
        let callback = Arc::new(AgentBinding::new(
            agent,
            Arc::clone(&descriptor),
            Arc::clone(&self.core),
        ))
        .into_callback();

        let mut handles = Vec::with_capacity(descriptor.subscription_elements.len());
        for element in &descriptor.subscription_elements {
            match self.subscriptions.register(
                name.as_str(),
                descriptor.event_class,
                *element,
                Arc::clone(&callback),
            ) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in &handles {
                        // Just registered by us, so it cannot be missing.
                        let _ = self.subscriptions.unregister(handle);
                    }
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            agent = %name,
            class = %descriptor.event_class,
            elements = handles.len(),
            "agent subscribed"
        );
        Ok(AgentHandle {
            agent: name,
            descriptor,
            subscriptions: handles,
        })
    }

    /// Write `spec` into the graph and subscribe `agent` to the result.
    pub fn subscribe_built_agent(
        &self,
        agent: impl Agent,
        spec: &AgentSpecBuilder,
    ) -> ReactorResult<AgentHandle> {
        let implementation = spec.build(self.core.graph.as_ref(), &self.core.keynodes)?;
        self.subscribe_agent(agent, Some(implementation), &[])
    }

    /// Remove every subscription of `handle`.
    ///
    /// Returns immediately; a callback already running finishes. Fails with
    /// `NotSubscribed` if the handle was already unsubscribed.
    pub fn unsubscribe_agent(&self, handle: &AgentHandle) -> ReactorResult<()> {
        let mut first_error = None;
        for subscription in &handle.subscriptions {
            if let Err(e) = self.subscriptions.unregister(subscription) {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }
        tracing::info!(agent = %handle.agent, "agent unsubscribed");
        Ok(())
    }

    /// Descriptor of `implementation` for `agent`, cached after the first
    /// resolution. `force` re-reads the graph and replaces the cache entry.
    pub fn resolve_descriptor(
        &self,
        agent: &str,
        kind: AgentKind,
        implementation: Addr,
        force: bool,
    ) -> ResolveResult<Arc<AgentDescriptor>> {
        self.descriptors
            .get_or_resolve(agent, implementation, force, || {
                AgentDescriptor::resolve(
                    self.core.graph.as_ref(),
                    &self.core.keynodes,
                    agent,
                    kind,
                    implementation,
                )
            })
    }

    /// Drop the cached descriptor; the next subscribe re-resolves it.
    pub fn invalidate_descriptor(&self, agent: &str, implementation: Addr) -> bool {
        self.descriptors.invalidate(agent, implementation)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Create a non-initiated action of `class`.
    pub fn create_action(&self, class: Addr) -> ActionResult<ActionBuilder> {
        self.core.create_action(class)
    }

    /// View over an existing action.
    pub fn action(&self, addr: Addr) -> ActionResult<Action> {
        self.core.action(addr)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Wait until no dispatched callback is queued or running.
    pub fn quiesce(&self, timeout: Duration) -> bool {
        self.runtime.quiesce(timeout)
    }

    /// Detach from the graph, drain queued callbacks and stop the workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.runtime.is_shut_down() {
            return;
        }
        self.core.graph.set_observer(None);
        self.runtime.shutdown();
        self.subscriptions.clear();
        tracing::info!("reactor shut down");
    }

    fn check_element(&self, element: Addr) -> ReactorResult<()> {
        if !self.core.graph.is_element(element) {
            return Err(SubscriptionError::InvalidSubscriptionElement {
                addr: element.get(),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("runtime", &self.runtime)
            .field("subscriptions", &self.subscriptions)
            .field("descriptors", &self.descriptors.len())
            .finish()
    }
}
