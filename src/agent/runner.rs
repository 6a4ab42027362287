//! Per-event agent execution: initiation check, program, result check and
//! the single terminal write.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::action::{Action, Completion};
use crate::addr::Addr;
use crate::error::ActionError;
use crate::event::subscription::Callback;
use crate::event::{ElementaryEvent, EventKind};
use crate::graph::{ElementType, GraphAccess, Template, TemplateItem, TemplateParams};
use crate::reactor::ReactorCore;

use super::{Agent, AgentContext, AgentDescriptor, AgentKind};

/// An agent bound to its descriptor; one per agent subscription set.
pub(crate) struct AgentBinding {
    agent: Arc<dyn Agent>,
    descriptor: Arc<AgentDescriptor>,
    core: Arc<ReactorCore>,
}

impl AgentBinding {
    pub(crate) fn new(
        agent: Arc<dyn Agent>,
        descriptor: Arc<AgentDescriptor>,
        core: Arc<ReactorCore>,
    ) -> Self {
        Self {
            agent,
            descriptor,
            core,
        }
    }

    pub(crate) fn into_callback(self: Arc<Self>) -> Callback {
        Arc::new(move |event: &ElementaryEvent| self.handle(event))
    }

    fn handle(&self, event: &ElementaryEvent) {
        let span = tracing::debug_span!(
            "agent",
            name = %self.descriptor.agent,
            class = %event.class,
            element = %event.subscription_element,
        );
        let _guard = span.enter();
        let cx = AgentContext::new(&self.core, &self.descriptor);

        let initiated = match self.descriptor.kind {
            AgentKind::Action => match self.initiated_action(event) {
                Some(action) => Some(action),
                None => return,
            },
            AgentKind::Event if self.touches_record(event) => return,
            AgentKind::Event => None,
        };

        match catch_unwind(AssertUnwindSafe(|| self.agent.check_initiation(&cx, event))) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("initiation condition not met");
                return;
            }
            Err(_) => {
                tracing::warn!("initiation check panicked; event declined");
                return;
            }
        }

        let action = match initiated {
            Some(action) => action,
            None => match self.event_action(event) {
                Ok(action) => action,
                Err(e) => {
                    tracing::error!(error = %e, "failed to create action record");
                    return;
                }
            },
        };

        self.core.actions.mark_running(action.addr());
        let completion = self.execute(&cx, event, &action);
        match action.finish(completion) {
            Ok(()) => {}
            Err(ActionError::ActionAlreadyFinished { .. }) => {
                tracing::warn!(action = %action.addr(), "action was finished by its program");
            }
            Err(e) => tracing::error!(action = %action.addr(), error = %e, "terminal write failed"),
        }
    }

    /// The action an `action_initiated` event refers to, if this agent
    /// should look at it.
    fn initiated_action(&self, event: &ElementaryEvent) -> Option<Action> {
        let addr = event.other_element?;
        let action = self.core.action_view(addr);
        if let Some(class) = self.descriptor.action_class
            && !action.belongs_to(class)
        {
            tracing::trace!(action = %addr, "action of another class");
            return None;
        }
        if action.is_finished() {
            tracing::debug!(action = %addr, "action already finished");
            return None;
        }
        Some(action)
    }

    /// A connector added to or from an event record, or a role marker on
    /// one of its argument arcs. Records are tagged before any such
    /// connector exists, so the check does not depend on dispatch timing.
    fn touches_record(&self, event: &ElementaryEvent) -> bool {
        if event.kind() != EventKind::AddConnector {
            return false;
        }
        let Some(other) = event.other_element else {
            return false;
        };
        if self.is_record(other) {
            return true;
        }
        self.core
            .graph
            .connector(other)
            .is_ok_and(|c| self.is_record(c.source))
    }

    fn is_record(&self, addr: Addr) -> bool {
        self.core.action_view(addr).belongs_to(self.core.keynodes.event_record)
    }

    /// Record for an event agent: arguments are the subscription element,
    /// the connector and the other element, as far as they still exist.
    fn event_action(&self, event: &ElementaryEvent) -> crate::error::ActionResult<Action> {
        let class = self
            .descriptor
            .action_class
            .unwrap_or(self.core.keynodes.action);
        let action = self.core.create_event_record(class)?;
        let graph = self.core.graph.as_ref();
        let arguments = [
            Some(event.subscription_element),
            event.connector,
            event.other_element,
        ];
        for (i, argument) in arguments.into_iter().enumerate() {
            if let Some(addr) = argument
                && graph.is_element(addr)
            {
                action.set_argument(i + 1, addr)?;
            }
        }
        Ok(action)
    }

    fn execute(&self, cx: &AgentContext<'_>, event: &ElementaryEvent, action: &Action) -> Completion {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.agent.run(cx, event, action)));
        match outcome {
            Ok(Ok(Completion::Success)) => {
                let holds = catch_unwind(AssertUnwindSafe(|| {
                    self.agent.check_result(cx, event, action)
                }))
                .unwrap_or(false);
                if holds {
                    Completion::Success
                } else {
                    tracing::debug!(action = %action.addr(), "result condition not met");
                    Completion::Unsuccessful
                }
            }
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                tracing::warn!(action = %action.addr(), error = %e, "agent program failed");
                Completion::Error
            }
            Err(_) => {
                tracing::warn!(action = %action.addr(), "agent program panicked");
                Completion::Error
            }
        }
    }
}

/// Evaluate a condition template with the event's elements bound.
///
/// A missing template always holds. Search errors count as "does not hold".
pub(crate) fn condition_holds(
    graph: &dyn GraphAccess,
    template: Option<&Template>,
    event: &ElementaryEvent,
) -> bool {
    let Some(template) = template else {
        return true;
    };
    match graph.match_template(template, &event_params(template, event)) {
        Ok(results) => !results.is_empty(),
        Err(e) => {
            tracing::warn!(error = %e, "condition template failed");
            false
        }
    }
}

/// Bind the first triple hanging off the subscription element in the event's
/// direction to the event connector and its far end.
///
/// Only connector-creation events are bound; for erase and content events the
/// connector is gone or absent and the template is matched as declared.
pub(crate) fn event_params(template: &Template, event: &ElementaryEvent) -> TemplateParams {
    let mut params = TemplateParams::new();
    if event.kind() != EventKind::AddConnector {
        return params;
    }
    let (Some(connector), Some(other), Some(connector_type)) =
        (event.connector, event.other_element, event.connector_type)
    else {
        return params;
    };
    let subscription = TemplateItem::Fixed(event.subscription_element);

    for triple in template.triples() {
        let (anchor, far) = if event.class.is_outgoing() {
            (&triple.source, &triple.target)
        } else {
            (&triple.target, &triple.source)
        };
        if *anchor != subscription {
            continue;
        }
        let TemplateItem::Var { name, ty } = &triple.connector else {
            continue;
        };
        if let Some(ElementType::Connector(ty)) = ty
            && ty.as_const() != connector_type
        {
            continue;
        }
        match far {
            TemplateItem::Fixed(addr) if *addr != other => continue,
            TemplateItem::Fixed(_) => {}
            TemplateItem::Var { name: far_name, .. } | TemplateItem::Ref(far_name) => {
                params.insert(far_name.clone(), other);
            }
        }
        params.insert(name.clone(), connector);
        break;
    }
    params
}
