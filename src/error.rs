//! Rich diagnostic error types for graph-reactor.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::event::EventClass;

/// Top-level error type for graph-reactor.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum ReactorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("element not found: {addr}")]
    #[diagnostic(
        code(reactor::graph::not_found),
        help(
            "The address does not name a live element. It may have been erased, \
             or it was never allocated by this graph."
        )
    )]
    ElementNotFound { addr: u64 },

    #[error("element {addr} is not a connector")]
    #[diagnostic(
        code(reactor::graph::not_a_connector),
        help("Only connectors have source and target ends. Check the element type first.")
    )]
    NotAConnector { addr: u64 },

    #[error("element {addr} is not a link")]
    #[diagnostic(
        code(reactor::graph::not_a_link),
        help("Only links carry content. Create the element with `create_link`.")
    )]
    NotALink { addr: u64 },

    #[error("element address space exhausted")]
    #[diagnostic(
        code(reactor::graph::exhausted),
        help("The address allocator ran out of u64 addresses. Something is allocating in a loop.")
    )]
    AddressSpaceExhausted,

    #[error("template variable \"{name}\" is referenced before it is declared")]
    #[diagnostic(
        code(reactor::graph::unbound_variable),
        help(
            "Declare the variable with `TemplateItem::var` in an earlier triple, \
             or pre-bind it through `TemplateParams`."
        )
    )]
    UnboundVariable { name: String },

    #[error("invalid template structure {structure}: {message}")]
    #[diagnostic(
        code(reactor::graph::invalid_template),
        help(
            "A condition structure is a node with access connectors to its members, \
             and at least one member must be a connector."
        )
    )]
    InvalidTemplate { structure: u64, message: String },
}

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Subscription errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SubscriptionError {
    #[error("\"{subscriber}\" is already subscribed to {event_class} at element {element}")]
    #[diagnostic(
        code(reactor::subscription::duplicate),
        help(
            "At most one active subscription may exist per subscriber, event class \
             and subscription element. Unsubscribe the existing handle first."
        )
    )]
    DuplicateSubscription {
        subscriber: String,
        event_class: EventClass,
        element: u64,
    },

    #[error("subscription {subscription} is not active")]
    #[diagnostic(
        code(reactor::subscription::not_subscribed),
        help("The handle was already unsubscribed, or it belongs to another subscription table.")
    )]
    NotSubscribed { subscription: u64 },

    #[error("subscription element {addr} does not exist in the graph")]
    #[diagnostic(
        code(reactor::subscription::invalid_element),
        help("Create the element before subscribing to it.")
    )]
    InvalidSubscriptionElement { addr: u64 },

    #[error("agent \"{agent}\" was subscribed without any subscription element")]
    #[diagnostic(
        code(reactor::subscription::no_elements),
        help(
            "Event agents need at least one subscription element, either passed \
             explicitly or declared by the agent implementation in the graph."
        )
    )]
    NoSubscriptionElements { agent: String },
}

/// Result type for subscription operations.
pub type SubscriptionResult<T> = std::result::Result<T, SubscriptionError>;

// ---------------------------------------------------------------------------
// Agent specification resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("agent implementation {implementation} is not included in any abstract agent")]
    #[diagnostic(
        code(reactor::resolve::no_abstract_agent),
        help(
            "Add `abstract_agent =c=> implementation` with `nrel_inclusion -> c` \
             to the knowledge base, e.g. through `AgentSpecBuilder`."
        )
    )]
    NoAbstractAgent { implementation: u64 },

    #[error("abstract agent {abstract_agent} has no primary initiation condition")]
    #[diagnostic(
        code(reactor::resolve::no_initiation_condition),
        help(
            "Declare `abstract_agent =c=> (event_class =p=> subscription_element)` \
             with `nrel_primary_initiation_condition -> c`."
        )
    )]
    NoInitiationCondition { abstract_agent: u64 },

    #[error("action agent \"{agent}\" has no action class")]
    #[diagnostic(
        code(reactor::resolve::no_action_class),
        help(
            "Action agents must declare `implementation =c=> action_class` \
             with `nrel_sc_agent_action_class -> c`, or return one from \
             `Agent::action_class` when subscribed without an implementation."
        )
    )]
    NoActionClass { agent: String },

    #[error("element {addr} is not a known event class")]
    #[diagnostic(
        code(reactor::resolve::unknown_event_class),
        help(
            "The primary initiation condition must start at one of the event class \
             keynodes, e.g. `sc_event_after_generate_outgoing_arc`."
        )
    )]
    UnknownEventClass { addr: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for descriptor resolution.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

// ---------------------------------------------------------------------------
// Action errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ActionError {
    #[error("argument address {addr} does not exist in the graph")]
    #[diagnostic(
        code(reactor::action::invalid_argument),
        help("Action arguments must be live elements. Create the element before binding it.")
    )]
    InvalidArgumentAddress { addr: u64 },

    #[error("argument ordinal {ordinal} is outside 1..={max}")]
    #[diagnostic(
        code(reactor::action::invalid_ordinal),
        help("Ordinals start at 1. Raise `actions.max_argument_ordinal` for more arguments.")
    )]
    InvalidArgumentOrdinal { ordinal: usize, max: usize },

    #[error("action {action} is already finished")]
    #[diagnostic(
        code(reactor::action::already_finished),
        help("An action's terminal state is written exactly once and never overwritten.")
    )]
    ActionAlreadyFinished { action: u64 },

    #[error("action {action} is already initiated")]
    #[diagnostic(
        code(reactor::action::already_initiated),
        help("Create a new action with `create_action` to run the same request again.")
    )]
    AlreadyInitiated { action: u64 },

    #[error("element {action} is not an action")]
    #[diagnostic(
        code(reactor::action::unknown),
        help("Actions are created with `create_action` and belong to the `action` class.")
    )]
    UnknownAction { action: u64 },

    #[error("action {action} did not finish within {timeout_ms}ms")]
    #[diagnostic(
        code(reactor::action::timeout),
        help(
            "The wait gave up; the action keeps running and may still finish later. \
             Check that an agent is subscribed for the action class, or raise the timeout."
        )
    )]
    Timeout { action: u64, timeout_ms: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for action operations.
pub type ActionResult<T> = std::result::Result<T, ActionError>;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    #[diagnostic(
        code(reactor::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}")]
    #[diagnostic(
        code(reactor::config::write),
        help("Check that the parent directory is writable.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(reactor::config::parse),
        help("The file must be valid TOML. Run `graph-reactor config init` for a template.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(reactor::config::invalid), help("Check the ReactorConfig fields. {message}"))]
    Invalid { message: String },
}

/// Result type for configuration handling.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Convenience alias for functions returning graph-reactor results.
pub type ReactorResult<T> = std::result::Result<T, ReactorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_error_converts_to_reactor_error() {
        let err = SubscriptionError::NotSubscribed { subscription: 3 };
        let top: ReactorError = err.into();
        assert!(matches!(
            top,
            ReactorError::Subscription(SubscriptionError::NotSubscribed { subscription: 3 })
        ));
    }

    #[test]
    fn resolve_error_wraps_graph_error() {
        let err: ResolveError = GraphError::ElementNotFound { addr: 9 }.into();
        assert!(matches!(
            err,
            ResolveError::Graph(GraphError::ElementNotFound { addr: 9 })
        ));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = SubscriptionError::DuplicateSubscription {
            subscriber: "echo".into(),
            event_class: EventClass::AfterGenerateOutgoingArc,
            element: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("echo"));
        assert!(msg.contains("12"));

        let err = ActionError::Timeout {
            action: 5,
            timeout_ms: 2000,
        };
        assert!(err.to_string().contains("2000ms"));
    }
}
