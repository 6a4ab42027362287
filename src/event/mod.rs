//! Elementary events: immutable records of a single graph mutation as seen
//! from one subscription element.
//!
//! - [`EventClass`]: the closed set of event classes agents can watch
//! - [`ElementaryEvent`]: one event, consumed once by every matching subscription
//! - [`SubscriptionTable`]: (event class, element) → active subscriptions
//! - [`EventEmitter`]: turns store mutations into events and hands them to
//!   the dispatch runtime

pub mod emitter;
pub mod subscription;

use serde::{Deserialize, Serialize};

use crate::addr::Addr;
use crate::graph::{ConnectorType, Mutation};

pub use emitter::EventEmitter;
pub use subscription::{Subscription, SubscriptionHandle, SubscriptionId, SubscriptionTable};

/// Coarse kind of mutation behind an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    AddConnector,
    RemoveConnector,
    EraseElement,
    ContentChanged,
}

/// Event classes, each backed by a keynode of the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventClass {
    /// A connector leaving the subscription element was created.
    AfterGenerateOutgoingArc,
    /// A connector entering the subscription element was created.
    AfterGenerateIncomingArc,
    /// A connector leaving the subscription element is being erased.
    BeforeEraseOutgoingArc,
    /// A connector entering the subscription element is being erased.
    BeforeEraseIncomingArc,
    /// The subscription element itself is being erased.
    BeforeEraseElement,
    /// The content of the subscription element (a link) is changing.
    BeforeChangeLinkContent,
}

impl EventClass {
    pub const ALL: [EventClass; 6] = [
        Self::AfterGenerateOutgoingArc,
        Self::AfterGenerateIncomingArc,
        Self::BeforeEraseOutgoingArc,
        Self::BeforeEraseIncomingArc,
        Self::BeforeEraseElement,
        Self::BeforeChangeLinkContent,
    ];

    /// System identifier of the keynode representing this class.
    pub fn identifier(self) -> &'static str {
        match self {
            Self::AfterGenerateOutgoingArc => "sc_event_after_generate_outgoing_arc",
            Self::AfterGenerateIncomingArc => "sc_event_after_generate_incoming_arc",
            Self::BeforeEraseOutgoingArc => "sc_event_before_erase_outgoing_arc",
            Self::BeforeEraseIncomingArc => "sc_event_before_erase_incoming_arc",
            Self::BeforeEraseElement => "sc_event_before_erase_element",
            Self::BeforeChangeLinkContent => "sc_event_before_change_link_content",
        }
    }

    pub fn kind(self) -> EventKind {
        match self {
            Self::AfterGenerateOutgoingArc | Self::AfterGenerateIncomingArc => {
                EventKind::AddConnector
            }
            Self::BeforeEraseOutgoingArc | Self::BeforeEraseIncomingArc => {
                EventKind::RemoveConnector
            }
            Self::BeforeEraseElement => EventKind::EraseElement,
            Self::BeforeChangeLinkContent => EventKind::ContentChanged,
        }
    }

    /// Whether the subscription element is the source of the event connector.
    pub fn is_outgoing(self) -> bool {
        matches!(
            self,
            Self::AfterGenerateOutgoingArc | Self::BeforeEraseOutgoingArc
        )
    }

    /// Whether the subscription element is the target of the event connector.
    pub fn is_incoming(self) -> bool {
        matches!(
            self,
            Self::AfterGenerateIncomingArc | Self::BeforeEraseIncomingArc
        )
    }
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

/// One mutation, as seen from one subscription element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementaryEvent {
    pub class: EventClass,
    pub subscription_element: Addr,
    /// The connector that was added or removed.
    pub connector: Option<Addr>,
    pub connector_type: Option<ConnectorType>,
    /// The far end of the connector.
    pub other_element: Option<Addr>,
}

impl ElementaryEvent {
    pub fn kind(&self) -> EventKind {
        self.class.kind()
    }

    /// Every event a store mutation produces, one per affected subscription point.
    pub fn from_mutation(mutation: &Mutation) -> Vec<Self> {
        match *mutation {
            Mutation::ConnectorCreated(c) => vec![
                Self::connector_event(EventClass::AfterGenerateOutgoingArc, c.source, c.target, &c),
                Self::connector_event(EventClass::AfterGenerateIncomingArc, c.target, c.source, &c),
            ],
            Mutation::ConnectorErasing(c) => vec![
                Self::connector_event(EventClass::BeforeEraseOutgoingArc, c.source, c.target, &c),
                Self::connector_event(EventClass::BeforeEraseIncomingArc, c.target, c.source, &c),
            ],
            Mutation::ElementErasing { addr } => vec![Self::element_event(
                EventClass::BeforeEraseElement,
                addr,
            )],
            Mutation::ContentChanged { link } => vec![Self::element_event(
                EventClass::BeforeChangeLinkContent,
                link,
            )],
        }
    }

    fn connector_event(
        class: EventClass,
        element: Addr,
        other: Addr,
        connector: &crate::graph::Connector,
    ) -> Self {
        Self {
            class,
            subscription_element: element,
            connector: Some(connector.addr),
            connector_type: Some(connector.ty),
            other_element: Some(other),
        }
    }

    fn element_event(class: EventClass, element: Addr) -> Self {
        Self {
            class,
            subscription_element: element,
            connector: None,
            connector_type: None,
            other_element: None,
        }
    }
}
