//! Graph access facade: the structural store the reactor observes and queries.
//!
//! The store holds three kinds of elements, all addressed by [`Addr`]:
//!
//! - **Nodes**: plain elements with no payload
//! - **Connectors**: directed, typed edges whose ends may be any element,
//!   including other connectors
//! - **Links**: leaf elements carrying [`Content`]
//!
//! The reactor only depends on the [`GraphAccess`] trait. [`MemoryGraph`] is the
//! in-memory implementation shipped with the crate.

pub mod memory;
pub mod template;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::addr::Addr;
use crate::error::GraphResult;

pub use memory::MemoryGraph;
pub use template::{Bindings, Template, TemplateItem, TemplateParams};

/// Whether an element is a constant fact or a variable inside a template structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constness {
    Const,
    Var,
}

/// Semantic kind of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorKind {
    /// Permanent positive membership (`set -> element`).
    AccessPosPerm,
    /// Temporary positive membership.
    AccessPosTemp,
    /// Negative membership.
    AccessNeg,
    /// Directed common (non-role) relation pair, used with `nrel_*` relations.
    DCommon,
}

/// Full type of a connector: its kind plus constness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorType {
    pub kind: ConnectorKind,
    pub constness: Constness,
}

impl ConnectorType {
    pub const ACCESS_CONST: Self = Self::new(ConnectorKind::AccessPosPerm, Constness::Const);
    pub const ACCESS_VAR: Self = Self::new(ConnectorKind::AccessPosPerm, Constness::Var);
    pub const ACCESS_TEMP_CONST: Self = Self::new(ConnectorKind::AccessPosTemp, Constness::Const);
    pub const ACCESS_NEG_CONST: Self = Self::new(ConnectorKind::AccessNeg, Constness::Const);
    pub const D_COMMON_CONST: Self = Self::new(ConnectorKind::DCommon, Constness::Const);
    pub const D_COMMON_VAR: Self = Self::new(ConnectorKind::DCommon, Constness::Var);

    pub const fn new(kind: ConnectorKind, constness: Constness) -> Self {
        Self { kind, constness }
    }

    /// The constant counterpart of this type. Template variables match constants.
    pub fn as_const(self) -> Self {
        Self::new(self.kind, Constness::Const)
    }

    pub fn is_var(self) -> bool {
        self.constness == Constness::Var
    }
}

impl std::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let constness = match self.constness {
            Constness::Const => "const",
            Constness::Var => "var",
        };
        write!(f, "{:?}({constness})", self.kind)
    }
}

/// Type of any graph element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Node(Constness),
    Link(Constness),
    Connector(ConnectorType),
}

impl ElementType {
    pub const NODE_CONST: Self = Self::Node(Constness::Const);
    pub const NODE_VAR: Self = Self::Node(Constness::Var);
    pub const LINK_CONST: Self = Self::Link(Constness::Const);

    pub fn constness(self) -> Constness {
        match self {
            Self::Node(c) | Self::Link(c) => c,
            Self::Connector(t) => t.constness,
        }
    }

    /// The constant counterpart of this type.
    pub fn as_const(self) -> Self {
        match self {
            Self::Node(_) => Self::Node(Constness::Const),
            Self::Link(_) => Self::Link(Constness::Const),
            Self::Connector(t) => Self::Connector(t.as_const()),
        }
    }

    pub fn is_var(self) -> bool {
        self.constness() == Constness::Var
    }

    pub fn is_connector(self) -> bool {
        matches!(self, Self::Connector(_))
    }

    pub fn is_link(self) -> bool {
        matches!(self, Self::Link(_))
    }
}

/// Content stored in a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Content {
    String(String),
    Int(i64),
    Float(f64),
    Binary(Vec<u8>),
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Content {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Content {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// A connector as seen through the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connector {
    pub addr: Addr,
    pub ty: ConnectorType,
    pub source: Addr,
    pub target: Addr,
}

/// A `source -ty-> target` pattern; `None` parts match anything.
///
/// The connector type matches exactly, constness included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorPattern {
    pub source: Option<Addr>,
    pub ty: Option<ConnectorType>,
    pub target: Option<Addr>,
}

impl ConnectorPattern {
    /// Pattern matching every connector.
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern for connectors of type `ty` leaving `source`.
    pub fn outgoing(source: Addr, ty: ConnectorType) -> Self {
        Self {
            source: Some(source),
            ty: Some(ty),
            target: None,
        }
    }

    /// Pattern for connectors of type `ty` entering `target`.
    pub fn incoming(ty: ConnectorType, target: Addr) -> Self {
        Self {
            source: None,
            ty: Some(ty),
            target: Some(target),
        }
    }

    /// Fully specified `source -ty-> target` pattern.
    pub fn triple(source: Addr, ty: ConnectorType, target: Addr) -> Self {
        Self {
            source: Some(source),
            ty: Some(ty),
            target: Some(target),
        }
    }

    pub fn matches(&self, connector: &Connector) -> bool {
        self.source.is_none_or(|s| s == connector.source)
            && self.ty.is_none_or(|t| t == connector.ty)
            && self.target.is_none_or(|t| t == connector.target)
    }
}

/// A structural change reported by the store before or after it happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// A connector was created.
    ConnectorCreated(Connector),
    /// A connector is about to be erased.
    ConnectorErasing(Connector),
    /// An element (of any kind) is about to be erased.
    ElementErasing { addr: Addr },
    /// The content of a link is about to change.
    ContentChanged { link: Addr },
}

/// Receives every [`Mutation`] synchronously from inside the mutating call.
///
/// Implementations must not call back into the graph and must not block.
pub trait MutationObserver: Send + Sync {
    fn on_mutation(&self, mutation: &Mutation);
}

/// The operations the reactor consumes from a graph store.
///
/// Implementations must be safe for concurrent queries and mutations from
/// many threads.
pub trait GraphAccess: Send + Sync {
    fn create_node(&self, constness: Constness) -> GraphResult<Addr>;

    fn create_link(&self, constness: Constness) -> GraphResult<Addr>;

    /// Create `source -ty-> target`. Both ends must exist.
    fn create_connector(&self, ty: ConnectorType, source: Addr, target: Addr)
    -> GraphResult<Addr>;

    /// Erase an element together with every connector incident to it.
    fn erase_element(&self, addr: Addr) -> GraphResult<()>;

    fn element_type(&self, addr: Addr) -> Option<ElementType>;

    fn is_element(&self, addr: Addr) -> bool {
        self.element_type(addr).is_some()
    }

    /// Look up a connector by address.
    fn connector(&self, addr: Addr) -> GraphResult<Connector>;

    /// All connectors matching `pattern`, in creation order per element.
    fn iterate_connectors(&self, pattern: &ConnectorPattern) -> Vec<Connector>;

    fn get_content(&self, link: Addr) -> GraphResult<Option<Content>>;

    fn set_content(&self, link: Addr, content: Content) -> GraphResult<()>;

    /// Find an element by its system identifier.
    fn find_by_identifier(&self, idtf: &str) -> Option<Addr>;

    /// Find an element by its system identifier, creating a constant node if absent.
    fn resolve_identifier(&self, idtf: &str) -> GraphResult<Addr>;

    /// Install (or clear) the observer notified of every mutation.
    fn set_observer(&self, observer: Option<Arc<dyn MutationObserver>>);

    /// Match `template` against the graph with `params` pre-bound.
    fn match_template(
        &self,
        template: &Template,
        params: &TemplateParams,
    ) -> GraphResult<Vec<Bindings>> {
        template::search(self, template, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(raw: u64) -> Addr {
        Addr::new(raw).unwrap()
    }

    #[test]
    fn var_types_convert_to_const() {
        assert_eq!(ConnectorType::ACCESS_VAR.as_const(), ConnectorType::ACCESS_CONST);
        assert_eq!(ElementType::NODE_VAR.as_const(), ElementType::NODE_CONST);
        assert!(ElementType::Connector(ConnectorType::D_COMMON_VAR).is_var());
        assert!(!ElementType::LINK_CONST.is_var());
    }

    #[test]
    fn pattern_matching_is_exact_on_type() {
        let c = Connector {
            addr: addr(3),
            ty: ConnectorType::ACCESS_CONST,
            source: addr(1),
            target: addr(2),
        };
        assert!(ConnectorPattern::any().matches(&c));
        assert!(ConnectorPattern::outgoing(addr(1), ConnectorType::ACCESS_CONST).matches(&c));
        assert!(!ConnectorPattern::outgoing(addr(1), ConnectorType::ACCESS_VAR).matches(&c));
        assert!(!ConnectorPattern::incoming(ConnectorType::ACCESS_CONST, addr(1)).matches(&c));
        assert!(ConnectorPattern::triple(addr(1), ConnectorType::ACCESS_CONST, addr(2)).matches(&c));
    }

    #[test]
    fn content_serializes_tagged() {
        let json = serde_json::to_string(&Content::Int(100)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":100}"#);
        let back: Content = serde_json::from_str(r#"{"type":"string","value":"hi"}"#).unwrap();
        assert_eq!(back, Content::from("hi"));
    }
}
