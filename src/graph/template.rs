//! Structural templates and the generic matcher behind
//! [`GraphAccess::match_template`](super::GraphAccess::match_template).
//!
//! A [`Template`] is an ordered list of `source -connector-> target` triples
//! whose positions are fixed addresses or named variables. Matching is a
//! backtracking search that always expands the triple with the most bound
//! positions next, so pre-bound parameters prune the search early.
//!
//! Variable types follow the graph's convention: a variable typed
//! `Node(Var)` or `Connector(AccessPosPerm, Var)` matches the *constant*
//! element of the same kind, never the variable elements that make up a
//! condition structure.

use std::collections::{HashMap, HashSet};

use crate::addr::Addr;
use crate::error::{GraphError, GraphResult};

use super::{Connector, ConnectorPattern, ConnectorType, ElementType, GraphAccess};

/// One position of a template triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateItem {
    /// A known element.
    Fixed(Addr),
    /// A variable, optionally constrained by type. Repeated declarations of
    /// the same name must bind the same element.
    Var {
        name: String,
        ty: Option<ElementType>,
    },
    /// A reference to a variable declared elsewhere (or pre-bound by params).
    Ref(String),
}

impl TemplateItem {
    pub fn fixed(addr: Addr) -> Self {
        Self::Fixed(addr)
    }

    pub fn var(name: impl Into<String>, ty: ElementType) -> Self {
        Self::Var {
            name: name.into(),
            ty: Some(ty),
        }
    }

    /// Untyped variable.
    pub fn any(name: impl Into<String>) -> Self {
        Self::Var {
            name: name.into(),
            ty: None,
        }
    }

    pub fn var_ref(name: impl Into<String>) -> Self {
        Self::Ref(name.into())
    }

    fn name(&self) -> Option<&str> {
        match self {
            Self::Fixed(_) => None,
            Self::Var { name, .. } | Self::Ref(name) => Some(name),
        }
    }

    fn element_type(&self) -> Option<ElementType> {
        match self {
            Self::Var { ty, .. } => *ty,
            _ => None,
        }
    }

    fn resolve(&self, bound: &HashMap<String, Addr>) -> Option<Addr> {
        match self {
            Self::Fixed(addr) => Some(*addr),
            Self::Var { name, .. } | Self::Ref(name) => bound.get(name).copied(),
        }
    }
}

/// `source -connector-> target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateTriple {
    pub source: TemplateItem,
    pub connector: TemplateItem,
    pub target: TemplateItem,
}

/// An ordered set of triples to match against the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    triples: Vec<TemplateTriple>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `source -connector-> target` triple.
    pub fn triple(
        &mut self,
        source: TemplateItem,
        connector: TemplateItem,
        target: TemplateItem,
    ) -> &mut Self {
        self.triples.push(TemplateTriple {
            source,
            connector,
            target,
        });
        self
    }

    /// Append `source -connector-> target` plus `relation -relation_connector-> connector`.
    ///
    /// `connector` must be a named variable so the second triple can refer to it.
    pub fn quintuple(
        &mut self,
        source: TemplateItem,
        connector: TemplateItem,
        target: TemplateItem,
        relation_connector: TemplateItem,
        relation: TemplateItem,
    ) -> &mut Self {
        let connector_ref = match connector.name() {
            Some(name) => TemplateItem::Ref(name.to_string()),
            None => connector.clone(),
        };
        self.triple(source, connector, target);
        self.triple(relation, relation_connector, connector_ref)
    }

    pub fn triples(&self) -> &[TemplateTriple] {
        &self.triples
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Name used for a variable element of a graph-resident structure.
    pub fn structure_var_name(addr: Addr) -> String {
        format!("_{}", addr.get())
    }

    /// Build a template from a structure stored in the graph.
    ///
    /// The structure is a node with constant access connectors to its members.
    /// Every member connector becomes a triple. Variable elements become
    /// variables named by [`Template::structure_var_name`], constants are fixed.
    pub fn from_structure<G: GraphAccess + ?Sized>(
        graph: &G,
        structure: Addr,
    ) -> GraphResult<Self> {
        if !graph.is_element(structure) {
            return Err(GraphError::ElementNotFound {
                addr: structure.get(),
            });
        }

        let item = |addr: Addr| -> GraphResult<TemplateItem> {
            let ty = graph
                .element_type(addr)
                .ok_or(GraphError::ElementNotFound { addr: addr.get() })?;
            Ok(if ty.is_var() {
                TemplateItem::var(Self::structure_var_name(addr), ty)
            } else {
                TemplateItem::Fixed(addr)
            })
        };

        let mut template = Self::new();
        for member in graph
            .iterate_connectors(&ConnectorPattern::outgoing(structure, ConnectorType::ACCESS_CONST))
        {
            if let Ok(connector) = graph.connector(member.target) {
                template.triple(
                    item(connector.source)?,
                    item(connector.addr)?,
                    item(connector.target)?,
                );
            }
        }

        if template.is_empty() {
            return Err(GraphError::InvalidTemplate {
                structure: structure.get(),
                message: "structure contains no connectors".into(),
            });
        }
        Ok(template)
    }

    fn check_references(&self, params: &TemplateParams) -> GraphResult<()> {
        let declared: HashSet<&str> = self
            .triples
            .iter()
            .flat_map(|t| [&t.source, &t.connector, &t.target])
            .filter_map(|item| match item {
                TemplateItem::Var { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        for triple in &self.triples {
            for item in [&triple.source, &triple.connector, &triple.target] {
                if let TemplateItem::Ref(name) = item
                    && !declared.contains(name.as_str())
                    && !params.0.contains_key(name)
                {
                    return Err(GraphError::UnboundVariable { name: name.clone() });
                }
            }
        }
        Ok(())
    }
}

/// Variables bound before the search starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParams(HashMap<String, Addr>);

impl TemplateParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, addr: Addr) -> Self {
        self.0.insert(name.into(), addr);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, addr: Addr) {
        self.0.insert(name.into(), addr);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One complete match: variable name → element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(HashMap<String, Addr>);

impl Bindings {
    pub fn get(&self, name: &str) -> Option<Addr> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Find every way `template` matches the graph with `params` pre-bound.
///
/// The result is finite and the search holds no state between calls.
pub fn search<G: GraphAccess + ?Sized>(
    graph: &G,
    template: &Template,
    params: &TemplateParams,
) -> GraphResult<Vec<Bindings>> {
    template.check_references(params)?;
    let mut matcher = Matcher {
        graph,
        template,
        bound: params.0.clone(),
        done: vec![false; template.len()],
        results: Vec::new(),
    };
    matcher.expand();
    Ok(matcher.results)
}

struct Matcher<'a, G: GraphAccess + ?Sized> {
    graph: &'a G,
    template: &'a Template,
    bound: HashMap<String, Addr>,
    done: Vec<bool>,
    results: Vec<Bindings>,
}

impl<G: GraphAccess + ?Sized> Matcher<'_, G> {
    fn next_triple(&self) -> Option<usize> {
        self.template
            .triples
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.done[*i])
            .max_by_key(|(i, t)| {
                let bound = [&t.source, &t.connector, &t.target]
                    .iter()
                    .filter(|item| item.resolve(&self.bound).is_some())
                    .count();
                // Prefer earlier triples on ties.
                (bound, usize::MAX - i)
            })
            .map(|(i, _)| i)
    }

    fn candidates(&self, triple: &TemplateTriple) -> Vec<Connector> {
        let connector_ty = match triple.connector.element_type() {
            Some(ElementType::Connector(ty)) => Some(ty.as_const()),
            _ => None,
        };

        if let Some(addr) = triple.connector.resolve(&self.bound) {
            return self
                .graph
                .connector(addr)
                .ok()
                .filter(|c| connector_ty.is_none_or(|ty| ty == c.ty))
                .into_iter()
                .collect();
        }

        self.graph.iterate_connectors(&ConnectorPattern {
            source: triple.source.resolve(&self.bound),
            ty: connector_ty,
            target: triple.target.resolve(&self.bound),
        })
    }

    /// Bind `item` to `addr`, recording newly bound names in `fresh`.
    fn unify(&mut self, item: &TemplateItem, addr: Addr, fresh: &mut Vec<String>) -> bool {
        let (name, ty) = match item {
            TemplateItem::Fixed(fixed) => return *fixed == addr,
            TemplateItem::Var { name, ty } => (name, *ty),
            TemplateItem::Ref(name) => (name, None),
        };
        if let Some(existing) = self.bound.get(name) {
            return *existing == addr;
        }
        if let Some(ty) = ty
            && self.graph.element_type(addr) != Some(ty.as_const())
        {
            return false;
        }
        self.bound.insert(name.clone(), addr);
        fresh.push(name.clone());
        true
    }

    fn expand(&mut self) {
        let Some(index) = self.next_triple() else {
            self.results.push(Bindings(self.bound.clone()));
            return;
        };
        let triple = self.template.triples[index].clone();

        for candidate in self.candidates(&triple) {
            let mut fresh = Vec::new();
            let ok = self.unify(&triple.source, candidate.source, &mut fresh)
                && self.unify(&triple.connector, candidate.addr, &mut fresh)
                && self.unify(&triple.target, candidate.target, &mut fresh);
            if ok {
                self.done[index] = true;
                self.expand();
                self.done[index] = false;
            }
            for name in fresh {
                self.bound.remove(&name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Constness, MemoryGraph};

    fn node(g: &MemoryGraph) -> Addr {
        g.create_node(Constness::Const).unwrap()
    }

    #[test]
    fn matches_simple_membership() {
        let g = MemoryGraph::new();
        let class = node(&g);
        let a = node(&g);
        let b = node(&g);
        g.create_connector(ConnectorType::ACCESS_CONST, class, a).unwrap();
        g.create_connector(ConnectorType::ACCESS_CONST, class, b).unwrap();

        let mut t = Template::new();
        t.triple(
            TemplateItem::fixed(class),
            TemplateItem::var("_arc", ElementType::Connector(ConnectorType::ACCESS_VAR)),
            TemplateItem::var("_x", ElementType::NODE_VAR),
        );
        let results = g.match_template(&t, &TemplateParams::new()).unwrap();
        assert_eq!(results.len(), 2);

        let bound = g
            .match_template(&t, &TemplateParams::new().bind("_x", b))
            .unwrap();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].get("_x"), Some(b));
    }

    #[test]
    fn quintuple_matches_role_relation() {
        let g = MemoryGraph::new();
        let rrel_1 = node(&g);
        let action = node(&g);
        let arg = node(&g);
        let other = node(&g);
        let c = g.create_connector(ConnectorType::ACCESS_CONST, action, arg).unwrap();
        g.create_connector(ConnectorType::ACCESS_CONST, rrel_1, c).unwrap();
        g.create_connector(ConnectorType::ACCESS_CONST, action, other).unwrap();

        let mut t = Template::new();
        t.quintuple(
            TemplateItem::fixed(action),
            TemplateItem::var("_c", ElementType::Connector(ConnectorType::ACCESS_VAR)),
            TemplateItem::any("_arg"),
            TemplateItem::var("_r", ElementType::Connector(ConnectorType::ACCESS_VAR)),
            TemplateItem::fixed(rrel_1),
        );
        let results = g.match_template(&t, &TemplateParams::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("_arg"), Some(arg));
    }

    #[test]
    fn var_types_do_not_match_var_elements() {
        let g = MemoryGraph::new();
        let class = node(&g);
        let v = g.create_node(Constness::Var).unwrap();
        g.create_connector(ConnectorType::ACCESS_VAR, class, v).unwrap();

        let mut t = Template::new();
        t.triple(
            TemplateItem::fixed(class),
            TemplateItem::var("_arc", ElementType::Connector(ConnectorType::ACCESS_VAR)),
            TemplateItem::var("_x", ElementType::NODE_VAR),
        );
        assert!(g.match_template(&t, &TemplateParams::new()).unwrap().is_empty());
    }

    #[test]
    fn repeated_variable_must_agree() {
        let g = MemoryGraph::new();
        let a = node(&g);
        let b = node(&g);
        g.create_connector(ConnectorType::ACCESS_CONST, a, b).unwrap();
        g.create_connector(ConnectorType::ACCESS_CONST, a, a).unwrap();

        let mut t = Template::new();
        t.triple(
            TemplateItem::any("_x"),
            TemplateItem::any("_c"),
            TemplateItem::var_ref("_x"),
        );
        let results = g.match_template(&t, &TemplateParams::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("_x"), Some(a));
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let g = MemoryGraph::new();
        let a = node(&g);
        let mut t = Template::new();
        t.triple(
            TemplateItem::fixed(a),
            TemplateItem::any("_c"),
            TemplateItem::var_ref("_missing"),
        );
        assert!(matches!(
            g.match_template(&t, &TemplateParams::new()),
            Err(GraphError::UnboundVariable { .. })
        ));
        assert!(g
            .match_template(&t, &TemplateParams::new().bind("_missing", a))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn builds_from_structure() {
        let g = MemoryGraph::new();
        let structure = node(&g);
        let class = node(&g);
        let v = g.create_node(Constness::Var).unwrap();
        let arc = g.create_connector(ConnectorType::ACCESS_VAR, class, v).unwrap();
        for member in [class, v, arc] {
            g.create_connector(ConnectorType::ACCESS_CONST, structure, member).unwrap();
        }

        let t = Template::from_structure(&g, structure).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.triples()[0].source, TemplateItem::Fixed(class));
        assert_eq!(
            t.triples()[0].target,
            TemplateItem::var(Template::structure_var_name(v), ElementType::NODE_VAR)
        );

        let instance = node(&g);
        assert!(g.match_template(&t, &TemplateParams::new()).unwrap().is_empty());
        g.create_connector(ConnectorType::ACCESS_CONST, class, instance).unwrap();
        let results = g.match_template(&t, &TemplateParams::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get(&Template::structure_var_name(v)), Some(instance));
    }

    #[test]
    fn empty_structure_is_rejected() {
        let g = MemoryGraph::new();
        let structure = node(&g);
        assert!(matches!(
            Template::from_structure(&g, structure),
            Err(GraphError::InvalidTemplate { .. })
        ));
    }
}
