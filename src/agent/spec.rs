//! Writing agent specifications and condition structures into the graph.

use crate::addr::Addr;
use crate::error::GraphResult;
use crate::event::EventClass;
use crate::graph::{ConnectorPattern, ConnectorType, Constness, GraphAccess};
use crate::keynodes::Keynodes;

/// Builds the graph-resident specification an [`AgentDescriptor`] is
/// resolved from.
///
/// [`AgentDescriptor`]: super::AgentDescriptor
#[derive(Debug, Clone)]
pub struct AgentSpecBuilder {
    event_class: EventClass,
    subscription_element: Addr,
    implementation: Option<Addr>,
    abstract_agent: Option<Addr>,
    action_class: Option<Addr>,
    conditions: Option<(Addr, Addr)>,
}

impl AgentSpecBuilder {
    /// An agent watching `event_class` at `element`.
    pub fn new(event_class: EventClass, element: Addr) -> Self {
        Self {
            event_class,
            subscription_element: element,
            implementation: None,
            abstract_agent: None,
            action_class: None,
            conditions: None,
        }
    }

    /// An action agent for actions of `action_class`.
    pub fn for_action(keynodes: &Keynodes, action_class: Addr) -> Self {
        Self::new(EventClass::AfterGenerateOutgoingArc, keynodes.action_initiated)
            .action_class(action_class)
    }

    /// Use an existing implementation node instead of creating one.
    pub fn implementation(mut self, addr: Addr) -> Self {
        self.implementation = Some(addr);
        self
    }

    /// Include the implementation in an existing abstract agent.
    pub fn abstract_agent(mut self, addr: Addr) -> Self {
        self.abstract_agent = Some(addr);
        self
    }

    pub fn action_class(mut self, addr: Addr) -> Self {
        self.action_class = Some(addr);
        self
    }

    /// Initiation and result condition structures.
    pub fn conditions(mut self, initiation: Addr, result: Addr) -> Self {
        self.conditions = Some((initiation, result));
        self
    }

    /// Write the specification and return the implementation address.
    ///
    /// An implementation that is already included in an abstract agent is
    /// returned unchanged.
    pub fn build<G: GraphAccess + ?Sized>(&self, graph: &G, keynodes: &Keynodes) -> GraphResult<Addr> {
        if let Some(implementation) = self.implementation
            && is_included(graph, keynodes, implementation)
        {
            tracing::debug!(%implementation, "agent specification already present");
            return Ok(implementation);
        }

        let implementation = match self.implementation {
            Some(addr) => addr,
            None => graph.create_node(Constness::Const)?,
        };
        let abstract_agent = match self.abstract_agent {
            Some(addr) => addr,
            None => {
                let addr = graph.create_node(Constness::Const)?;
                graph.create_connector(
                    ConnectorType::ACCESS_CONST,
                    keynodes.abstract_sc_agent,
                    addr,
                )?;
                addr
            }
        };

        relate(graph, abstract_agent, implementation, keynodes.nrel_inclusion)?;

        let class = keynodes.event_class(self.event_class);
        let primary =
            graph.create_connector(ConnectorType::D_COMMON_CONST, class, self.subscription_element)?;
        relate(
            graph,
            abstract_agent,
            primary,
            keynodes.nrel_primary_initiation_condition,
        )?;

        if let Some(action_class) = self.action_class {
            relate(
                graph,
                implementation,
                action_class,
                keynodes.nrel_sc_agent_action_class,
            )?;
        }

        if let Some((initiation, result)) = self.conditions {
            let pair = graph.create_connector(ConnectorType::D_COMMON_CONST, initiation, result)?;
            relate(
                graph,
                abstract_agent,
                pair,
                keynodes.nrel_initiation_condition_and_result,
            )?;
        }

        tracing::debug!(
            %implementation,
            %abstract_agent,
            class = %self.event_class,
            element = %self.subscription_element,
            "agent specification written"
        );
        Ok(implementation)
    }
}

/// `source =c=> target` with `relation -> c`.
fn relate<G: GraphAccess + ?Sized>(
    graph: &G,
    source: Addr,
    target: Addr,
    relation: Addr,
) -> GraphResult<Addr> {
    let connector = graph.create_connector(ConnectorType::D_COMMON_CONST, source, target)?;
    graph.create_connector(ConnectorType::ACCESS_CONST, relation, connector)?;
    Ok(connector)
}

fn is_included<G: GraphAccess + ?Sized>(graph: &G, keynodes: &Keynodes, implementation: Addr) -> bool {
    graph
        .iterate_connectors(&ConnectorPattern::incoming(
            ConnectorType::D_COMMON_CONST,
            implementation,
        ))
        .iter()
        .any(|c| {
            !graph
                .iterate_connectors(&ConnectorPattern::triple(
                    keynodes.nrel_inclusion,
                    ConnectorType::ACCESS_CONST,
                    c.addr,
                ))
                .is_empty()
        })
}

/// Assembles a condition structure: a node whose access connectors point at
/// the elements and connectors of a pattern.
///
/// Variable nodes and connectors become template variables when the
/// structure is read back; constants stay fixed.
pub struct StructureBuilder<'g, G: GraphAccess + ?Sized> {
    graph: &'g G,
    structure: Addr,
}

impl<'g, G: GraphAccess + ?Sized> StructureBuilder<'g, G> {
    pub fn new(graph: &'g G) -> GraphResult<Self> {
        let structure = graph.create_node(Constness::Const)?;
        Ok(Self { graph, structure })
    }

    /// The structure node.
    pub fn addr(&self) -> Addr {
        self.structure
    }

    /// Add an existing element.
    pub fn include(&self, element: Addr) -> GraphResult<()> {
        self.graph
            .create_connector(ConnectorType::ACCESS_CONST, self.structure, element)?;
        Ok(())
    }

    /// A fresh variable node, included in the structure.
    pub fn var_node(&self) -> GraphResult<Addr> {
        let node = self.graph.create_node(Constness::Var)?;
        self.include(node)?;
        Ok(node)
    }

    /// A connector between `source` and `target`, included together with both
    /// ends. `ty` is usually a variable type.
    pub fn var_connector(&self, ty: ConnectorType, source: Addr, target: Addr) -> GraphResult<Addr> {
        let connector = self.graph.create_connector(ty, source, target)?;
        for element in [source, target, connector] {
            if !self.contains(element) {
                self.include(element)?;
            }
        }
        Ok(connector)
    }

    fn contains(&self, element: Addr) -> bool {
        !self
            .graph
            .iterate_connectors(&ConnectorPattern::triple(
                self.structure,
                ConnectorType::ACCESS_CONST,
                element,
            ))
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraph, Template};

    #[test]
    fn build_is_idempotent_for_existing_implementation() {
        let g = MemoryGraph::new();
        let k = Keynodes::resolve(&g, 1).unwrap();
        let watched = g.create_node(Constness::Const).unwrap();
        let spec = AgentSpecBuilder::new(EventClass::AfterGenerateOutgoingArc, watched);

        let implementation = spec.build(&g, &k).unwrap();
        let before = g.connector_count();
        let again = spec.clone().implementation(implementation).build(&g, &k).unwrap();
        assert_eq!(again, implementation);
        assert_eq!(g.connector_count(), before);
    }

    #[test]
    fn structure_reads_back_as_template() {
        let g = MemoryGraph::new();
        let class = g.create_node(Constness::Const).unwrap();
        let s = StructureBuilder::new(&g).unwrap();
        let x = s.var_node().unwrap();
        let y = s.var_node().unwrap();
        s.var_connector(ConnectorType::ACCESS_VAR, class, x).unwrap();
        s.var_connector(ConnectorType::D_COMMON_VAR, x, y).unwrap();

        let t = Template::from_structure(&g, s.addr()).unwrap();
        assert_eq!(t.len(), 2);
    }
}
