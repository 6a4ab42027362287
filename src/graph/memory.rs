//! In-memory graph store with adjacency indexing.
//!
//! Uses `DashMap` tables for element records, per-element outgoing/incoming
//! connector lists, and the system identifier index. A single `RwLock`
//! serialises structural mutations so that observers see them in the order
//! they happened.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::addr::{Addr, AddrAllocator};
use crate::error::{GraphError, GraphResult};

use super::{
    Connector, ConnectorPattern, ConnectorType, Constness, Content, ElementType, GraphAccess,
    Mutation, MutationObserver,
};

#[derive(Debug, Clone)]
struct ElementRecord {
    ty: ElementType,
    /// Source and target, for connectors only.
    ends: Option<(Addr, Addr)>,
    content: Option<Content>,
}

/// In-memory graph store.
///
/// Provides O(1) element lookups by address and O(degree) connector
/// iteration from either end.
pub struct MemoryGraph {
    elements: DashMap<Addr, ElementRecord>,
    /// Element → connectors leaving it, in creation order.
    outgoing: DashMap<Addr, Vec<Addr>>,
    /// Element → connectors entering it, in creation order.
    incoming: DashMap<Addr, Vec<Addr>>,
    identifiers: DashMap<String, Addr>,
    identifier_of: DashMap<Addr, String>,
    /// Held for writing by every structural mutation, for reading by iteration.
    structure: RwLock<()>,
    allocator: AddrAllocator,
    observer: RwLock<Option<Arc<dyn MutationObserver>>>,
}

impl MemoryGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            elements: DashMap::new(),
            outgoing: DashMap::new(),
            incoming: DashMap::new(),
            identifiers: DashMap::new(),
            identifier_of: DashMap::new(),
            structure: RwLock::new(()),
            allocator: AddrAllocator::new(),
            observer: RwLock::new(None),
        }
    }

    /// Number of live elements of any kind.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Number of live connectors.
    pub fn connector_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.value().ty.is_connector())
            .count()
    }

    /// The system identifier of an element, if it has one.
    pub fn identifier_of(&self, addr: Addr) -> Option<String> {
        self.identifier_of.get(&addr).map(|r| r.value().clone())
    }

    fn notify(&self, mutation: Mutation) {
        let observer = self.observer.read().expect("observer lock poisoned");
        if let Some(observer) = observer.as_ref() {
            observer.on_mutation(&mutation);
        }
    }

    fn insert_element(&self, ty: ElementType) -> GraphResult<Addr> {
        let addr = self.allocator.next_addr()?;
        self.elements.insert(
            addr,
            ElementRecord {
                ty,
                ends: None,
                content: None,
            },
        );
        Ok(addr)
    }

    fn connector_of(&self, addr: Addr) -> Option<Connector> {
        let record = self.elements.get(&addr)?;
        match (record.ty, record.ends) {
            (ElementType::Connector(ty), Some((source, target))) => Some(Connector {
                addr,
                ty,
                source,
                target,
            }),
            _ => None,
        }
    }

    /// `addr` plus every connector transitively incident to it, dependents first.
    fn erase_closure(&self, addr: Addr) -> Vec<Addr> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        // (element, children already pushed)
        let mut stack = vec![(addr, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            if !seen.insert(current) {
                continue;
            }
            stack.push((current, true));
            let incident = self
                .outgoing
                .get(&current)
                .map(|v| v.value().clone())
                .into_iter()
                .chain(self.incoming.get(&current).map(|v| v.value().clone()))
                .flatten();
            for connector in incident {
                if !seen.contains(&connector) {
                    stack.push((connector, false));
                }
            }
        }
        order
    }

    fn detach(&self, index: &DashMap<Addr, Vec<Addr>>, element: Addr, connector: Addr) {
        if let Some(mut list) = index.get_mut(&element) {
            list.retain(|c| *c != connector);
        }
    }
}

impl GraphAccess for MemoryGraph {
    fn create_node(&self, constness: Constness) -> GraphResult<Addr> {
        let _guard = self.structure.write().expect("graph lock poisoned");
        self.insert_element(ElementType::Node(constness))
    }

    fn create_link(&self, constness: Constness) -> GraphResult<Addr> {
        let _guard = self.structure.write().expect("graph lock poisoned");
        self.insert_element(ElementType::Link(constness))
    }

    fn create_connector(
        &self,
        ty: ConnectorType,
        source: Addr,
        target: Addr,
    ) -> GraphResult<Addr> {
        let _guard = self.structure.write().expect("graph lock poisoned");
        for end in [source, target] {
            if !self.elements.contains_key(&end) {
                return Err(GraphError::ElementNotFound { addr: end.get() });
            }
        }

        let addr = self.allocator.next_addr()?;
        self.elements.insert(
            addr,
            ElementRecord {
                ty: ElementType::Connector(ty),
                ends: Some((source, target)),
                content: None,
            },
        );
        self.outgoing.entry(source).or_default().push(addr);
        self.incoming.entry(target).or_default().push(addr);

        self.notify(Mutation::ConnectorCreated(Connector {
            addr,
            ty,
            source,
            target,
        }));
        Ok(addr)
    }

    fn erase_element(&self, addr: Addr) -> GraphResult<()> {
        let _guard = self.structure.write().expect("graph lock poisoned");
        if !self.elements.contains_key(&addr) {
            return Err(GraphError::ElementNotFound { addr: addr.get() });
        }

        let doomed = self.erase_closure(addr);
        for element in &doomed {
            if let Some(connector) = self.connector_of(*element) {
                self.notify(Mutation::ConnectorErasing(connector));
            }
            self.notify(Mutation::ElementErasing { addr: *element });
        }

        for element in doomed {
            if let Some((_, record)) = self.elements.remove(&element) {
                if let Some((source, target)) = record.ends {
                    self.detach(&self.outgoing, source, element);
                    self.detach(&self.incoming, target, element);
                }
            }
            self.outgoing.remove(&element);
            self.incoming.remove(&element);
            if let Some((_, idtf)) = self.identifier_of.remove(&element) {
                self.identifiers.remove(&idtf);
            }
        }
        Ok(())
    }

    fn element_type(&self, addr: Addr) -> Option<ElementType> {
        self.elements.get(&addr).map(|r| r.value().ty)
    }

    fn connector(&self, addr: Addr) -> GraphResult<Connector> {
        match self.connector_of(addr) {
            Some(connector) => Ok(connector),
            None if self.elements.contains_key(&addr) => {
                Err(GraphError::NotAConnector { addr: addr.get() })
            }
            None => Err(GraphError::ElementNotFound { addr: addr.get() }),
        }
    }

    fn iterate_connectors(&self, pattern: &ConnectorPattern) -> Vec<Connector> {
        let _guard = self.structure.read().expect("graph lock poisoned");
        let candidates: Vec<Addr> = match (pattern.source, pattern.target) {
            (Some(source), _) => self
                .outgoing
                .get(&source)
                .map(|v| v.value().clone())
                .unwrap_or_default(),
            (None, Some(target)) => self
                .incoming
                .get(&target)
                .map(|v| v.value().clone())
                .unwrap_or_default(),
            (None, None) => {
                let mut all: Vec<Addr> = self
                    .elements
                    .iter()
                    .filter(|e| e.value().ty.is_connector())
                    .map(|e| *e.key())
                    .collect();
                all.sort_unstable();
                all
            }
        };

        candidates
            .into_iter()
            .filter_map(|c| self.connector_of(c))
            .filter(|c| pattern.matches(c))
            .collect()
    }

    fn get_content(&self, link: Addr) -> GraphResult<Option<Content>> {
        let record = self
            .elements
            .get(&link)
            .ok_or(GraphError::ElementNotFound { addr: link.get() })?;
        if !record.ty.is_link() {
            return Err(GraphError::NotALink { addr: link.get() });
        }
        Ok(record.content.clone())
    }

    fn set_content(&self, link: Addr, content: Content) -> GraphResult<()> {
        let _guard = self.structure.write().expect("graph lock poisoned");
        match self.elements.get(&link) {
            Some(record) if record.ty.is_link() => {}
            Some(_) => return Err(GraphError::NotALink { addr: link.get() }),
            None => return Err(GraphError::ElementNotFound { addr: link.get() }),
        }

        self.notify(Mutation::ContentChanged { link });
        if let Some(mut record) = self.elements.get_mut(&link) {
            record.content = Some(content);
        }
        Ok(())
    }

    fn find_by_identifier(&self, idtf: &str) -> Option<Addr> {
        self.identifiers.get(idtf).map(|r| *r.value())
    }

    fn resolve_identifier(&self, idtf: &str) -> GraphResult<Addr> {
        let _guard = self.structure.write().expect("graph lock poisoned");
        if let Some(existing) = self.identifiers.get(idtf) {
            return Ok(*existing.value());
        }
        let addr = self.insert_element(ElementType::NODE_CONST)?;
        self.identifiers.insert(idtf.to_string(), addr);
        self.identifier_of.insert(addr, idtf.to_string());
        Ok(addr)
    }

    fn set_observer(&self, observer: Option<Arc<dyn MutationObserver>>) {
        *self.observer.write().expect("observer lock poisoned") = observer;
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraph")
            .field("elements", &self.element_count())
            .field("identifiers", &self.identifiers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Mutation>>);

    impl MutationObserver for Recorder {
        fn on_mutation(&self, mutation: &Mutation) {
            self.0.lock().unwrap().push(*mutation);
        }
    }

    #[test]
    fn create_and_iterate() {
        let g = MemoryGraph::new();
        let a = g.create_node(Constness::Const).unwrap();
        let b = g.create_node(Constness::Const).unwrap();
        let c = g.create_node(Constness::Const).unwrap();
        let ab = g.create_connector(ConnectorType::ACCESS_CONST, a, b).unwrap();
        let ac = g.create_connector(ConnectorType::D_COMMON_CONST, a, c).unwrap();

        let out = g.iterate_connectors(&ConnectorPattern::outgoing(a, ConnectorType::ACCESS_CONST));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr, ab);
        assert_eq!(out[0].target, b);

        let into_c = g.iterate_connectors(&ConnectorPattern {
            target: Some(c),
            ..Default::default()
        });
        assert_eq!(into_c.len(), 1);
        assert_eq!(into_c[0].addr, ac);

        assert_eq!(g.iterate_connectors(&ConnectorPattern::any()).len(), 2);
        assert_eq!(g.connector_count(), 2);
        assert_eq!(g.element_count(), 5);
    }

    #[test]
    fn connector_requires_existing_ends() {
        let g = MemoryGraph::new();
        let a = g.create_node(Constness::Const).unwrap();
        let missing = Addr::new(999).unwrap();
        let err = g
            .create_connector(ConnectorType::ACCESS_CONST, a, missing)
            .unwrap_err();
        assert!(matches!(err, GraphError::ElementNotFound { addr: 999 }));
    }

    #[test]
    fn connectors_can_target_connectors() {
        let g = MemoryGraph::new();
        let rel = g.create_node(Constness::Const).unwrap();
        let a = g.create_node(Constness::Const).unwrap();
        let b = g.create_node(Constness::Const).unwrap();
        let pair = g.create_connector(ConnectorType::D_COMMON_CONST, a, b).unwrap();
        let role = g.create_connector(ConnectorType::ACCESS_CONST, rel, pair).unwrap();
        assert_eq!(g.connector(role).unwrap().target, pair);
        assert!(matches!(
            g.connector(a),
            Err(GraphError::NotAConnector { .. })
        ));
    }

    #[test]
    fn erase_cascades_to_incident_connectors() {
        let g = MemoryGraph::new();
        let rel = g.create_node(Constness::Const).unwrap();
        let a = g.create_node(Constness::Const).unwrap();
        let b = g.create_node(Constness::Const).unwrap();
        let pair = g.create_connector(ConnectorType::D_COMMON_CONST, a, b).unwrap();
        let role = g.create_connector(ConnectorType::ACCESS_CONST, rel, pair).unwrap();

        g.erase_element(b).unwrap();
        assert!(!g.is_element(b));
        assert!(!g.is_element(pair));
        assert!(!g.is_element(role));
        assert!(g.is_element(a));
        assert!(g.is_element(rel));
        assert!(g.iterate_connectors(&ConnectorPattern {
            source: Some(rel),
            ..Default::default()
        })
        .is_empty());
    }

    #[test]
    fn erase_reports_dependents_before_element() {
        let g = MemoryGraph::new();
        let recorder = Arc::new(Recorder::default());
        let a = g.create_node(Constness::Const).unwrap();
        let b = g.create_node(Constness::Const).unwrap();
        let ab = g.create_connector(ConnectorType::ACCESS_CONST, a, b).unwrap();
        g.set_observer(Some(recorder.clone()));

        g.erase_element(a).unwrap();
        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], Mutation::ConnectorErasing(c) if c.addr == ab));
        assert_eq!(seen[1], Mutation::ElementErasing { addr: ab });
        assert_eq!(seen[2], Mutation::ElementErasing { addr: a });
    }

    #[test]
    fn content_round_trip_and_notification() {
        let g = MemoryGraph::new();
        let recorder = Arc::new(Recorder::default());
        g.set_observer(Some(recorder.clone()));
        let link = g.create_link(Constness::Const).unwrap();
        assert_eq!(g.get_content(link).unwrap(), None);

        g.set_content(link, Content::Int(100)).unwrap();
        assert_eq!(g.get_content(link).unwrap(), Some(Content::Int(100)));
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[Mutation::ContentChanged { link }]
        );

        let node = g.create_node(Constness::Const).unwrap();
        assert!(matches!(
            g.set_content(node, Content::from("x")),
            Err(GraphError::NotALink { .. })
        ));
    }

    #[test]
    fn identifiers_resolve_once() {
        let g = MemoryGraph::new();
        let a = g.resolve_identifier("action_initiated").unwrap();
        let b = g.resolve_identifier("action_initiated").unwrap();
        assert_eq!(a, b);
        assert_eq!(g.find_by_identifier("action_initiated"), Some(a));
        assert_eq!(g.identifier_of(a).as_deref(), Some("action_initiated"));

        g.erase_element(a).unwrap();
        assert_eq!(g.find_by_identifier("action_initiated"), None);
    }

    #[test]
    fn concurrent_connector_creation() {
        let g = Arc::new(MemoryGraph::new());
        let hub = g.create_node(Constness::Const).unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let g = Arc::clone(&g);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let n = g.create_node(Constness::Const).unwrap();
                        g.create_connector(ConnectorType::ACCESS_CONST, hub, n).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let out = g.iterate_connectors(&ConnectorPattern::outgoing(hub, ConnectorType::ACCESS_CONST));
        assert_eq!(out.len(), 800);
    }
}
