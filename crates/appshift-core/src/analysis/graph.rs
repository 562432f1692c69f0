//! Reference graph over entity definitions.
//!
//! Nodes are entities in the analysed set, `External` targets outside it,
//! and a single `Unresolved` sentinel that every dynamic reference points
//! at. Edges run referrer -> target. Cycles are legal.

use crate::definitions::{EntityDefinition, FieldKind, ReferenceKind};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "node", content = "name", rename_all = "snake_case")]
pub enum GraphNode {
    Entity(String),
    External(String),
    Unresolved,
}

impl GraphNode {
    pub fn name(&self) -> Option<&str> {
        match self {
            GraphNode::Entity(name) | GraphNode::External(name) => Some(name),
            GraphNode::Unresolved => None,
        }
    }
}

/// Edge payload: which field produced the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub kind: ReferenceKind,
    pub field: String,
}

/// One reference, flattened for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub from: String,
    /// `None` for dynamic references.
    pub to: Option<String>,
    pub field: String,
    pub kind: ReferenceKind,
}

/// A dynamic reference queued for manual review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicLink {
    pub entity: String,
    pub field: String,
    pub type_field: String,
}

/// Directed reference graph with per-entity fan-in.
#[derive(Debug, Clone)]
pub struct ReferenceGraph {
    graph: DiGraph<GraphNode, ReferenceEdge>,
    indices: HashMap<GraphNode, NodeIndex>,
    unresolved: NodeIndex,
    dynamic_links: Vec<DynamicLink>,
}

/// Build the graph for `entities`. Targets outside the set become external nodes.
pub fn build_graph<'a>(entities: impl IntoIterator<Item = &'a EntityDefinition>) -> ReferenceGraph {
    let entities: Vec<&EntityDefinition> = entities.into_iter().collect();
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();

    let unresolved = graph.add_node(GraphNode::Unresolved);
    indices.insert(GraphNode::Unresolved, unresolved);

    let names: BTreeSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    for name in &names {
        let node = GraphNode::Entity((*name).to_string());
        let idx = graph.add_node(node.clone());
        indices.insert(node, idx);
    }

    let mut dynamic_links = Vec::new();
    for entity in &entities {
        let from = indices[&GraphNode::Entity(entity.name.clone())];
        for field in entity.effective_fields() {
            let (kind, target_idx) = match &field.kind {
                FieldKind::Scalar { .. } => continue,
                FieldKind::SingleReference { target } | FieldKind::CollectionReference { target } => {
                    let kind = field
                        .reference_target()
                        .map(|(kind, _)| kind)
                        .unwrap_or(ReferenceKind::Single);
                    let node = if names.contains(target.as_str()) {
                        GraphNode::Entity(target.clone())
                    } else {
                        GraphNode::External(target.clone())
                    };
                    let idx = *indices
                        .entry(node.clone())
                        .or_insert_with(|| graph.add_node(node));
                    (kind, idx)
                }
                FieldKind::DynamicReference { type_field } => {
                    dynamic_links.push(DynamicLink {
                        entity: entity.name.clone(),
                        field: field.fieldname.clone(),
                        type_field: type_field.clone(),
                    });
                    (ReferenceKind::Dynamic, unresolved)
                }
            };
            graph.add_edge(
                from,
                target_idx,
                ReferenceEdge {
                    kind,
                    field: field.fieldname.clone(),
                },
            );
        }
    }

    ReferenceGraph {
        graph,
        indices,
        unresolved,
        dynamic_links,
    }
}

impl ReferenceGraph {
    fn entity_index(&self, entity: &str) -> Option<NodeIndex> {
        self.indices
            .get(&GraphNode::Entity(entity.to_string()))
            .copied()
    }

    pub fn entity_count(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|n| matches!(n, GraphNode::Entity(_)))
            .count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of distinct other entities referencing `entity`.
    pub fn fan_in(&self, entity: &str) -> usize {
        let Some(idx) = self.entity_index(entity) else {
            return 0;
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.source())
            .filter(|source| *source != idx)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Fan-in of every entity in the analysed set.
    pub fn fan_in_all(&self) -> BTreeMap<String, usize> {
        self.graph
            .node_weights()
            .filter_map(|n| match n {
                GraphNode::Entity(name) => Some((name.clone(), self.fan_in(name))),
                _ => None,
            })
            .collect()
    }

    /// Static targets `entity` references (in-set and external), excluding itself.
    pub fn dependencies_of(&self, entity: &str) -> Vec<(String, ReferenceKind)> {
        let Some(idx) = self.entity_index(entity) else {
            return Vec::new();
        };
        let mut deps: Vec<(String, ReferenceKind)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.target() != idx && e.target() != self.unresolved)
            .filter_map(|e| {
                self.graph[e.target()]
                    .name()
                    .map(|n| (n.to_string(), e.weight().kind))
            })
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Entities that reference `entity`, excluding itself.
    pub fn dependents_of(&self, entity: &str) -> Vec<(String, ReferenceKind)> {
        let Some(idx) = self.entity_index(entity) else {
            return Vec::new();
        };
        let mut deps: Vec<(String, ReferenceKind)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| e.source() != idx)
            .filter_map(|e| {
                self.graph[e.source()]
                    .name()
                    .map(|n| (n.to_string(), e.weight().kind))
            })
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Every reference in the graph.
    pub fn references(&self) -> Vec<Reference> {
        let mut refs: Vec<Reference> = self
            .graph
            .edge_references()
            .filter_map(|e| {
                let from = self.graph[e.source()].name()?.to_string();
                Some(Reference {
                    from,
                    to: self.graph[e.target()].name().map(str::to_string),
                    field: e.weight().field.clone(),
                    kind: e.weight().kind,
                })
            })
            .collect();
        refs.sort_by(|a, b| (&a.from, &a.field).cmp(&(&b.from, &b.field)));
        refs
    }

    /// Single/collection edges whose both ends are in the analysed set.
    pub fn static_edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_references()
            .filter(|e| e.weight().kind != ReferenceKind::Dynamic)
            .filter_map(|e| match (&self.graph[e.source()], &self.graph[e.target()]) {
                (GraphNode::Entity(from), GraphNode::Entity(to)) => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect()
    }

    /// Targets outside the analysed set.
    pub fn external_targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                GraphNode::External(name) => Some(name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }

    /// References to targets for which `exists` is false anywhere on the instance.
    pub fn dangling(&self, exists: impl Fn(&str) -> bool) -> Vec<Reference> {
        self.references()
            .into_iter()
            .filter(|r| match &r.to {
                Some(target) => {
                    self.indices
                        .contains_key(&GraphNode::External(target.clone()))
                        && !exists(target)
                }
                None => false,
            })
            .collect()
    }

    pub fn dynamic_links(&self) -> &[DynamicLink] {
        &self.dynamic_links
    }

    /// Strongly-connected groups of entities that form a cycle (size > 1 or
    /// a self-reference).
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || scc
                        .first()
                        .is_some_and(|idx| self.graph.find_edge(*idx, *idx).is_some())
            })
            .map(|scc| {
                let mut names: Vec<String> = scc
                    .into_iter()
                    .filter_map(|idx| match &self.graph[idx] {
                        GraphNode::Entity(name) => Some(name.clone()),
                        _ => None,
                    })
                    .collect();
                names.sort();
                names
            })
            .filter(|names| !names.is_empty())
            .collect();
        groups.sort();
        groups
    }

    /// Serializable snapshot.
    pub fn report(&self, exists: impl Fn(&str) -> bool) -> GraphReport {
        GraphReport {
            entities: self.entity_count(),
            references: self.references(),
            fan_in: self.fan_in_all(),
            cycles: self.cycles(),
            external: self.external_targets(),
            dynamic_links: self.dynamic_links.clone(),
            dangling: self.dangling(exists),
        }
    }
}

/// Structured reference graph report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphReport {
    pub entities: usize,
    pub references: Vec<Reference>,
    pub fan_in: BTreeMap<String, usize>,
    pub cycles: Vec<Vec<String>>,
    pub external: Vec<String>,
    pub dynamic_links: Vec<DynamicLink>,
    pub dangling: Vec<Reference>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::FieldDefinition;

    fn order_model() -> Vec<EntityDefinition> {
        vec![
            EntityDefinition::new("Order")
                .with_field(FieldDefinition::single("customer", "Customer"))
                .with_field(FieldDefinition::collection("items", "Order Line")),
            EntityDefinition::new("Order Line")
                .with_field(FieldDefinition::single("item", "Item"))
                .with_field(FieldDefinition::single("parent_order", "Order")),
            EntityDefinition::new("Customer")
                .with_field(FieldDefinition::dynamic("link_name", "link_type")),
            EntityDefinition::new("Category")
                .with_field(FieldDefinition::single("parent_category", "Category")),
        ]
    }

    #[test]
    fn test_edges_and_fan_in() {
        let entities = order_model();
        let graph = build_graph(&entities);

        assert_eq!(graph.entity_count(), 4);
        assert_eq!(graph.fan_in("Customer"), 1);
        assert_eq!(graph.fan_in("Order Line"), 1);
        assert_eq!(graph.fan_in("Order"), 1);
        // Self references do not count.
        assert_eq!(graph.fan_in("Category"), 0);
        assert_eq!(graph.external_targets(), vec!["Item"]);
    }

    #[test]
    fn test_dynamic_links_point_at_sentinel() {
        let entities = order_model();
        let graph = build_graph(&entities);
        assert_eq!(
            graph.dynamic_links(),
            &[DynamicLink {
                entity: "Customer".into(),
                field: "link_name".into(),
                type_field: "link_type".into(),
            }]
        );
        let dynamic = graph
            .references()
            .into_iter()
            .find(|r| r.kind == ReferenceKind::Dynamic)
            .unwrap();
        assert_eq!(dynamic.to, None);
        assert!(graph.dependencies_of("Customer").is_empty());
    }

    #[test]
    fn test_cycles_tolerated() {
        let entities = order_model();
        let graph = build_graph(&entities);
        let cycles = graph.cycles();
        assert!(cycles.contains(&vec!["Order".to_string(), "Order Line".to_string()]));
        assert!(cycles.contains(&vec!["Category".to_string()]));
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let entities = order_model();
        let graph = build_graph(&entities);
        assert_eq!(
            graph.dependencies_of("Order"),
            vec![
                ("Customer".to_string(), ReferenceKind::Single),
                ("Order Line".to_string(), ReferenceKind::Collection)
            ]
        );
        assert_eq!(
            graph.dependents_of("Order"),
            vec![("Order Line".to_string(), ReferenceKind::Single)]
        );
    }

    #[test]
    fn test_dangling_only_for_unknown_externals() {
        let entities = order_model();
        let graph = build_graph(&entities);
        assert_eq!(graph.dangling(|name| name == "Item").len(), 0);

        let dangling = graph.dangling(|_| false);
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].to.as_deref(), Some("Item"));
    }

    #[test]
    fn test_customization_fields_are_scanned() {
        use crate::definitions::{Customization, CustomizationKind};

        let mut note = EntityDefinition::new("Invoice Note");
        note.customizations.push(Customization {
            id: "c1".into(),
            entity: "Invoice Note".into(),
            namespace: None,
            kind: CustomizationKind::AddedField {
                field: FieldDefinition::single("invoice", "Invoice"),
            },
        });
        let invoice = EntityDefinition::new("Invoice");
        let graph = build_graph([&note, &invoice]);
        assert_eq!(graph.fan_in("Invoice"), 1);
    }
}
