//! Declared relationships between cached entities.
//!
//! The graph answers two questions: which entities must be refreshed when one
//! changes (`depended_by` traversal) and which entities a screen for one will
//! also need (`depends_on` traversal). Relationships are declared explicitly at
//! startup; nothing is inferred from cached data.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tidemark_core::{Relationship, RelationshipKind};

/// Depth used by [`DependencyGraph::prefetch_list`].
pub const DEFAULT_PREFETCH_DEPTH: usize = 2;

/// One entity and its edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityNode {
    pub name: String,
    /// Entities whose changes make this one stale.
    pub depends_on: BTreeSet<String>,
    /// Entities made stale when this one changes.
    pub depended_by: BTreeSet<String>,
}

impl EntityNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    nodes: HashMap<String, EntityNode>,
    relationships: Vec<Relationship>,
}

impl GraphInner {
    fn node_mut(&mut self, name: &str) -> &mut EntityNode {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| EntityNode::new(name))
    }

    /// Record that `dependent` goes stale when `source` changes.
    fn link(&mut self, source: &str, dependent: &str) {
        self.node_mut(dependent)
            .depends_on
            .insert(source.to_string());
        self.node_mut(source)
            .depended_by
            .insert(dependent.to_string());
    }

    /// Breadth-first walk over `depended_by` or `depends_on` edges, at most
    /// `depth` hops (unbounded when `None`). The start entity is never part
    /// of the result.
    fn walk(&self, start: &str, depth: Option<usize>, upstream: bool) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();

        if !self.nodes.contains_key(start) {
            return order;
        }
        visited.insert(start);
        queue.push_back((start, 0));

        while let Some((name, hops)) = queue.pop_front() {
            if depth.is_some_and(|max| hops >= max) {
                continue;
            }
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            let edges = if upstream {
                &node.depends_on
            } else {
                &node.depended_by
            };
            for next in edges {
                if visited.insert(next.as_str()) {
                    order.push(next.clone());
                    queue.push_back((next.as_str(), hops + 1));
                }
            }
        }

        order
    }
}

/// Entity dependency graph.
///
/// Interior locking lets the graph be shared behind an `Arc` while
/// relationships are still being declared. Locks are never held across an
/// await point.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    inner: RwLock<GraphInner>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        // Writers only insert into sets and push onto a list, so a poisoned
        // lock still guards a consistent graph.
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Declare a relationship.
    ///
    /// Parent and reference edges make `to` depend on `from`. Child edges make
    /// `from` depend on `to`. Sibling edges are recorded but carry no
    /// invalidation. Repeating a declaration is harmless: edge sets dedupe,
    /// while the relationship list keeps every call.
    ///
    /// The direction is chosen so changes to the declaring side cascade:
    /// `orders -> companies` as a parent edge and `companies -> orders` as a
    /// child edge both make an order change stale the company lists.
    pub fn add_relationship(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: RelationshipKind,
        field: Option<String>,
    ) {
        let from = from.into();
        let to = to.into();
        let mut inner = self.write();

        inner.node_mut(&from);
        inner.node_mut(&to);

        match kind {
            RelationshipKind::Parent | RelationshipKind::Reference => inner.link(&from, &to),
            RelationshipKind::Child => inner.link(&to, &from),
            RelationshipKind::Sibling => {}
        }

        tracing::trace!(from = %from, to = %to, kind = ?kind, "Relationship declared");
        inner.relationships.push(Relationship {
            from,
            to,
            kind,
            field,
        });
    }

    /// Declare many relationships at once.
    pub fn extend(&self, relationships: impl IntoIterator<Item = Relationship>) {
        for rel in relationships {
            self.add_relationship(rel.from, rel.to, rel.kind, rel.field);
        }
    }

    /// Entities that go stale when `entity` changes, up to `depth` hops.
    pub fn dependent_entities(&self, entity: &str, depth: usize) -> BTreeSet<String> {
        self.read().walk(entity, Some(depth), false).into_iter().collect()
    }

    /// Entities `entity` depends on, up to `depth` hops.
    pub fn dependencies(&self, entity: &str, depth: usize) -> BTreeSet<String> {
        self.read().walk(entity, Some(depth), true).into_iter().collect()
    }

    /// Every entity transitively stale when `entity` changes, nearest first.
    ///
    /// Terminates on cycles and never contains `entity` itself.
    pub fn invalidation_cascade(&self, entity: &str) -> Vec<String> {
        self.read().walk(entity, None, false)
    }

    /// Entities worth fetching alongside `entity`.
    pub fn prefetch_list(&self, entity: &str) -> BTreeSet<String> {
        self.dependencies(entity, DEFAULT_PREFETCH_DEPTH)
    }

    pub fn node(&self, entity: &str) -> Option<EntityNode> {
        self.read().nodes.get(entity).cloned()
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.read().nodes.contains_key(entity)
    }

    /// All entity names, sorted.
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every declared relationship in declaration order, duplicates included.
    pub fn relationships(&self) -> Vec<Relationship> {
        self.read().relationships.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tidemark_test_utils::generators::arb_relationships;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parent_and_child_edges_agree() {
        let graph = DependencyGraph::new();
        graph.add_relationship("orders", "companies", RelationshipKind::Parent, None);
        graph.add_relationship(
            "companies",
            "orders",
            RelationshipKind::Child,
            Some("orders".to_string()),
        );

        let orders = graph.node("orders").unwrap();
        assert_eq!(orders.depended_by, set(&["companies"]));
        assert!(orders.depends_on.is_empty());

        let companies = graph.node("companies").unwrap();
        assert_eq!(companies.depends_on, set(&["orders"]));
        assert_eq!(graph.relationships().len(), 2);
        assert_eq!(graph.invalidation_cascade("orders"), vec!["companies".to_string()]);
        assert!(graph.invalidation_cascade("companies").is_empty());
    }

    #[test]
    fn test_reference_makes_target_dependent() {
        let graph = DependencyGraph::new();
        graph.add_relationship("users", "comments", RelationshipKind::Reference, Some("author".into()));
        assert_eq!(graph.dependent_entities("users", 1), set(&["comments"]));
        assert_eq!(graph.dependencies("comments", 1), set(&["users"]));
    }

    #[test]
    fn test_sibling_creates_nodes_without_edges() {
        let graph = DependencyGraph::new();
        graph.add_relationship("invoices", "receipts", RelationshipKind::Sibling, None);
        assert!(graph.contains("invoices"));
        assert!(graph.contains("receipts"));
        assert!(graph.invalidation_cascade("invoices").is_empty());
        assert!(graph.invalidation_cascade("receipts").is_empty());
        assert_eq!(graph.relationships().len(), 1);
    }

    #[test]
    fn test_duplicate_relationships_dedupe_edges_only() {
        let graph = DependencyGraph::new();
        for _ in 0..3 {
            graph.add_relationship("a", "b", RelationshipKind::Parent, None);
        }
        assert_eq!(graph.node("a").unwrap().depended_by.len(), 1);
        assert_eq!(graph.relationships().len(), 3);
    }

    #[test]
    fn test_unknown_entity_yields_empty_results() {
        let graph = DependencyGraph::new();
        assert!(graph.dependent_entities("ghost", 3).is_empty());
        assert!(graph.dependencies("ghost", 3).is_empty());
        assert!(graph.invalidation_cascade("ghost").is_empty());
        assert!(graph.prefetch_list("ghost").is_empty());
    }

    #[test]
    fn test_depth_limits_expansion() {
        // a -> b -> c -> d (each parent of the next)
        let graph = DependencyGraph::new();
        graph.add_relationship("a", "b", RelationshipKind::Parent, None);
        graph.add_relationship("b", "c", RelationshipKind::Parent, None);
        graph.add_relationship("c", "d", RelationshipKind::Parent, None);

        assert!(graph.dependent_entities("a", 0).is_empty());
        assert_eq!(graph.dependent_entities("a", 1), set(&["b"]));
        assert_eq!(graph.dependent_entities("a", 2), set(&["b", "c"]));
        assert_eq!(graph.dependent_entities("a", 10), set(&["b", "c", "d"]));
        assert_eq!(graph.prefetch_list("d"), set(&["c", "b"]));
        assert_eq!(graph.invalidation_cascade("a"), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_cascade_terminates_on_cycle_and_excludes_source() {
        let graph = DependencyGraph::new();
        graph.add_relationship("a", "b", RelationshipKind::Parent, None);
        graph.add_relationship("b", "c", RelationshipKind::Parent, None);
        graph.add_relationship("c", "a", RelationshipKind::Parent, None);

        assert_eq!(graph.invalidation_cascade("a"), vec!["b", "c"]);
        assert_eq!(graph.dependent_entities("a", 5), set(&["b", "c"]));
    }

    #[test]
    fn test_self_loop_is_ignored_by_cascade() {
        let graph = DependencyGraph::new();
        graph.add_relationship("tree", "tree", RelationshipKind::Parent, Some("parent_id".into()));
        assert!(graph.invalidation_cascade("tree").is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_cascade_has_no_duplicates_and_no_source(
            relationships in arb_relationships(40),
            start in tidemark_test_utils::generators::arb_entity_name(),
        ) {
            let graph = DependencyGraph::new();
            graph.extend(relationships);

            let cascade = graph.invalidation_cascade(&start);
            let unique: HashSet<&String> = cascade.iter().collect();
            prop_assert_eq!(unique.len(), cascade.len());
            prop_assert!(!cascade.contains(&start));

            // The unbounded cascade is the limit of the depth-bounded walk.
            let bounded = graph.dependent_entities(&start, graph.entities().len() + 1);
            let cascade_set: BTreeSet<String> = cascade.into_iter().collect();
            prop_assert_eq!(bounded, cascade_set);
        }
    }
}
