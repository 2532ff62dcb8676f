use std::collections::{BTreeSet, HashMap};

use crate::error::{SchemaDefError, SchemaDefResult};
use crate::name::SchemaObjectName;

/// A relation discovered while walking `pg_depend`
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyNode {
    /// `pg_class` OID; names can collide across namespaces, OIDs cannot
    pub oid: u32,
    pub name: SchemaObjectName,
    pub materialized: bool,
}

/// Arena of relations reachable from a root materialized view.
///
/// Nodes keep discovery order; edges point from a relation to the
/// relation whose query selects from it.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    index: HashMap<u32, usize>,
    /// (dependency, dependent) pairs, as node indices
    edges: BTreeSet<(usize, usize)>,
}

impl DependencyGraph {
    pub fn new(root: DependencyNode) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: BTreeSet::new(),
        };
        graph.insert(root);
        graph
    }

    pub fn root(&self) -> &DependencyNode {
        &self.nodes[0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, oid: u32) -> bool {
        self.index.contains_key(&oid)
    }

    /// Add a node unless its OID is already known; returns the node index
    pub fn insert(&mut self, node: DependencyNode) -> usize {
        if let Some(&existing) = self.index.get(&node.oid) {
            return existing;
        }
        let idx = self.nodes.len();
        self.index.insert(node.oid, idx);
        self.nodes.push(node);
        idx
    }

    /// Record that `dependent` selects from `dependency`
    pub fn add_edge(&mut self, dependency: u32, dependent: u32) -> SchemaDefResult<()> {
        let from = self.index_of(dependency)?;
        let to = self.index_of(dependent)?;
        self.edges.insert((from, to));
        Ok(())
    }

    fn index_of(&self, oid: u32) -> SchemaDefResult<usize> {
        self.index
            .get(&oid)
            .copied()
            .ok_or_else(|| crate::internal_error!("OID {} not in dependency arena", oid))
    }

    /// Kahn's algorithm. Among nodes that are ready at the same time, the
    /// one discovered first goes first.
    pub fn topological_order(&self) -> SchemaDefResult<Vec<&DependencyNode>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for &(from, to) in &self.edges {
            in_degree[to] += 1;
            outgoing[from].push(to);
        }

        let mut ready: BTreeSet<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = ready.pop_first() {
            order.push(&self.nodes[idx]);
            for &next in &outgoing[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = (0..self.nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].name.canonical())
                .collect();
            return Err(SchemaDefError::DependencyCycle { objects: stuck });
        }

        Ok(order)
    }

    /// Materialized views to refresh after the root, dependencies first.
    /// Plain views are walked through but never refreshed.
    pub fn refresh_order(&self) -> SchemaDefResult<Vec<SchemaObjectName>> {
        let root_oid = self.root().oid;
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|node| node.materialized && node.oid != root_oid)
            .map(|node| node.name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(oid: u32, name: &str, materialized: bool) -> DependencyNode {
        DependencyNode {
            oid,
            name: SchemaObjectName::parse(name).unwrap(),
            materialized,
        }
    }

    fn canonical(names: Vec<SchemaObjectName>) -> Vec<String> {
        names.into_iter().map(|n| n.canonical()).collect()
    }

    #[test]
    fn test_chain_refreshes_in_order() {
        // root -> a -> b -> c
        let mut graph = DependencyGraph::new(node(1, "root", true));
        graph.insert(node(2, "a", true));
        graph.insert(node(3, "b", true));
        graph.insert(node(4, "c", true));
        graph.add_edge(1, 2).unwrap();
        graph.add_edge(2, 3).unwrap();
        graph.add_edge(3, 4).unwrap();

        assert_eq!(canonical(graph.refresh_order().unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_discovery_order_does_not_override_dependencies() {
        // root feeds both b and a; b also selects from a.
        // b is discovered first but must refresh after a.
        let mut graph = DependencyGraph::new(node(1, "root", true));
        graph.insert(node(20, "b", true));
        graph.insert(node(10, "a", true));
        graph.add_edge(1, 20).unwrap();
        graph.add_edge(1, 10).unwrap();
        graph.add_edge(10, 20).unwrap();

        assert_eq!(canonical(graph.refresh_order().unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_plain_views_are_transparent() {
        // root -> plain view v -> materialized m
        let mut graph = DependencyGraph::new(node(1, "root", true));
        graph.insert(node(2, "v", false));
        graph.insert(node(3, "m", true));
        graph.add_edge(1, 2).unwrap();
        graph.add_edge(2, 3).unwrap();

        assert_eq!(canonical(graph.refresh_order().unwrap()), vec!["m"]);
    }

    #[test]
    fn test_insert_deduplicates_by_oid() {
        let mut graph = DependencyGraph::new(node(1, "root", true));
        let first = graph.insert(node(2, "a", true));
        let again = graph.insert(node(2, "a", true));

        assert_eq!(first, again);
        assert_eq!(graph.len(), 2);
        assert!(graph.contains(2));
    }

    #[test]
    fn test_same_name_different_namespaces_stay_distinct() {
        let mut graph = DependencyGraph::new(node(1, "root", true));
        graph.insert(node(2, "reports.totals", true));
        graph.insert(node(3, "archive.totals", true));
        graph.add_edge(1, 2).unwrap();
        graph.add_edge(1, 3).unwrap();

        assert_eq!(
            canonical(graph.refresh_order().unwrap()),
            vec!["reports.totals", "archive.totals"]
        );
    }

    #[test]
    fn test_cycle_fails_with_names() {
        let mut graph = DependencyGraph::new(node(1, "root", true));
        graph.insert(node(2, "a", true));
        graph.insert(node(3, "b", true));
        graph.add_edge(1, 2).unwrap();
        graph.add_edge(2, 3).unwrap();
        graph.add_edge(3, 2).unwrap();

        match graph.refresh_order() {
            Err(SchemaDefError::DependencyCycle { objects }) => {
                assert!(objects.contains(&"a".to_string()));
                assert!(objects.contains(&"b".to_string()));
                assert!(!objects.contains(&"root".to_string()));
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn test_edge_to_unknown_oid_is_internal_error() {
        let mut graph = DependencyGraph::new(node(1, "root", true));
        assert!(matches!(
            graph.add_edge(1, 99),
            Err(SchemaDefError::InternalError { .. })
        ));
    }
}
