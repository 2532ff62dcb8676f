//! Materialized view dependency resolution
//!
//! A cascading refresh has to reach every materialized view whose query
//! reads, directly or through plain views, from the one being refreshed.
//! Views record their inputs as `pg_depend` rows owned by their `_RETURN`
//! rewrite rule, so dependents of relation X are the `ev_class` of rewrite
//! rules that reference X.

pub mod graph;

use std::collections::{HashSet, VecDeque};

use pgrx::prelude::*;

use crate::config::DEBUG_DEPENDENCIES;
use crate::connection::{CatalogRow, Connection};
use crate::error::{SchemaDefError, SchemaDefResult};
use crate::name::{quote_literal, SchemaObjectName};

pub use graph::{DependencyGraph, DependencyNode};

/// Walks `pg_depend` outward from one relation
pub struct DependencyResolver<'c, C: Connection + ?Sized> {
    connection: &'c mut C,
}

impl<'c, C: Connection + ?Sized> DependencyResolver<'c, C> {
    pub fn new(connection: &'c mut C) -> Self {
        Self { connection }
    }

    /// Every view transitively reading from `root`, root included
    ///
    /// # Errors
    /// `ObjectNotFound` if `root` does not resolve to a relation
    pub fn graph(&mut self, root: &SchemaObjectName) -> SchemaDefResult<DependencyGraph> {
        let root_node = self.lookup(root)?;
        let root_oid = root_node.oid;
        let mut graph = DependencyGraph::new(root_node);

        let mut visited = HashSet::new();
        let mut worklist = VecDeque::from([root_oid]);

        while let Some(current) = worklist.pop_front() {
            if !visited.insert(current) {
                continue;
            }

            for row in self.connection.select(&dependents_query(current))? {
                let node = node_from_row(&row)?;
                let dependent = node.oid;
                graph.insert(node);
                graph.add_edge(current, dependent)?;

                if !visited.contains(&dependent) {
                    worklist.push_back(dependent);
                }
            }
        }

        if DEBUG_DEPENDENCIES {
            info!(
                "pg_schemadefs: dependency walk from {} found {} relations",
                root,
                graph.len()
            );
        }

        Ok(graph)
    }

    /// Materialized views to refresh after `root`, each after everything it
    /// reads from
    pub fn refresh_order(&mut self, root: &SchemaObjectName) -> SchemaDefResult<Vec<SchemaObjectName>> {
        let order = self.graph(root)?.refresh_order()?;
        debug1!(
            "pg_schemadefs: cascade from {} refreshes {} dependents",
            root,
            order.len()
        );
        Ok(order)
    }

    fn lookup(&mut self, name: &SchemaObjectName) -> SchemaDefResult<DependencyNode> {
        let query = format!(
            "SELECT c.oid::text AS oid, c.relname::text AS name, n.nspname::text AS namespace, \
                    c.relkind::text AS relkind \
             FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.oid = to_regclass({})",
            quote_literal(&name.to_sql())
        );

        let rows = self.connection.select(&query)?;
        let row = rows.first().ok_or_else(|| SchemaDefError::ObjectNotFound {
            name: name.canonical(),
        })?;
        node_from_row(row)
    }
}

fn dependents_query(oid: u32) -> String {
    format!(
        "SELECT c.oid::text AS oid, c.relname::text AS name, n.nspname::text AS namespace, \
                c.relkind::text AS relkind \
         FROM pg_class c \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.relkind IN ('v', 'm') \
           AND c.oid <> {oid} \
           AND c.oid IN ( \
             SELECT r.ev_class \
             FROM pg_depend d \
             JOIN pg_rewrite r ON r.oid = d.objid \
             WHERE d.classid = 'pg_rewrite'::regclass \
               AND d.refclassid = 'pg_class'::regclass \
               AND d.refobjid = {oid} \
           ) \
         ORDER BY c.oid"
    )
}

fn node_from_row(row: &CatalogRow) -> SchemaDefResult<DependencyNode> {
    let raw_oid = row.get("oid")?;
    let oid = raw_oid.parse::<u32>().map_err(|e| SchemaDefError::CatalogError {
        operation: "Parse relation OID".to_string(),
        pg_error: format!("'{raw_oid}': {e}"),
    })?;

    // Keep the namespace so refreshes do not depend on search_path
    Ok(DependencyNode {
        oid,
        name: SchemaObjectName::new(Some(row.get("namespace")?), row.get("name")?),
        materialized: row.get("relkind")? == "m",
    })
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use pgrx::prelude::*;
    use super::*;
    use crate::connection::stub::StubConnection;
    use crate::connection::SpiConnection;

    #[test]
    fn test_node_from_row() {
        let row = CatalogRow::from_pairs(&[
            ("oid", "16390"),
            ("name", "people"),
            ("namespace", "public"),
            ("relkind", "m"),
        ]);

        let node = node_from_row(&row).unwrap();
        assert_eq!(node.oid, 16390);
        assert_eq!(node.name.canonical(), "people");
        assert_eq!(node.name.to_sql(), "\"public\".\"people\"");
        assert!(node.materialized);
    }

    #[test]
    fn test_bad_oid_is_catalog_error() {
        let row = CatalogRow::from_pairs(&[
            ("oid", "not-a-number"),
            ("name", "people"),
            ("namespace", "public"),
            ("relkind", "m"),
        ]);

        assert!(matches!(
            node_from_row(&row),
            Err(SchemaDefError::CatalogError { .. })
        ));
    }

    #[test]
    fn test_dependents_query_targets_one_relation() {
        let sql = dependents_query(16384);
        assert!(sql.contains("d.refobjid = 16384"));
        assert!(sql.contains("c.oid <> 16384"));
        assert!(sql.contains("ORDER BY c.oid"));
    }

    fn relation(oid: &str, name: &str, relkind: &str) -> CatalogRow {
        CatalogRow::from_pairs(&[
            ("oid", oid),
            ("name", name),
            ("namespace", "public"),
            ("relkind", relkind),
        ])
    }

    fn canonical(names: Vec<SchemaObjectName>) -> Vec<String> {
        names.into_iter().map(|n| n.canonical()).collect()
    }

    #[pg_test]
    fn test_missing_root_is_object_not_found() {
        let mut conn = StubConnection::new(170000);
        let result = DependencyResolver::new(&mut conn).refresh_order(&SchemaObjectName::new(None, "ghost"));

        assert!(matches!(result, Err(SchemaDefError::ObjectNotFound { .. })));
    }

    #[pg_test]
    fn test_walk_through_stub_catalog() {
        // root(1) <- b(20), root(1) <- a(10), a(10) <- b(20)
        let mut conn = StubConnection::new(170000).with_responder(|sql| {
            if sql.contains("to_regclass") {
                vec![relation("1", "root", "m")]
            } else if sql.contains("d.refobjid = 1 ") {
                vec![relation("20", "b", "m"), relation("10", "a", "m")]
            } else if sql.contains("d.refobjid = 10 ") {
                vec![relation("20", "b", "m")]
            } else {
                Vec::new()
            }
        });

        let order = DependencyResolver::new(&mut conn)
            .refresh_order(&SchemaObjectName::new(None, "root"))
            .unwrap();

        assert_eq!(canonical(order), vec!["a", "b"]);
        assert!(conn.executed().is_empty());
    }

    #[pg_test]
    fn test_real_catalog_orders_dependents() {
        Spi::run("CREATE TABLE events (id int)").unwrap();
        Spi::run("CREATE MATERIALIZED VIEW base_mv AS SELECT id FROM events").unwrap();
        Spi::run("CREATE MATERIALIZED VIEW mid_mv AS SELECT id FROM base_mv").unwrap();
        Spi::run("CREATE VIEW plain_v AS SELECT id FROM mid_mv").unwrap();
        Spi::run("CREATE MATERIALIZED VIEW top_mv AS SELECT p.id FROM plain_v p JOIN base_mv b USING (id)")
            .unwrap();
        Spi::run("CREATE MATERIALIZED VIEW unrelated_mv AS SELECT id FROM events").unwrap();

        let mut conn = SpiConnection;
        let order = DependencyResolver::new(&mut conn)
            .refresh_order(&SchemaObjectName::new(None, "base_mv"))
            .unwrap();

        assert_eq!(canonical(order), vec!["mid_mv", "top_mv"]);
    }
}
