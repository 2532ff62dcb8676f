use crate::connection::{CatalogRow, Connection};
use crate::error::SchemaDefResult;
use crate::name::{quote_literal, SchemaObjectName};
use crate::object::SchemaObject;

/// Views and materialized views on the search path, in creation (OID) order.
/// Extension-owned relations are left out.
const VIEWS_QUERY: &str = "\
SELECT c.relname::text AS name,
       n.nspname::text AS namespace,
       c.relkind::text AS kind,
       pg_get_viewdef(c.oid)::text AS definition
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('v', 'm')
  AND n.nspname = ANY (current_schemas(false))
  AND n.nspname NOT LIKE 'pg\\_%'
  AND n.nspname <> 'information_schema'
  AND NOT EXISTS (
    SELECT 1 FROM pg_depend d
    WHERE d.classid = 'pg_class'::regclass
      AND d.objid = c.oid
      AND d.deptype = 'e'
  )
ORDER BY c.oid";

/// SQL and PL/pgSQL functions on the search path, in creation (OID) order
const FUNCTIONS_QUERY: &str = "\
SELECT p.proname::text AS name,
       n.nspname::text AS namespace,
       pg_get_functiondef(p.oid)::text AS definition
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
JOIN pg_language l ON l.oid = p.prolang
WHERE l.lanname IN ('sql', 'plpgsql')
  AND p.prokind = 'f'
  AND n.nspname = ANY (current_schemas(false))
  AND n.nspname NOT LIKE 'pg\\_%'
  AND n.nspname <> 'information_schema'
  AND NOT EXISTS (
    SELECT 1 FROM pg_depend d
    WHERE d.classid = 'pg_proc'::regclass
      AND d.objid = p.oid
      AND d.deptype = 'e'
  )
ORDER BY p.oid";

/// Read-only listing of the views and functions in the connected database.
///
/// Nothing is cached: every call reads the catalogs again.
pub struct Introspector<'c, C: Connection + ?Sized> {
    connection: &'c mut C,
}

impl<'c, C: Connection + ?Sized> Introspector<'c, C> {
    pub fn new(connection: &'c mut C) -> Self {
        Self { connection }
    }

    pub fn views(&mut self) -> SchemaDefResult<Vec<SchemaObject>> {
        self.connection
            .select(VIEWS_QUERY)?
            .iter()
            .map(view_from_row)
            .collect()
    }

    pub fn functions(&mut self) -> SchemaDefResult<Vec<SchemaObject>> {
        self.connection
            .select(FUNCTIONS_QUERY)?
            .iter()
            .map(function_from_row)
            .collect()
    }

    /// Whether materialized view `name` holds data. A relation the catalog
    /// does not report counts as populated and is left for the server to reject.
    pub fn is_populated(&mut self, name: &SchemaObjectName) -> SchemaDefResult<bool> {
        let rows = self.connection.select(&populated_query(name))?;
        match rows.first() {
            Some(row) => Ok(row.get("populated")? == "true"),
            None => Ok(true),
        }
    }
}

fn populated_query(name: &SchemaObjectName) -> String {
    format!(
        "SELECT c.relispopulated::text AS populated FROM pg_class c WHERE c.oid = {}::regclass",
        quote_literal(&name.to_sql())
    )
}

fn view_from_row(row: &CatalogRow) -> SchemaDefResult<SchemaObject> {
    let name = SchemaObjectName::from_catalog(row.get("namespace")?, row.get("name")?);
    let materialized = row.get("kind")? == "m";

    Ok(SchemaObject::view(name, row.get("definition")?.trim(), materialized))
}

fn function_from_row(row: &CatalogRow) -> SchemaDefResult<SchemaObject> {
    let name = SchemaObjectName::from_catalog(row.get("namespace")?, row.get("name")?);

    Ok(SchemaObject::function(name, row.get("definition")?.trim_end()))
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use pgrx::prelude::*;
    use super::*;
    use crate::connection::stub::StubConnection;
    use crate::connection::SpiConnection;
    use crate::object::ObjectKind;

    #[test]
    fn test_view_rows_are_normalized() {
        let row = CatalogRow::from_pairs(&[
            ("name", "search in a haystack"),
            ("namespace", "scenic"),
            ("kind", "m"),
            ("definition", " SELECT 'needle'::text AS haystack;\n"),
        ]);

        let view = view_from_row(&row).unwrap();
        assert_eq!(view.kind(), ObjectKind::MaterializedView);
        assert_eq!(view.name().canonical(), "scenic.\"search in a haystack\"");
        assert_eq!(view.definition(), "SELECT 'needle'::text AS haystack;");
    }

    #[test]
    fn test_function_rows_are_right_trimmed() {
        let row = CatalogRow::from_pairs(&[
            ("name", "get_result"),
            ("namespace", "public"),
            ("definition", "CREATE OR REPLACE FUNCTION public.get_result()\n RETURNS text\n"),
        ]);

        let function = function_from_row(&row).unwrap();
        assert_eq!(function.kind(), ObjectKind::Function);
        assert_eq!(function.name().canonical(), "get_result");
        assert_eq!(
            function.definition(),
            "CREATE OR REPLACE FUNCTION public.get_result()\n RETURNS text"
        );
    }

    #[test]
    fn test_missing_column_is_a_catalog_error() {
        let row = CatalogRow::from_pairs(&[("name", "broken")]);
        assert!(view_from_row(&row).is_err());
    }

    #[test]
    fn test_populated_flag_from_catalog() {
        let name = SchemaObjectName::parse("scenic.\"search in a haystack\"").unwrap();

        let mut empty = StubConnection::new(170000)
            .with_responder(|_| vec![CatalogRow::from_pairs(&[("populated", "false")])]);
        assert!(!Introspector::new(&mut empty).is_populated(&name).unwrap());
        assert_eq!(
            empty.sent(),
            ["SELECT c.relispopulated::text AS populated FROM pg_class c \
              WHERE c.oid = '\"scenic\".\"search in a haystack\"'::regclass"]
        );

        let mut unknown = StubConnection::new(170000);
        assert!(Introspector::new(&mut unknown).is_populated(&name).unwrap());
    }

    fn names(objects: &[SchemaObject]) -> Vec<String> {
        objects.iter().map(|o| o.name().canonical()).collect()
    }

    #[pg_test]
    fn test_views_in_creation_order() {
        Spi::run("CREATE VIEW parents AS SELECT text 'Joe' AS name").unwrap();
        Spi::run("CREATE VIEW children AS SELECT text 'Owen' AS name").unwrap();
        Spi::run(
            "CREATE MATERIALIZED VIEW people AS \
             SELECT name FROM parents UNION SELECT name FROM children",
        )
        .unwrap();
        Spi::run("CREATE VIEW people_with_names AS SELECT name FROM people WHERE name IS NOT NULL")
            .unwrap();

        let mut conn = SpiConnection;
        let views = Introspector::new(&mut conn).views().unwrap();

        assert_eq!(names(&views), vec!["parents", "children", "people", "people_with_names"]);
        assert!(views[2].is_materialized());
        assert!(!views[3].is_materialized());
    }

    #[pg_test]
    fn test_views_in_non_public_schemas() {
        Spi::run("CREATE VIEW parents AS SELECT text 'Joe' AS name").unwrap();
        Spi::run("CREATE SCHEMA scenic").unwrap();
        Spi::run("CREATE VIEW scenic.parents AS SELECT text 'Maarten' AS name").unwrap();
        Spi::run("SET LOCAL search_path TO scenic, public").unwrap();

        let mut conn = SpiConnection;
        let views = Introspector::new(&mut conn).views().unwrap();

        assert_eq!(names(&views), vec!["parents", "scenic.parents"]);
    }

    #[pg_test]
    fn test_functions_in_creation_order() {
        Spi::run(
            "CREATE FUNCTION get_parent() RETURNS text AS $$ SELECT text 'joe'; $$ LANGUAGE sql",
        )
        .unwrap();
        Spi::run(
            "CREATE FUNCTION get_child() RETURNS text AS $$ SELECT text 'Owen'; $$ LANGUAGE sql",
        )
        .unwrap();

        let mut conn = SpiConnection;
        let functions = Introspector::new(&mut conn).functions().unwrap();

        assert_eq!(names(&functions), vec!["get_parent", "get_child"]);
        assert!(functions[0].definition().contains("SELECT text 'joe';"));
        assert!(functions[0].definition().starts_with("CREATE OR REPLACE FUNCTION"));
    }

    #[pg_test]
    fn test_functions_in_non_public_schemas() {
        Spi::run(
            "CREATE FUNCTION get_parent() RETURNS text AS $$ SELECT text 'joe'; $$ LANGUAGE sql",
        )
        .unwrap();
        Spi::run("CREATE SCHEMA scenic").unwrap();
        Spi::run(
            "CREATE FUNCTION scenic.get_parent() RETURNS text AS $$ SELECT text 'joe'; $$ LANGUAGE sql",
        )
        .unwrap();
        Spi::run("SET LOCAL search_path TO scenic, public").unwrap();

        let mut conn = SpiConnection;
        let functions = Introspector::new(&mut conn).functions().unwrap();

        assert_eq!(names(&functions), vec!["get_parent", "scenic.get_parent"]);
    }

    #[pg_test]
    fn test_populated_follows_no_data() {
        Spi::run("CREATE MATERIALIZED VIEW filled AS SELECT 1 AS id").unwrap();
        Spi::run("CREATE MATERIALIZED VIEW empty AS SELECT 1 AS id WITH NO DATA").unwrap();

        let mut conn = SpiConnection;
        let mut introspector = Introspector::new(&mut conn);
        assert!(introspector.is_populated(&SchemaObjectName::new(None, "filled")).unwrap());
        assert!(!introspector.is_populated(&SchemaObjectName::new(None, "empty")).unwrap());
    }

    #[pg_test]
    fn test_extension_objects_are_hidden() {
        let mut conn = SpiConnection;
        let functions = Introspector::new(&mut conn).functions().unwrap();

        assert!(functions
            .iter()
            .all(|f| !f.name().object().starts_with("pg_schemadefs_")));
    }
}
