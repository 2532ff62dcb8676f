//! Schema object adapter
//!
//! The single entry point migrations and the SQL-callable functions go
//! through to create, replace, drop and refresh views and functions.
//! Capability checks run before any statement is sent; statement failures
//! raised by the server are propagated as they are.

use pgrx::prelude::*;

use crate::catalog::Introspector;
use crate::connection::Connection;
use crate::ddl::statements;
use crate::dependency::DependencyResolver;
use crate::error::{SchemaDefError, SchemaDefResult};
use crate::name::SchemaObjectName;
use crate::object::{ObjectKind, SchemaObject};

pub struct SchemaAdapter<C: Connection> {
    connection: C,
}

impl<C: Connection> SchemaAdapter<C> {
    pub fn new(connection: C) -> Self {
        Self { connection }
    }

    pub fn create_view(
        &mut self,
        name: &SchemaObjectName,
        sql_definition: &str,
        materialized: bool,
        no_data: bool,
    ) -> SchemaDefResult<()> {
        let kind = if materialized {
            self.ensure_materialized_views_supported()?;
            ObjectKind::MaterializedView
        } else {
            ObjectKind::View
        };

        self.execute(&statements::create_object(name, sql_definition, kind, no_data))
    }

    /// `CREATE OR REPLACE VIEW`. Column changes the server refuses surface
    /// as the server's error.
    pub fn replace_view(&mut self, name: &SchemaObjectName, sql_definition: &str) -> SchemaDefResult<()> {
        self.execute(&statements::replace_view(name, sql_definition))
    }

    pub fn drop_view(&mut self, name: &SchemaObjectName, materialized: bool) -> SchemaDefResult<()> {
        let kind = if materialized {
            self.ensure_materialized_views_supported()?;
            ObjectKind::MaterializedView
        } else {
            ObjectKind::View
        };

        self.execute(&statements::drop_object(name, kind))
    }

    /// Run a complete function definition as given
    pub fn create_function(&mut self, name: &SchemaObjectName, sql_definition: &str) -> SchemaDefResult<()> {
        debug1!("pg_schemadefs: creating function {}", name);
        self.execute(&statements::create_object(name, sql_definition, ObjectKind::Function, false))
    }

    pub fn drop_function(&mut self, name: &SchemaObjectName) -> SchemaDefResult<()> {
        self.execute(&statements::drop_object(name, ObjectKind::Function))
    }

    /// Refresh `name`, then with `cascade` every materialized view that reads
    /// from it, dependencies first, one at a time. A concurrent refresh of a
    /// view that holds no data yet is sent as a plain refresh.
    ///
    /// # Errors
    /// `MaterializedViewsNotSupported` / `ConcurrentRefreshesNotSupported`
    /// before any SQL is sent; otherwise whatever the server reports
    pub fn refresh_materialized_view(
        &mut self,
        name: &SchemaObjectName,
        concurrently: bool,
        cascade: bool,
    ) -> SchemaDefResult<()> {
        self.ensure_materialized_views_supported()?;
        if concurrently {
            self.ensure_concurrent_refreshes_supported()?;
        }

        self.refresh_one(name, concurrently)?;

        if cascade {
            let dependents = DependencyResolver::new(&mut self.connection).refresh_order(name)?;
            for dependent in &dependents {
                self.refresh_one(dependent, concurrently)?;
            }
        }

        Ok(())
    }

    fn refresh_one(&mut self, name: &SchemaObjectName, concurrently: bool) -> SchemaDefResult<()> {
        let concurrently = concurrently && Introspector::new(&mut self.connection).is_populated(name)?;
        self.execute(&statements::refresh_materialized_view(name, concurrently))
    }

    pub fn views(&mut self) -> SchemaDefResult<Vec<SchemaObject>> {
        Introspector::new(&mut self.connection).views()
    }

    pub fn functions(&mut self) -> SchemaDefResult<Vec<SchemaObject>> {
        Introspector::new(&mut self.connection).functions()
    }

    fn ensure_materialized_views_supported(&mut self) -> SchemaDefResult<()> {
        if self.connection.supports_materialized_views()? {
            return Ok(());
        }
        Err(SchemaDefError::MaterializedViewsNotSupported {
            server_version: self.connection.server_version_num()?,
        })
    }

    fn ensure_concurrent_refreshes_supported(&mut self) -> SchemaDefResult<()> {
        if self.connection.supports_concurrent_refreshes()? {
            return Ok(());
        }
        Err(SchemaDefError::ConcurrentRefreshesNotSupported {
            server_version: self.connection.server_version_num()?,
        })
    }

    fn execute(&mut self, sql: &str) -> SchemaDefResult<()> {
        self.connection.execute(sql)
    }
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use pgrx::prelude::*;
    use super::*;
    use crate::connection::stub::StubConnection;
    use crate::connection::{CatalogRow, SpiConnection};
    use crate::error::testing::assert_error_sqlstate;

    fn name(s: &str) -> SchemaObjectName {
        SchemaObjectName::parse(s).unwrap()
    }

    fn relation(oid: &str, name: &str, relkind: &str) -> CatalogRow {
        CatalogRow::from_pairs(&[
            ("oid", oid),
            ("name", name),
            ("namespace", "public"),
            ("relkind", relkind),
        ])
    }

    fn spi_adapter() -> SchemaAdapter<SpiConnection> {
        SchemaAdapter::new(SpiConnection)
    }

    #[pg_test]
    fn test_concurrent_refresh_gated_before_any_sql() {
        let mut conn = StubConnection::new(90300);
        let result = SchemaAdapter::new(&mut conn).refresh_materialized_view(&name("tests"), true, false);

        assert!(matches!(
            result,
            Err(SchemaDefError::ConcurrentRefreshesNotSupported { server_version: 90300 })
        ));
        assert!(conn.sent().is_empty());
    }

    #[pg_test]
    fn test_materialized_support_checked_first() {
        let mut conn = StubConnection::new(90200);
        let result = SchemaAdapter::new(&mut conn).refresh_materialized_view(&name("tests"), true, true);

        assert!(matches!(
            result,
            Err(SchemaDefError::MaterializedViewsNotSupported { server_version: 90200 })
        ));
        assert!(conn.sent().is_empty());
    }

    #[pg_test]
    fn test_materialized_create_and_drop_gated() {
        let mut conn = StubConnection::new(90200);
        let mut adapter = SchemaAdapter::new(&mut conn);

        assert!(adapter.create_view(&name("greetings"), "SELECT 1", true, false).is_err());
        assert!(adapter.drop_view(&name("greetings"), true).is_err());
        adapter.create_view(&name("greetings"), "SELECT 1", false, false).unwrap();

        assert_eq!(conn.executed(), ["CREATE VIEW \"greetings\" AS\nSELECT 1"]);
    }

    #[pg_test]
    fn test_plain_refresh_sends_one_statement() {
        let mut conn = StubConnection::new(170000);
        SchemaAdapter::new(&mut conn)
            .refresh_materialized_view(&name("scenic.tests"), false, false)
            .unwrap();

        assert_eq!(conn.sent(), ["REFRESH MATERIALIZED VIEW \"scenic\".\"tests\""]);
    }

    #[pg_test]
    fn test_cascade_refreshes_dependencies_first() {
        // b is listed before a although b selects from a
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

        SchemaAdapter::new(&mut conn)
            .refresh_materialized_view(&name("root"), true, true)
            .unwrap();

        assert_eq!(
            conn.executed(),
            [
                "REFRESH MATERIALIZED VIEW CONCURRENTLY \"root\"",
                "REFRESH MATERIALIZED VIEW CONCURRENTLY \"public\".\"a\"",
                "REFRESH MATERIALIZED VIEW CONCURRENTLY \"public\".\"b\"",
            ]
        );
    }

    #[pg_test]
    fn test_concurrent_refresh_of_empty_view_falls_back_to_plain() {
        let mut conn = StubConnection::new(170000).with_responder(|sql| {
            if sql.contains("relispopulated") && sql.contains("\"fresh\"") {
                vec![CatalogRow::from_pairs(&[("populated", "false")])]
            } else if sql.contains("relispopulated") {
                vec![CatalogRow::from_pairs(&[("populated", "true")])]
            } else if sql.contains("to_regclass") {
                vec![relation("1", "root", "m")]
            } else if sql.contains("d.refobjid = 1 ") {
                vec![relation("30", "fresh", "m")]
            } else {
                Vec::new()
            }
        });

        SchemaAdapter::new(&mut conn)
            .refresh_materialized_view(&name("root"), true, true)
            .unwrap();

        assert_eq!(
            conn.executed(),
            [
                "REFRESH MATERIALIZED VIEW CONCURRENTLY \"root\"",
                "REFRESH MATERIALIZED VIEW \"public\".\"fresh\"",
            ]
        );
    }

    #[pg_test]
    fn test_failed_refresh_stops_cascade() {
        let mut conn = StubConnection::new(170000).failing_on("REFRESH");
        let result = SchemaAdapter::new(&mut conn).refresh_materialized_view(&name("root"), false, true);

        assert!(result.is_err());
        assert_eq!(conn.sent().len(), 1);
        assert!(conn.executed().is_empty());
    }

    #[pg_test]
    fn test_gating_error_sqlstate() {
        let mut conn = StubConnection::new(90300);
        let result = SchemaAdapter::new(&mut conn).refresh_materialized_view(&name("tests"), true, false);
        assert_error_sqlstate(result, "0A000");
    }

    #[pg_test]
    fn test_create_view_round_trip() {
        let mut adapter = spi_adapter();
        adapter
            .create_view(&name("greetings"), "SELECT text 'hi' AS greeting;\n", false, false)
            .unwrap();

        let views = adapter.views().unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name().canonical(), "greetings");
        assert_eq!(views[0].definition(), "SELECT 'hi'::text AS greeting;");
    }

    #[pg_test]
    fn test_terminated_and_bare_bodies_store_the_same_definition() {
        let mut adapter = spi_adapter();
        adapter.create_view(&name("a"), "SELECT 1 AS one;\n", false, false).unwrap();
        adapter.create_view(&name("b"), "SELECT 1 AS one", false, false).unwrap();

        let views = adapter.views().unwrap();
        assert_eq!(views[0].definition(), views[1].definition());
    }

    #[pg_test]
    fn test_inner_semicolon_survives() {
        let mut adapter = spi_adapter();
        adapter
            .create_view(&name("punctuation"), "SELECT text 'a;b' AS x;", false, false)
            .unwrap();

        let views = adapter.views().unwrap();
        assert!(views[0].definition().contains("'a;b'"));
    }

    #[pg_test]
    fn test_materialized_view_with_no_data_and_semicolon() {
        let mut adapter = spi_adapter();
        adapter
            .create_view(&name("greetings"), "SELECT text 'hi' AS greeting; \n", true, true)
            .unwrap();

        let populated = Spi::get_one::<bool>("SELECT relispopulated FROM pg_class WHERE relname = 'greetings'")
            .unwrap()
            .unwrap();
        assert!(!populated);

        adapter.refresh_materialized_view(&name("greetings"), false, false).unwrap();
        let count = Spi::get_one::<i64>("SELECT count(*) FROM greetings").unwrap().unwrap();
        assert_eq!(count, 1);
    }

    #[pg_test]
    fn test_no_data_survives_trailing_comment() {
        let mut adapter = spi_adapter();
        adapter
            .create_view(&name("totals"), "SELECT 1 AS one -- totals\n", true, true)
            .unwrap();

        let populated = Spi::get_one::<bool>("SELECT relispopulated FROM pg_class WHERE relname = 'totals'")
            .unwrap()
            .unwrap();
        assert!(!populated);
    }

    #[pg_test]
    fn test_quoted_name_in_schema() {
        Spi::run("CREATE SCHEMA scenic").unwrap();
        Spi::run("SET LOCAL search_path TO scenic, public").unwrap();

        let mut adapter = spi_adapter();
        adapter
            .create_view(&name("scenic.\"search in a haystack\""), "SELECT text 'needle' AS haystack", true, false)
            .unwrap();

        let views = adapter.views().unwrap();
        assert_eq!(views[0].name().canonical(), "scenic.\"search in a haystack\"");
        assert!(views[0].is_materialized());

        adapter.drop_view(&name("scenic.\"search in a haystack\""), true).unwrap();
        assert!(adapter.views().unwrap().is_empty());
    }

    #[pg_test]
    fn test_replace_view() {
        let mut adapter = spi_adapter();
        adapter.create_view(&name("greetings"), "SELECT text 'hi' AS greeting", false, false).unwrap();
        adapter.replace_view(&name("greetings"), "SELECT text 'hello' AS greeting").unwrap();

        let greeting = Spi::get_one::<String>("SELECT greeting FROM greetings").unwrap().unwrap();
        assert_eq!(greeting, "hello");
    }

    #[pg_test]
    #[should_panic(expected = "cannot drop columns from view")]
    fn test_incompatible_replace_fails_in_the_database() {
        let mut adapter = spi_adapter();
        adapter
            .create_view(&name("greetings"), "SELECT text 'hi' AS greeting, 1 AS n", false, false)
            .unwrap();
        let _ = adapter.replace_view(&name("greetings"), "SELECT text 'hello' AS greeting");
    }

    #[pg_test]
    #[should_panic(expected = "concurrently")]
    fn test_concurrent_refresh_without_unique_index_reports_server_error() {
        let mut adapter = spi_adapter();
        adapter.create_view(&name("tests"), "SELECT text 'hi' AS greeting", true, false).unwrap();
        let _ = adapter.refresh_materialized_view(&name("tests"), true, false);
    }

    #[pg_test]
    fn test_concurrent_refresh_with_unique_index() {
        let mut adapter = spi_adapter();
        adapter.create_view(&name("tests"), "SELECT 1 AS id", true, false).unwrap();
        Spi::run("CREATE UNIQUE INDEX tests_id ON tests (id)").unwrap();

        adapter.refresh_materialized_view(&name("tests"), true, false).unwrap();
    }

    #[pg_test]
    fn test_concurrent_cascade_populates_empty_dependent() {
        Spi::run("CREATE TABLE readings (id int)").unwrap();
        Spi::run("INSERT INTO readings VALUES (1), (2)").unwrap();

        let mut adapter = spi_adapter();
        adapter.create_view(&name("base_mv"), "SELECT id FROM readings", true, false).unwrap();
        Spi::run("CREATE UNIQUE INDEX base_mv_id ON base_mv (id)").unwrap();
        adapter
            .create_view(&name("dependent_mv"), "SELECT id FROM base_mv", true, true)
            .unwrap();
        Spi::run("CREATE UNIQUE INDEX dependent_mv_id ON dependent_mv (id)").unwrap();

        adapter.refresh_materialized_view(&name("base_mv"), true, true).unwrap();

        let count = Spi::get_one::<i64>("SELECT count(*) FROM dependent_mv").unwrap().unwrap();
        assert_eq!(count, 2);

        // populated now, so the second pass goes concurrently throughout
        adapter.refresh_materialized_view(&name("base_mv"), true, true).unwrap();
    }

    #[pg_test]
    fn test_concurrent_refresh_of_empty_view() {
        let mut adapter = spi_adapter();
        adapter.create_view(&name("tests"), "SELECT 1 AS id", true, true).unwrap();
        Spi::run("CREATE UNIQUE INDEX tests_id ON tests (id)").unwrap();

        adapter.refresh_materialized_view(&name("tests"), true, false).unwrap();

        let count = Spi::get_one::<i64>("SELECT count(*) FROM tests").unwrap().unwrap();
        assert_eq!(count, 1);
    }

    #[pg_test]
    fn test_cascade_against_real_catalog() {
        Spi::run("CREATE TABLE readings (id int)").unwrap();

        let mut adapter = spi_adapter();
        adapter.create_view(&name("base_mv"), "SELECT id FROM readings", true, false).unwrap();
        adapter
            .create_view(&name("dependent_mv"), "SELECT id FROM base_mv", true, true)
            .unwrap();
        Spi::run("INSERT INTO readings VALUES (1), (2)").unwrap();

        adapter.refresh_materialized_view(&name("base_mv"), false, true).unwrap();

        let count = Spi::get_one::<i64>("SELECT count(*) FROM dependent_mv").unwrap().unwrap();
        assert_eq!(count, 2);
    }

    #[pg_test]
    fn test_functions_create_and_drop() {
        let mut adapter = spi_adapter();
        adapter
            .create_function(
                &name("get_result"),
                "CREATE FUNCTION get_result() RETURNS text AS $$ SELECT text 'needle'; $$ LANGUAGE sql;",
            )
            .unwrap();
        assert_eq!(adapter.functions().unwrap().len(), 1);

        adapter.drop_function(&name("get_result")).unwrap();
        assert!(adapter.functions().unwrap().is_empty());
    }
}
