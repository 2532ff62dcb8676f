use pgrx::prelude::*;
use pgrx::JsonB;

pub mod adapter;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod ddl;
pub mod definition;
pub mod dependency;
pub mod dump;
pub mod error;
pub mod migration;
pub mod name;
pub mod object;

pub use adapter::SchemaAdapter;
pub use error::{SchemaDefError, SchemaDefResult};

use connection::SpiConnection;
use dump::SchemaSerializer;

pg_module_magic!();

/// Get the version of the pg_schemadefs extension
#[pg_extern]
fn pg_schemadefs_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Initialize the extension
#[pg_guard]
extern "C" fn _PG_init() {
    config::init_gucs();
}

/// Views and materialized views on the search path, in creation order
#[pg_extern]
fn pg_schemadefs_views() -> Result<
    TableIterator<'static, (name!(name, String), name!(materialized, bool), name!(definition, String))>,
    SchemaDefError,
> {
    let views = SchemaAdapter::new(SpiConnection).views()?;
    Ok(TableIterator::new(views.into_iter().map(|view| {
        (view.name().canonical(), view.is_materialized(), view.definition().to_string())
    })))
}

/// SQL and PL/pgSQL functions on the search path, in creation order
#[pg_extern]
fn pg_schemadefs_functions(
) -> Result<TableIterator<'static, (name!(name, String), name!(definition, String))>, SchemaDefError> {
    let functions = SchemaAdapter::new(SpiConnection).functions()?;
    Ok(TableIterator::new(
        functions
            .into_iter()
            .map(|function| (function.name().canonical(), function.definition().to_string())),
    ))
}

/// Replay script recreating every view and function
#[pg_extern]
fn pg_schemadefs_dump() -> Result<String, SchemaDefError> {
    let mut adapter = SchemaAdapter::new(SpiConnection);
    SchemaSerializer::new(&mut adapter).dump()
}

/// Views and functions as a JSONB document
#[pg_extern]
fn pg_schemadefs_objects() -> Result<JsonB, SchemaDefError> {
    let mut adapter = SchemaAdapter::new(SpiConnection);
    Ok(JsonB(SchemaSerializer::new(&mut adapter).to_json()?))
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;
    use crate::migration::{Direction, SchemaCommand};
    use crate::name::SchemaObjectName;
    use crate::SchemaAdapter;
    use crate::connection::SpiConnection;

    const NEEDLE: &str =
        "CREATE OR REPLACE FUNCTION get_result() RETURNS text AS $$ SELECT text 'needle'; $$ LANGUAGE sql;\n";
    const HAYSTACK: &str =
        "CREATE OR REPLACE FUNCTION get_result() RETURNS text AS $$ SELECT text 'haystack'; $$ LANGUAGE sql;\n";

    fn get_result() -> String {
        Spi::get_one::<String>("SELECT get_result()").unwrap().unwrap()
    }

    #[pg_test]
    fn test_version_callable_from_sql() {
        let version = Spi::get_one::<String>("SELECT pg_schemadefs_version()").unwrap();
        assert_eq!(version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[pg_test]
    #[should_panic(expected = "versions start at 1")]
    fn test_error_propagates_to_postgres() {
        Spi::run("SELECT pg_schemadefs_load_definition('searches', 0)").unwrap();
    }

    #[pg_test]
    fn test_function_versions_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("functions")).unwrap();
        std::fs::write(root.path().join("functions/get_result_v01.sql"), NEEDLE).unwrap();
        std::fs::write(root.path().join("functions/get_result_v02.sql"), HAYSTACK).unwrap();

        let mut adapter = SchemaAdapter::new(SpiConnection);
        let name = SchemaObjectName::new(None, "get_result");

        SchemaCommand::CreateFunction {
            name: name.clone(),
            version: Some(1),
            sql_definition: None,
        }
        .apply(&mut adapter, root.path())
        .unwrap();
        assert_eq!(get_result(), "needle");

        let update = SchemaCommand::UpdateFunction {
            name: name.clone(),
            version: Some(2),
            sql_definition: None,
            revert_to_version: Some(1),
        };
        update.run(Direction::Up, &mut adapter, root.path()).unwrap();
        assert_eq!(get_result(), "haystack");

        // down drops version 2 and recreates from the version 1 file
        update.run(Direction::Down, &mut adapter, root.path()).unwrap();
        assert_eq!(get_result(), "needle");
    }

    #[pg_test]
    fn test_function_replace_and_restore_through_sql() {
        Spi::run(&format!(
            "SELECT pg_schemadefs_create_function('get_result', {})",
            crate::name::quote_literal(NEEDLE)
        ))
        .unwrap();
        assert_eq!(get_result(), "needle");

        Spi::run(&format!(
            "SELECT pg_schemadefs_create_function('get_result', {})",
            crate::name::quote_literal(HAYSTACK)
        ))
        .unwrap();
        assert_eq!(get_result(), "haystack");

        Spi::run("SELECT pg_schemadefs_drop_function('get_result')").unwrap();
        Spi::run(&format!(
            "SELECT pg_schemadefs_create_function('get_result', {})",
            crate::name::quote_literal(NEEDLE)
        ))
        .unwrap();
        assert_eq!(get_result(), "needle");
    }

    #[pg_test]
    fn test_views_table_function() {
        Spi::run("CREATE VIEW parents AS SELECT text 'Joe' AS name").unwrap();
        Spi::run("CREATE MATERIALIZED VIEW people AS SELECT name FROM parents").unwrap();

        let listed = Spi::get_one::<String>(
            "SELECT string_agg(v.name || ':' || v.materialized::text, ',' ORDER BY v.n) \
             FROM pg_schemadefs_views() WITH ORDINALITY AS v(name, materialized, definition, n)",
        )
        .unwrap()
        .unwrap();
        assert_eq!(listed, "parents:false,people:true");
    }

    #[pg_test]
    fn test_functions_table_function() {
        Spi::run("CREATE FUNCTION get_parent() RETURNS text AS $$ SELECT text 'joe'; $$ LANGUAGE sql")
            .unwrap();

        let count = Spi::get_one::<i64>("SELECT count(*) FROM pg_schemadefs_functions() WHERE name = 'get_parent'")
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);
    }

    #[pg_test]
    fn test_dump_and_objects_from_sql() {
        Spi::run("CREATE VIEW parents AS SELECT text 'Joe' AS name").unwrap();

        let script = Spi::get_one::<String>("SELECT pg_schemadefs_dump()").unwrap().unwrap();
        assert!(script.contains("SELECT pg_schemadefs_create_view('parents', $schemadef$"));

        let kind = Spi::get_one::<String>("SELECT pg_schemadefs_objects() -> 'views' -> 0 ->> 'kind'")
            .unwrap()
            .unwrap();
        assert_eq!(kind, "view");
    }

    #[pg_test]
    fn test_definitions_root_guc_registered() {
        let root = Spi::get_one::<String>("SELECT current_setting('pg_schemadefs.definitions_root')")
            .unwrap()
            .unwrap();
        assert_eq!(root, "db");
    }
}

/// This module is required by `cargo pgrx test` invocations.
/// It must be visible at the root of your extension crate.
#[cfg(test)]
pub mod pg_test {
    pub fn setup(_options: Vec<&str>) {
        // perform one-off initialization when the pg_test framework starts
    }

    #[must_use]
    pub fn postgresql_conf_options() -> Vec<&'static str> {
        // return any postgresql.conf settings that are required for your tests
        vec![]
    }
}
