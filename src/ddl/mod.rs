//! DDL operations callable from SQL
//!
//! Thin wrappers that parse names, open a [`SchemaAdapter`] on the backend's
//! own session and report what was done:
//!
//! ```sql
//! SELECT pg_schemadefs_create_view('searches', 'SELECT ...', materialized => true);
//! SELECT pg_schemadefs_refresh_materialized_view('searches', concurrently => true, cascade => true);
//! SELECT pg_schemadefs_run('{"command": "update_view", "name": "searches", "version": 2, "revert_to_version": 1}');
//! ```

pub mod statements;

use pgrx::prelude::*;
use pgrx::JsonB;

use crate::adapter::SchemaAdapter;
use crate::config;
use crate::connection::SpiConnection;
use crate::definition::{DefinitionKind, VersionedDefinition};
use crate::error::SchemaDefError;
use crate::migration::{Direction, SchemaCommand};
use crate::name::SchemaObjectName;

fn spi_adapter() -> SchemaAdapter<SpiConnection> {
    SchemaAdapter::new(SpiConnection)
}

fn view_label(materialized: bool) -> &'static str {
    if materialized {
        "Materialized view"
    } else {
        "View"
    }
}

/// SQL function: Create a view or materialized view
#[pg_extern]
fn pg_schemadefs_create_view(
    name: &str,
    sql_definition: &str,
    materialized: default!(bool, false),
    no_data: default!(bool, false),
) -> Result<String, SchemaDefError> {
    let name = SchemaObjectName::parse(name)?;
    spi_adapter().create_view(&name, sql_definition, materialized, no_data)?;
    Ok(format!("{} {} created", view_label(materialized), name))
}

/// SQL function: CREATE OR REPLACE a plain view
#[pg_extern]
fn pg_schemadefs_replace_view(name: &str, sql_definition: &str) -> Result<String, SchemaDefError> {
    let name = SchemaObjectName::parse(name)?;
    spi_adapter().replace_view(&name, sql_definition)?;
    Ok(format!("View {} replaced", name))
}

#[pg_extern]
fn pg_schemadefs_drop_view(name: &str, materialized: default!(bool, false)) -> Result<String, SchemaDefError> {
    let name = SchemaObjectName::parse(name)?;
    spi_adapter().drop_view(&name, materialized)?;
    Ok(format!("{} {} dropped", view_label(materialized), name))
}

/// SQL function: Run a complete `CREATE FUNCTION` statement
#[pg_extern]
fn pg_schemadefs_create_function(name: &str, sql_definition: &str) -> Result<String, SchemaDefError> {
    let name = SchemaObjectName::parse(name)?;
    spi_adapter().create_function(&name, sql_definition)?;
    Ok(format!("Function {} created", name))
}

#[pg_extern]
fn pg_schemadefs_drop_function(name: &str) -> Result<String, SchemaDefError> {
    let name = SchemaObjectName::parse(name)?;
    spi_adapter().drop_function(&name)?;
    Ok(format!("Function {} dropped", name))
}

/// SQL function: Refresh a materialized view, optionally followed by
/// everything that reads from it
#[pg_extern]
fn pg_schemadefs_refresh_materialized_view(
    name: &str,
    concurrently: default!(bool, false),
    cascade: default!(bool, false),
) -> Result<String, SchemaDefError> {
    let name = SchemaObjectName::parse(name)?;
    spi_adapter().refresh_materialized_view(&name, concurrently, cascade)?;
    Ok(format!("Materialized view {} refreshed", name))
}

/// SQL function: Text of one stored definition version
#[pg_extern]
fn pg_schemadefs_load_definition(
    name: &str,
    version: i64,
    kind: default!(&str, "'view'"),
) -> Result<String, SchemaDefError> {
    let kind: DefinitionKind = kind.parse()?;
    let root = config::definitions_root()?;
    VersionedDefinition::new(name, version, kind)?.load(&root)
}

/// SQL function: Apply a schema command, or its inverse with `direction => 'down'`
#[pg_extern]
fn pg_schemadefs_run(command: JsonB, direction: default!(&str, "'up'")) -> Result<String, SchemaDefError> {
    let direction: Direction = direction.parse()?;
    let command: SchemaCommand = serde_json::from_value(command.0)?;
    let root = config::definitions_root()?;

    command.run(direction, &mut spi_adapter(), &root)?;

    let applied = match direction {
        Direction::Up => command.label(),
        Direction::Down => command.invert()?.label(),
    };
    Ok(format!("{} {} applied", applied, command.name()))
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use pgrx::prelude::*;

    fn set_definitions_root(path: &std::path::Path) {
        Spi::run(&format!(
            "SET LOCAL pg_schemadefs.definitions_root = {}",
            crate::name::quote_literal(&path.display().to_string())
        ))
        .unwrap();
    }

    #[pg_test]
    fn test_create_view_from_sql() {
        let message = Spi::get_one::<String>(
            "SELECT pg_schemadefs_create_view('greetings', 'SELECT text ''hi'' AS greeting;')",
        )
        .unwrap()
        .unwrap();
        assert_eq!(message, "View greetings created");

        let greeting = Spi::get_one::<String>("SELECT greeting FROM greetings").unwrap().unwrap();
        assert_eq!(greeting, "hi");
    }

    #[pg_test]
    fn test_named_arguments() {
        Spi::run(
            "SELECT pg_schemadefs_create_view('greetings', 'SELECT text ''hi'' AS greeting; ', \
             materialized => true, no_data => true)",
        )
        .unwrap();
        Spi::run("SELECT pg_schemadefs_refresh_materialized_view('greetings', cascade => true)").unwrap();

        let count = Spi::get_one::<i64>("SELECT count(*) FROM greetings").unwrap().unwrap();
        assert_eq!(count, 1);

        let message = Spi::get_one::<String>("SELECT pg_schemadefs_drop_view('greetings', materialized => true)")
            .unwrap()
            .unwrap();
        assert_eq!(message, "Materialized view greetings dropped");
    }

    #[pg_test]
    #[should_panic(expected = "Invalid object name")]
    fn test_bad_name_raises() {
        Spi::run("SELECT pg_schemadefs_drop_view('a.b.c')").unwrap();
    }

    #[pg_test]
    fn test_load_definition_uses_configured_root() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("functions")).unwrap();
        std::fs::write(
            root.path().join("functions/non_public_get_users_v03.sql"),
            "CREATE FUNCTION non_public.get_users() RETURNS int AS $$ SELECT 1 $$ LANGUAGE sql;\n",
        )
        .unwrap();
        set_definitions_root(root.path());

        let sql = Spi::get_one::<String>(
            "SELECT pg_schemadefs_load_definition('non_public.get_users', 3, 'function')",
        )
        .unwrap()
        .unwrap();
        assert!(sql.starts_with("CREATE FUNCTION non_public.get_users()"));
    }

    #[pg_test]
    #[should_panic(expected = "Definition file not found")]
    fn test_load_missing_definition_raises() {
        let root = tempfile::tempdir().unwrap();
        set_definitions_root(root.path());

        Spi::run("SELECT pg_schemadefs_load_definition('searches', 1)").unwrap();
    }

    #[pg_test]
    fn test_run_up_and_down() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("views")).unwrap();
        std::fs::write(root.path().join("views/searches_v01.sql"), "SELECT 1 AS v;\n").unwrap();
        std::fs::write(root.path().join("views/searches_v02.sql"), "SELECT 2 AS v;\n").unwrap();
        set_definitions_root(root.path());

        Spi::run(r#"SELECT pg_schemadefs_run('{"command": "create_view", "name": "searches", "version": 1}')"#)
            .unwrap();
        let update = r#"'{"command": "update_view", "name": "searches", "version": 2, "revert_to_version": 1}'"#;

        Spi::run(&format!("SELECT pg_schemadefs_run({update})")).unwrap();
        assert_eq!(Spi::get_one::<i32>("SELECT v FROM searches").unwrap(), Some(2));

        let message = Spi::get_one::<String>(&format!("SELECT pg_schemadefs_run({update}, direction => 'down')"))
            .unwrap()
            .unwrap();
        assert_eq!(message, "update_view searches applied");
        assert_eq!(Spi::get_one::<i32>("SELECT v FROM searches").unwrap(), Some(1));
    }

    #[pg_test]
    #[should_panic(expected = "revert_to_version")]
    fn test_irreversible_down_raises() {
        Spi::run(r#"SELECT pg_schemadefs_run('{"command": "drop_view", "name": "searches"}', direction => 'down')"#)
            .unwrap();
    }
}
