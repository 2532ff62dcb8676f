//! DDL statement templates
//!
//! All statements the adapter sends are built here. Names always go through
//! [`SchemaObjectName::to_sql`]; view bodies lose their terminal semicolon so
//! the surrounding statement owns it, and sit on lines of their own so a
//! trailing `--` comment cannot reach the clauses that follow.

use crate::name::SchemaObjectName;
use crate::object::ObjectKind;

/// Strip one trailing statement terminator (and surrounding whitespace).
/// Semicolons anywhere else in the body are left alone.
pub fn strip_trailing_terminator(body: &str) -> &str {
    let trimmed = body.trim_end();
    trimmed.strip_suffix(';').map_or(trimmed, str::trim_end)
}

pub fn create_object(name: &SchemaObjectName, body: &str, kind: ObjectKind, no_data: bool) -> String {
    match kind {
        ObjectKind::View => format!("CREATE VIEW {} AS\n{}", name.to_sql(), strip_trailing_terminator(body)),
        ObjectKind::MaterializedView => {
            let mut sql = format!(
                "CREATE MATERIALIZED VIEW {} AS\n{}",
                name.to_sql(),
                strip_trailing_terminator(body)
            );
            if no_data {
                sql.push_str("\nWITH NO DATA");
            }
            sql
        }
        ObjectKind::Function => create_function(body),
    }
}

/// Function definitions are complete `CREATE FUNCTION` statements; sent verbatim
pub fn create_function(definition: &str) -> String {
    definition.to_string()
}

pub fn replace_view(name: &SchemaObjectName, body: &str) -> String {
    format!("CREATE OR REPLACE VIEW {} AS\n{}", name.to_sql(), strip_trailing_terminator(body))
}

pub fn drop_object(name: &SchemaObjectName, kind: ObjectKind) -> String {
    match kind {
        ObjectKind::View => format!("DROP VIEW {}", name.to_sql()),
        ObjectKind::MaterializedView => format!("DROP MATERIALIZED VIEW {}", name.to_sql()),
        ObjectKind::Function => format!("DROP FUNCTION {}", name.to_sql()),
    }
}

pub fn refresh_materialized_view(name: &SchemaObjectName, concurrently: bool) -> String {
    if concurrently {
        format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {}", name.to_sql())
    } else {
        format!("REFRESH MATERIALIZED VIEW {}", name.to_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> SchemaObjectName {
        SchemaObjectName::parse(s).unwrap()
    }

    #[test]
    fn test_strip_trailing_terminator() {
        assert_eq!(strip_trailing_terminator("SELECT 1;\n"), "SELECT 1");
        assert_eq!(strip_trailing_terminator("SELECT 1"), "SELECT 1");
        assert_eq!(strip_trailing_terminator("SELECT text 'hi' AS greeting; \n"), "SELECT text 'hi' AS greeting");
        assert_eq!(strip_trailing_terminator("SELECT 1 ;  "), "SELECT 1");
    }

    #[test]
    fn test_inner_semicolons_are_preserved() {
        assert_eq!(strip_trailing_terminator("SELECT 'a;b' AS x"), "SELECT 'a;b' AS x");
        assert_eq!(strip_trailing_terminator("SELECT 'a;b' AS x;"), "SELECT 'a;b' AS x");
        assert_eq!(strip_trailing_terminator("SELECT ';'"), "SELECT ';'");
    }

    #[test]
    fn test_terminated_and_bare_bodies_render_identically() {
        let n = name("greetings");
        assert_eq!(
            create_object(&n, "SELECT 1;\n", ObjectKind::View, false),
            create_object(&n, "SELECT 1", ObjectKind::View, false)
        );
    }

    #[test]
    fn test_create_view_statements() {
        let n = name("scenic.\"search in a haystack\"");

        assert_eq!(
            create_object(&n, "SELECT 1;", ObjectKind::View, false),
            "CREATE VIEW \"scenic\".\"search in a haystack\" AS\nSELECT 1"
        );
        assert_eq!(
            create_object(&n, "SELECT 1;", ObjectKind::MaterializedView, false),
            "CREATE MATERIALIZED VIEW \"scenic\".\"search in a haystack\" AS\nSELECT 1"
        );
    }

    #[test]
    fn test_no_data_follows_the_stripped_body() {
        let sql = create_object(&name("greetings"), "SELECT text 'hi' AS greeting; \n", ObjectKind::MaterializedView, true);
        assert_eq!(sql, "CREATE MATERIALIZED VIEW \"greetings\" AS\nSELECT text 'hi' AS greeting\nWITH NO DATA");
    }

    #[test]
    fn test_trailing_comment_cannot_swallow_no_data() {
        let sql = create_object(&name("totals"), "SELECT 1 AS one -- totals\n", ObjectKind::MaterializedView, true);
        assert_eq!(sql, "CREATE MATERIALIZED VIEW \"totals\" AS\nSELECT 1 AS one -- totals\nWITH NO DATA");
        assert_eq!(sql.lines().last(), Some("WITH NO DATA"));
    }

    #[test]
    fn test_no_data_ignored_for_plain_views() {
        let sql = create_object(&name("greetings"), "SELECT 1", ObjectKind::View, true);
        assert_eq!(sql, "CREATE VIEW \"greetings\" AS\nSELECT 1");
    }

    #[test]
    fn test_function_definitions_are_not_trimmed() {
        let definition = "CREATE FUNCTION greetings() RETURNS text AS $$ SELECT 'hi'; $$ LANGUAGE sql;\n";
        assert_eq!(create_function(definition), definition);
        assert_eq!(create_object(&name("greetings"), definition, ObjectKind::Function, false), definition);
    }

    #[test]
    fn test_replace_view_statement() {
        assert_eq!(
            replace_view(&name("greetings"), "SELECT text 'hello' AS greeting;\n"),
            "CREATE OR REPLACE VIEW \"greetings\" AS\nSELECT text 'hello' AS greeting"
        );
    }

    #[test]
    fn test_drop_statements() {
        let n = name("greetings");
        assert_eq!(drop_object(&n, ObjectKind::View), "DROP VIEW \"greetings\"");
        assert_eq!(drop_object(&n, ObjectKind::MaterializedView), "DROP MATERIALIZED VIEW \"greetings\"");
        assert_eq!(drop_object(&n, ObjectKind::Function), "DROP FUNCTION \"greetings\"");
    }

    #[test]
    fn test_refresh_statements() {
        let n = name("tests");
        assert_eq!(refresh_materialized_view(&n, false), "REFRESH MATERIALIZED VIEW \"tests\"");
        assert_eq!(
            refresh_materialized_view(&n, true),
            "REFRESH MATERIALIZED VIEW CONCURRENTLY \"tests\""
        );
    }
}
