//! Schema dump
//!
//! Renders the current views and functions as an SQL script that recreates
//! them through this extension's own functions when replayed, and as a JSON
//! snapshot. Objects keep the creation order reported by the catalog.

use serde::{Deserialize, Serialize};

use crate::adapter::SchemaAdapter;
use crate::connection::Connection;
use crate::error::SchemaDefResult;
use crate::name::quote_literal;
use crate::object::SchemaObject;

const DOLLAR_TAG: &str = "schemadef";

const VIEWS_HEADER: &str = "-- Views and materialized views managed by pg_schemadefs";
const FUNCTIONS_HEADER: &str = "-- Functions managed by pg_schemadefs";

/// Every managed object, views before functions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub views: Vec<SchemaObject>,
    pub functions: Vec<SchemaObject>,
}

impl SchemaSnapshot {
    /// Recreate every object in order: views first, then functions
    pub fn restore<C: Connection>(&self, adapter: &mut SchemaAdapter<C>) -> SchemaDefResult<()> {
        for view in &self.views {
            adapter.create_view(view.name(), view.definition(), view.is_materialized(), false)?;
        }
        for function in &self.functions {
            adapter.create_function(function.name(), function.definition())?;
        }
        Ok(())
    }
}

pub struct SchemaSerializer<'a, C: Connection> {
    adapter: &'a mut SchemaAdapter<C>,
}

impl<'a, C: Connection> SchemaSerializer<'a, C> {
    pub fn new(adapter: &'a mut SchemaAdapter<C>) -> Self {
        Self { adapter }
    }

    pub fn snapshot(&mut self) -> SchemaDefResult<SchemaSnapshot> {
        Ok(SchemaSnapshot {
            views: self.adapter.views()?,
            functions: self.adapter.functions()?,
        })
    }

    /// Replay script for the current schema; empty when nothing is managed
    pub fn dump(&mut self) -> SchemaDefResult<String> {
        let snapshot = self.snapshot()?;
        Ok(render(&snapshot.views, &snapshot.functions))
    }

    pub fn to_json(&mut self) -> SchemaDefResult<serde_json::Value> {
        Ok(serde_json::to_value(self.snapshot()?)?)
    }
}

pub fn render(views: &[SchemaObject], functions: &[SchemaObject]) -> String {
    let mut sections = Vec::new();

    if !views.is_empty() {
        let mut section = String::from(VIEWS_HEADER);
        section.push('\n');
        for view in views {
            section.push('\n');
            section.push_str(&view_directive(view));
            section.push('\n');
        }
        sections.push(section);
    }

    if !functions.is_empty() {
        let mut section = String::from(FUNCTIONS_HEADER);
        section.push('\n');
        for function in functions {
            section.push('\n');
            section.push_str(&function_directive(function));
            section.push('\n');
        }
        sections.push(section);
    }

    sections.join("\n")
}

fn view_directive(view: &SchemaObject) -> String {
    let materialized = if view.is_materialized() { ", materialized => true" } else { "" };
    format!(
        "SELECT pg_schemadefs_create_view({}, {}{});",
        quote_literal(&view.name().canonical()),
        dollar_quote(&normalize_indentation(view.definition())),
        materialized
    )
}

fn function_directive(function: &SchemaObject) -> String {
    format!(
        "SELECT pg_schemadefs_create_function({}, {});",
        quote_literal(&function.name().canonical()),
        dollar_quote(&normalize_indentation(function.definition()))
    )
}

/// Dollar-quote `body` with a tag that does not occur inside it
pub fn dollar_quote(body: &str) -> String {
    let mut tag = DOLLAR_TAG.to_string();
    let mut suffix = 0;
    while body.contains(&format!("${tag}$")) {
        suffix += 1;
        tag = format!("{DOLLAR_TAG}{suffix}");
    }
    format!("${tag}${body}${tag}$")
}

/// Drop blank leading and trailing lines and the indentation shared by
/// every non-blank line. Line endings, `\r` included, are kept as found.
pub fn normalize_indentation(body: &str) -> String {
    let lines: Vec<&str> = body.split('\n').collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return String::new();
    };
    let lines = &lines[first..=last];

    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.bytes().take_while(|b| *b == b' ' || *b == b'\t').count())
        .min()
        .unwrap_or(0);

    let mut normalized = lines
        .iter()
        .map(|l| if l.trim().is_empty() { blank_line(l) } else { &l[indent..] })
        .collect::<Vec<_>>()
        .join("\n");

    // the trailing line break goes with the dropped tail, CR half included
    if normalized.ends_with('\r') {
        normalized.pop();
    }
    normalized
}

fn blank_line(line: &str) -> &str {
    if line.ends_with('\r') {
        "\r"
    } else {
        ""
    }
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use pgrx::prelude::*;
    use super::*;
    use crate::connection::SpiConnection;
    use crate::name::SchemaObjectName;

    fn name(s: &str) -> SchemaObjectName {
        SchemaObjectName::parse(s).unwrap()
    }

    #[test]
    fn test_normalize_removes_common_indent_only() {
        let body = "\n    SELECT a,\n      b\n    FROM t;\n\n";
        assert_eq!(normalize_indentation(body), "SELECT a,\n  b\nFROM t;");
    }

    #[test]
    fn test_normalize_leaves_unindented_text_alone() {
        let body = "SELECT a,\n    b\n   FROM t;";
        assert_eq!(normalize_indentation(body), body);
        assert_eq!(normalize_indentation("   \n  "), "");
    }

    #[test]
    fn test_normalize_keeps_crlf_line_endings() {
        let body = "CREATE OR REPLACE FUNCTION public.f()\r\n RETURNS text\r\n LANGUAGE sql\r\n\r\nAS $function$ SELECT 'x'; $function$\r\n";
        assert_eq!(
            normalize_indentation(body),
            "CREATE OR REPLACE FUNCTION public.f()\r\n RETURNS text\r\n LANGUAGE sql\r\n\r\nAS $function$ SELECT 'x'; $function$"
        );

        let indented = "\r\n    SELECT a,\r\n      b\r\n    FROM t;\r\n";
        assert_eq!(normalize_indentation(indented), "SELECT a,\r\n  b\r\nFROM t;");
    }

    #[test]
    fn test_dollar_quote_avoids_collisions() {
        assert_eq!(dollar_quote("SELECT 1;"), "$schemadef$SELECT 1;$schemadef$");
        assert_eq!(
            dollar_quote("SELECT '$schemadef$';"),
            "$schemadef1$SELECT '$schemadef$';$schemadef1$"
        );
    }

    #[test]
    fn test_render_views_then_functions() {
        let views = vec![
            SchemaObject::view(name("parents"), "SELECT 'Joe'::text AS name;", false),
            SchemaObject::view(name("scenic.\"search in a haystack\""), "SELECT 'needle'::text AS haystack;", true),
        ];
        let functions = vec![SchemaObject::function(
            name("get_result"),
            "CREATE OR REPLACE FUNCTION public.get_result()\n RETURNS text\n LANGUAGE sql\nAS $function$ SELECT text 'needle'; $function$",
        )];

        let script = render(&views, &functions);
        let expected = "\
-- Views and materialized views managed by pg_schemadefs

SELECT pg_schemadefs_create_view('parents', $schemadef$SELECT 'Joe'::text AS name;$schemadef$);

SELECT pg_schemadefs_create_view('scenic.\"search in a haystack\"', $schemadef$SELECT 'needle'::text AS haystack;$schemadef$, materialized => true);

-- Functions managed by pg_schemadefs

SELECT pg_schemadefs_create_function('get_result', $schemadef$CREATE OR REPLACE FUNCTION public.get_result()
 RETURNS text
 LANGUAGE sql
AS $function$ SELECT text 'needle'; $function$$schemadef$);
";
        assert_eq!(script, expected);
    }

    #[test]
    fn test_render_nothing() {
        assert_eq!(render(&[], &[]), "");
    }

    #[test]
    fn test_render_keeps_given_order() {
        let views = vec![
            SchemaObject::view(name("zebras"), "SELECT 1;", false),
            SchemaObject::view(name("aardvarks"), "SELECT 2;", false),
        ];
        let script = render(&views, &[]);
        assert!(script.find("zebras").unwrap() < script.find("aardvarks").unwrap());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = SchemaSnapshot {
            views: vec![SchemaObject::view(name("parents"), "SELECT 1;", true)],
            functions: Vec::new(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["views"][0]["kind"], "materialized_view");
        assert_eq!(json["views"][0]["name"], "parents");
        assert_eq!(json["functions"], serde_json::json!([]));
    }

    fn create_fixtures() {
        Spi::run("CREATE VIEW parents AS SELECT text 'Joe' AS name").unwrap();
        Spi::run("CREATE SCHEMA scenic").unwrap();
        Spi::run(
            "CREATE MATERIALIZED VIEW scenic.\"search in a haystack\" AS \
             SELECT text 'needle' AS haystack",
        )
        .unwrap();
        Spi::run(
            "CREATE FUNCTION get_result() RETURNS text AS $$ SELECT text 'needle'; $$ LANGUAGE sql",
        )
        .unwrap();
        Spi::run("SET LOCAL search_path TO public, scenic").unwrap();
    }

    fn drop_fixtures() {
        Spi::run("DROP VIEW parents").unwrap();
        Spi::run("DROP MATERIALIZED VIEW scenic.\"search in a haystack\"").unwrap();
        Spi::run("DROP FUNCTION get_result()").unwrap();
    }

    #[pg_test]
    fn test_dump_replays_to_equal_objects() {
        create_fixtures();

        let mut adapter = SchemaAdapter::new(SpiConnection);
        let before = SchemaSerializer::new(&mut adapter).snapshot().unwrap();
        let script = SchemaSerializer::new(&mut adapter).dump().unwrap();
        assert_eq!(before.views.len(), 2);
        assert_eq!(before.functions.len(), 1);

        drop_fixtures();
        assert!(SchemaSerializer::new(&mut adapter).dump().unwrap().is_empty());

        Spi::run(&script).unwrap();

        let after = SchemaSerializer::new(&mut adapter).snapshot().unwrap();
        assert_eq!(after, before);
        assert_eq!(SchemaSerializer::new(&mut adapter).dump().unwrap(), script);
    }

    #[pg_test]
    fn test_snapshot_restores_through_the_adapter() {
        create_fixtures();

        let mut adapter = SchemaAdapter::new(SpiConnection);
        let before = SchemaSerializer::new(&mut adapter).snapshot().unwrap();
        let json = serde_json::to_string(&before).unwrap();

        drop_fixtures();

        let restored: SchemaSnapshot = serde_json::from_str(&json).unwrap();
        restored.restore(&mut adapter).unwrap();

        assert_eq!(SchemaSerializer::new(&mut adapter).snapshot().unwrap(), before);
    }
}
