//! Reversible schema commands
//!
//! A migration records commands such as `update_view` together with enough
//! information (the version to go back to) to run them in reverse without
//! asking the database what it looked like before.
//!
//! ```json
//! {"command": "update_view", "name": "searches", "version": 2, "revert_to_version": 1}
//! ```

use std::path::Path;
use std::str::FromStr;

use pgrx::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adapter::SchemaAdapter;
use crate::connection::Connection;
use crate::definition::{DefinitionKind, VersionedDefinition};
use crate::error::{SchemaDefError, SchemaDefResult};
use crate::name::SchemaObjectName;

/// Where a command gets its SQL from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionSource {
    /// A stored definition file
    Version(i64),
    /// Inline SQL
    Sql(String),
}

impl DefinitionSource {
    fn from_fields(
        command: &str,
        version: Option<i64>,
        sql_definition: Option<&str>,
        default_to_first: bool,
    ) -> SchemaDefResult<Self> {
        match (version, sql_definition) {
            (Some(_), Some(_)) => Err(SchemaDefError::InvalidCommand {
                reason: format!("{command}: version and sql_definition cannot both be set"),
            }),
            (Some(version), None) => Ok(DefinitionSource::Version(version)),
            (None, Some(sql)) => Ok(DefinitionSource::Sql(sql.to_string())),
            (None, None) if default_to_first => Ok(DefinitionSource::Version(1)),
            (None, None) => Err(SchemaDefError::InvalidCommand {
                reason: format!("{command}: version or sql_definition must be specified"),
            }),
        }
    }

    pub fn resolve(&self, root: &Path, name: &SchemaObjectName, kind: DefinitionKind) -> SchemaDefResult<String> {
        match self {
            DefinitionSource::Sql(sql) => Ok(sql.clone()),
            DefinitionSource::Version(version) => {
                VersionedDefinition::new(&name.logical_name(), *version, kind)?.load(root)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl FromStr for Direction {
    type Err = SchemaDefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(SchemaDefError::InvalidCommand {
                reason: format!("unknown direction '{other}' (expected 'up' or 'down')"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SchemaCommand {
    CreateView {
        name: SchemaObjectName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql_definition: Option<String>,
        #[serde(default)]
        materialized: bool,
        #[serde(default)]
        no_data: bool,
    },
    DropView {
        name: SchemaObjectName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revert_to_version: Option<i64>,
        #[serde(default)]
        materialized: bool,
    },
    UpdateView {
        name: SchemaObjectName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql_definition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revert_to_version: Option<i64>,
        #[serde(default)]
        materialized: bool,
        #[serde(default)]
        no_data: bool,
    },
    ReplaceView {
        name: SchemaObjectName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql_definition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revert_to_version: Option<i64>,
        #[serde(default)]
        materialized: bool,
    },
    CreateFunction {
        name: SchemaObjectName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql_definition: Option<String>,
    },
    DropFunction {
        name: SchemaObjectName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revert_to_version: Option<i64>,
    },
    UpdateFunction {
        name: SchemaObjectName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql_definition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revert_to_version: Option<i64>,
    },
}

impl SchemaCommand {
    pub fn label(&self) -> &'static str {
        match self {
            SchemaCommand::CreateView { .. } => "create_view",
            SchemaCommand::DropView { .. } => "drop_view",
            SchemaCommand::UpdateView { .. } => "update_view",
            SchemaCommand::ReplaceView { .. } => "replace_view",
            SchemaCommand::CreateFunction { .. } => "create_function",
            SchemaCommand::DropFunction { .. } => "drop_function",
            SchemaCommand::UpdateFunction { .. } => "update_function",
        }
    }

    pub fn name(&self) -> &SchemaObjectName {
        match self {
            SchemaCommand::CreateView { name, .. }
            | SchemaCommand::DropView { name, .. }
            | SchemaCommand::UpdateView { name, .. }
            | SchemaCommand::ReplaceView { name, .. }
            | SchemaCommand::CreateFunction { name, .. }
            | SchemaCommand::DropFunction { name, .. }
            | SchemaCommand::UpdateFunction { name, .. } => name,
        }
    }

    /// The command that undoes this one.
    ///
    /// Creating is undone by dropping. Dropping, updating and replacing can
    /// only be undone when `revert_to_version` names the definition to go
    /// back to.
    pub fn invert(&self) -> SchemaDefResult<SchemaCommand> {
        let inverse = match self {
            SchemaCommand::CreateView { name, version, materialized, .. } => SchemaCommand::DropView {
                name: name.clone(),
                revert_to_version: *version,
                materialized: *materialized,
            },
            SchemaCommand::DropView { name, revert_to_version, materialized } => SchemaCommand::CreateView {
                name: name.clone(),
                version: Some(self.required_revert_version(*revert_to_version)?),
                sql_definition: None,
                materialized: *materialized,
                no_data: false,
            },
            SchemaCommand::UpdateView {
                name,
                version,
                revert_to_version,
                materialized,
                no_data,
                ..
            } => SchemaCommand::UpdateView {
                name: name.clone(),
                version: Some(self.required_revert_version(*revert_to_version)?),
                sql_definition: None,
                revert_to_version: *version,
                materialized: *materialized,
                no_data: *no_data,
            },
            SchemaCommand::ReplaceView {
                name,
                version,
                revert_to_version,
                materialized,
                ..
            } => SchemaCommand::ReplaceView {
                name: name.clone(),
                version: Some(self.required_revert_version(*revert_to_version)?),
                sql_definition: None,
                revert_to_version: *version,
                materialized: *materialized,
            },
            SchemaCommand::CreateFunction { name, version, .. } => SchemaCommand::DropFunction {
                name: name.clone(),
                revert_to_version: *version,
            },
            SchemaCommand::DropFunction { name, revert_to_version } => SchemaCommand::CreateFunction {
                name: name.clone(),
                version: Some(self.required_revert_version(*revert_to_version)?),
                sql_definition: None,
            },
            SchemaCommand::UpdateFunction {
                name,
                version,
                revert_to_version,
                ..
            } => SchemaCommand::UpdateFunction {
                name: name.clone(),
                version: Some(self.required_revert_version(*revert_to_version)?),
                sql_definition: None,
                revert_to_version: *version,
            },
        };
        Ok(inverse)
    }

    fn required_revert_version(&self, revert_to_version: Option<i64>) -> SchemaDefResult<i64> {
        revert_to_version.ok_or_else(|| SchemaDefError::IrreversibleCommand {
            command: self.label().to_string(),
            reason: "it is reversible only if given a revert_to_version".to_string(),
        })
    }

    /// Run the command. Definitions are read from `root` before any
    /// statement is sent.
    pub fn apply<C: Connection>(&self, adapter: &mut SchemaAdapter<C>, root: &Path) -> SchemaDefResult<()> {
        debug1!("pg_schemadefs: applying {} {}", self.label(), self.name());

        match self {
            SchemaCommand::CreateView {
                name,
                version,
                sql_definition,
                materialized,
                no_data,
            } => {
                let sql = DefinitionSource::from_fields(self.label(), *version, sql_definition.as_deref(), true)?
                    .resolve(root, name, DefinitionKind::View)?;
                adapter.create_view(name, &sql, *materialized, *no_data)
            }
            SchemaCommand::DropView { name, materialized, .. } => adapter.drop_view(name, *materialized),
            SchemaCommand::UpdateView {
                name,
                version,
                sql_definition,
                materialized,
                no_data,
                ..
            } => {
                let sql = DefinitionSource::from_fields(self.label(), *version, sql_definition.as_deref(), false)?
                    .resolve(root, name, DefinitionKind::View)?;
                adapter.drop_view(name, *materialized)?;
                adapter.create_view(name, &sql, *materialized, *no_data)
            }
            SchemaCommand::ReplaceView {
                name,
                version,
                sql_definition,
                materialized,
                ..
            } => {
                if *materialized {
                    return Err(SchemaDefError::InvalidCommand {
                        reason: "materialized views cannot be replaced; use update_view".to_string(),
                    });
                }
                let sql = DefinitionSource::from_fields(self.label(), *version, sql_definition.as_deref(), false)?
                    .resolve(root, name, DefinitionKind::View)?;
                adapter.replace_view(name, &sql)
            }
            SchemaCommand::CreateFunction {
                name,
                version,
                sql_definition,
            } => {
                let sql = DefinitionSource::from_fields(self.label(), *version, sql_definition.as_deref(), true)?
                    .resolve(root, name, DefinitionKind::Function)?;
                adapter.create_function(name, &sql)
            }
            SchemaCommand::DropFunction { name, .. } => adapter.drop_function(name),
            SchemaCommand::UpdateFunction {
                name,
                version,
                sql_definition,
                ..
            } => {
                let sql = DefinitionSource::from_fields(self.label(), *version, sql_definition.as_deref(), false)?
                    .resolve(root, name, DefinitionKind::Function)?;
                adapter.drop_function(name)?;
                adapter.create_function(name, &sql)
            }
        }
    }

    /// Apply going up, or apply the inverse going down
    pub fn run<C: Connection>(
        &self,
        direction: Direction,
        adapter: &mut SchemaAdapter<C>,
        root: &Path,
    ) -> SchemaDefResult<()> {
        match direction {
            Direction::Up => self.apply(adapter, root),
            Direction::Down => self.invert()?.apply(adapter, root),
        }
    }
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use pgrx::prelude::*;
    use super::*;
    use crate::connection::stub::StubConnection;
    use crate::error::testing::assert_error_contains;

    fn name(s: &str) -> SchemaObjectName {
        SchemaObjectName::parse(s).unwrap()
    }

    fn definitions_root() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("views")).unwrap();
        std::fs::write(root.path().join("views/searches_v01.sql"), "SELECT 1 AS v;\n").unwrap();
        std::fs::write(root.path().join("views/searches_v02.sql"), "SELECT 2 AS v;\n").unwrap();
        root
    }

    #[test]
    fn test_create_view_inverts_to_drop() {
        let create = SchemaCommand::CreateView {
            name: name("searches"),
            version: Some(1),
            sql_definition: None,
            materialized: true,
            no_data: false,
        };

        let inverse = create.invert().unwrap();
        assert_eq!(
            inverse,
            SchemaCommand::DropView {
                name: name("searches"),
                revert_to_version: Some(1),
                materialized: true,
            }
        );
        assert_eq!(inverse.invert().unwrap().label(), "create_view");
    }

    #[test]
    fn test_update_view_swaps_versions() {
        let update = SchemaCommand::UpdateView {
            name: name("searches"),
            version: Some(3),
            sql_definition: None,
            revert_to_version: Some(2),
            materialized: false,
            no_data: false,
        };

        match update.invert().unwrap() {
            SchemaCommand::UpdateView { version, revert_to_version, .. } => {
                assert_eq!(version, Some(2));
                assert_eq!(revert_to_version, Some(3));
            }
            other => panic!("expected update_view, got {other:?}"),
        }
    }

    #[test]
    fn test_irreversible_without_revert_version() {
        let commands = [
            SchemaCommand::DropView {
                name: name("searches"),
                revert_to_version: None,
                materialized: false,
            },
            SchemaCommand::UpdateFunction {
                name: name("get_result"),
                version: Some(2),
                sql_definition: None,
                revert_to_version: None,
            },
            SchemaCommand::ReplaceView {
                name: name("searches"),
                version: Some(2),
                sql_definition: None,
                revert_to_version: None,
                materialized: false,
            },
        ];

        for command in &commands {
            match command.invert() {
                Err(SchemaDefError::IrreversibleCommand { command: label, .. }) => {
                    assert_eq!(label, command.label());
                }
                other => panic!("expected IrreversibleCommand, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_function_commands_invert() {
        let drop = SchemaCommand::DropFunction {
            name: name("non_public.get_users"),
            revert_to_version: Some(4),
        };
        assert_eq!(
            drop.invert().unwrap(),
            SchemaCommand::CreateFunction {
                name: name("non_public.get_users"),
                version: Some(4),
                sql_definition: None,
            }
        );
    }

    #[test]
    fn test_commands_from_json() {
        let command: SchemaCommand = serde_json::from_str(
            r#"{"command": "create_view", "name": "scenic.\"search in a haystack\"", "version": 2, "materialized": true}"#,
        )
        .unwrap();

        assert_eq!(
            command,
            SchemaCommand::CreateView {
                name: name("scenic.\"search in a haystack\""),
                version: Some(2),
                sql_definition: None,
                materialized: true,
                no_data: false,
            }
        );

        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["command"], "create_view");
        assert!(json.get("sql_definition").is_none());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let result = serde_json::from_str::<SchemaCommand>(r#"{"command": "truncate_view", "name": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_definition_source_rules() {
        assert_eq!(
            DefinitionSource::from_fields("create_view", None, None, true).unwrap(),
            DefinitionSource::Version(1)
        );
        assert!(matches!(
            DefinitionSource::from_fields("update_view", None, None, false),
            Err(SchemaDefError::InvalidCommand { .. })
        ));
        assert!(matches!(
            DefinitionSource::from_fields("create_view", Some(1), Some("SELECT 1"), true),
            Err(SchemaDefError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn test_resolve_reads_versioned_file() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("views")).unwrap();
        std::fs::write(root.path().join("views/searches_v02.sql"), "SELECT 2 AS v;\n").unwrap();

        let sql = DefinitionSource::Version(2)
            .resolve(root.path(), &name("searches"), DefinitionKind::View)
            .unwrap();
        assert_eq!(sql, "SELECT 2 AS v;\n");

        assert!(matches!(
            DefinitionSource::Version(3).resolve(root.path(), &name("searches"), DefinitionKind::View),
            Err(SchemaDefError::MissingDefinition { .. })
        ));
    }

    #[test]
    fn test_resolve_uses_unquoted_file_stem() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("views")).unwrap();
        std::fs::write(
            root.path().join("views/scenic_search in a haystack_v01.sql"),
            "SELECT text 'needle' AS haystack;\n",
        )
        .unwrap();

        let sql = DefinitionSource::Version(1)
            .resolve(root.path(), &name("scenic.\"search in a haystack\""), DefinitionKind::View)
            .unwrap();
        assert_eq!(sql, "SELECT text 'needle' AS haystack;\n");

        let missing = DefinitionSource::Version(2).resolve(
            root.path(),
            &name("scenic.\"search in a haystack\""),
            DefinitionKind::View,
        );
        assert_error_contains(missing, "scenic_search in a haystack_v02.sql");
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!(" DOWN ".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[pg_test]
    fn test_update_materialized_view_is_drop_then_create() {
        let root = definitions_root();
        let mut conn = StubConnection::new(170000);
        let command = SchemaCommand::UpdateView {
            name: name("searches"),
            version: Some(2),
            sql_definition: None,
            revert_to_version: Some(1),
            materialized: true,
            no_data: true,
        };

        command.apply(&mut SchemaAdapter::new(&mut conn), root.path()).unwrap();

        assert_eq!(
            conn.executed(),
            [
                "DROP MATERIALIZED VIEW \"searches\"",
                "CREATE MATERIALIZED VIEW \"searches\" AS\nSELECT 2 AS v\nWITH NO DATA",
            ]
        );
    }

    #[pg_test]
    fn test_down_runs_the_inverse() {
        let root = definitions_root();
        let mut conn = StubConnection::new(170000);
        let command = SchemaCommand::ReplaceView {
            name: name("searches"),
            version: Some(2),
            sql_definition: None,
            revert_to_version: Some(1),
            materialized: false,
        };

        command
            .run(Direction::Down, &mut SchemaAdapter::new(&mut conn), root.path())
            .unwrap();

        assert_eq!(conn.executed(), ["CREATE OR REPLACE VIEW \"searches\" AS\nSELECT 1 AS v"]);
    }

    #[pg_test]
    fn test_missing_definition_sends_nothing() {
        let root = definitions_root();
        let mut conn = StubConnection::new(170000);
        let command = SchemaCommand::UpdateView {
            name: name("searches"),
            version: Some(7),
            sql_definition: None,
            revert_to_version: Some(2),
            materialized: false,
            no_data: false,
        };

        let result = command.apply(&mut SchemaAdapter::new(&mut conn), root.path());

        assert!(matches!(result, Err(SchemaDefError::MissingDefinition { .. })));
        assert!(conn.sent().is_empty());
    }

    #[pg_test]
    fn test_replace_materialized_view_rejected() {
        let root = definitions_root();
        let mut conn = StubConnection::new(170000);
        let command = SchemaCommand::ReplaceView {
            name: name("searches"),
            version: Some(2),
            sql_definition: None,
            revert_to_version: None,
            materialized: true,
        };

        let result = command.apply(&mut SchemaAdapter::new(&mut conn), root.path());

        assert!(matches!(result, Err(SchemaDefError::InvalidCommand { .. })));
        assert!(conn.sent().is_empty());
    }

    #[pg_test]
    fn test_create_function_from_inline_sql() {
        let root = definitions_root();
        let mut conn = StubConnection::new(170000);
        let definition = "CREATE FUNCTION get_result() RETURNS text AS $$ SELECT text 'needle'; $$ LANGUAGE sql;";
        let command = SchemaCommand::CreateFunction {
            name: name("get_result"),
            version: None,
            sql_definition: Some(definition.to_string()),
        };

        command.apply(&mut SchemaAdapter::new(&mut conn), root.path()).unwrap();

        assert_eq!(conn.executed(), [definition]);
    }
}
