//! Versioned Definitions: SQL files on disk
//!
//! Each view or function version lives in its own file:
//!
//! ```text
//! <root>/views/searches_v01.sql
//! <root>/views/searches_v02.sql
//! <root>/functions/non_public_get_users_v01.sql   -- logical name non_public.get_users
//! ```
//!
//! Versions are zero-padded to two digits and keep growing past 99
//! (`_v100`). Ordering always uses the integer value, never the padded text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{FUNCTIONS_DIR, VERSION_WIDTH, VIEWS_DIR};
use crate::error::{SchemaDefError, SchemaDefResult};

static DEFINITION_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<stem>.+)_v(?P<version>\d+)\.sql$").expect("definition file pattern compiles"));

/// What a definition file defines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    View,
    Function,
}

impl DefinitionKind {
    /// Directory under the definitions root
    pub fn directory(self) -> &'static str {
        match self {
            DefinitionKind::View => VIEWS_DIR,
            DefinitionKind::Function => FUNCTIONS_DIR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DefinitionKind::View => "view",
            DefinitionKind::Function => "function",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefinitionKind {
    type Err = SchemaDefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(DefinitionKind::View),
            "function" => Ok(DefinitionKind::Function),
            _ => Err(SchemaDefError::UnknownDefinitionKind { kind: s.to_string() }),
        }
    }
}

/// One version of a view or function definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDefinition {
    logical_name: String,
    version: u32,
    kind: DefinitionKind,
}

impl VersionedDefinition {
    pub fn new(logical_name: &str, version: i64, kind: DefinitionKind) -> SchemaDefResult<Self> {
        let version = u32::try_from(version)
            .ok()
            .filter(|v| *v >= 1)
            .ok_or(SchemaDefError::InvalidVersion { version })?;

        Ok(Self {
            logical_name: logical_name.to_string(),
            version,
            kind,
        })
    }

    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn kind(&self) -> DefinitionKind {
        self.kind
    }

    /// Version left-padded with zeros to at least two digits
    pub fn padded_version(&self) -> String {
        format!("{:0width$}", self.version, width = VERSION_WIDTH)
    }

    pub fn file_name(&self) -> String {
        format!("{}_v{}.sql", file_stem(&self.logical_name), self.padded_version())
    }

    /// Path relative to the definitions root
    pub fn path(&self) -> PathBuf {
        Path::new(self.kind.directory()).join(self.file_name())
    }

    pub fn full_path(&self, root: &Path) -> PathBuf {
        root.join(self.path())
    }

    /// Read the SQL text. A blank file means the scaffolded definition was
    /// never filled in.
    pub fn load(&self, root: &Path) -> SchemaDefResult<String> {
        let path = self.full_path(root);
        let display = path.display().to_string();

        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SchemaDefError::MissingDefinition { path: display.clone() },
            _ => SchemaDefError::IoError {
                path: display.clone(),
                message: e.to_string(),
            },
        })?;

        if content.trim().is_empty() {
            return Err(SchemaDefError::EmptyDefinition { path: display });
        }

        Ok(content)
    }
}

/// Filename stem for a logical name; the namespace dot becomes `_`
pub fn file_stem(logical_name: &str) -> String {
    logical_name.replace('.', "_")
}

/// Existing versions of `logical_name`, ascending by integer value
pub fn versions(root: &Path, kind: DefinitionKind, logical_name: &str) -> SchemaDefResult<Vec<u32>> {
    let dir = root.join(kind.directory());
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(SchemaDefError::IoError {
                path: dir.display().to_string(),
                message: e.to_string(),
            })
        }
    };

    let stem = file_stem(logical_name);
    let mut found = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| SchemaDefError::IoError {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };

        if let Some(caps) = DEFINITION_FILE.captures(file_name) {
            if caps["stem"] != stem {
                continue;
            }
            if let Ok(version) = caps["version"].parse::<u32>() {
                found.push(version);
            }
        }
    }

    found.sort_unstable();
    found.dedup();
    Ok(found)
}

/// Version the next definition file should carry
pub fn next_version(root: &Path, kind: DefinitionKind, logical_name: &str) -> SchemaDefResult<u32> {
    Ok(versions(root, kind, logical_name)?
        .last()
        .map_or(1, |latest| latest + 1))
}

/// Create the next definition file for `logical_name`.
///
/// The new file starts as a copy of the latest version so edits show up as
/// a diff; the first version starts empty.
pub fn scaffold(root: &Path, kind: DefinitionKind, logical_name: &str) -> SchemaDefResult<VersionedDefinition> {
    let existing = versions(root, kind, logical_name)?;
    let version = existing.last().map_or(1, |latest| latest + 1);
    let definition = VersionedDefinition::new(logical_name, i64::from(version), kind)?;

    let seed = match existing.last() {
        Some(previous) => {
            let previous = VersionedDefinition::new(logical_name, i64::from(*previous), kind)?;
            let path = previous.full_path(root);
            fs::read_to_string(&path).map_err(|e| SchemaDefError::IoError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        }
        None => String::new(),
    };

    let path = definition.full_path(root);
    let io_error = |e: std::io::Error| SchemaDefError::IoError {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(io_error)?;
    file.write_all(seed.as_bytes()).map_err(io_error)?;

    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::{assert_error_contains, assert_error_sqlstate};
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_version_padding() {
        for v in 1..=9 {
            let def = VersionedDefinition::new("searches", v, DefinitionKind::View).unwrap();
            assert_eq!(def.padded_version().len(), 2);
            assert_eq!(def.padded_version(), format!("0{v}"));
        }

        let def = VersionedDefinition::new("searches", 12, DefinitionKind::View).unwrap();
        assert_eq!(def.padded_version(), "12");

        let def = VersionedDefinition::new("searches", 100, DefinitionKind::View).unwrap();
        assert_eq!(def.padded_version(), "100");
    }

    #[test]
    fn test_rejects_non_positive_versions() {
        assert_error_contains(VersionedDefinition::new("searches", 0, DefinitionKind::View), "versions start at 1");
        assert_error_sqlstate(VersionedDefinition::new("searches", -3, DefinitionKind::View), "22003");
    }

    #[test]
    fn test_paths_per_kind() {
        let view = VersionedDefinition::new("searches", 1, DefinitionKind::View).unwrap();
        let func = VersionedDefinition::new("get_users", 2, DefinitionKind::Function).unwrap();

        assert_eq!(view.path(), Path::new("views").join("searches_v01.sql"));
        assert_eq!(func.path(), Path::new("functions").join("get_users_v02.sql"));
    }

    #[test]
    fn test_namespaced_logical_name_maps_dot_to_underscore() {
        let def = VersionedDefinition::new("non_public.get_users", 1, DefinitionKind::Function).unwrap();

        assert_eq!(def.logical_name(), "non_public.get_users");
        assert_eq!(def.file_name(), "non_public_get_users_v01.sql");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("view".parse::<DefinitionKind>().unwrap(), DefinitionKind::View);
        assert_eq!("Function".parse::<DefinitionKind>().unwrap(), DefinitionKind::Function);

        let err = "trigger".parse::<DefinitionKind>().unwrap_err();
        assert_eq!(err, SchemaDefError::UnknownDefinitionKind { kind: "trigger".to_string() });
    }

    #[test]
    fn test_load_reads_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "views/searches_v01.sql", "SELECT 'needle'::text AS haystack;\n");

        let def = VersionedDefinition::new("searches", 1, DefinitionKind::View).unwrap();
        assert_eq!(def.load(dir.path()).unwrap(), "SELECT 'needle'::text AS haystack;\n");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let def = VersionedDefinition::new("searches", 1, DefinitionKind::View).unwrap();

        assert_error_contains(def.load(dir.path()), "Definition file not found");
        assert_error_contains(def.load(dir.path()), "views/searches_v01.sql");
        assert_error_sqlstate(def.load(dir.path()), "58P01");
    }

    #[test]
    fn test_load_blank_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "functions/get_result_v01.sql", "  \n\t\n");

        let def = VersionedDefinition::new("get_result", 1, DefinitionKind::Function).unwrap();
        assert_error_contains(def.load(dir.path()), "functions/get_result_v01.sql");
        assert_error_sqlstate(def.load(dir.path()), "22023");
    }

    #[test]
    fn test_versions_sort_by_integer() {
        let dir = TempDir::new().unwrap();
        for file in ["searches_v02.sql", "searches_v100.sql", "searches_v10.sql", "searches_v01.sql"] {
            write(dir.path(), &format!("views/{file}"), "SELECT 1");
        }
        write(dir.path(), "views/other_searches_v07.sql", "SELECT 1");
        write(dir.path(), "views/searches_v03.sql.bak", "SELECT 1");

        assert_eq!(
            versions(dir.path(), DefinitionKind::View, "searches").unwrap(),
            vec![1, 2, 10, 100]
        );
        assert_eq!(next_version(dir.path(), DefinitionKind::View, "searches").unwrap(), 101);
    }

    #[test]
    fn test_next_version_without_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(next_version(dir.path(), DefinitionKind::Function, "get_users").unwrap(), 1);
    }

    #[test]
    fn test_scaffold_first_version_is_empty() {
        let dir = TempDir::new().unwrap();
        let def = scaffold(dir.path(), DefinitionKind::Function, "non_public.get_users").unwrap();

        assert_eq!(def.version(), 1);
        let path = dir.path().join("functions/non_public_get_users_v01.sql");
        assert_eq!(fs::read_to_string(path).unwrap(), "");
    }

    #[test]
    fn test_scaffold_copies_previous_version() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "functions/get_result_v01.sql", "CREATE FUNCTION get_result() ...");

        let def = scaffold(dir.path(), DefinitionKind::Function, "get_result").unwrap();

        assert_eq!(def.version(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("functions/get_result_v02.sql")).unwrap(),
            "CREATE FUNCTION get_result() ..."
        );
    }
}
