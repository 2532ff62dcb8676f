use pgrx::{GucContext, GucFlags, GucRegistry, GucSetting};
use std::ffi::CStr;
use std::path::PathBuf;

use crate::error::{SchemaDefError, SchemaDefResult};

/// Namespace whose objects are rendered without a schema prefix
pub const DEFAULT_NAMESPACE: &str = "public";

/// First `server_version_num` with CREATE MATERIALIZED VIEW (9.3)
pub const MATERIALIZED_VIEWS_MIN_VERSION: i32 = 90300;

/// First `server_version_num` with REFRESH ... CONCURRENTLY (9.4)
pub const CONCURRENT_REFRESH_MIN_VERSION: i32 = 90400;

/// Minimum rendered width of a definition version (`_v01`)
pub const VERSION_WIDTH: usize = 2;

pub const VIEWS_DIR: &str = "views";
pub const FUNCTIONS_DIR: &str = "functions";

/// Enable verbose cascade-refresh logging (for debugging)
pub const DEBUG_DEPENDENCIES: bool = false;

const DEFINITIONS_ROOT_GUC: &str = "pg_schemadefs.definitions_root";

/// Root directory holding `views/` and `functions/`.
/// Relative paths resolve against the server's data directory.
pub static DEFINITIONS_ROOT: GucSetting<Option<&'static CStr>> =
    GucSetting::<Option<&'static CStr>>::new(Some(c"db"));

/// Register GUCs. Must be called from `_PG_init()`.
pub fn init_gucs() {
    GucRegistry::define_string_guc(
        DEFINITIONS_ROOT_GUC,
        "Directory containing versioned view and function definitions",
        "Definition files live at <root>/views/<name>_v<NN>.sql and <root>/functions/<name>_v<NN>.sql.",
        &DEFINITIONS_ROOT,
        GucContext::Suset,
        GucFlags::default(),
    );
}

/// Current value of `pg_schemadefs.definitions_root`
pub fn definitions_root() -> SchemaDefResult<PathBuf> {
    let value = DEFINITIONS_ROOT
        .get()
        .ok_or_else(|| SchemaDefError::ConfigError {
            setting: DEFINITIONS_ROOT_GUC.to_string(),
            value: String::new(),
            reason: "definitions root is not set".to_string(),
        })?;

    let root = value.to_str().map_err(|e| SchemaDefError::ConfigError {
        setting: DEFINITIONS_ROOT_GUC.to_string(),
        value: value.to_string_lossy().into_owned(),
        reason: format!("not valid UTF-8: {e}"),
    })?;

    if root.trim().is_empty() {
        return Err(SchemaDefError::ConfigError {
            setting: DEFINITIONS_ROOT_GUC.to_string(),
            value: root.to_string(),
            reason: "definitions root is empty".to_string(),
        });
    }

    Ok(PathBuf::from(root))
}
