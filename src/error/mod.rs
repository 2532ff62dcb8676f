
use std::fmt;

pub mod testing;

/// Main error type for pg_schemadefs
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDefError {
    // ============ Definition Errors (58xxx / 22xxx) ============
    /// Definition file does not exist at the derived path
    MissingDefinition {
        path: String,
    },

    /// Definition file exists but has no SQL in it
    EmptyDefinition {
        path: String,
    },

    /// Definition kind is neither `view` nor `function`
    UnknownDefinitionKind {
        kind: String,
    },

    /// Definition versions start at 1
    InvalidVersion {
        version: i64,
    },

    /// Object name could not be parsed
    InvalidObjectName {
        name: String,
        reason: String,
    },

    // ============ Capability Errors (0A000) ============
    /// Server predates materialized views
    MaterializedViewsNotSupported {
        server_version: i32,
    },

    /// Server predates REFRESH MATERIALIZED VIEW CONCURRENTLY
    ConcurrentRefreshesNotSupported {
        server_version: i32,
    },

    // ============ Dependency Errors (55xxx) ============
    /// Catalog data implies a cycle between materialized views
    DependencyCycle {
        objects: Vec<String>,
    },

    /// Relation named in a refresh could not be resolved
    ObjectNotFound {
        name: String,
    },

    // ============ Migration Command Errors (P0xxx) ============
    /// Command cannot be inverted without more information
    IrreversibleCommand {
        command: String,
        reason: String,
    },

    /// Command payload or direction is malformed
    InvalidCommand {
        reason: String,
    },

    // ============ I/O and System Errors (XX000) ============
    /// PostgreSQL catalog operation failed
    CatalogError {
        operation: String,
        pg_error: String,
    },

    /// SPI operation failed
    SpiError {
        query: String,
        error: String,
    },

    /// Serialization/deserialization failed
    SerializationError {
        message: String,
    },

    /// Reading or writing a definition file failed
    IoError {
        path: String,
        message: String,
    },

    /// Configuration error (invalid GUC values)
    ConfigError {
        setting: String,
        value: String,
        reason: String,
    },

    /// Internal error (bug in extension)
    InternalError {
        message: String,
        file: &'static str,
        line: u32,
    },
}

impl SchemaDefError {
    /// Get PostgreSQL SQLSTATE code for this error
    pub fn sqlstate(&self) -> &'static str {
        use SchemaDefError::*;
        match self {
            MissingDefinition { .. } => "58P01", // Undefined file
            EmptyDefinition { .. } => "22023", // Invalid parameter value
            UnknownDefinitionKind { .. } => "22P02", // Invalid text representation
            InvalidVersion { .. } => "22003", // Numeric value out of range
            InvalidObjectName { .. } => "42602", // Invalid name

            MaterializedViewsNotSupported { .. } => "0A000", // Feature not supported
            ConcurrentRefreshesNotSupported { .. } => "0A000",

            DependencyCycle { .. } => "55P03", // Lock not available (cycle)
            ObjectNotFound { .. } => "42P01", // Undefined table

            IrreversibleCommand { .. } => "P0001", // Raise exception
            InvalidCommand { .. } => "22023",

            CatalogError { .. } => "XX000",
            SpiError { .. } => "XX000",
            SerializationError { .. } => "XX000",
            IoError { .. } => "58030", // I/O error
            ConfigError { .. } => "F0000", // Config file error
            InternalError { .. } => "XX000",
        }
    }

    /// Create internal error with file/line info
    pub fn internal(message: String, file: &'static str, line: u32) -> Self {
        SchemaDefError::InternalError { message, file, line }
    }
}

impl fmt::Display for SchemaDefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SchemaDefError::*;
        match self {
            MissingDefinition { path } => {
                write!(f, "Definition file not found: {}", path)
            }
            EmptyDefinition { path } => {
                write!(f, "Define the SQL in {} before migrating", path)
            }
            UnknownDefinitionKind { kind } => {
                write!(f, "Unknown definition kind '{}' (expected 'view' or 'function')", kind)
            }
            InvalidVersion { version } => {
                write!(f, "Invalid definition version {}: versions start at 1", version)
            }
            InvalidObjectName { name, reason } => {
                write!(f, "Invalid object name '{}': {}", name, reason)
            }
            MaterializedViewsNotSupported { server_version } => {
                write!(
                    f,
                    "Materialized views require PostgreSQL 9.3 or newer (server_version_num {})",
                    server_version
                )
            }
            ConcurrentRefreshesNotSupported { server_version } => {
                write!(
                    f,
                    "Concurrent materialized view refreshes require PostgreSQL 9.4 or newer \
                     (server_version_num {})",
                    server_version
                )
            }
            DependencyCycle { objects } => {
                write!(f, "Dependency cycle detected between materialized views: {}", objects.join(" -> "))
            }
            ObjectNotFound { name } => {
                write!(f, "Relation '{}' does not exist", name)
            }
            IrreversibleCommand { command, reason } => {
                write!(f, "Cannot reverse {}: {}", command, reason)
            }
            InvalidCommand { reason } => {
                write!(f, "Invalid schema command: {}", reason)
            }
            CatalogError { operation, pg_error } => {
                write!(f, "Catalog operation '{}' failed: {}", operation, pg_error)
            }
            SpiError { query, error } => {
                let shown = query.char_indices().nth(100).map_or(query.as_str(), |(i, _)| &query[..i]);
                write!(f, "SPI query failed: {}\nQuery: {}", error, shown)
            }
            SerializationError { message } => {
                write!(f, "Serialization error: {}", message)
            }
            IoError { path, message } => {
                write!(f, "I/O error on {}: {}", path, message)
            }
            ConfigError { setting, value, reason } => {
                write!(f, "Configuration error for '{}': {} (value: {})", setting, reason, value)
            }
            InternalError { message, file, line } => {
                write!(f, "Internal error at {}:{}: {}\nPlease report this bug.",
                       file, line, message)
            }
        }
    }
}

impl std::error::Error for SchemaDefError {}

/// Result type for pg_schemadefs operations
pub type SchemaDefResult<T> = Result<T, SchemaDefError>;

/// Convert serde_json::Error to SchemaDefError
impl From<serde_json::Error> for SchemaDefError {
    fn from(e: serde_json::Error) -> Self {
        SchemaDefError::SerializationError {
            message: format!("JSON serialization error: {}", e),
        }
    }
}

/// Helper macro for creating internal errors with automatic file/line
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::SchemaDefError::internal($msg.to_string(), file!(), line!())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::SchemaDefError::internal(format!($fmt, $($arg)*), file!(), line!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_definition_names_path() {
        let err = SchemaDefError::EmptyDefinition {
            path: "db/views/searches_v01.sql".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("db/views/searches_v01.sql"));
        assert!(msg.contains("before migrating"));
        assert_eq!(err.sqlstate(), "22023");
    }

    #[test]
    fn test_dependency_cycle_message() {
        let err = SchemaDefError::DependencyCycle {
            objects: vec!["mv_a".to_string(), "mv_b".to_string()],
        };

        let msg = err.to_string();
        assert!(msg.contains("mv_a -> mv_b"));
        assert_eq!(err.sqlstate(), "55P03");
    }

    #[test]
    fn test_capability_errors_are_feature_not_supported() {
        let mv = SchemaDefError::MaterializedViewsNotSupported { server_version: 90200 };
        let concurrent = SchemaDefError::ConcurrentRefreshesNotSupported { server_version: 90300 };

        assert_eq!(mv.sqlstate(), "0A000");
        assert_eq!(concurrent.sqlstate(), "0A000");
        assert!(mv.to_string().contains("9.3"));
        assert!(concurrent.to_string().contains("9.4"));
    }

    #[test]
    fn test_spi_error_truncates_long_queries() {
        let err = SchemaDefError::SpiError {
            query: "x".repeat(300),
            error: "boom".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("boom"));
        assert!(msg.len() < 200);
    }

    #[test]
    fn test_internal_error_macro() {
        let err = internal_error!("Test error at {}", "location");

        match err {
            SchemaDefError::InternalError { message, file, line } => {
                assert!(message.contains("Test error"));
                assert!(file.ends_with("mod.rs"));
                assert!(line > 0);
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_io_error_names_path() {
        let err = SchemaDefError::IoError {
            path: "db/views/searches_v01.sql".to_string(),
            message: "denied".to_string(),
        };

        assert_eq!(err.sqlstate(), "58030");
        assert!(err.to_string().contains("db/views/searches_v01.sql: denied"));
    }
}
