//! Database Connection Handle
//!
//! Every core component receives a [`Connection`] explicitly instead of
//! reaching for the backend's SPI session on its own. Inside PostgreSQL the
//! handle is [`SpiConnection`]; tests swap in [`stub::StubConnection`] to
//! assert exactly which statements were issued.
//!
//! Statements run inside whatever transaction the caller has open. A failing
//! DDL statement raises a PostgreSQL `ERROR`, which aborts that transaction
//! and reaches the caller with the server's own message.

use pgrx::prelude::*;

use crate::config::{CONCURRENT_REFRESH_MIN_VERSION, MATERIALIZED_VIEWS_MIN_VERSION};
use crate::error::{SchemaDefError, SchemaDefResult};

#[cfg(any(test, feature = "pg_test"))]
pub mod stub;

/// One row of a catalog query, every column rendered as text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRow {
    values: Vec<(String, Option<String>)>,
}

impl CatalogRow {
    pub fn new(values: Vec<(String, Option<String>)>) -> Self {
        Self { values }
    }

    /// Build a row of non-NULL text columns
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(column, value)| ((*column).to_string(), Some((*value).to_string())))
                .collect(),
        }
    }

    /// Column value, `None` when the column is absent or NULL
    pub fn get_opt(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Column value that the catalog query guarantees to be non-NULL
    pub fn get(&self, column: &str) -> SchemaDefResult<&str> {
        self.get_opt(column).ok_or_else(|| SchemaDefError::CatalogError {
            operation: format!("Extract {column}"),
            pg_error: format!("column '{column}' is missing or NULL"),
        })
    }
}

/// Synchronous request/response access to one PostgreSQL session
pub trait Connection {
    /// Run a statement that returns no rows (DDL, REFRESH)
    fn execute(&mut self, sql: &str) -> SchemaDefResult<()>;

    /// Run a read-only catalog query
    fn select(&mut self, sql: &str) -> SchemaDefResult<Vec<CatalogRow>>;

    /// `server_version_num` of the connected server, e.g. 170002
    fn server_version_num(&mut self) -> SchemaDefResult<i32>;

    fn supports_materialized_views(&mut self) -> SchemaDefResult<bool> {
        Ok(self.server_version_num()? >= MATERIALIZED_VIEWS_MIN_VERSION)
    }

    fn supports_concurrent_refreshes(&mut self) -> SchemaDefResult<bool> {
        Ok(self.server_version_num()? >= CONCURRENT_REFRESH_MIN_VERSION)
    }
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn execute(&mut self, sql: &str) -> SchemaDefResult<()> {
        (**self).execute(sql)
    }

    fn select(&mut self, sql: &str) -> SchemaDefResult<Vec<CatalogRow>> {
        (**self).select(sql)
    }

    fn server_version_num(&mut self) -> SchemaDefResult<i32> {
        (**self).server_version_num()
    }
}

/// The backend's own session, reached through SPI
#[derive(Debug, Default, Clone, Copy)]
pub struct SpiConnection;

impl Connection for SpiConnection {
    fn execute(&mut self, sql: &str) -> SchemaDefResult<()> {
        debug1!("pg_schemadefs: {}", sql);

        Spi::run(sql).map_err(|e| SchemaDefError::SpiError {
            query: sql.to_string(),
            error: e.to_string(),
        })
    }

    fn select(&mut self, sql: &str) -> SchemaDefResult<Vec<CatalogRow>> {
        Spi::connect(|client| {
            let table = client.select(sql, None, None)?;
            if table.is_empty() {
                return Ok(Vec::new());
            }

            let width = table.columns()?;
            let names = (1..=width)
                .map(|ordinal| table.column_name(ordinal))
                .collect::<Result<Vec<_>, _>>()?;

            let mut rows = Vec::new();
            for row in table {
                let mut values = Vec::with_capacity(width);
                for (index, name) in names.iter().enumerate() {
                    values.push((name.clone(), row.get::<String>(index + 1)?));
                }
                rows.push(CatalogRow::new(values));
            }

            Ok::<_, pgrx::spi::Error>(rows)
        })
        .map_err(|e| SchemaDefError::SpiError {
            query: sql.to_string(),
            error: e.to_string(),
        })
    }

    fn server_version_num(&mut self) -> SchemaDefResult<i32> {
        let query = "SELECT current_setting('server_version_num')";
        let raw = Spi::get_one::<String>(query)
            .map_err(|e| SchemaDefError::SpiError {
                query: query.to_string(),
                error: e.to_string(),
            })?
            .ok_or_else(|| SchemaDefError::CatalogError {
                operation: "Read server_version_num".to_string(),
                pg_error: "setting is NULL".to_string(),
            })?;

        raw.trim().parse::<i32>().map_err(|e| SchemaDefError::CatalogError {
            operation: "Parse server_version_num".to_string(),
            pg_error: format!("'{raw}': {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_row_lookup() {
        let row = CatalogRow::new(vec![
            ("name".to_string(), Some("greetings".to_string())),
            ("namespace".to_string(), None),
        ]);

        assert_eq!(row.get("name").unwrap(), "greetings");
        assert_eq!(row.get_opt("namespace"), None);
        assert!(row.get("namespace").is_err());
        assert!(row.get("missing").is_err());
    }

    #[test]
    fn test_catalog_row_from_pairs() {
        let row = CatalogRow::from_pairs(&[("oid", "16384"), ("relkind", "m")]);

        assert_eq!(row.get_opt("oid"), Some("16384"));
        assert_eq!(row.get_opt("relkind"), Some("m"));
    }
}
