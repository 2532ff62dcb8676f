//! Recording connection for tests
//!
//! Never touches SPI. Every statement and query is recorded in the order it
//! was sent; catalog queries are answered by a caller-supplied responder.

use super::{CatalogRow, Connection};
use crate::error::{SchemaDefError, SchemaDefResult};

type Responder = Box<dyn FnMut(&str) -> Vec<CatalogRow>>;

pub struct StubConnection {
    server_version: i32,
    sent: Vec<String>,
    executed: Vec<String>,
    failing_pattern: Option<String>,
    responder: Responder,
}

impl StubConnection {
    pub fn new(server_version: i32) -> Self {
        Self {
            server_version,
            sent: Vec::new(),
            executed: Vec::new(),
            failing_pattern: None,
            responder: Box::new(|_| Vec::new()),
        }
    }

    /// Answer catalog queries with `responder(sql)`
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<CatalogRow> + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    /// Make `execute` fail for statements containing `pattern`
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.failing_pattern = Some(pattern.to_string());
        self
    }

    /// Everything sent to the server, statements and queries alike
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Statements passed to `execute`, in order
    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

impl Connection for StubConnection {
    fn execute(&mut self, sql: &str) -> SchemaDefResult<()> {
        self.sent.push(sql.to_string());

        if let Some(pattern) = &self.failing_pattern {
            if sql.contains(pattern.as_str()) {
                return Err(SchemaDefError::SpiError {
                    query: sql.to_string(),
                    error: "stub failure".to_string(),
                });
            }
        }

        self.executed.push(sql.to_string());
        Ok(())
    }

    fn select(&mut self, sql: &str) -> SchemaDefResult<Vec<CatalogRow>> {
        self.sent.push(sql.to_string());
        Ok((self.responder)(sql))
    }

    fn server_version_num(&mut self) -> SchemaDefResult<i32> {
        Ok(self.server_version)
    }
}
