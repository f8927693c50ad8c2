/**
 * MONITORING - Côté supervision
 *
 * RÔLE :
 * Capacité de requête consommée par le moteur (`MonitoringClient`), builder
 * typé par-dessus (`columns`, `filter`, `execute`) et implémentation
 * Livestatus.
 */
pub mod livestatus;

pub use livestatus::LivestatusClient;

use crate::errors::TransportError;
use crate::models::Row;

/// Anything able to answer a Livestatus-style query.
///
/// Filters are conjunctive. Each returned row maps the requested column names
/// to their string value.
pub trait MonitoringClient {
    fn query(&self, table: &str, columns: &[String], filters: &[String]) -> Result<Vec<Row>, TransportError>;
}

/// Typed query builder: `columns(..)`, `filter(..)`, `execute(..)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringQuery {
    table: String,
    columns: Vec<String>,
    filters: Vec<String>,
}

impl MonitoringQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.filters.push(predicate.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn execute(&self, client: &dyn MonitoringClient) -> Result<Vec<Row>, TransportError> {
        client.query(&self.table, &self.columns, &self.filters)
    }
}
