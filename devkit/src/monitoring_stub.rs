/*!
Mock supervision : lignes scriptées, servies selon le filtre d'état

Une requête portant `state != 0` reçoit les lignes "erreur", une requête
portant `state = 0` les lignes "OK". Les requêtes reçues sont enregistrées.
*/

use secbridge_kernel::errors::TransportError;
use secbridge_kernel::models::{Row, Severity, COL_HOST_NAME, COL_HOST_NOTES, COL_PLUGIN_OUTPUT};
use secbridge_kernel::monitoring::MonitoringClient;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<String>,
}

#[derive(Debug, Default)]
struct MonitoringState {
    error_rows: Vec<Row>,
    ok_rows: Vec<Row>,
    queries: Vec<RecordedQuery>,
    fail_errors: bool,
    fail_oks: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockMonitoring {
    state: Arc<Mutex<MonitoringState>>,
}

/// Ligne telle que Livestatus la renverrait pour le check sécurité
pub fn row(host: &str, plugin_output: &str, host_notes: &str) -> Row {
    Row::from([
        (COL_HOST_NAME.to_string(), host.to_string()),
        (COL_PLUGIN_OUTPUT.to_string(), plugin_output.to_string()),
        (COL_HOST_NOTES.to_string(), host_notes.to_string()),
    ])
}

impl MockMonitoring {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MonitoringState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_row(&self, severity: Severity, row: Row) {
        let mut state = self.lock();
        match severity {
            Severity::Error => state.error_rows.push(row),
            Severity::Ok => state.ok_rows.push(row),
        }
    }

    /// Hôte en erreur, ex: `push_error("db1", "Packages: libssl, curl")`
    pub fn push_error(&self, host: &str, plugin_output: &str) {
        self.push_row(Severity::Error, row(host, plugin_output, ""));
    }

    pub fn push_error_with_notes(&self, host: &str, plugin_output: &str, host_notes: &str) {
        self.push_row(Severity::Error, row(host, plugin_output, host_notes));
    }

    pub fn push_ok(&self, host: &str) {
        self.push_row(Severity::Ok, row(host, "OK", ""));
    }

    /// Vide les lignes (pas l'historique des requêtes), pour la passe suivante
    pub fn clear_rows(&self) {
        let mut state = self.lock();
        state.error_rows.clear();
        state.ok_rows.clear();
    }

    pub fn fail_error_query(&self, fail: bool) {
        self.lock().fail_errors = fail;
    }

    pub fn fail_ok_query(&self, fail: bool) {
        self.lock().fail_oks = fail;
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.lock().queries.clone()
    }
}

impl MonitoringClient for MockMonitoring {
    fn query(&self, table: &str, columns: &[String], filters: &[String]) -> Result<Vec<Row>, TransportError> {
        let mut state = self.lock();
        state.queries.push(RecordedQuery {
            table: table.to_string(),
            columns: columns.to_vec(),
            filters: filters.to_vec(),
        });

        let wants_errors = filters.iter().any(|f| f == "state != 0");
        let wants_oks = filters.iter().any(|f| f == "state = 0");
        let failing = (wants_errors && state.fail_errors) || (wants_oks && state.fail_oks);
        if failing {
            return Err(TransportError::Status {
                service: "mock-monitoring",
                status: 400,
                body: "injected failure".into(),
            });
        }

        let mut rows = Vec::new();
        if wants_errors || !wants_oks {
            rows.extend(state.error_rows.iter().cloned());
        }
        if wants_oks || !wants_errors {
            rows.extend(state.ok_rows.iter().cloned());
        }
        log::debug!("[MOCK] {} rows for {:?}", rows.len(), filters);
        Ok(rows)
    }
}
