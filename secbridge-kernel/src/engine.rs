/**
 * RECONCILIATION ENGINE - Alertes "security updates" -> tickets MantisBT
 *
 * RÔLE :
 * Pour chaque hôte remonté par la supervision, décide et exécute l'action
 * sur le tracker : création, note complémentaire, clôture ou rien.
 *
 * FONCTIONNEMENT :
 * - deux requêtes par passe : hôtes en erreur (state != 0) puis hôtes OK
 * - l'état d'un hôte = mapping local (MappingStore) + ticket relu à chaque fois
 * - les paquets déjà notifiés sont reconstruits depuis le texte du ticket
 *   (PackageSetResolver), jamais mémorisés localement
 * - un échec sur un hôte est journalisé et la passe continue
 *
 * TABLE DE DÉCISION :
 *   pas de mapping       + erreur -> création, mapping enregistré
 *   mapping -> ouvert    + erreur -> note avec les nouveaux paquets, résumé cumulé
 *   mapping -> résolu    + erreur -> mapping périmé supprimé, nouveau ticket
 *   mapping -> ouvert    + OK     -> note de clôture, statut résolu, mapping supprimé
 *   résolu / sans mapping + OK    -> rien
 *
 * ORDRE DES ÉCRITURES :
 * le mapping n'est inséré qu'après la création distante, et supprimé
 * qu'après la résolution distante. Un ticket orphelin (création OK, écriture
 * locale KO) est l'incohérence acceptée.
 */

use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::errors::{ErrorKind, ReconcileError, TransportError};
use crate::models::{
    IssueId, IssueUpdate, NewIssue, Observation, ProjectId, Row, Severity, StatusId, TrackedIssue,
    COL_HOST_NAME, COL_HOST_NOTES, COL_PLUGIN_OUTPUT,
};
use crate::monitoring::{MonitoringClient, MonitoringQuery};
use crate::resolver::{PackageSet, PackageSetResolver};
use crate::store::MappingStore;
use crate::templates::{Field, TemplateFields, TemplateKind, Templates};
use crate::tracker::IssueTracker;

pub const SERVICES_TABLE: &str = "services";

/// Réglages du moteur issus de la configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub service_description: String,
    pub category: String,
    pub default_project_id: ProjectId,
    pub resolved_status_id: StatusId,
    pub adopt_by_summary: bool,
}

impl EngineSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            service_description: config.monitoring.service_description.clone(),
            category: config.tracker.category.clone(),
            default_project_id: config.tracker.default_project_id,
            resolved_status_id: config.tracker.resolved_status_id,
            adopt_by_summary: config.tracker.adopt_by_summary,
        }
    }
}

/// Ce qui a été fait pour un hôte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    Created(IssueId),
    /// Ancien ticket résolu, mapping remplacé par un nouveau ticket
    Reopened { stale: IssueId, issue: IssueId },
    Updated { issue: IssueId, new_packages: Vec<String> },
    Unchanged(IssueId),
    /// Aucun nouveau paquet, résumé réaligné sur l'ensemble cumulé
    SummaryRefreshed(IssueId),
    Closed(IssueId),
    /// Hôte OK sans ticket ouvert
    Clean,
}

/// Bilan d'une passe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub created: usize,
    pub reopened: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub closed: usize,
    pub clean: usize,
    pub failed: usize,
    pub failed_queries: usize,
}

impl RunReport {
    pub fn record(&mut self, outcome: &HostOutcome) {
        match outcome {
            HostOutcome::Created(_) => self.created += 1,
            HostOutcome::Reopened { .. } => self.reopened += 1,
            HostOutcome::Updated { .. } | HostOutcome::SummaryRefreshed(_) => self.updated += 1,
            HostOutcome::Unchanged(_) => self.unchanged += 1,
            HostOutcome::Closed(_) => self.closed += 1,
            HostOutcome::Clean => self.clean += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.created + self.reopened + self.updated + self.unchanged + self.closed + self.clean
    }
}

pub struct ReconciliationEngine {
    monitoring: Box<dyn MonitoringClient>,
    tracker: Box<dyn IssueTracker>,
    store: MappingStore,
    templates: Templates,
    settings: EngineSettings,
}

impl ReconciliationEngine {
    pub fn new(
        monitoring: Box<dyn MonitoringClient>,
        tracker: Box<dyn IssueTracker>,
        store: MappingStore,
        templates: Templates,
        settings: EngineSettings,
    ) -> Self {
        Self {
            monitoring,
            tracker,
            store,
            templates,
            settings,
        }
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Requête de l'ensemble "erreur" ou "OK" du check configuré
    pub fn query_for(&self, severity: Severity) -> MonitoringQuery {
        let state_filter = match severity {
            Severity::Error => "state != 0",
            Severity::Ok => "state = 0",
        };
        MonitoringQuery::new(SERVICES_TABLE)
            .columns([COL_HOST_NAME, COL_PLUGIN_OUTPUT, COL_HOST_NOTES])
            .filter(format!("service_description = {}", self.settings.service_description))
            .filter(state_filter)
    }

    /// Une passe complète : hôtes en erreur d'abord, puis hôtes OK
    pub fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        for severity in [Severity::Error, Severity::Ok] {
            let rows = match self.query_for(severity).execute(self.monitoring.as_ref()) {
                Ok(rows) => rows,
                Err(e) => {
                    error!(?severity, error = %e, "monitoring query failed, skipping this set");
                    report.failed_queries += 1;
                    continue;
                }
            };
            debug!(?severity, rows = rows.len(), "monitoring rows fetched");
            for row in &rows {
                self.process_row(row, severity, &mut report);
            }
        }

        info!(
            created = report.created,
            reopened = report.reopened,
            updated = report.updated,
            unchanged = report.unchanged,
            closed = report.closed,
            clean = report.clean,
            failed = report.failed,
            failed_queries = report.failed_queries,
            "reconciliation run finished"
        );
        report
    }

    fn process_row(&self, row: &Row, severity: Severity, report: &mut RunReport) {
        let host = row.get(COL_HOST_NAME).map(String::as_str).unwrap_or("<unknown>");
        let outcome = Observation::from_row(row, severity)
            .map_err(ReconcileError::from)
            .and_then(|observation| self.reconcile(&observation));

        match outcome {
            Ok(outcome) => {
                debug!(host, ?outcome, "host reconciled");
                report.record(&outcome);
            }
            Err(e) => {
                report.failed += 1;
                match e.kind() {
                    ErrorKind::InvariantViolation => {
                        error!(host, error = %e, "INVARIANT VIOLATION, host left untouched")
                    }
                    ErrorKind::Transport | ErrorKind::Store => {
                        error!(host, error = %e, "host reconciliation failed")
                    }
                    ErrorKind::Parse => warn!(host, error = %e, "row skipped"),
                }
            }
        }
    }

    /// Traite une observation selon la table de décision
    pub fn reconcile(&self, observation: &Observation) -> Result<HostOutcome, ReconcileError> {
        match observation.severity {
            Severity::Error => self.check_error(observation),
            Severity::Ok => self.check_okay(observation),
        }
    }

    /// Ticket lié à l'hôte, `None` si pas de mapping ou ticket disparu du tracker
    fn find_issue(&self, host: &str) -> Result<Option<TrackedIssue>, ReconcileError> {
        let Some(issue_id) = self.store.get(host)? else {
            return Ok(None);
        };
        match self.tracker.get(issue_id) {
            Ok(issue) => Ok(Some(issue)),
            Err(TransportError::IssueNotFound(id)) => {
                warn!(host, issue_id = id, "mapped issue no longer exists, dropping mapping");
                self.store.delete(id)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_error(&self, observation: &Observation) -> Result<HostOutcome, ReconcileError> {
        let host = observation.host_name.as_str();

        match self.find_issue(host)? {
            Some(issue) if issue.is_resolved(self.settings.resolved_status_id) => {
                self.store.delete(issue.id)?;
                info!(host, stale = issue.id, "mapped issue already resolved, opening a new one");
                let fresh = self.open_issue(observation, self.project_for(observation))?;
                Ok(HostOutcome::Reopened {
                    stale: issue.id,
                    issue: fresh,
                })
            }
            Some(issue) => self.add_new_packages(observation, &issue),
            None => {
                let project = self.project_for(observation);
                if self.settings.adopt_by_summary {
                    if let Some(issue) = self.adopt_by_summary(observation, project)? {
                        return self.add_new_packages(observation, &issue);
                    }
                }
                Ok(HostOutcome::Created(self.open_issue(observation, project)?))
            }
        }
    }

    fn add_new_packages(&self, observation: &Observation, issue: &TrackedIssue) -> Result<HostOutcome, ReconcileError> {
        let host = observation.host_name.as_str();
        let mut known = PackageSetResolver::new(&self.templates).resolved_packages(issue);
        let fresh = known.unseen(&observation.packages);
        if fresh.is_empty() {
            // note posée mais mise à jour du résumé perdue lors d'une passe précédente
            if self.summary_is_stale(issue, &known) {
                let summary = self.templates.render(
                    TemplateKind::Summary,
                    &TemplateFields::new(host)
                        .packages(known.as_slice())
                        .all_packages(known.as_slice()),
                );
                self.tracker.update(issue.id, &IssueUpdate::new().summary(summary))?;
                info!(host, issue_id = issue.id, "summary brought back to the cumulative package set");
                return Ok(HostOutcome::SummaryRefreshed(issue.id));
            }
            debug!(host, issue_id = issue.id, "no new package");
            return Ok(HostOutcome::Unchanged(issue.id));
        }

        let note = self
            .templates
            .render(TemplateKind::Note, &TemplateFields::new(host).packages(&fresh));
        self.tracker.add_note(issue.id, &note)?;

        known.extend(fresh.iter().cloned());
        let summary = self.templates.render(
            TemplateKind::Summary,
            &TemplateFields::new(host).packages(&fresh).all_packages(known.as_slice()),
        );
        self.tracker.update(issue.id, &IssueUpdate::new().summary(summary))?;

        info!(host, issue_id = issue.id, packages = %fresh.join(" "), "new packages noted");
        Ok(HostOutcome::Updated {
            issue: issue.id,
            new_packages: fresh,
        })
    }

    /// Vrai si le résumé est le nôtre mais n'annonce pas l'ensemble `known`
    fn summary_is_stale(&self, issue: &TrackedIssue, known: &PackageSet) -> bool {
        let template = self.templates.get(TemplateKind::Summary);
        if !template.has_field(Field::AllPackages) {
            return false;
        }
        match template.extract(&issue.summary) {
            Ok(fields) => {
                let announced: PackageSet = fields
                    .get(&Field::AllPackages)
                    .map(|list| list.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default();
                announced != *known
            }
            Err(e) => {
                debug!(issue_id = issue.id, error = %e, "summary edited by hand, left as is");
                false
            }
        }
    }

    /// Premier ticket ouvert du projet portant exactement le résumé attendu
    fn adopt_by_summary(
        &self,
        observation: &Observation,
        project: ProjectId,
    ) -> Result<Option<TrackedIssue>, ReconcileError> {
        let host = observation.host_name.as_str();
        let summary = self.templates.render(
            TemplateKind::Summary,
            &TemplateFields::new(host)
                .packages(&observation.packages)
                .all_packages(&observation.packages),
        );
        for id in self.tracker.find_ids_by_summary(project, &summary)? {
            let issue = match self.tracker.get(id) {
                Ok(issue) => issue,
                Err(TransportError::IssueNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if issue.is_resolved(self.settings.resolved_status_id) {
                debug!(host, issue_id = id, "resolved issue with the same summary skipped");
                continue;
            }
            self.store.add(host, issue.id)?;
            info!(host, issue_id = issue.id, "existing issue adopted by summary");
            return Ok(Some(issue));
        }
        Ok(None)
    }

    fn project_for(&self, observation: &Observation) -> ProjectId {
        observation
            .override_project_id()
            .unwrap_or(self.settings.default_project_id)
    }

    fn open_issue(&self, observation: &Observation, project: ProjectId) -> Result<IssueId, ReconcileError> {
        let host = observation.host_name.as_str();
        let fields = TemplateFields::new(host)
            .packages(&observation.packages)
            .all_packages(&observation.packages);
        let new_issue = NewIssue {
            summary: self.templates.render(TemplateKind::Summary, &fields),
            description: self.templates.render(TemplateKind::Description, &fields),
            category: self.settings.category.clone(),
            project_id: project,
        };

        let issue_id = self.tracker.create(&new_issue)?;
        if let Err(e) = self.store.add(host, issue_id) {
            warn!(host, issue_id, "issue created but mapping not stored, issue is orphaned");
            return Err(e.into());
        }
        info!(host, issue_id, project_id = new_issue.project_id, "issue created");
        Ok(issue_id)
    }

    fn check_okay(&self, observation: &Observation) -> Result<HostOutcome, ReconcileError> {
        let host = observation.host_name.as_str();
        let issue = match self.find_issue(host)? {
            Some(issue) if !issue.is_resolved(self.settings.resolved_status_id) => issue,
            _ => return Ok(HostOutcome::Clean),
        };

        let all = PackageSetResolver::new(&self.templates).resolved_packages(&issue);
        let fields = TemplateFields::new(host).all_packages(all.as_slice());
        let note = self.templates.render(TemplateKind::Close, &fields);
        self.tracker.add_note(issue.id, &note)?;

        let summary = self.templates.render(TemplateKind::Summary, &fields);
        self.tracker.update(
            issue.id,
            &IssueUpdate::new()
                .summary(summary)
                .status(self.settings.resolved_status_id),
        )?;
        self.store.delete(issue.id)?;

        info!(host, issue_id = issue.id, "issue resolved");
        Ok(HostOutcome::Closed(issue.id))
    }
}
