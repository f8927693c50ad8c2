/*!
Test Harness pour le moteur de réconciliation

Assemble un `ReconciliationEngine` complet sur :
- `MockTracker` et `MockMonitoring` (handles conservés pour les assertions)
- un `MappingStore` SQLite en mémoire
- les gabarits par défaut
*/

use crate::monitoring_stub::MockMonitoring;
use crate::tracker_stub::{MockTracker, STATUS_NEW, STATUS_RESOLVED};
use anyhow::{Context, Result};
use secbridge_kernel::config::TemplatesConf;
use secbridge_kernel::models::{IssueId, ProjectId, TrackedIssue};
use secbridge_kernel::templates::{TemplateFields, TemplateKind, Templates};
use secbridge_kernel::{EngineSettings, MappingStore, ReconciliationEngine, RunReport};

pub const DEFAULT_PROJECT: ProjectId = 1;

pub struct TestHarness {
    pub tracker: MockTracker,
    pub monitoring: MockMonitoring,
    pub engine: ReconciliationEngine,
    templates: Templates,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_settings(Self::default_settings())
    }

    pub fn default_settings() -> EngineSettings {
        EngineSettings {
            service_description: "security".into(),
            category: "General".into(),
            default_project_id: DEFAULT_PROJECT,
            resolved_status_id: STATUS_RESOLVED,
            adopt_by_summary: false,
        }
    }

    pub fn with_settings(settings: EngineSettings) -> Result<Self> {
        let store = MappingStore::in_memory().context("in-memory mapping store")?;
        Self::with_store(settings, store)
    }

    /// Harness sur une base fournie (fichier, base pré-remplie...)
    pub fn with_store(settings: EngineSettings, store: MappingStore) -> Result<Self> {
        env_logger::builder().is_test(true).try_init().ok();

        let tracker = MockTracker::new();
        let monitoring = MockMonitoring::new();
        let templates = TemplatesConf::default()
            .compile()
            .context("default templates must compile")?;

        let engine = ReconciliationEngine::new(
            Box::new(monitoring.clone()),
            Box::new(tracker.clone()),
            store,
            templates.clone(),
            settings,
        );

        Ok(Self {
            tracker,
            monitoring,
            engine,
            templates,
        })
    }

    /// Une passe, puis les lignes sont vidées pour la suivante
    pub fn run(&self) -> RunReport {
        let report = self.engine.run();
        log::info!("run report: {report:?}");
        self.monitoring.clear_rows();
        report
    }

    pub fn mapping(&self, host: &str) -> Option<IssueId> {
        self.engine
            .store()
            .get(host)
            .unwrap_or_else(|e| panic!("mapping store failed for {host}: {e}"))
    }

    pub fn assert_mapping(&self, host: &str, expected: Option<IssueId>) {
        assert_eq!(self.mapping(host), expected, "mapping for host {host}");
    }

    pub fn assert_no_mutation(&self) {
        let mutations = self.tracker.mutations();
        assert!(mutations.is_empty(), "unexpected tracker mutations: {mutations:?}");
    }

    pub fn render(&self, kind: TemplateKind, fields: &TemplateFields) -> String {
        self.templates.render(kind, fields)
    }

    /// Ticket ouvert tel que le moteur l'aurait créé pour ces paquets, mapping inclus
    pub fn seed_open_issue(&self, id: IssueId, host: &str, packages: &[&str]) -> TrackedIssue {
        let fields = TemplateFields::new(host).packages(packages).all_packages(packages);
        let issue = TrackedIssue {
            id,
            status: STATUS_NEW,
            summary: self.render(TemplateKind::Summary, &fields),
            description: self.render(TemplateKind::Description, &fields),
            category: "General".into(),
            project_id: DEFAULT_PROJECT,
            notes: Vec::new(),
        };
        self.tracker.insert_issue(issue.clone());
        self.engine
            .store()
            .add(host, id)
            .unwrap_or_else(|e| panic!("cannot seed mapping {host} -> {id}: {e}"));
        issue
    }
}
