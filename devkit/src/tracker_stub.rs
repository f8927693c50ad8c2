/*!
Mock issue tracker en mémoire

Se comporte comme MantisBT vu du moteur : ids attribués séquentiellement,
notes ajoutées dans l'ordre, `update` n'applique que les champs fournis.
Chaque appel est enregistré pour les assertions. Les clones partagent
le même état, le harness garde donc la main après avoir donné un clone
au moteur.
*/

use secbridge_kernel::errors::TransportError;
use secbridge_kernel::models::{IssueId, IssueUpdate, NewIssue, ProjectId, StatusId, TrackedIssue};
use secbridge_kernel::tracker::IssueTracker;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const STATUS_NEW: StatusId = 10;
pub const STATUS_RESOLVED: StatusId = 80;

const SERVICE: &str = "mock-tracker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    Get(IssueId),
    FindBySummary { project: ProjectId, summary: String },
    Create(NewIssue),
    AddNote { issue: IssueId, text: String },
    Update { issue: IssueId, update: IssueUpdate },
}

impl TrackerCall {
    /// Vrai pour les appels qui modifient le tracker
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            TrackerCall::Create(_) | TrackerCall::AddNote { .. } | TrackerCall::Update { .. }
        )
    }
}

#[derive(Debug)]
struct TrackerState {
    issues: BTreeMap<IssueId, TrackedIssue>,
    next_id: IssueId,
    calls: Vec<TrackerCall>,
    failing_summaries: Vec<String>,
    failing_issues: HashSet<IssueId>,
    failing_updates: HashSet<IssueId>,
}

#[derive(Debug, Clone)]
pub struct MockTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl Default for MockTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTracker {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Premier id attribué par `create`
    pub fn starting_at(first_id: IssueId) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                issues: BTreeMap::new(),
                next_id: first_id,
                calls: Vec::new(),
                failing_summaries: Vec::new(),
                failing_issues: HashSet::new(),
                failing_updates: HashSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Place un ticket existant (créé "à la main" côté tracker)
    pub fn insert_issue(&self, issue: TrackedIssue) {
        let mut state = self.lock();
        if issue.id >= state.next_id {
            state.next_id = issue.id + 1;
        }
        state.issues.insert(issue.id, issue);
    }

    pub fn issue(&self, id: IssueId) -> Option<TrackedIssue> {
        self.lock().issues.get(&id).cloned()
    }

    pub fn issues(&self) -> Vec<TrackedIssue> {
        self.lock().issues.values().cloned().collect()
    }

    pub fn set_status(&self, id: IssueId, status: StatusId) {
        if let Some(issue) = self.lock().issues.get_mut(&id) {
            issue.status = status;
        }
    }

    /// Note écrite par un humain, sans passer par le journal d'appels
    pub fn add_human_note(&self, id: IssueId, text: &str) {
        if let Some(issue) = self.lock().issues.get_mut(&id) {
            issue.notes.push(text.to_string());
        }
    }

    /// Simule un ticket supprimé côté tracker
    pub fn remove_issue(&self, id: IssueId) -> Option<TrackedIssue> {
        self.lock().issues.remove(&id)
    }

    /// `create` échoue pour tout résumé contenant ce texte
    pub fn fail_when_summary_contains(&self, needle: &str) {
        self.lock().failing_summaries.push(needle.to_string());
    }

    /// Tout appel visant ce ticket échoue
    pub fn fail_issue(&self, id: IssueId) {
        self.lock().failing_issues.insert(id);
    }

    /// Seul `update` échoue pour ce ticket (note acceptée, résumé non modifié)
    pub fn fail_updates(&self, id: IssueId) {
        self.lock().failing_updates.insert(id);
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_summaries.clear();
        state.failing_issues.clear();
        state.failing_updates.clear();
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<TrackerCall> {
        self.calls().into_iter().filter(TrackerCall::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn created(&self) -> Vec<NewIssue> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TrackerCall::Create(issue) => Some(issue),
                _ => None,
            })
            .collect()
    }

    pub fn notes_added(&self) -> Vec<(IssueId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TrackerCall::AddNote { issue, text } => Some((issue, text)),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<(IssueId, IssueUpdate)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TrackerCall::Update { issue, update } => Some((issue, update)),
                _ => None,
            })
            .collect()
    }
}

fn injected(what: String) -> TransportError {
    TransportError::Status {
        service: SERVICE,
        status: 500,
        body: what,
    }
}

impl IssueTracker for MockTracker {
    fn get(&self, id: IssueId) -> Result<TrackedIssue, TransportError> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::Get(id));
        if state.failing_issues.contains(&id) {
            return Err(injected(format!("get {id}")));
        }
        state.issues.get(&id).cloned().ok_or(TransportError::IssueNotFound(id))
    }

    fn find_ids_by_summary(&self, project_id: ProjectId, summary: &str) -> Result<Vec<IssueId>, TransportError> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::FindBySummary {
            project: project_id,
            summary: summary.to_string(),
        });
        Ok(state
            .issues
            .values()
            .filter(|issue| issue.project_id == project_id && issue.summary == summary)
            .map(|issue| issue.id)
            .collect())
    }

    fn create(&self, issue: &NewIssue) -> Result<IssueId, TransportError> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::Create(issue.clone()));
        if state.failing_summaries.iter().any(|needle| issue.summary.contains(needle.as_str())) {
            return Err(injected(format!("create {:?}", issue.summary)));
        }

        let id = state.next_id;
        state.next_id += 1;
        state.issues.insert(
            id,
            TrackedIssue {
                id,
                status: STATUS_NEW,
                summary: issue.summary.clone(),
                description: issue.description.clone(),
                category: issue.category.clone(),
                project_id: issue.project_id,
                notes: Vec::new(),
            },
        );
        log::debug!("[MOCK] created issue {id}");
        Ok(id)
    }

    fn add_note(&self, id: IssueId, text: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::AddNote {
            issue: id,
            text: text.to_string(),
        });
        if state.failing_issues.contains(&id) {
            return Err(injected(format!("add_note {id}")));
        }
        let issue = state.issues.get_mut(&id).ok_or(TransportError::IssueNotFound(id))?;
        issue.notes.push(text.to_string());
        Ok(())
    }

    fn update(&self, id: IssueId, update: &IssueUpdate) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::Update {
            issue: id,
            update: update.clone(),
        });
        if state.failing_issues.contains(&id) || state.failing_updates.contains(&id) {
            return Err(injected(format!("update {id}")));
        }
        let issue = state.issues.get_mut(&id).ok_or(TransportError::IssueNotFound(id))?;
        if let Some(summary) = &update.summary {
            issue.summary = summary.clone();
        }
        if let Some(status) = update.status {
            issue.status = status;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_issue(summary: &str) -> NewIssue {
        NewIssue {
            summary: summary.into(),
            description: "d".into(),
            category: "General".into(),
            project_id: 1,
        }
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = MockTracker::starting_at(42);
        let handle = tracker.clone();
        let id = tracker.create(&new_issue("s")).unwrap();
        assert_eq!(id, 42);
        assert_eq!(handle.issue(42).unwrap().status, STATUS_NEW);
        assert_eq!(handle.created().len(), 1);
    }

    #[test]
    fn test_update_applies_subset() {
        let tracker = MockTracker::new();
        let id = tracker.create(&new_issue("before")).unwrap();
        tracker.update(id, &IssueUpdate::new().status(STATUS_RESOLVED)).unwrap();
        let issue = tracker.issue(id).unwrap();
        assert_eq!(issue.summary, "before");
        assert_eq!(issue.status, STATUS_RESOLVED);
    }

    #[test]
    fn test_failure_injection() {
        let tracker = MockTracker::new();
        tracker.fail_when_summary_contains("web1");
        assert!(tracker.create(&new_issue("host web1")).is_err());
        assert!(tracker.issues().is_empty());

        let id = tracker.create(&new_issue("host db1")).unwrap();
        tracker.fail_issue(id);
        assert!(tracker.add_note(id, "x").is_err());
        tracker.heal();
        tracker.add_note(id, "x").unwrap();
        assert_eq!(tracker.issue(id).unwrap().notes, vec!["x"]);
    }

    #[test]
    fn test_summary_lookup_is_scoped_to_project() {
        let tracker = MockTracker::new();
        let first = tracker.create(&new_issue("same")).unwrap();
        let mut other = new_issue("same");
        other.project_id = 7;
        let second = tracker.create(&other).unwrap();

        assert_eq!(tracker.find_ids_by_summary(1, "same").unwrap(), vec![first]);
        assert_eq!(tracker.find_id_by_summary(7, "same").unwrap(), Some(second));
        assert_eq!(tracker.find_id_by_summary(7, "other").unwrap(), None);
    }

    #[test]
    fn test_update_only_failure() {
        let tracker = MockTracker::new();
        let id = tracker.create(&new_issue("s")).unwrap();
        tracker.fail_updates(id);
        tracker.add_note(id, "kept").unwrap();
        assert!(tracker.update(id, &IssueUpdate::new().summary("t")).is_err());
        assert_eq!(tracker.issue(id).unwrap().summary, "s");
    }

    #[test]
    fn test_missing_issue() {
        let tracker = MockTracker::new();
        assert!(matches!(tracker.get(9), Err(TransportError::IssueNotFound(9))));
    }
}
