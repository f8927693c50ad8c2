/**
 * TRACKER - Côté gestionnaire de tickets
 *
 * RÔLE :
 * Opérations distantes consommées par le moteur (`IssueTracker`) et leur
 * implémentation MantisBT.
 */
pub mod mantis;

pub use mantis::MantisClient;

use crate::errors::TransportError;
use crate::models::{IssueId, IssueUpdate, NewIssue, ProjectId, TrackedIssue};

/// Remote issue operations. Every call is blocking; retries and timeouts are
/// the implementation's business.
pub trait IssueTracker {
    fn get(&self, id: IssueId) -> Result<TrackedIssue, TransportError>;

    /// Ids of every issue of `project_id` whose summary is exactly `summary`,
    /// whatever their status
    fn find_ids_by_summary(&self, project_id: ProjectId, summary: &str) -> Result<Vec<IssueId>, TransportError>;

    fn find_id_by_summary(&self, project_id: ProjectId, summary: &str) -> Result<Option<IssueId>, TransportError> {
        Ok(self.find_ids_by_summary(project_id, summary)?.into_iter().next())
    }

    fn create(&self, issue: &NewIssue) -> Result<IssueId, TransportError>;

    fn add_note(&self, id: IssueId, text: &str) -> Result<(), TransportError>;

    fn update(&self, id: IssueId, update: &IssueUpdate) -> Result<(), TransportError>;
}
