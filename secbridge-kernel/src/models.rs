use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::errors::ParseError;

pub type IssueId = i64;
pub type StatusId = i64;
pub type ProjectId = i64;

/// Ligne brute de la supervision : colonne -> valeur
pub type Row = HashMap<String, String>;

pub const COL_HOST_NAME: &str = "host_name";
pub const COL_PLUGIN_OUTPUT: &str = "plugin_output";
pub const COL_HOST_NOTES: &str = "host_notes";

/// Sévérité fixée par la requête qui a produit la ligne (state = 0 ou non)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Ok,
    Error,
}

/// Une ligne d'état courant du check sécurité pour un hôte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub host_name: String,
    pub plugin_output: String,
    pub host_notes: Option<String>,
    pub severity: Severity,
    /// Paquets en retard, vide quand l'hôte est OK
    pub packages: Vec<String>,
}

impl Observation {
    pub fn from_row(row: &Row, severity: Severity) -> Result<Self, ParseError> {
        let host_name = row
            .get(COL_HOST_NAME)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or(ParseError::MissingColumn(COL_HOST_NAME))?
            .to_string();
        let plugin_output = row.get(COL_PLUGIN_OUTPUT).cloned().unwrap_or_default();
        let host_notes = row
            .get(COL_HOST_NOTES)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let packages = match severity {
            Severity::Error => parse_packages(&plugin_output)?,
            Severity::Ok => Vec::new(),
        };

        Ok(Self {
            host_name,
            plugin_output,
            host_notes,
            severity,
            packages,
        })
    }

    /// Projet cible lu dans les notes d'hôte, `None` si absent ou invalide
    pub fn override_project_id(&self) -> Option<ProjectId> {
        let notes = self.host_notes.as_deref()?;
        match HostNotes::parse(notes) {
            Ok(parsed) => parsed.mantis_project_id,
            Err(reason) => {
                warn!(host = %self.host_name, %reason, "ignoring malformed host notes");
                None
            }
        }
    }
}

/// Métadonnées d'hôte encodées en YAML dans `host_notes`
#[derive(Debug, Default, Deserialize)]
struct HostNotes {
    mantis_project_id: Option<ProjectId>,
}

impl HostNotes {
    fn parse(text: &str) -> Result<Self, String> {
        let notes: HostNotes = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
        match notes.mantis_project_id {
            Some(id) if id <= 0 => Err(format!("mantis_project_id must be positive, got {id}")),
            _ => Ok(notes),
        }
    }
}

/// Extrait la liste de paquets d'une sortie plugin du type "Packages: a, b c"
pub fn parse_packages(plugin_output: &str) -> Result<Vec<String>, ParseError> {
    let (_, list) = plugin_output
        .split_once(':')
        .ok_or_else(|| ParseError::PluginOutput(plugin_output.to_string()))?;

    let packages = unique_in_order(
        list.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(str::to_string),
    );
    if packages.is_empty() {
        return Err(ParseError::PluginOutput(plugin_output.to_string()));
    }
    Ok(packages)
}

/// Dédoublonne en gardant la première occurrence
pub fn unique_in_order<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Vue du tracker sur un ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedIssue {
    pub id: IssueId,
    pub status: StatusId,
    pub summary: String,
    pub description: String,
    pub category: String,
    pub project_id: ProjectId,
    /// Texte des notes, ordre chronologique
    pub notes: Vec<String>,
}

impl TrackedIssue {
    pub fn is_resolved(&self, resolved_status: StatusId) -> bool {
        self.status == resolved_status
    }
}

/// Champs d'un ticket à créer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub summary: String,
    pub description: String,
    pub category: String,
    pub project_id: ProjectId,
}

/// Sous-ensemble modifiable d'un ticket existant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    pub summary: Option<String>,
    pub status: Option<StatusId>,
}

impl IssueUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn status(mut self, status: StatusId) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.status.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(host: &str, output: &str, notes: &str) -> Row {
        let mut row = Row::new();
        row.insert(COL_HOST_NAME.into(), host.into());
        row.insert(COL_PLUGIN_OUTPUT.into(), output.into());
        row.insert(COL_HOST_NOTES.into(), notes.into());
        row
    }

    #[test]
    fn test_parse_packages_commas_and_spaces() {
        assert_eq!(
            parse_packages("Packages: libssl, curl").unwrap(),
            vec!["libssl", "curl"]
        );
        assert_eq!(
            parse_packages("Packages: python-django python-soappy").unwrap(),
            vec!["python-django", "python-soappy"]
        );
    }

    #[test]
    fn test_parse_packages_dedup_keeps_order() {
        assert_eq!(
            parse_packages("Packages: curl libssl curl").unwrap(),
            vec!["curl", "libssl"]
        );
    }

    #[test]
    fn test_parse_packages_arch_qualified() {
        assert_eq!(
            parse_packages("Packages: libssl1.1:amd64").unwrap(),
            vec!["libssl1.1:amd64"]
        );
    }

    #[test]
    fn test_parse_packages_rejects_garbage() {
        assert!(matches!(
            parse_packages("no separator here"),
            Err(ParseError::PluginOutput(_))
        ));
        assert!(matches!(
            parse_packages("Packages: "),
            Err(ParseError::PluginOutput(_))
        ));
    }

    #[test]
    fn test_observation_ok_has_no_packages() {
        let obs = Observation::from_row(&row("web1", "OK", ""), Severity::Ok).unwrap();
        assert!(obs.packages.is_empty());
        assert_eq!(obs.host_notes, None);
    }

    #[test]
    fn test_observation_requires_host() {
        let err = Observation::from_row(&row("  ", "Packages: a", ""), Severity::Error).unwrap_err();
        assert!(matches!(err, ParseError::MissingColumn(COL_HOST_NAME)));
    }

    #[test]
    fn test_override_project_id() {
        let obs = Observation::from_row(
            &row("db1", "Packages: curl", "mantis_project_id: 3"),
            Severity::Error,
        )
        .unwrap();
        assert_eq!(obs.override_project_id(), Some(3));
    }

    #[test]
    fn test_override_project_id_soft_fails() {
        for notes in ["rack 4, row B", "mantis_project_id: abc", "mantis_project_id: -2", "other: 1"] {
            let obs =
                Observation::from_row(&row("db1", "Packages: curl", notes), Severity::Error).unwrap();
            assert_eq!(obs.override_project_id(), None, "notes {notes:?}");
        }
    }

    #[test]
    fn test_issue_update_builder() {
        assert!(IssueUpdate::new().is_empty());
        let update = IssueUpdate::new().summary("s").status(80);
        assert_eq!(update.summary.as_deref(), Some("s"));
        assert_eq!(update.status, Some(80));
    }
}
