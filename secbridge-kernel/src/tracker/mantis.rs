/**
 * MANTIS CLIENT - API REST MantisBT (`/api/rest`), bloquante
 *
 * FONCTIONNEMENT :
 * - types filaires privés à ce module : le moteur ne voit que `TrackedIssue`,
 *   `NewIssue` et `IssueUpdate`
 * - 404 sur un ticket => `TransportError::IssueNotFound`
 * - authentification par en-tête `Authorization: <token>`
 */
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::IssueTracker;
use crate::config::TrackerConf;
use crate::errors::TransportError;
use crate::models::{IssueId, IssueUpdate, NewIssue, ProjectId, StatusId, TrackedIssue};

const SERVICE: &str = "mantis";
const PAGE_SIZE: usize = 50;
const MAX_PAGES: usize = 200;

pub struct MantisClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssuesEnvelope {
    #[serde(default)]
    issues: Vec<MantisIssue>,
}

#[derive(Debug, Deserialize)]
struct CreatedEnvelope {
    issue: CreatedIssue,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    id: IssueId,
}

#[derive(Debug, Deserialize)]
struct MantisIssue {
    id: IssueId,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    status: Option<ObjectRef>,
    project: Option<ObjectRef>,
    category: Option<ObjectRef>,
    #[serde(default)]
    notes: Vec<MantisNote>,
}

#[derive(Debug, Deserialize)]
struct ObjectRef {
    id: Option<i64>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MantisNote {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct IdRef {
    id: i64,
}

#[derive(Debug, Serialize)]
struct NameRef<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    summary: &'a str,
    description: &'a str,
    category: NameRef<'a>,
    project: IdRef,
}

#[derive(Debug, Serialize)]
struct NoteBody<'a> {
    text: &'a str,
    view_state: NameRef<'a>,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<IdRef>,
}

impl<'a> From<&'a IssueUpdate> for UpdateBody<'a> {
    fn from(update: &'a IssueUpdate) -> Self {
        Self {
            summary: update.summary.as_deref(),
            status: update.status.map(|id: StatusId| IdRef { id }),
        }
    }
}

impl TryFrom<MantisIssue> for TrackedIssue {
    type Error = TransportError;

    fn try_from(issue: MantisIssue) -> Result<Self, Self::Error> {
        let missing = |field: &str| TransportError::Decode {
            service: SERVICE,
            reason: format!("issue {} has no {field} id", issue.id),
        };
        let status = issue.status.as_ref().and_then(|s| s.id).ok_or_else(|| missing("status"))?;
        let project_id = issue.project.as_ref().and_then(|p| p.id).ok_or_else(|| missing("project"))?;

        Ok(TrackedIssue {
            id: issue.id,
            status,
            summary: issue.summary,
            description: issue.description,
            category: issue.category.and_then(|c| c.name).unwrap_or_default(),
            project_id,
            notes: issue.notes.into_iter().map(|n| n.text).collect(),
        })
    }
}

impl MantisClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(conf: &TrackerConf) -> Result<Self, TransportError> {
        Self::new(&conf.url, conf.api_token.clone(), Duration::from_secs(conf.timeout_secs))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/rest/{}", self.base_url, path);
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, token),
            None => builder,
        }
    }

    fn send(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        let response = builder.send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(TransportError::Status {
            service: SERVICE,
            status: status.as_u16(),
            body,
        })
    }
}

impl IssueTracker for MantisClient {
    fn get(&self, id: IssueId) -> Result<TrackedIssue, TransportError> {
        let response = match self.send(self.request(Method::GET, &format!("issues/{id}"))) {
            Err(TransportError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(TransportError::IssueNotFound(id));
            }
            other => other?,
        };
        let envelope: IssuesEnvelope = response.json()?;
        let issue = envelope
            .issues
            .into_iter()
            .next()
            .ok_or(TransportError::IssueNotFound(id))?;
        issue.try_into()
    }

    fn find_ids_by_summary(&self, project_id: ProjectId, summary: &str) -> Result<Vec<IssueId>, TransportError> {
        let mut found = Vec::new();
        for page in 1..=MAX_PAGES {
            let builder = self.request(Method::GET, "issues").query(&[
                ("project_id", project_id.to_string()),
                ("page_size", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ]);
            let envelope: IssuesEnvelope = self.send(builder)?.json()?;
            let fetched = envelope.issues.len();
            found.extend(
                envelope
                    .issues
                    .into_iter()
                    .filter(|issue| issue.summary == summary)
                    .map(|issue| issue.id),
            );
            if fetched < PAGE_SIZE {
                break;
            }
        }
        Ok(found)
    }

    fn create(&self, issue: &NewIssue) -> Result<IssueId, TransportError> {
        let body = CreateBody {
            summary: &issue.summary,
            description: &issue.description,
            category: NameRef { name: &issue.category },
            project: IdRef { id: issue.project_id },
        };
        let created: CreatedEnvelope = self.send(self.request(Method::POST, "issues").json(&body))?.json()?;
        debug!(issue_id = created.issue.id, "mantis issue created");
        Ok(created.issue.id)
    }

    fn add_note(&self, id: IssueId, text: &str) -> Result<(), TransportError> {
        let body = NoteBody {
            text,
            view_state: NameRef { name: "public" },
        };
        self.send(self.request(Method::POST, &format!("issues/{id}/notes")).json(&body))?;
        Ok(())
    }

    fn update(&self, id: IssueId, update: &IssueUpdate) -> Result<(), TransportError> {
        if update.is_empty() {
            return Ok(());
        }
        let body = UpdateBody::from(update);
        self.send(self.request(Method::PATCH, &format!("issues/{id}")).json(&body))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_conversion() {
        let json = r#"{
            "issues": [{
                "id": 42,
                "summary": "Security updates available for host db1 : libssl curl",
                "description": "The following packages have security updates available : libssl curl",
                "project": {"id": 3, "name": "Infra"},
                "category": {"id": 1, "name": "General"},
                "status": {"id": 10, "name": "new", "label": "new"},
                "notes": [
                    {"id": 1, "text": "This packages also have security updates : openssh"},
                    {"id": 2, "text": "looking into it"}
                ]
            }]
        }"#;
        let envelope: IssuesEnvelope = serde_json::from_str(json).unwrap();
        let issue: TrackedIssue = envelope.issues.into_iter().next().unwrap().try_into().unwrap();

        assert_eq!(issue.id, 42);
        assert_eq!(issue.status, 10);
        assert_eq!(issue.project_id, 3);
        assert_eq!(issue.category, "General");
        assert_eq!(
            issue.notes,
            vec!["This packages also have security updates : openssh", "looking into it"]
        );
    }

    #[test]
    fn test_issue_without_notes() {
        let json = r#"{"issues": [{"id": 7, "summary": "s", "project": {"id": 1}, "status": {"id": 80}}]}"#;
        let envelope: IssuesEnvelope = serde_json::from_str(json).unwrap();
        let issue: TrackedIssue = envelope.issues.into_iter().next().unwrap().try_into().unwrap();
        assert!(issue.notes.is_empty());
        assert!(issue.is_resolved(80));
    }

    #[test]
    fn test_issue_without_status_is_decode_error() {
        let json = r#"{"issues": [{"id": 7, "summary": "s", "project": {"id": 1}}]}"#;
        let envelope: IssuesEnvelope = serde_json::from_str(json).unwrap();
        let result: Result<TrackedIssue, _> = envelope.issues.into_iter().next().unwrap().try_into();
        assert!(matches!(result, Err(TransportError::Decode { .. })));
    }

    #[test]
    fn test_update_body_only_sets_given_fields() {
        let update = IssueUpdate::new().summary("new summary");
        let json = serde_json::to_value(UpdateBody::from(&update)).unwrap();
        assert_eq!(json, serde_json::json!({"summary": "new summary"}));

        let update = IssueUpdate::new().summary("s").status(80);
        let json = serde_json::to_value(UpdateBody::from(&update)).unwrap();
        assert_eq!(json, serde_json::json!({"summary": "s", "status": {"id": 80}}));
    }

    #[test]
    fn test_create_body_shape() {
        let body = CreateBody {
            summary: "s",
            description: "d",
            category: NameRef { name: "General" },
            project: IdRef { id: 1 },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "summary": "s",
                "description": "d",
                "category": {"name": "General"},
                "project": {"id": 1}
            })
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = MantisClient::new("https://mantis.example.org/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "https://mantis.example.org");
    }
}
