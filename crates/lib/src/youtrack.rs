//! YouTrack REST client: create issues via POST /api/issues.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const ISSUE_FIELDS: &str = "id,idReadable,summary,description,created,updated,project(id,name,shortName)";

#[derive(Debug, thiserror::Error)]
pub enum YouTrackError {
    #[error("youtrack request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("[{status}] {body}")]
    Api { status: u16, body: String },
}

/// Created issue handle returned by YouTrack.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedIssue {
    pub id: String,
    #[serde(default, rename = "idReadable")]
    pub id_readable: Option<String>,
}

/// Issue-tracker collaborator: create one issue, return its id and readable key.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(
        &self,
        summary: &str,
        description: &str,
        project_id: &str,
        type_name: &str,
    ) -> Result<CreatedIssue, YouTrackError>;

    /// Base URL for building human links to created issues.
    fn base_url(&self) -> &str;
}

/// Client for the YouTrack REST API.
#[derive(Clone)]
pub struct YouTrackClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl YouTrackClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IssueTracker for YouTrackClient {
    /// POST /api/issues — body carries summary, project, optional description,
    /// and the Type custom field when a type name is given.
    async fn create_issue(
        &self,
        summary: &str,
        description: &str,
        project_id: &str,
        type_name: &str,
    ) -> Result<CreatedIssue, YouTrackError> {
        let url = format!("{}/api/issues", self.base_url);
        let mut payload = json!({
            "summary": summary,
            "project": { "id": project_id },
        });
        if !description.is_empty() {
            payload["description"] = json!(description);
        }
        if !type_name.is_empty() {
            payload["customFields"] = json!([
                { "name": "Type", "value": { "name": type_name } }
            ]);
        }
        log::debug!("creating youtrack issue in project_id={}", project_id);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .query(&[("fields", ISSUE_FIELDS)])
            .json(&payload)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            log::error!("youtrack create failed {} {}", status, body);
            return Err(YouTrackError::Api { status, body });
        }
        let created: CreatedIssue = res.json().await?;
        log::info!(
            "created youtrack issue {} ({})",
            created.id_readable.as_deref().unwrap_or("-"),
            created.id
        );
        Ok(created)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
