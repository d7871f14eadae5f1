//! Decision-service abstraction and the OpenAI-compatible client.
//!
//! The issue flow delegates each conversational turn to a decision service that
//! returns a reply, an intent (ask/create/cancel), optional issue fields, and an
//! opaque state blob echoed back on the next turn.

mod openai;

pub use openai::{extract_json_object, OpenAiClient};

use async_trait::async_trait;

use crate::projects::ProjectSpec;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("llm api error: {0}")]
    Api(String),
    #[error("llm response parse error: {0}")]
    Parse(String),
    #[error("empty message content")]
    EmptyContent,
}

/// A chat turn on the wire (role + content).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// The decision service's declared next action for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Ask,
    Create,
    Cancel,
}

impl Intent {
    /// Lossy parse: anything unrecognized is treated as ask.
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "create" => Intent::Create,
            "cancel" => Intent::Cancel,
            _ => Intent::Ask,
        }
    }
}

/// Issue fields the decision service may emit. Empty strings mean unset.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct IssueFields {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub itype: String,
    #[serde(default)]
    pub project_id: String,
    /// Some models emit "project" instead of "project_key".
    #[serde(default, alias = "project")]
    pub project_key: String,
    #[serde(default)]
    pub project_name: String,
}

impl IssueFields {
    /// True when any field carries a non-blank value.
    pub fn any_set(&self) -> bool {
        [
            &self.title,
            &self.description,
            &self.itype,
            &self.project_id,
            &self.project_key,
            &self.project_name,
        ]
        .iter()
        .any(|s| !s.trim().is_empty())
    }
}

/// One decision-service turn: user-facing reply, next action, issue fields,
/// and the opaque state to echo back next turn.
#[derive(Debug, Clone)]
pub struct IssueFlowTurn {
    pub reply: String,
    pub intent: Intent,
    pub issue: IssueFields,
    pub state: serde_json::Value,
}

/// Decision-service collaborator: one conversational turn in, structured
/// instructions out. The state blob is pass-through only.
#[async_trait]
pub trait FlowBackend: Send + Sync {
    async fn issue_flow_turn(
        &self,
        content: &str,
        prior_state: Option<&serde_json::Value>,
        projects: &[ProjectSpec],
        history: &[ChatMessage],
    ) -> Result<IssueFlowTurn, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_parse_is_lossy() {
        assert_eq!(Intent::parse_lossy("create"), Intent::Create);
        assert_eq!(Intent::parse_lossy(" Cancel "), Intent::Cancel);
        assert_eq!(Intent::parse_lossy("ask"), Intent::Ask);
        assert_eq!(Intent::parse_lossy("confirm"), Intent::Ask);
        assert_eq!(Intent::parse_lossy(""), Intent::Ask);
    }

    #[test]
    fn issue_fields_any_set() {
        assert!(!IssueFields::default().any_set());
        let fields = IssueFields {
            project_key: "NRIY".to_string(),
            ..Default::default()
        };
        assert!(fields.any_set());
        let blank = IssueFields {
            title: "   ".to_string(),
            ..Default::default()
        };
        assert!(!blank.any_set());
    }

    #[test]
    fn issue_fields_accept_project_alias() {
        let fields: IssueFields =
            serde_json::from_str(r#"{"title": "t", "project": "NRIY"}"#).expect("parse");
        assert_eq!(fields.project_key, "NRIY");
    }
}
