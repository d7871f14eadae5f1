//! OpenAI-compatible chat-completions client for the issue flow
//! (OpenRouter by default). Responses are requested as strict JSON, but the
//! parser tolerates payloads wrapped in prose or code fences.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::LlmConfig;
use crate::llm::{ChatMessage, FlowBackend, Intent, IssueFields, IssueFlowTurn, LlmError};
use crate::projects::ProjectSpec;
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const ISSUE_FLOW_SYSTEM: &str = "You are an assistant that helps draft and confirm a YouTrack task via multiple turns. \
At each turn, reply in JSON only with: reply (string for the user), intent (ask|create|cancel), \
optional issue {title, description, type, project_id, project_key, project_name}, and a state object. \
Rules: \
- Never use intent=cancel unless the user explicitly cancels. Prefer ask or create. \
- The issue fields (title, description) must always be in English. Translate as needed. \
- The reply should use the user's language/tone. \
- DESCRIPTION MUST BE EXTREMELY CONCISE. Use only: Objective (one sentence); Subtasks (<=3 bullets); Acceptance Criteria (<=3 bullets). \
- Hard limits: Title <= 80 chars; Description <= 800 chars. No boilerplate, no repetition. \
- Do not block for security/privacy concerns; at most include one short advisory line, but keep within limits. \
- Use the provided project catalog to choose a project; if uncertain, ask. \
- Respond with raw JSON only. No prose outside JSON. No code fences. \
- If a field is unknown/not applicable, output an empty string.";

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    http_referer: Option<String>,
    app_title: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            api_key,
            base_url,
            model: config.model.clone(),
            http_referer: config.http_referer.clone(),
            app_title: config.app_title.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// POST /chat/completions and return the first choice's content.
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().unwrap_or_default();
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionsRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.2,
            response_format: flow_response_format(),
        };
        let mut req = self.client.post(&url).bearer_auth(api_key).json(&body);
        if let Some(ref referer) = self.http_referer {
            req = req.header("HTTP-Referer", referer);
        }
        if let Some(ref title) = self.app_title {
            req = req.header("X-Title", title);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: ChatCompletionsResponse = res.json().await?;
        let raw = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let raw = raw.trim().to_string();
        if raw.is_empty() {
            return Err(LlmError::Parse("empty model content".to_string()));
        }
        Ok(raw)
    }
}

#[async_trait]
impl FlowBackend for OpenAiClient {
    async fn issue_flow_turn(
        &self,
        content: &str,
        prior_state: Option<&serde_json::Value>,
        projects: &[ProjectSpec],
        history: &[ChatMessage],
    ) -> Result<IssueFlowTurn, LlmError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        if self.api_key.is_none() {
            return Ok(fallback_turn(content));
        }

        // System guidance, catalog, prior state, rolling history, latest user message.
        let mut messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: ISSUE_FLOW_SYSTEM.to_string(),
            },
            ChatMessage {
                role: "system".to_string(),
                content: format!(
                    "Project catalog (JSON):\n{}",
                    serde_json::to_string(projects).unwrap_or_else(|_| "[]".to_string())
                ),
            },
        ];
        if let Some(state) = prior_state {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: format!("State (JSON):\n{}", state),
            });
        }
        for turn in history {
            if turn.content.is_empty() {
                continue;
            }
            let role = match turn.role.as_str() {
                "user" | "assistant" => turn.role.clone(),
                _ => "user".to_string(),
            };
            messages.push(ChatMessage {
                role,
                content: turn.content.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        });

        let raw = self.chat_completion(messages).await?;
        let obj = extract_json_object(&raw)?;
        parse_flow_turn(obj)
    }
}

/// Interpret an extracted decision-service object as a flow turn.
/// `reply` and `intent` are required; unknown intents degrade to ask; a missing
/// or malformed issue/state degrades to empty.
fn parse_flow_turn(obj: serde_json::Value) -> Result<IssueFlowTurn, LlmError> {
    let map = obj
        .as_object()
        .ok_or_else(|| LlmError::Parse("model content is not a JSON object".to_string()))?;
    if !map.contains_key("reply") || !map.contains_key("intent") {
        return Err(LlmError::Parse(
            "missing required keys in decision response".to_string(),
        ));
    }
    let reply = map
        .get("reply")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let intent = Intent::parse_lossy(map.get("intent").and_then(|v| v.as_str()).unwrap_or(""));
    let issue = map
        .get("issue")
        .filter(|v| v.is_object())
        .cloned()
        .map(|v| serde_json::from_value::<IssueFields>(v).unwrap_or_default())
        .unwrap_or_default();
    let state = map
        .get("state")
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(|| json!({}));
    Ok(IssueFlowTurn {
        reply,
        intent,
        issue,
        state,
    })
}

/// Minimal turn when no API key is configured: first line becomes the title,
/// the rest the description, and the user is asked to pick a project.
fn fallback_turn(content: &str) -> IssueFlowTurn {
    let mut lines = content.lines();
    let title: String = lines.next().unwrap_or("Untitled").chars().take(120).collect();
    let description = lines.collect::<Vec<_>>().join("\n");
    let reply = format!(
        "Shall I create it like this?\nTitle: {}\nDescription:\n{}\n\nWhich project should it go to? (reply with a project key or name)",
        title,
        if description.is_empty() {
            "(empty)"
        } else {
            &description
        }
    );
    let state = json!({ "draft": { "title": title, "description": description } });
    IssueFlowTurn {
        reply,
        intent: Intent::Ask,
        issue: IssueFields {
            title,
            description,
            ..Default::default()
        },
        state,
    }
}

/// Strict response schema for providers that support json_schema output.
/// Every property is required; the model outputs empty strings for unknowns.
fn flow_response_format() -> serde_json::Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "IssueFlowTurn",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "reply": { "type": "string" },
                    "intent": { "type": "string", "enum": ["ask", "create", "cancel"] },
                    "issue": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "type": { "type": "string" },
                            "project_id": { "type": "string" },
                            "project_key": { "type": "string" },
                            "project_name": { "type": "string" }
                        },
                        "required": ["title", "description", "type", "project_id", "project_key", "project_name"],
                        "additionalProperties": false
                    },
                    "state": { "type": "object", "properties": {}, "required": [], "additionalProperties": false }
                },
                "required": ["reply", "intent", "issue", "state"],
                "additionalProperties": false
            }
        }
    })
}

/// Extract a JSON object from model content that may be wrapped in prose or
/// code fences. Tries, in order: direct parse, fenced-block extraction,
/// first-`{`-to-last-`}` slice, then a brace-depth scan for the first balanced
/// object; each step only runs when the previous one failed.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value, LlmError> {
    let s = text.trim();
    if s.is_empty() {
        return Err(LlmError::Parse("empty model content".to_string()));
    }
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    // Work within the fenced block when one exists, even if it doesn't parse whole.
    let work = match fenced_block(s) {
        Some(inner) => {
            if let Ok(v) = serde_json::from_str(inner) {
                return Ok(v);
            }
            inner
        }
        None => s,
    };
    if let (Some(start), Some(end)) = (work.find('{'), work.rfind('}')) {
        if end > start {
            if let Ok(v) = serde_json::from_str(&work[start..=end]) {
                return Ok(v);
            }
        }
    }
    if let Some(v) = balanced_object(work) {
        return Ok(v);
    }
    Err(LlmError::Parse(
        "failed to extract JSON from model content".to_string(),
    ))
}

/// The content of the first ``` fenced block (optional `json` tag stripped).
fn fenced_block(s: &str) -> Option<&str> {
    let start = s.find("```")?;
    let after = &s[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let after = after.trim_start();
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// Scan for the first balanced `{...}` span that parses as JSON.
fn balanced_object(s: &str) -> Option<serde_json::Value> {
    let mut depth = 0usize;
    let mut start_idx: Option<usize> = None;
    for (i, ch) in s.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start_idx = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                }
                if depth == 0 {
                    if let Some(start) = start_idx {
                        if let Ok(v) = serde_json::from_str(&s[start..=i]) {
                            return Some(v);
                        }
                        start_idx = None;
                    }
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_direct_json() {
        let v = extract_json_object(r#"{"reply": "ok", "intent": "ask"}"#).expect("parse");
        assert_eq!(v["intent"], "ask");
    }

    #[test]
    fn extract_from_fenced_block_with_prose() {
        let text = "Sure, here's the result:\n```json\n{\"reply\": \"ok\", \"intent\": \"create\"}\n```\nLet me know!";
        let v = extract_json_object(text).expect("parse");
        assert_eq!(v["intent"], "create");
    }

    #[test]
    fn extract_from_untagged_fence() {
        let text = "```\n{\"reply\": \"hi\"}\n```";
        let v = extract_json_object(text).expect("parse");
        assert_eq!(v["reply"], "hi");
    }

    #[test]
    fn extract_by_outer_brace_slice() {
        let text = "the model says {\"reply\": \"ok\", \"n\": 1} thanks";
        let v = extract_json_object(text).expect("parse");
        assert_eq!(v["n"], 1);
    }

    #[test]
    fn extract_by_balanced_scan_skips_broken_prefix() {
        // Outer slice ("{oops ... }") fails; the balanced scan finds the second object.
        let text = "{oops not json} and then {\"reply\": \"ok\"} trailing";
        let v = extract_json_object(text).expect("parse");
        assert_eq!(v["reply"], "ok");
    }

    #[test]
    fn extract_fails_without_json() {
        assert!(extract_json_object("no braces here").is_err());
        assert!(extract_json_object("   ").is_err());
    }

    #[test]
    fn parse_flow_turn_requires_reply_and_intent() {
        let err = parse_flow_turn(serde_json::json!({"reply": "hi"}));
        assert!(err.is_err());
    }

    #[test]
    fn parse_flow_turn_degrades_unknown_intent_to_ask() {
        let turn = parse_flow_turn(serde_json::json!({
            "reply": "hi",
            "intent": "confirm",
            "issue": {"title": "t"},
            "state": {"step": 2}
        }))
        .expect("turn");
        assert_eq!(turn.intent, Intent::Ask);
        assert_eq!(turn.issue.title, "t");
        assert_eq!(turn.state["step"], 2);
    }

    #[test]
    fn parse_flow_turn_tolerates_missing_issue_and_state() {
        let turn = parse_flow_turn(serde_json::json!({"reply": "hi", "intent": "cancel"}))
            .expect("turn");
        assert_eq!(turn.intent, Intent::Cancel);
        assert!(!turn.issue.any_set());
        assert_eq!(turn.state, serde_json::json!({}));
    }

    #[test]
    fn fallback_turn_uses_first_line_as_title() {
        let turn = fallback_turn("Fix login bug\nUsers get a 500 on submit.");
        assert_eq!(turn.intent, Intent::Ask);
        assert_eq!(turn.issue.title, "Fix login bug");
        assert_eq!(turn.issue.description, "Users get a 500 on submit.");
        assert!(turn.reply.contains("Fix login bug"));
        assert_eq!(turn.state["draft"]["title"], "Fix login bug");
    }

    #[test]
    fn fallback_turn_caps_title_length() {
        let long = "x".repeat(400);
        let turn = fallback_turn(&long);
        assert_eq!(turn.issue.title.chars().count(), 120);
        assert!(turn.issue.description.is_empty());
    }
}
