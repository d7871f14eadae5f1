//! Multi-turn issue creation: the decision service drives each turn
//! (ask / create / cancel); this handler interprets the turn, renders draft
//! previews, resolves the target project, and files the issue in YouTrack.

use crate::conversation::{ConversationStores, IssueDraft};
use crate::llm::{ChatMessage, Intent, IssueFields};
use crate::projects::{resolve_project_id, ProjectSpec};
use crate::router::{Context, Handler};
use anyhow::Result;
use async_trait::async_trait;

const NOT_CONFIGURED: &str = "YouTrack is not configured. Set `youtrack.url` and `youtrack.token` in the config (or YOUTRACK_URL / YOUTRACK_TOKEN).";
const PROJECT_UNRESOLVED: &str =
    "I haven't settled on a project yet. Which project should this go to? (reply with a project key or name)";

/// Drives one turn of the issue-creation conversation per incoming message.
pub struct IssueCreate;

#[async_trait]
impl Handler for IssueCreate {
    async fn handle(&self, ctx: &Context) -> Result<()> {
        let content = ctx.message.content.trim().to_string();
        if content.is_empty() {
            return Ok(());
        }

        let state = &ctx.state;
        let tracker = match &state.tracker {
            Some(t) => t.clone(),
            None => {
                ctx.send_reply(NOT_CONFIGURED).await?;
                return Ok(());
            }
        };

        // The route filters guarantee a stream message.
        let stream_id = ctx
            .message
            .stream_id
            .ok_or_else(|| anyhow::anyhow!("issue flow requires a stream message"))?;
        let subject = ctx.message.subject.as_str();
        let sender_id = ctx.message.sender_id;
        let stores = &state.stores;
        let catalog = &state.config.projects;

        // Prior flow state, and the history as it stood before this turn; the
        // store receives the new user message before the decision call, so it
        // always contains the message that produced the current turn.
        let prior = stores.flows.get(stream_id, subject, sender_id).await;
        let history = stores.history.get(stream_id, subject, sender_id).await;
        stores
            .history
            .append(stream_id, subject, sender_id, "user", &content)
            .await;

        let turn_history: Vec<ChatMessage> = history
            .iter()
            .map(|h| ChatMessage {
                role: h.role.clone(),
                content: h.content.clone(),
            })
            .collect();
        let turn = match state
            .llm
            .issue_flow_turn(&content, prior.as_ref(), catalog, &turn_history)
            .await
        {
            Ok(turn) => turn,
            Err(e) => {
                log::warn!("issue flow: decision service failed: {}", e);
                ctx.send_reply(&format!("I couldn't process that message: {}.", e))
                    .await?;
                return Ok(());
            }
        };

        let mut reply_text = turn.reply.trim().to_string();
        if turn.intent != Intent::Create && turn.issue.any_set() {
            let preview = format_preview(&turn.issue, catalog);
            reply_text = if reply_text.is_empty() {
                preview
            } else {
                format!("{}\n\n{}", reply_text, preview)
            };
        }

        if !reply_text.is_empty() {
            ctx.send_reply(&reply_text).await?;
            stores
                .history
                .append(stream_id, subject, sender_id, "assistant", &reply_text)
                .await;
        }

        match turn.intent {
            Intent::Cancel => {
                stores.clear_all(stream_id, subject, sender_id).await;
            }
            Intent::Create => {
                let issue = &turn.issue;
                let title = non_empty(&issue.title).unwrap_or("Untitled");
                let description = issue.description.trim();
                let itype = non_empty(&issue.itype).unwrap_or("Task");
                let resolved = resolve_project_id(
                    catalog,
                    non_empty(&issue.project_id),
                    non_empty(&issue.project_key),
                    non_empty(&issue.project_name),
                );
                let Some(project_id) = resolved else {
                    ctx.send_reply(PROJECT_UNRESOLVED).await?;
                    persist_progress(stores, catalog, stream_id, subject, sender_id, issue, turn.state)
                        .await;
                    return Ok(());
                };
                match tracker
                    .create_issue(title, description, &project_id, itype)
                    .await
                {
                    Ok(created) => {
                        let key = created
                            .id_readable
                            .as_deref()
                            .filter(|s| !s.is_empty())
                            .unwrap_or(&created.id);
                        let confirmation =
                            format!("created {} {}/issue/{}", key, tracker.base_url(), key);
                        ctx.send_reply(&confirmation).await?;
                        stores
                            .history
                            .append(stream_id, subject, sender_id, "assistant", &confirmation)
                            .await;
                        stores.clear_all(stream_id, subject, sender_id).await;
                    }
                    Err(e) => {
                        log::error!("issue flow: youtrack create failed: {}", e);
                        ctx.send_reply(&format!("YouTrack error: {}", e)).await?;
                        // Keep state so the user can retry without re-describing.
                        persist_progress(
                            stores, catalog, stream_id, subject, sender_id, issue, turn.state,
                        )
                        .await;
                    }
                }
            }
            Intent::Ask => {
                persist_progress(
                    stores,
                    catalog,
                    stream_id,
                    subject,
                    sender_id,
                    &turn.issue,
                    turn.state,
                )
                .await;
            }
        }
        Ok(())
    }
}

/// Persist the turn's opaque state and snapshot the draft so the conversation
/// can continue (or be retried) on the next message.
async fn persist_progress(
    stores: &ConversationStores,
    catalog: &[ProjectSpec],
    stream_id: i64,
    subject: &str,
    sender_id: i64,
    issue: &IssueFields,
    state: serde_json::Value,
) {
    if issue.any_set() {
        let project_id = resolve_project_id(
            catalog,
            non_empty(&issue.project_id),
            non_empty(&issue.project_key),
            non_empty(&issue.project_name),
        );
        let draft = IssueDraft::new(issue.title.trim(), issue.description.trim(), project_id);
        stores.drafts.set(stream_id, subject, sender_id, draft).await;
    }
    stores.flows.set(stream_id, subject, sender_id, state).await;
}

/// Deterministic rendering of the in-progress issue fields, shown to the user
/// before creation is confirmed.
fn format_preview(issue: &IssueFields, catalog: &[ProjectSpec]) -> String {
    let title = issue.title.trim();
    let desc = issue.description.trim();
    let itype = non_empty(&issue.itype).unwrap_or("Task");
    format!(
        "Draft preview:\n- Title: {}\n- Type: {}\n- Project: {}\n- Description:\n```\n{}\n```",
        if title.is_empty() { "(unset)" } else { title },
        itype,
        project_label(issue, catalog),
        if desc.is_empty() { "(empty)" } else { desc },
    )
}

/// Human label for the draft's project: a catalog match on id renders as
/// "KEY (Name)", otherwise whichever identifier the service provided.
fn project_label(issue: &IssueFields, catalog: &[ProjectSpec]) -> String {
    if let Some(id) = non_empty(&issue.project_id) {
        return match catalog.iter().find(|p| p.id == id) {
            Some(p) => format!("{} ({})", p.key, p.name),
            None => id.to_string(),
        };
    }
    if let Some(key) = non_empty(&issue.project_key) {
        return key.to_string();
    }
    if let Some(name) = non_empty(&issue.project_name) {
        return name.to_string();
    }
    "(unset)".to_string()
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}
