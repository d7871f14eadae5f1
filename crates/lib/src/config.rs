//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.quill/config.json`) and environment.
//! Secrets (Zulip API key, YouTrack token, LLM API key) can be supplied via env
//! overrides so the config file can stay checked into a dotfiles repo.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::projects::ProjectSpec;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Zulip connection settings (site URL, bot email, API key).
    #[serde(default)]
    pub zulip: ZulipConfig,

    /// YouTrack integration. When url/token are absent the issue flow replies
    /// with a guidance message instead of creating issues.
    #[serde(default)]
    pub youtrack: YouTrackConfig,

    /// Decision-service (LLM) settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Conversation store tuning (draft TTL, history window, flow eviction).
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Project catalog used to resolve the target project during issue creation.
    #[serde(default)]
    pub projects: Vec<ProjectSpec>,
}

/// Zulip connection config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZulipConfig {
    /// Zulip site URL (e.g. "https://example.zulipchat.com").
    #[serde(default)]
    pub site: String,

    /// Bot email. Messages from this sender are skipped by the dispatch loop.
    #[serde(default)]
    pub email: String,

    /// Bot API key. Overridden by ZULIP_API_KEY env when set.
    pub api_key: Option<String>,
}

/// YouTrack integration config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YouTrackConfig {
    /// Base URL (e.g. "https://example.youtrack.cloud"). Overridden by YOUTRACK_URL env.
    pub url: Option<String>,

    /// Permanent token. Overridden by YOUTRACK_TOKEN env.
    pub token: Option<String>,
}

/// Decision-service config (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// API key. Overridden by QUILL_LLM_API_KEY env. When absent the issue flow
    /// falls back to a local first-line-as-title heuristic.
    pub api_key: Option<String>,

    /// Model name as the provider expects it (default "openai/gpt-4o-mini").
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API base URL (default "https://openrouter.ai/api/v1").
    pub base_url: Option<String>,

    /// Optional HTTP-Referer header (OpenRouter attribution).
    pub http_referer: Option<String>,

    /// Optional X-Title header (OpenRouter attribution).
    pub app_title: Option<String>,
}

fn default_llm_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_llm_model(),
            base_url: None,
            http_referer: None,
            app_title: None,
        }
    }
}

/// Conversation store config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    /// Issue drafts older than this are evicted (seconds since creation, default 1800).
    #[serde(default = "default_draft_ttl_secs")]
    pub draft_ttl_secs: u64,

    /// Rolling chat-history window per conversation (default 16 messages).
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Flow-state eviction in seconds. Unset (the default) keeps flow state
    /// until the conversation reaches a terminal intent.
    pub flow_ttl_secs: Option<u64>,
}

fn default_draft_ttl_secs() -> u64 {
    1800
}

fn default_history_window() -> usize {
    16
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            draft_ttl_secs: default_draft_ttl_secs(),
            history_window: default_history_window(),
            flow_ttl_secs: None,
        }
    }
}

/// Env-first secret resolution: a non-empty env var wins over the configured value.
fn env_override(var: &str, configured: Option<&str>) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            configured
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the Zulip API key: env ZULIP_API_KEY overrides config.
pub fn resolve_zulip_api_key(config: &Config) -> Option<String> {
    env_override("ZULIP_API_KEY", config.zulip.api_key.as_deref())
}

/// Resolve the YouTrack base URL: env YOUTRACK_URL overrides config.
pub fn resolve_youtrack_url(config: &Config) -> Option<String> {
    env_override("YOUTRACK_URL", config.youtrack.url.as_deref())
}

/// Resolve the YouTrack token: env YOUTRACK_TOKEN overrides config.
pub fn resolve_youtrack_token(config: &Config) -> Option<String> {
    env_override("YOUTRACK_TOKEN", config.youtrack.token.as_deref())
}

/// Resolve the LLM API key: env QUILL_LLM_API_KEY overrides config.
pub fn resolve_llm_api_key(config: &Config) -> Option<String> {
    env_override("QUILL_LLM_API_KEY", config.llm.api_key.as_deref())
}

/// Resolve config path from env or default (~/.quill/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("QUILL_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".quill").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or QUILL_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_defaults() {
        let c = ConversationConfig::default();
        assert_eq!(c.draft_ttl_secs, 1800);
        assert_eq!(c.history_window, 16);
        assert!(c.flow_ttl_secs.is_none());
    }

    #[test]
    fn parse_full_config() {
        let raw = r#"{
            "zulip": {"site": "https://chat.example.com", "email": "bot@example.com", "apiKey": "zk"},
            "youtrack": {"url": "https://yt.example.com/", "token": "tok"},
            "llm": {"model": "openai/gpt-4o", "httpReferer": "https://example.com"},
            "conversation": {"draftTtlSecs": 60, "historyWindow": 4, "flowTtlSecs": 120},
            "projects": [
                {"id": "0-4", "key": "NRIY", "name": "Naran Ingyeo", "description": "bot project"}
            ]
        }"#;
        let config: Config = serde_json::from_str(raw).expect("parse config");
        assert_eq!(config.zulip.email, "bot@example.com");
        assert_eq!(config.youtrack.token.as_deref(), Some("tok"));
        assert_eq!(config.llm.model, "openai/gpt-4o");
        assert_eq!(config.conversation.draft_ttl_secs, 60);
        assert_eq!(config.conversation.flow_ttl_secs, Some(120));
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].key, "NRIY");
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = serde_json::from_str("{}").expect("parse empty config");
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
        assert!(config.projects.is_empty());
        assert!(config.youtrack.url.is_none());
    }

    #[test]
    fn load_config_reads_file_and_defaults_when_missing() {
        let dir = std::env::temp_dir().join(format!("quill-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"zulip": {"email": "bot@example.com"}}"#).expect("write config");

        let (config, used) = load_config(Some(path.clone())).expect("load config");
        assert_eq!(used, path);
        assert_eq!(config.zulip.email, "bot@example.com");

        let (config, _) = load_config(Some(dir.join("missing.json"))).expect("load defaults");
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
    }
}
