//! Per-conversation state: issue drafts, opaque flow state, rolling chat history.
//!
//! All three stores are keyed by (store kind, stream id, lowercased subject,
//! sender id), so the same (stream, topic, sender) exchange never collides
//! across stores. Drafts expire a fixed TTL after creation; flow state persists
//! until cleared unless an eviction TTL is configured; history keeps a bounded
//! window per key.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::ConversationConfig;

/// Store discriminator, part of every key.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
enum StoreKind {
    Draft,
    Flow,
    Chat,
}

/// Key identifying one multi-turn exchange: (kind, stream, topic, sender).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct ConvKey {
    kind: StoreKind,
    stream_id: i64,
    subject: String,
    sender_id: i64,
}

impl ConvKey {
    /// Subject comparison is case-insensitive: the subject is lowercased here.
    fn new(kind: StoreKind, stream_id: i64, subject: &str, sender_id: i64) -> Self {
        Self {
            kind,
            stream_id,
            subject: subject.to_lowercase(),
            sender_id,
        }
    }
}

/// An in-progress issue draft. One per conversation key; overwritten on set.
#[derive(Debug, Clone)]
pub struct IssueDraft {
    pub title: String,
    pub description: String,
    pub project_id: Option<String>,
    /// Drafts expire a TTL after this instant; reads and overwrites of other
    /// entries never refresh it.
    pub created_at: DateTime<Utc>,
}

impl IssueDraft {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        project_id: Option<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            project_id,
            created_at: Utc::now(),
        }
    }
}

/// In-memory draft store with TTL eviction measured from each draft's creation.
pub struct DraftStore {
    inner: Arc<RwLock<HashMap<ConvKey, IssueDraft>>>,
    ttl: Duration,
}

impl DraftStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Evict drafts older than the TTL. Runs before every get/set.
    async fn gc(&self) {
        let now = Utc::now();
        let ttl = self.ttl;
        self.inner
            .write()
            .await
            .retain(|_, d| now - d.created_at <= ttl);
    }

    pub async fn get(&self, stream_id: i64, subject: &str, sender_id: i64) -> Option<IssueDraft> {
        self.gc().await;
        let key = ConvKey::new(StoreKind::Draft, stream_id, subject, sender_id);
        self.inner.read().await.get(&key).cloned()
    }

    pub async fn set(&self, stream_id: i64, subject: &str, sender_id: i64, draft: IssueDraft) {
        self.gc().await;
        let key = ConvKey::new(StoreKind::Draft, stream_id, subject, sender_id);
        self.inner.write().await.insert(key, draft);
    }

    pub async fn clear(&self, stream_id: i64, subject: &str, sender_id: i64) {
        let key = ConvKey::new(StoreKind::Draft, stream_id, subject, sender_id);
        self.inner.write().await.remove(&key);
    }
}

struct FlowEntry {
    state: serde_json::Value,
    inserted_at: DateTime<Utc>,
}

/// Opaque per-conversation state for the decision service, echoed back verbatim
/// each turn. No eviction unless a TTL is configured.
pub struct FlowStore {
    inner: Arc<RwLock<HashMap<ConvKey, FlowEntry>>>,
    ttl: Option<Duration>,
}

impl FlowStore {
    pub fn new(ttl_secs: Option<u64>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl: ttl_secs.map(|s| Duration::seconds(s as i64)),
        }
    }

    async fn gc(&self) {
        let Some(ttl) = self.ttl else { return };
        let now = Utc::now();
        self.inner
            .write()
            .await
            .retain(|_, e| now - e.inserted_at <= ttl);
    }

    pub async fn get(
        &self,
        stream_id: i64,
        subject: &str,
        sender_id: i64,
    ) -> Option<serde_json::Value> {
        self.gc().await;
        let key = ConvKey::new(StoreKind::Flow, stream_id, subject, sender_id);
        self.inner.read().await.get(&key).map(|e| e.state.clone())
    }

    pub async fn set(
        &self,
        stream_id: i64,
        subject: &str,
        sender_id: i64,
        state: serde_json::Value,
    ) {
        self.gc().await;
        let key = ConvKey::new(StoreKind::Flow, stream_id, subject, sender_id);
        self.inner.write().await.insert(
            key,
            FlowEntry {
                state,
                inserted_at: Utc::now(),
            },
        );
    }

    pub async fn clear(&self, stream_id: i64, subject: &str, sender_id: i64) {
        let key = ConvKey::new(StoreKind::Flow, stream_id, subject, sender_id);
        self.inner.write().await.remove(&key);
    }
}

/// A single chat turn kept in history (role is "user" or "assistant").
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// Rolling chat history per conversation key, capped at a fixed window.
/// The oldest entries are discarded first.
pub struct HistoryStore {
    inner: Arc<RwLock<HashMap<ConvKey, Vec<HistoryEntry>>>>,
    window: usize,
}

impl HistoryStore {
    pub fn new(window: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            window,
        }
    }

    /// Returns an owned copy; callers never observe later mutations.
    pub async fn get(&self, stream_id: i64, subject: &str, sender_id: i64) -> Vec<HistoryEntry> {
        let key = ConvKey::new(StoreKind::Chat, stream_id, subject, sender_id);
        self.inner.read().await.get(&key).cloned().unwrap_or_default()
    }

    pub async fn append(
        &self,
        stream_id: i64,
        subject: &str,
        sender_id: i64,
        role: &str,
        content: &str,
    ) {
        let key = ConvKey::new(StoreKind::Chat, stream_id, subject, sender_id);
        let mut g = self.inner.write().await;
        let entries = g.entry(key).or_default();
        entries.push(HistoryEntry {
            role: role.to_string(),
            content: content.to_string(),
        });
        if entries.len() > self.window {
            let excess = entries.len() - self.window;
            entries.drain(..excess);
        }
    }

    pub async fn clear(&self, stream_id: i64, subject: &str, sender_id: i64) {
        let key = ConvKey::new(StoreKind::Chat, stream_id, subject, sender_id);
        self.inner.write().await.remove(&key);
    }
}

/// The three per-conversation stores, constructed empty at process start.
pub struct ConversationStores {
    pub drafts: DraftStore,
    pub flows: FlowStore,
    pub history: HistoryStore,
}

impl ConversationStores {
    pub fn new(config: &ConversationConfig) -> Self {
        Self {
            drafts: DraftStore::new(config.draft_ttl_secs),
            flows: FlowStore::new(config.flow_ttl_secs),
            history: HistoryStore::new(config.history_window),
        }
    }

    /// Clear all three stores for one conversation key (terminal intents).
    pub async fn clear_all(&self, stream_id: i64, subject: &str, sender_id: i64) {
        self.drafts.clear(stream_id, subject, sender_id).await;
        self.flows.clear(stream_id, subject, sender_id).await;
        self.history.clear(stream_id, subject, sender_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn draft_roundtrip_and_clear() {
        let store = DraftStore::new(1800);
        store
            .set(7, "create issue", 42, IssueDraft::new("t", "d", None))
            .await;
        let draft = store.get(7, "create issue", 42).await.expect("draft");
        assert_eq!(draft.title, "t");
        store.clear(7, "create issue", 42).await;
        assert!(store.get(7, "create issue", 42).await.is_none());
    }

    #[tokio::test]
    async fn draft_expires_after_ttl_from_creation() {
        let store = DraftStore::new(60);
        let mut draft = IssueDraft::new("old", "", None);
        draft.created_at = Utc::now() - Duration::seconds(61);
        store.set(7, "create issue", 42, draft).await;
        assert!(store.get(7, "create issue", 42).await.is_none());
    }

    #[tokio::test]
    async fn draft_within_ttl_survives_gc() {
        let store = DraftStore::new(60);
        let mut draft = IssueDraft::new("recent", "", None);
        draft.created_at = Utc::now() - Duration::seconds(30);
        store.set(7, "create issue", 42, draft).await;
        assert!(store.get(7, "create issue", 42).await.is_some());
    }

    #[tokio::test]
    async fn subject_is_case_insensitive() {
        let store = FlowStore::new(None);
        store.set(7, "Create Issue", 42, json!({"step": 1})).await;
        assert_eq!(
            store.get(7, "create issue", 42).await,
            Some(json!({"step": 1}))
        );
    }

    #[tokio::test]
    async fn flow_state_persists_without_ttl() {
        let store = FlowStore::new(None);
        store.set(1, "t", 1, json!({"a": 1})).await;
        assert!(store.get(1, "t", 1).await.is_some());
        store.clear(1, "t", 1).await;
        assert!(store.get(1, "t", 1).await.is_none());
    }

    #[tokio::test]
    async fn flow_state_evicted_with_configured_ttl() {
        let store = FlowStore::new(Some(0));
        store.set(1, "t", 1, json!({"a": 1})).await;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.get(1, "t", 1).await.is_none());
    }

    #[tokio::test]
    async fn history_window_drops_oldest_first() {
        let store = HistoryStore::new(3);
        for i in 0..5 {
            store.append(7, "t", 42, "user", &format!("m{}", i)).await;
        }
        let entries = store.get(7, "t", 42).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].content, "m2");
        assert_eq!(entries[2].content, "m4");
    }

    #[tokio::test]
    async fn history_get_returns_a_copy() {
        let store = HistoryStore::new(4);
        store.append(7, "t", 42, "user", "one").await;
        let snapshot = store.get(7, "t", 42).await;
        store.append(7, "t", 42, "assistant", "two").await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.get(7, "t", 42).await.len(), 2);
    }

    #[tokio::test]
    async fn distinct_senders_do_not_share_state() {
        let stores = ConversationStores::new(&ConversationConfig::default());
        stores.flows.set(7, "t", 1, json!({"who": 1})).await;
        stores.flows.set(7, "t", 2, json!({"who": 2})).await;
        stores.clear_all(7, "t", 1).await;
        assert!(stores.flows.get(7, "t", 1).await.is_none());
        assert_eq!(stores.flows.get(7, "t", 2).await, Some(json!({"who": 2})));
    }
}
