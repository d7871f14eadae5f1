//! Zulip channel: register an event queue, long-poll /events, send stream replies.

use crate::channels::OutboundChannel;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LONG_POLL_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, thiserror::Error)]
pub enum ZulipError {
    #[error("zulip request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("zulip api error: {0}")]
    Api(String),
}

/// Message scope: a stream (channel) message or a direct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Stream,
    Private,
}

/// A user in a private message's recipient list.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecipient {
    pub id: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
}

/// Stream messages carry the stream display name; private messages carry the
/// recipient list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DisplayRecipient {
    Stream(String),
    Users(Vec<UserRecipient>),
}

/// One incoming Zulip message (the fields the router and handlers consume).
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub stream_id: Option<i64>,
    pub subject: String,
    pub sender_id: i64,
    pub sender_email: String,
    #[serde(default)]
    pub sender_full_name: String,
    pub display_recipient: DisplayRecipient,
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    queue_id: String,
    last_event_id: i64,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<Message>,
}

/// Current event queue position.
#[derive(Debug, Clone)]
struct QueueStatus {
    queue_id: String,
    last_event_id: i64,
}

/// Zulip connector: long-polls /events for messages and sends stream replies.
pub struct ZulipClient {
    api_base: String,
    email: String,
    api_key: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl ZulipClient {
    pub fn new(site: &str, email: &str, api_key: &str) -> Self {
        Self {
            api_base: format!("{}/api/v1", site.trim_end_matches('/')),
            email: email.to_string(),
            api_key: api_key.to_string(),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the long-poll loop at its next iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// POST /register — create an event queue for message events on all public streams.
    async fn register_queue(&self) -> Result<QueueStatus, ZulipError> {
        let url = format!("{}/register", self.api_base);
        let res = self
            .client
            .post(&url)
            .basic_auth(&self.email, Some(&self.api_key))
            .form(&[
                ("event_types", r#"["message"]"#),
                ("all_public_streams", "true"),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ZulipError::Api(format!(
                "queue registration failed: {} {}",
                status, body
            )));
        }
        let data: RegisterResponse = res.json().await?;
        log::info!(
            "registered queue_id={} last_event_id={}",
            data.queue_id,
            data.last_event_id
        );
        Ok(QueueStatus {
            queue_id: data.queue_id,
            last_event_id: data.last_event_id,
        })
    }

    /// GET /events — long-poll for the next batch. Returns the batch's messages
    /// and the advanced last event id.
    async fn poll_events(&self, queue: &QueueStatus) -> Result<(Vec<Message>, i64), ZulipError> {
        let url = format!("{}/events", self.api_base);
        let last_event_id = queue.last_event_id.to_string();
        let res = self
            .client
            .get(&url)
            .basic_auth(&self.email, Some(&self.api_key))
            .query(&[
                ("queue_id", queue.queue_id.as_str()),
                ("last_event_id", last_event_id.as_str()),
            ])
            .timeout(std::time::Duration::from_secs(LONG_POLL_TIMEOUT_SECS))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ZulipError::Api(format!(
                "events poll failed: {} {}",
                status, body
            )));
        }
        let data: EventsResponse = res.json().await?;
        let mut last_event_id = queue.last_event_id;
        let mut messages = Vec::new();
        for event in data.events {
            if event.kind == "message" {
                last_event_id = last_event_id.max(event.id);
                if let Some(msg) = event.message {
                    messages.push(msg);
                }
            }
        }
        Ok((messages, last_event_id))
    }

    /// Start the /events long-poll loop and forward messages to the dispatch
    /// loop. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<Message>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("zulip channel: starting /events long-poll loop");
        tokio::spawn(async move {
            run_events_loop(self, inbound_tx).await;
        })
    }

    /// POST /messages — send a message to a stream + topic.
    pub async fn send_message_to_stream(
        &self,
        stream_id: i64,
        topic: &str,
        content: &str,
    ) -> Result<(), ZulipError> {
        log::debug!(
            "sending message to stream={} topic={} content_len={}",
            stream_id,
            topic,
            content.len()
        );
        let url = format!("{}/messages", self.api_base);
        let to = stream_id.to_string();
        let res = self
            .client
            .post(&url)
            .basic_auth(&self.email, Some(&self.api_key))
            .form(&[
                ("type", "stream"),
                ("to", to.as_str()),
                ("topic", topic),
                ("content", content),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ZulipError::Api(format!(
                "[{}] failed to send message: {}",
                status, body
            )));
        }
        Ok(())
    }
}

async fn run_events_loop(channel: Arc<ZulipClient>, inbound_tx: mpsc::Sender<Message>) {
    let mut queue: Option<QueueStatus> = None;
    while channel.running() {
        let current = match queue.clone() {
            Some(q) => q,
            None => match channel.register_queue().await {
                Ok(q) => {
                    queue = Some(q.clone());
                    q
                }
                Err(e) => {
                    log::warn!("zulip queue registration failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    continue;
                }
            },
        };
        match channel.poll_events(&current).await {
            Ok((messages, last_event_id)) => {
                if let Some(ref mut q) = queue {
                    q.last_event_id = last_event_id;
                }
                for msg in messages {
                    log::debug!(
                        "yield message id={} stream_id={:?} subject={} sender={}",
                        msg.id,
                        msg.stream_id,
                        msg.subject,
                        msg.sender_email
                    );
                    if inbound_tx.send(msg).await.is_err() {
                        log::debug!("zulip: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                // The queue may have expired server-side; drop it so the next
                // iteration registers a fresh one.
                log::debug!("zulip events poll error: {}", e);
                queue = None;
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("zulip channel: events loop stopped");
}

#[async_trait]
impl OutboundChannel for ZulipClient {
    async fn send_to_stream(
        &self,
        stream_id: i64,
        topic: &str,
        content: &str,
    ) -> Result<(), ZulipError> {
        ZulipClient::send_message_to_stream(self, stream_id, topic, content).await
    }
}
