//! Message routing: ordered predicate rules mapped to handlers, first full
//! match wins.
//!
//! Routes are registered once during startup in an explicit order; dispatch
//! walks the registry in registration order and invokes at most one handler
//! per message. Register most-specific routes first when filters can overlap.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::app::BotState;
use crate::channels::{DisplayRecipient, Message, MessageKind};

/// Pure predicate over an incoming message. Predicates within a route are ANDed.
pub type Predicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// Per-message handler context: the message plus shared bot state.
pub struct Context {
    pub message: Message,
    pub state: BotState,
}

impl Context {
    /// Reply into the message's stream and topic via the outbound channel.
    /// Fails for messages without a stream id.
    pub async fn send_reply(&self, content: &str) -> Result<()> {
        let stream_id = self
            .message
            .stream_id
            .ok_or_else(|| anyhow::anyhow!("cannot reply: message has no stream id"))?;
        self.state
            .zulip
            .send_to_stream(stream_id, &self.message.subject, content)
            .await?;
        Ok(())
    }
}

/// A routed message handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context) -> Result<()>;
}

struct RouteEntry {
    predicates: Vec<Predicate>,
    handler: Arc<dyn Handler>,
}

/// Ordered route registry. Registration order is the match-priority order and
/// is never reordered at runtime.
#[derive(Default)]
pub struct Router {
    routes: Vec<RouteEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Append a route; earlier registrations take priority.
    pub fn add_route(&mut self, predicates: Vec<Predicate>, handler: Arc<dyn Handler>) {
        self.routes.push(RouteEntry {
            predicates,
            handler,
        });
    }

    /// Dispatch one message: invoke the handler of the first route whose
    /// predicates all pass and report whether any route matched. Handler
    /// errors propagate to the caller uncaught.
    pub async fn dispatch(&self, message: Message, state: BotState) -> Result<bool> {
        for entry in &self.routes {
            if entry.predicates.iter().all(|p| p(&message)) {
                let ctx = Context { message, state };
                entry.handler.handle(&ctx).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// Common predicates

/// True for stream messages that carry a stream id.
pub fn is_stream_message() -> Predicate {
    Box::new(|m| m.kind == MessageKind::Stream && m.stream_id.is_some())
}

/// True for private (direct) messages.
pub fn is_private_message() -> Predicate {
    Box::new(|m| m.kind == MessageKind::Private)
}

/// Topic (subject) case-insensitively in the given set.
pub fn topic_in(topics: Vec<String>) -> Predicate {
    let lowered: Vec<String> = topics.into_iter().map(|t| t.to_lowercase()).collect();
    Box::new(move |m| lowered.iter().any(|t| *t == m.subject.to_lowercase()))
}

/// Stream display name case-insensitively in the given set (stream messages
/// carry the stream name as display_recipient).
pub fn stream_name_in(names: Vec<String>) -> Predicate {
    let lowered: Vec<String> = names.into_iter().map(|n| n.to_lowercase()).collect();
    Box::new(move |m| {
        matches!(
            &m.display_recipient,
            DisplayRecipient::Stream(name) if lowered.iter().any(|n| *n == name.to_lowercase())
        )
    })
}

/// Stream id in the given set; `None` means no restriction.
pub fn stream_id_in(ids: Option<Vec<i64>>) -> Predicate {
    Box::new(move |m| match &ids {
        None => true,
        Some(ids) => m.stream_id.map(|id| ids.contains(&id)).unwrap_or(false),
    })
}

/// Declarative route registration: collect simple filters, then mount the
/// resulting predicate list onto a router. Mount order is priority order.
#[derive(Default)]
pub struct RouteSpec {
    streams: Vec<String>,
    topics: Vec<String>,
    stream_ids: Option<Vec<i64>>,
    private: bool,
    when: Option<Predicate>,
}

impl RouteSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a stream display name (repeatable, case-insensitive).
    pub fn stream(mut self, name: &str) -> Self {
        self.streams.push(name.to_string());
        self
    }

    /// Restrict to a topic (repeatable, case-insensitive).
    pub fn topic(mut self, topic: &str) -> Self {
        self.topics.push(topic.to_string());
        self
    }

    /// Restrict to a numeric stream id (repeatable).
    pub fn stream_id(mut self, id: i64) -> Self {
        self.stream_ids.get_or_insert_with(Vec::new).push(id);
        self
    }

    /// Match private (direct) messages.
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    /// AND an arbitrary extra predicate in verbatim.
    pub fn when(mut self, pred: Predicate) -> Self {
        self.when = Some(pred);
        self
    }

    /// Append the route to the registry.
    pub fn mount(self, router: &mut Router, handler: Arc<dyn Handler>) {
        let mut predicates: Vec<Predicate> = Vec::new();
        if !self.streams.is_empty() || self.stream_ids.is_some() {
            predicates.push(is_stream_message());
        }
        if self.private {
            predicates.push(is_private_message());
        }
        if !self.streams.is_empty() {
            predicates.push(stream_name_in(self.streams));
        }
        if !self.topics.is_empty() {
            predicates.push(topic_in(self.topics));
        }
        if let Some(ids) = self.stream_ids {
            predicates.push(stream_id_in(Some(ids)));
        }
        if let Some(pred) = self.when {
            predicates.push(pred);
        }
        router.add_route(predicates, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{OutboundChannel, ZulipError};
    use crate::config::Config;
    use crate::conversation::ConversationStores;
    use crate::llm::{ChatMessage, FlowBackend, IssueFlowTurn, LlmError};
    use crate::projects::ProjectSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopChannel;

    #[async_trait]
    impl OutboundChannel for NoopChannel {
        async fn send_to_stream(
            &self,
            _stream_id: i64,
            _topic: &str,
            _content: &str,
        ) -> Result<(), ZulipError> {
            Ok(())
        }
    }

    struct NoopBackend;

    #[async_trait]
    impl FlowBackend for NoopBackend {
        async fn issue_flow_turn(
            &self,
            _content: &str,
            _prior_state: Option<&serde_json::Value>,
            _projects: &[ProjectSpec],
            _history: &[ChatMessage],
        ) -> Result<IssueFlowTurn, LlmError> {
            Err(LlmError::Api("noop".to_string()))
        }
    }

    fn test_state() -> BotState {
        let config = Config::default();
        let stores = ConversationStores::new(&config.conversation);
        BotState {
            config: Arc::new(config),
            zulip: Arc::new(NoopChannel),
            llm: Arc::new(NoopBackend),
            tracker: None,
            stores: Arc::new(stores),
        }
    }

    fn stream_message(stream: &str, topic: &str, content: &str) -> Message {
        Message {
            id: 1,
            kind: MessageKind::Stream,
            stream_id: Some(7),
            subject: topic.to_string(),
            sender_id: 42,
            sender_email: "user@example.com".to_string(),
            sender_full_name: "A User".to_string(),
            display_recipient: DisplayRecipient::Stream(stream.to_string()),
            content: content.to_string(),
            timestamp: 0,
        }
    }

    struct Recorder {
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(&self, _ctx: &Context) -> Result<()> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _ctx: &Context) -> Result<()> {
            anyhow::bail!("handler blew up")
        }
    }

    fn recorder(router: &mut Router, spec: RouteSpec) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        spec.mount(router, Arc::new(Recorder { hits: hits.clone() }));
        hits
    }

    #[tokio::test]
    async fn first_full_match_wins() {
        let mut router = Router::new();
        let first = recorder(&mut router, RouteSpec::new().stream("general"));
        let second = recorder(&mut router, RouteSpec::new().stream("general"));
        let handled = router
            .dispatch(stream_message("general", "anything", "hi"), test_state())
            .await
            .expect("dispatch");
        assert!(handled);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn later_route_matches_when_earlier_fails() {
        let mut router = Router::new();
        let first = recorder(&mut router, RouteSpec::new().stream("support").topic("triage"));
        let second = recorder(&mut router, RouteSpec::new().stream("general"));
        let handled = router
            .dispatch(stream_message("general", "misc", "hi"), test_state())
            .await
            .expect("dispatch");
        assert!(handled);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_message_is_not_handled() {
        let mut router = Router::new();
        let hits = recorder(&mut router, RouteSpec::new().stream("youtrack").topic("create issue"));
        let handled = router
            .dispatch(stream_message("general", "create issue", "hi"), test_state())
            .await
            .expect("dispatch");
        assert!(!handled);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_and_topic_filters_are_case_insensitive() {
        let mut router = Router::new();
        let hits = recorder(&mut router, RouteSpec::new().stream("youtrack").topic("create issue"));
        let handled = router
            .dispatch(
                stream_message("YouTrack", "Create Issue", "hi"),
                test_state(),
            )
            .await
            .expect("dispatch");
        assert!(handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_filter_rejects_private_messages() {
        let mut router = Router::new();
        let hits = recorder(&mut router, RouteSpec::new().stream("general"));
        let mut msg = stream_message("general", "t", "hi");
        msg.kind = MessageKind::Private;
        msg.stream_id = None;
        msg.display_recipient = DisplayRecipient::Users(Vec::new());
        let handled = router.dispatch(msg, test_state()).await.expect("dispatch");
        assert!(!handled);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn absent_stream_id_filter_means_no_restriction() {
        let pred = stream_id_in(None);
        assert!(pred(&stream_message("any", "t", "hi")));
        let pred = stream_id_in(Some(vec![8]));
        assert!(!pred(&stream_message("any", "t", "hi")));
        let pred = stream_id_in(Some(vec![7, 8]));
        assert!(pred(&stream_message("any", "t", "hi")));
    }

    #[tokio::test]
    async fn extra_when_predicate_is_anded_in() {
        let mut router = Router::new();
        let hits = recorder(
            &mut router,
            RouteSpec::new()
                .stream("general")
                .when(Box::new(|m| m.content.starts_with('!'))),
        );
        assert!(!router
            .dispatch(stream_message("general", "t", "plain"), test_state())
            .await
            .expect("dispatch"));
        assert!(router
            .dispatch(stream_message("general", "t", "!cmd"), test_state())
            .await
            .expect("dispatch"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let mut router = Router::new();
        RouteSpec::new()
            .stream("general")
            .mount(&mut router, Arc::new(Failing));
        let result = router
            .dispatch(stream_message("general", "t", "hi"), test_state())
            .await;
        assert!(result.is_err());
    }
}
