//! Chat transport (Zulip).
//!
//! The Zulip client long-polls for incoming messages and forwards them to the
//! dispatch loop; replies go back through the `OutboundChannel` seam so
//! handlers can be exercised against a fake in tests.

mod zulip;

pub use zulip::{
    DisplayRecipient, Message, MessageKind, UserRecipient, ZulipClient, ZulipError,
};

use async_trait::async_trait;

/// Outbound side of the chat transport: deliver a reply to a stream + topic.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send_to_stream(
        &self,
        stream_id: i64,
        topic: &str,
        content: &str,
    ) -> Result<(), ZulipError>;
}
