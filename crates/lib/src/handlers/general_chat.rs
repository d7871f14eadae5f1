//! Echo handler for the general-chat topic.

use crate::router::{Context, Handler};
use anyhow::Result;
use async_trait::async_trait;

/// Echoes non-empty messages back into the topic.
pub struct GeneralChat;

#[async_trait]
impl Handler for GeneralChat {
    async fn handle(&self, ctx: &Context) -> Result<()> {
        let content = ctx.message.content.trim();
        if content.is_empty() {
            return Ok(());
        }
        ctx.send_reply(content).await
    }
}
