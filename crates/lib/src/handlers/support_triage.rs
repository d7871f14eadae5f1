//! Support triage acknowledgements.

use crate::router::{Context, Handler};
use anyhow::Result;
use async_trait::async_trait;

/// Acknowledges triage requests, flagging urgent ones.
pub struct SupportTriage;

#[async_trait]
impl Handler for SupportTriage {
    async fn handle(&self, ctx: &Context) -> Result<()> {
        let content = ctx.message.content.trim();
        if content.to_lowercase().contains("urgent") {
            ctx.send_reply("Acknowledged: marking as urgent triage.").await
        } else {
            ctx.send_reply("Triage noted. Our team will follow up.").await
        }
    }
}
