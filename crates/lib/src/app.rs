//! Bot state and the single-consumer dispatch loop.
//!
//! One logical loop pulls the next Zulip message and fully processes it
//! (route, handle, reply) before pulling the next; the only suspension points
//! are I/O waits on the collaborators.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::channels::{Message, OutboundChannel, ZulipClient};
use crate::config::{self, Config};
use crate::conversation::ConversationStores;
use crate::handlers;
use crate::llm::{FlowBackend, OpenAiClient};
use crate::router::Router;
use crate::youtrack::{IssueTracker, YouTrackClient};

/// Shared state handed to every handler: config, collaborator clients, stores.
#[derive(Clone)]
pub struct BotState {
    pub config: Arc<Config>,
    pub zulip: Arc<dyn OutboundChannel>,
    pub llm: Arc<dyn FlowBackend>,
    /// None when YouTrack is not configured; the issue flow replies with
    /// setup guidance instead of creating issues.
    pub tracker: Option<Arc<dyn IssueTracker>>,
    pub stores: Arc<ConversationStores>,
}

/// Run the bot: connect to Zulip, register routes, and dispatch messages until
/// ctrl-c. Stores start empty; nothing is persisted across restarts.
pub async fn run_app(config: Config) -> Result<()> {
    let site = config.zulip.site.trim().to_string();
    if site.is_empty() || config.zulip.email.trim().is_empty() {
        anyhow::bail!("zulip.site and zulip.email must be configured");
    }
    let api_key = config::resolve_zulip_api_key(&config)
        .ok_or_else(|| anyhow::anyhow!("zulip api key missing (set zulip.apiKey or ZULIP_API_KEY)"))?;

    let zulip = Arc::new(ZulipClient::new(&site, &config.zulip.email, &api_key));
    let llm = Arc::new(OpenAiClient::new(
        &config.llm,
        config::resolve_llm_api_key(&config),
    ));
    let tracker: Option<Arc<dyn IssueTracker>> = match (
        config::resolve_youtrack_url(&config),
        config::resolve_youtrack_token(&config),
    ) {
        (Some(url), Some(token)) => Some(Arc::new(YouTrackClient::new(&url, &token))),
        _ => {
            log::warn!("youtrack not configured; issue creation will reply with setup guidance");
            None
        }
    };
    let stores = Arc::new(ConversationStores::new(&config.conversation));

    let mut router = Router::new();
    handlers::register_routes(&mut router);

    let outbound: Arc<dyn OutboundChannel> = zulip.clone();
    let state = BotState {
        config: Arc::new(config),
        zulip: outbound,
        llm,
        tracker,
        stores,
    };

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Message>(64);
    let inbound = zulip.clone().start_inbound(inbound_tx);
    log::info!("quill started; waiting for messages");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown requested");
                break;
            }
            msg = inbound_rx.recv() => {
                let Some(message) = msg else {
                    log::warn!("inbound channel closed");
                    break;
                };
                handle_message(&router, &state, message).await;
            }
        }
    }

    zulip.stop();
    let _ = inbound.await;
    Ok(())
}

/// Route one message. A handler failure is logged and must not halt the loop;
/// the next message is processed regardless.
async fn handle_message(router: &Router, state: &BotState, message: Message) {
    if message.sender_email == state.config.zulip.email {
        log::debug!("skipping own message id={}", message.id);
        return;
    }
    let id = message.id;
    match router.dispatch(message, state.clone()).await {
        Ok(true) => {}
        Ok(false) => log::debug!("message id={} not handled by any route", id),
        Err(e) => log::error!("handler failed for message id={}: {:#}", id, e),
    }
}
