//! Routed handlers and their registration order.

mod general_chat;
mod issue_create;
mod support_triage;

pub use general_chat::GeneralChat;
pub use issue_create::IssueCreate;
pub use support_triage::SupportTriage;

use crate::router::{RouteSpec, Router};
use std::sync::Arc;

/// Register all routes. Order is match priority: first full match wins.
pub fn register_routes(router: &mut Router) {
    RouteSpec::new()
        .stream("general")
        .topic("general chat")
        .mount(router, Arc::new(GeneralChat));
    RouteSpec::new()
        .stream("support")
        .topic("triage")
        .mount(router, Arc::new(SupportTriage));
    RouteSpec::new()
        .stream("youtrack")
        .topic("create issue")
        .mount(router, Arc::new(IssueCreate));
}
