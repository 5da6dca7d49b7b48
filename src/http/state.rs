use crate::session::{AssistantSession, ReconnectPolicy};
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one assistant session this process drives
    pub session: Arc<AssistantSession>,

    /// Delay used by the restart endpoint
    pub reconnect: ReconnectPolicy,
}

impl AppState {
    pub fn new(session: Arc<AssistantSession>, reconnect: ReconnectPolicy) -> Self {
        Self { session, reconnect }
    }
}
