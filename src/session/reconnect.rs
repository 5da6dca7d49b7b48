use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::UiEvent;
use super::log::LogSource;
use super::session::AssistantSession;
use super::state::ConnectionState;

/// Reconnects after the service drops the session
///
/// Lives outside the session core: it only watches state changes and
/// calls [`AssistantSession::connect`] like any other caller would.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Watch the session and reconnect after unexpected closes or errors
    ///
    /// A caller-driven state change during the delay (a disconnect, a
    /// manual connect) cancels the pending retry. The task ends once the
    /// session is dropped.
    pub fn spawn(self, session: &Arc<AssistantSession>) -> JoinHandle<()> {
        let mut events = session.subscribe();
        let session: Weak<AssistantSession> = Arc::downgrade(session);

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Reconnect watcher lagged by {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => return,
                };

                let UiEvent::ConnectionStateChanged {
                    state: state @ (ConnectionState::Closed | ConnectionState::Error),
                    unexpected: true,
                } = event
                else {
                    continue;
                };

                info!(
                    "Session {} unexpectedly, reconnecting in {}ms",
                    state,
                    self.delay.as_millis()
                );

                match wait_out_delay(&mut events, self.delay).await {
                    Retry::Go => {}
                    Retry::Cancelled => {
                        info!("Reconnect cancelled by caller");
                        continue;
                    }
                    Retry::SessionGone => return,
                }

                let Some(session) = session.upgrade() else {
                    return;
                };

                if session.state().await.can_connect() {
                    session
                        .append_log(LogSource::System, "Reconnecting...")
                        .await;
                    session.connect().await;
                } else {
                    debug!("Skipping reconnect, session already active");
                }
            }
        })
    }

    /// Tear the session down and bring it back after the delay
    pub async fn restart(&self, session: &AssistantSession) {
        info!("Restarting assistant session");
        session.disconnect().await;
        tokio::time::sleep(self.delay).await;
        session.connect().await;
    }
}

enum Retry {
    Go,
    Cancelled,
    SessionGone,
}

/// Sleep through the reconnect delay unless the caller steps in
async fn wait_out_delay(events: &mut broadcast::Receiver<UiEvent>, delay: Duration) -> Retry {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return Retry::Go,
            event = events.recv() => match event {
                Ok(UiEvent::ConnectionStateChanged { unexpected: false, .. }) => {
                    return Retry::Cancelled;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Retry::SessionGone,
            },
        }
    }
}
