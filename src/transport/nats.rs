use anyhow::{anyhow, Context, Result};
use async_nats::{Client, Event};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{
    ClientEnvelope, ContentMessage, OutboundMessage, ServerMessage, SetupAck, SetupMessage,
};
use super::{Connection, InboundEvent, LifecycleEvent, MessageSink, Transport};
use crate::audio::WIRE_SAMPLE_RATE;

/// Settings for the NATS transport
#[derive(Debug, Clone)]
pub struct NatsTransportConfig {
    pub url: String,
    /// Subjects are `<prefix>.client.<session>` and `<prefix>.server.<session>`
    pub subject_prefix: String,
    pub model: String,
    pub system_instruction: Option<String>,
    /// How long the service gets to accept the session
    pub setup_timeout: Duration,
}

/// Talks to the assistant service over NATS subjects
pub struct NatsTransport {
    config: NatsTransportConfig,
}

impl NatsTransport {
    pub fn new(config: NatsTransportConfig) -> Self {
        Self { config }
    }

    pub fn client_subject(&self, session_id: &str) -> String {
        format!("{}.client.{}", self.config.subject_prefix, session_id)
    }

    pub fn server_subject(&self, session_id: &str) -> String {
        format!("{}.server.{}", self.config.subject_prefix, session_id)
    }
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn connect(&self) -> Result<Connection> {
        let session_id = format!("helios-{}", uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::channel(256);

        info!("Connecting to NATS at {}", self.config.url);

        // The client resubscribes on its own after a reconnect, but the
        // service side of the session does not survive the gap
        let events_tx = tx.clone();
        let client = async_nats::ConnectOptions::new()
            .event_callback(move |event| {
                let events_tx = events_tx.clone();
                async move {
                    if let Event::Disconnected = event {
                        warn!("Lost connection to NATS");
                        let _ = events_tx.try_send(InboundEvent::Lifecycle(LifecycleEvent::Closed {
                            reason: Some("connection to NATS lost".to_string()),
                        }));
                    }
                }
            })
            .connect(self.config.url.as_str())
            .await
            .context("Failed to connect to NATS")?;

        // Subscribe before announcing so no reply can slip past
        let server_subject = self.server_subject(&session_id);
        let mut subscriber = client
            .subscribe(server_subject.clone())
            .await
            .context("Failed to subscribe to assistant replies")?;

        info!("Subscribed to {}", server_subject);

        let client_subject = self.client_subject(&session_id);
        let setup = ClientEnvelope::Setup(SetupMessage {
            session_id: session_id.clone(),
            model: self.config.model.clone(),
            system_instruction: self.config.system_instruction.clone(),
            sample_rate: WIRE_SAMPLE_RATE,
        });

        // Publishing succeeds with nobody listening; only a reply proves
        // the service is there
        let payload = serde_json::to_vec(&setup)?;
        let reply = tokio::time::timeout(
            self.config.setup_timeout,
            client.request(client_subject.clone(), payload.into()),
        )
        .await
        .map_err(|_| anyhow!("Assistant service did not answer within {:?}", self.config.setup_timeout))?
        .context("Assistant service is not reachable")?;

        SetupAck::check(&reply.payload)?;

        let reader = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                for event in ServerMessage::parse_events(&msg.payload) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }

            debug!("Reply subscription ended");
            let _ = tx
                .send(InboundEvent::Lifecycle(LifecycleEvent::Closed {
                    reason: Some("subscription ended".to_string()),
                }))
                .await;
        });

        info!("Assistant session {} accepted on {}", session_id, client_subject);

        Ok(Connection {
            sink: Box::new(NatsSink {
                client,
                subject: client_subject,
                session_id,
                reader: Some(reader),
            }),
            inbound: rx,
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}

async fn publish(client: &Client, subject: &str, envelope: &ClientEnvelope) -> Result<()> {
    let payload = serde_json::to_vec(envelope)?;

    client
        .publish(subject.to_string(), payload.into())
        .await
        .context("Failed to publish message")?;

    client.flush().await.context("Failed to flush NATS connection")?;

    Ok(())
}

struct NatsSink {
    client: Client,
    subject: String,
    session_id: String,
    reader: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl MessageSink for NatsSink {
    async fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        let envelope = ClientEnvelope::Content(ContentMessage {
            session_id: self.session_id.clone(),
            parts: message.parts.clone(),
            turn_complete: message.turn_complete,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        publish(&self.client, &self.subject, &envelope).await?;

        debug!(
            "Published {} parts to {} (turn_complete={})",
            message.parts.len(),
            self.subject,
            message.turn_complete
        );

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };

        info!("Closing assistant session {}", self.session_id);
        reader.abort();

        if let Err(e) = self.client.flush().await {
            warn!("Failed to flush NATS connection on close: {}", e);
        }

        Ok(())
    }
}

impl Drop for NatsSink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
