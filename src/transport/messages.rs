use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::{InboundEvent, LifecycleEvent};
use crate::audio::EncodedChunk;

/// Binary payload carried inline in a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineBinary {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// One part of an outbound message: `{"text": ..}` or `{"inlineBinary": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineBinary(InlineBinary),
}

/// Transport-agnostic outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub parts: Vec<Part>,
    pub turn_complete: bool,
}

impl OutboundMessage {
    /// A complete user turn made of the given parts
    pub fn user_turn(parts: Vec<Part>) -> Self {
        Self {
            parts,
            turn_complete: true,
        }
    }

    /// A realtime microphone chunk (never completes a turn)
    pub fn audio(chunk: EncodedChunk) -> Self {
        let mime_type = chunk.mime_type();
        Self {
            parts: vec![Part::InlineBinary(InlineBinary {
                mime_type,
                data: chunk.into_wire_text(),
            })],
            turn_complete: false,
        }
    }

    /// Concatenated text parts, used for logging
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::InlineBinary(_) => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Session announcement sent as a request once the inbound subject is live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub session_id: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub sample_rate: u32,
}

/// Content published for every outbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMessage {
    pub session_id: String,
    pub parts: Vec<Part>,
    pub turn_complete: bool,
    pub timestamp: String, // RFC3339 timestamp
}

/// Reply to the setup request
///
/// An empty reply counts as acceptance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupAck {
    #[serde(default = "accepted_by_default")]
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn accepted_by_default() -> bool {
    true
}

impl SetupAck {
    /// Ok if the service took the session
    pub fn check(payload: &[u8]) -> Result<()> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let ack: SetupAck =
            serde_json::from_slice(payload).context("Invalid setup reply from assistant service")?;

        match ack.error {
            Some(error) => bail!("Assistant service refused the session: {}", error),
            None if !ack.accepted => bail!("Assistant service refused the session"),
            None => Ok(()),
        }
    }
}

/// Envelope for everything the client publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientEnvelope {
    Setup(SetupMessage),
    Content(ContentMessage),
}

/// Message received from the assistant service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_fragment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_fragment: Option<String>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The service is ending the session; carries the reason, possibly empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<String>,
}

impl ServerMessage {
    /// Split into tagged events, audio before text before turn completion
    ///
    /// Errors and go-away notices end the session, so nothing else in
    /// the same message is delivered.
    pub fn into_events(self) -> Vec<InboundEvent> {
        let mut events = Vec::new();

        if let Some(error) = self.error {
            events.push(InboundEvent::Lifecycle(LifecycleEvent::Error(error)));
            return events;
        }
        if let Some(reason) = self.go_away {
            let reason = Some(reason).filter(|r| !r.trim().is_empty());
            events.push(InboundEvent::Lifecycle(LifecycleEvent::Closed { reason }));
            return events;
        }
        if let Some(audio) = self.audio_fragment {
            events.push(InboundEvent::AudioFragment(audio));
        }
        if let Some(text) = self.text_fragment {
            events.push(InboundEvent::TextFragment(text));
        }
        if self.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }

        events
    }

    /// Validate a raw payload at the transport boundary
    pub fn parse_events(payload: &[u8]) -> Vec<InboundEvent> {
        match serde_json::from_slice::<ServerMessage>(payload) {
            Ok(message) => message.into_events(),
            Err(e) => vec![InboundEvent::Malformed(e.to_string())],
        }
    }
}
