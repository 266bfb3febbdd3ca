//! # Telephony Media Stream Protocol
//!
//! Serde model of the control frames Twilio Media Streams sends over the
//! `/media-stream` WebSocket, and of the single outbound frame we send back.
//! All frames are JSON text messages; the audio payload inside `media` is an
//! already-encoded 8kHz G.711 mu-law chunk carried as base64 text, which the
//! bridge relays opaquely and never decodes.
//!
//! ## Inbound event kinds:
//! - `start`: carries the stream id that correlates outbound audio
//! - `media`: one audio frame plus its stream timestamp
//! - `mark`: playback synchronization no-op
//! - `stop`: terminal
//! - anything else (`connected`, future additions) is tolerated and ignored

use crate::logstore::{LogCategory, LogStore};
use serde::{Deserialize, Serialize};

/// Inbound control frame from the telephony gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TwilioEvent {
    /// Media stream opened; carries the correlation id for this call
    Start { start: StartMeta },
    /// One inbound audio frame
    Media { media: MediaMeta },
    /// Synchronization marker, a deliberate no-op for the bridge
    Mark,
    /// Terminal event; the gateway will close the channel after this
    Stop,
    /// Any event kind the bridge does not act on (e.g. `connected`)
    #[serde(other)]
    Other,
}

/// Payload of a `start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StartMeta {
    /// The gateway's correlation identifier for this call's media stream
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    /// Parent call identifier, logged for diagnostics only
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
}

/// Payload of a `media` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaMeta {
    /// Milliseconds since stream start; Twilio sends this as a string
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Base64-encoded mu-law audio, relayed without transformation
    pub payload: String,
}

impl MediaMeta {
    /// Parse the frame timestamp, falling back to `previous` when the field
    /// is absent or unparseable so the session timestamp stays monotonic.
    pub fn timestamp_ms(&self, previous: u64) -> u64 {
        self.timestamp
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(previous)
    }
}

/// Outbound `media` frame addressed to one call's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwilioOutbound {
    /// Always `"media"`
    pub event: String,
    /// Stream id captured from the `start` event
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    /// Audio payload envelope
    pub media: OutboundMedia,
}

/// Payload half of an outbound media frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMedia {
    /// Base64-encoded mu-law audio, exactly as received from the AI leg
    pub payload: String,
}

/// Parse one inbound frame, logging a single error-category entry on
/// failure. A malformed frame is dropped and never terminates the session.
pub fn parse_event(raw: &str, logs: &LogStore) -> Option<TwilioEvent> {
    match serde_json::from_str(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Malformed telephony frame: {}", e);
            logs.append(
                LogCategory::Error,
                "Malformed telephony frame",
                Some(serde_json::json!({ "error": e.to_string() })),
            );
            None
        }
    }
}
