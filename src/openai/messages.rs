//! # AI Backend WebSocket Message Types
//!
//! Client and server event types for the OpenAI Realtime API, limited to the
//! subset the bridge acts on. All events are JSON-encoded and tagged with a
//! `type` field.
//!
//! ## Client events (sent to the backend):
//! - `session.update` - configure the session after the channel opens
//! - `input_audio_buffer.append` - one caller audio frame
//! - `response.create` - trigger a response (used for the opening greeting)
//!
//! ## Server events (received from the backend):
//! - `error`, `session.created`, `session.updated`, `response.created`
//! - `response.audio.delta` - one chunk of streamed assistant audio; the
//!   historical name `response.output_audio.delta` is accepted as an alias
//! - `response.audio_transcript.done` - completed assistant transcript
//! - `response.done` - response finished
//! - everything else parses to `Other` and is ignored

use serde::{Deserialize, Serialize};

/// Session configuration sent in `session.update`.
///
/// `modalities` must include both `"text"` and `"audio"`: the backend
/// silently suppresses audio output when text is omitted, so this is a hard
/// contract of the handshake, not a preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub turn_detection: TurnDetection,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub voice: String,
    pub instructions: String,
    pub modalities: Vec<String>,
    pub temperature: f32,
}

/// Turn detection configuration. Only server-side VAD is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad,
}

/// Per-response overrides sent with `response.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Events the bridge sends to the AI backend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// One caller audio frame; `audio` is the base64 payload relayed
    /// verbatim from the telephony leg
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseConfig },
}

/// Error payload attached to an `error` event. Every field is optional on
/// the wire, so all default to empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Events the bridge receives from the AI backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Backend-reported error; non-fatal by default, the backend may recover
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ApiError,
    },

    /// Session acknowledgment; parameters are logged for diagnostics
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: serde_json::Value,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: serde_json::Value,
    },

    #[serde(rename = "response.created")]
    ResponseCreated,

    /// One chunk of streamed assistant audio. Older backend versions emitted
    /// this under a different name, treated as the same semantic event.
    #[serde(
        rename = "response.audio.delta",
        alias = "response.output_audio.delta"
    )]
    AudioDelta { delta: String },

    /// Completed assistant transcript, logged for observability only
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone { transcript: String },

    /// Response finished; resets the bridge's audio chunk counter
    #[serde(rename = "response.done")]
    ResponseDone,

    /// Any event kind the bridge does not act on
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_serialization() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig {
                turn_detection: TurnDetection::ServerVad,
                input_audio_format: "g711_ulaw".to_string(),
                output_audio_format: "g711_ulaw".to_string(),
                voice: "shimmer".to_string(),
                instructions: "Be helpful".to_string(),
                modalities: vec!["text".to_string(), "audio".to_string()],
                temperature: 0.8,
            },
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["input_audio_format"], "g711_ulaw");
        // Both modalities must be present or the backend goes silent
        assert_eq!(
            json["session"]["modalities"],
            serde_json::json!(["text", "audio"])
        );
    }

    #[test]
    fn test_audio_append_serialization() {
        let event = ClientEvent::InputAudioBufferAppend {
            audio: "QUJD".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "QUJD");
    }

    #[test]
    fn test_audio_delta_parse() {
        let raw = r#"{"type":"response.audio.delta","response_id":"resp_1",
            "item_id":"item_1","output_index":0,"content_index":0,"delta":"QUJD"}"#;
        match serde_json::from_str::<ServerEvent>(raw).unwrap() {
            ServerEvent::AudioDelta { delta } => assert_eq!(delta, "QUJD"),
            other => panic!("Expected audio delta, got {:?}", other),
        }
    }

    #[test]
    fn test_audio_delta_alias_parse() {
        let raw = r#"{"type":"response.output_audio.delta","delta":"QUJD"}"#;
        assert!(matches!(
            serde_json::from_str::<ServerEvent>(raw).unwrap(),
            ServerEvent::AudioDelta { .. }
        ));
    }

    #[test]
    fn test_error_event_parse() {
        let raw = r#"{"type":"error","error":{"type":"invalid_request_error",
            "code":"invalid_value","message":"bad voice"}}"#;
        match serde_json::from_str::<ServerEvent>(raw).unwrap() {
            ServerEvent::Error { error } => {
                assert_eq!(error.error_type, "invalid_request_error");
                assert_eq!(error.message, "bad voice");
            }
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_parses_to_other() {
        let raw = r#"{"type":"rate_limits.updated","rate_limits":[]}"#;
        assert!(matches!(
            serde_json::from_str::<ServerEvent>(raw).unwrap(),
            ServerEvent::Other
        ));
    }

    #[test]
    fn test_response_done_tolerates_body() {
        let raw = r#"{"type":"response.done","response":{"id":"resp_1","status":"completed"}}"#;
        assert!(matches!(
            serde_json::from_str::<ServerEvent>(raw).unwrap(),
            ServerEvent::ResponseDone
        ));
    }
}
