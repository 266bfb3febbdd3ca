//! # Frame Translation
//!
//! Pure conversions between the telephony wire format and the AI backend's
//! event protocol. Both legs carry G.711 mu-law audio as base64 text, so
//! translation rewraps payloads without touching the bytes.
//!
//! Everything here is side-effect free so the relay rules can be tested
//! without sockets.

use crate::config::OpenAiConfig;
use crate::openai::messages::{ClientEvent, ResponseConfig, SessionConfig, TurnDetection};
use crate::telephony::{OutboundMedia, TwilioOutbound};

/// Wrap a base64 mu-law payload from the caller for the AI input buffer.
///
/// The payload is forwarded opaque: no decode, no re-encode, no inspection.
pub fn audio_append(payload: &str) -> ClientEvent {
    ClientEvent::InputAudioBufferAppend {
        audio: payload.to_string(),
    }
}

/// Wrap an AI audio delta as an outbound telephony media frame.
pub fn media_out(stream_sid: &str, payload: &str) -> TwilioOutbound {
    TwilioOutbound {
        event: "media".to_string(),
        stream_sid: stream_sid.to_string(),
        media: OutboundMedia {
            payload: payload.to_string(),
        },
    }
}

/// Build the session.update sent immediately after the AI leg opens.
///
/// Modalities must list both "text" and "audio": the backend rejects audio
/// output when "text" is omitted, even for a voice-only session.
pub fn session_update(agent: &OpenAiConfig) -> ClientEvent {
    ClientEvent::SessionUpdate {
        session: SessionConfig {
            turn_detection: TurnDetection::ServerVad,
            input_audio_format: "g711_ulaw".to_string(),
            output_audio_format: "g711_ulaw".to_string(),
            voice: agent.voice.clone(),
            instructions: agent.instructions.clone(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            temperature: agent.temperature,
        },
    }
}

/// Build the one-shot response.create that makes the assistant speak first.
pub fn greeting_request(agent: &OpenAiConfig) -> ClientEvent {
    ClientEvent::ResponseCreate {
        response: ResponseConfig {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: Some(agent.greeting_instructions.clone()),
        },
    }
}
