//! # Call Bridge
//!
//! The per-call state machine that relays audio between the telephony leg
//! and the AI backend leg. All relay decisions live here, behind two small
//! sink traits, so the rules are testable without sockets or actors:
//!
//! - Caller audio goes to the AI only while the call is Active and the AI
//!   leg is writable; otherwise the frame is dropped, never queued.
//! - AI audio goes to the caller only once the stream id is known and the
//!   telephony leg is writable; pre-start deltas are dropped and logged.
//! - Teardown is symmetric and idempotent: whichever leg closes first,
//!   the bridge closes the other exactly once.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, trace, warn};

use crate::config::OpenAiConfig;
use crate::logstore::{LogCategory, LogStore};
use crate::openai::messages::ServerEvent;
use crate::telephony::{TwilioEvent, TwilioOutbound};
use crate::translate;

/// Lifecycle of one bridged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Telephony connection accepted, AI leg not open yet
    Connecting,
    /// AI leg open and configured, waiting for the telephony start frame
    AwaitingStart,
    /// Both legs live, audio flowing
    Active,
    /// One leg has closed, the other is being shut down
    Closing,
    /// Both legs closed
    Closed,
}

/// What happened to a frame offered for relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded,
    /// Destination leg was not writable; frame discarded, never queued
    DroppedNotWritable,
    /// AI audio arrived before the telephony start frame named the stream
    DroppedNoStreamSid,
}

/// Outbound half of the telephony leg, as the bridge sees it.
pub trait TelephonySink {
    fn is_writable(&self) -> bool;
    fn send_media(&mut self, frame: &TwilioOutbound);
    fn close(&mut self);
}

/// Outbound half of the AI leg, as the bridge sees it.
pub trait AiSink {
    fn is_writable(&self) -> bool;
    fn send(&mut self, event: crate::openai::messages::ClientEvent);
    fn close(&mut self);
}

/// State machine for one call. Owned by the telephony connection handler;
/// every inbound event from either leg is fed through these methods.
pub struct CallSession {
    conn_id: String,
    stream_sid: Option<String>,
    state: SessionState,
    /// Most recent telephony media timestamp, monotonic, milliseconds
    latest_media_timestamp: u64,
    /// Audio deltas received since the last response.done
    audio_chunk_counter: u32,
    session_acked: bool,
    greeting_sent: bool,
    agent: OpenAiConfig,
    logs: Arc<LogStore>,
}

impl CallSession {
    pub fn new(conn_id: String, agent: OpenAiConfig, logs: Arc<LogStore>) -> Self {
        Self {
            conn_id,
            stream_sid: None,
            state: SessionState::Connecting,
            latest_media_timestamp: 0,
            audio_chunk_counter: 0,
            session_acked: false,
            greeting_sent: false,
            agent,
            logs,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn latest_media_timestamp(&self) -> u64 {
        self.latest_media_timestamp
    }

    /// Whether the backend has acknowledged the session configuration.
    pub fn session_acked(&self) -> bool {
        self.session_acked
    }

    /// The AI leg socket is open: configure the session before any audio.
    pub fn on_ai_opened(&mut self, ai: &mut impl AiSink) {
        info!(conn_id = %self.conn_id, "AI leg connected, sending session configuration");
        ai.send(translate::session_update(&self.agent));
        if self.state == SessionState::Connecting {
            self.state = SessionState::AwaitingStart;
        }
    }

    /// Handle one parsed frame from the telephony leg.
    pub fn on_telephony_event(&mut self, event: TwilioEvent, ai: &mut impl AiSink) -> RelayOutcome {
        match event {
            TwilioEvent::Start { start } => {
                self.on_start(start.stream_sid, start.call_sid);
                RelayOutcome::Forwarded
            }
            TwilioEvent::Media { media } => {
                self.latest_media_timestamp = media.timestamp_ms(self.latest_media_timestamp);
                self.relay_caller_audio(&media.payload, ai)
            }
            TwilioEvent::Mark => {
                trace!(conn_id = %self.conn_id, "telephony mark acknowledged");
                RelayOutcome::Forwarded
            }
            TwilioEvent::Stop => {
                info!(conn_id = %self.conn_id, "telephony stop frame received");
                self.on_ai_closed_or_stop(ai);
                RelayOutcome::Forwarded
            }
            TwilioEvent::Other => {
                trace!(conn_id = %self.conn_id, "ignoring non-media telephony frame");
                RelayOutcome::Forwarded
            }
        }
    }

    fn on_start(&mut self, stream_sid: String, call_sid: Option<String>) {
        // The stream id is set at most once; a duplicate start frame must
        // not reset an active call.
        if self.stream_sid.is_some() {
            warn!(conn_id = %self.conn_id, "duplicate start frame ignored");
            return;
        }

        info!(conn_id = %self.conn_id, stream_sid = %stream_sid, "media stream started");
        self.logs.append(
            LogCategory::Session,
            format!("Call started: {}", stream_sid),
            call_sid.map(|sid| json!({ "call_sid": sid })),
        );
        self.stream_sid = Some(stream_sid);
        self.latest_media_timestamp = 0;
        if matches!(
            self.state,
            SessionState::Connecting | SessionState::AwaitingStart
        ) {
            self.state = SessionState::Active;
        }
    }

    fn relay_caller_audio(&mut self, payload: &str, ai: &mut impl AiSink) -> RelayOutcome {
        if self.state != SessionState::Active || !ai.is_writable() {
            return RelayOutcome::DroppedNotWritable;
        }
        ai.send(translate::audio_append(payload));
        RelayOutcome::Forwarded
    }

    /// Handle one event from the AI leg.
    pub fn on_ai_event(
        &mut self,
        event: ServerEvent,
        telephony: &mut impl TelephonySink,
        ai: &mut impl AiSink,
    ) -> RelayOutcome {
        match event {
            ServerEvent::Error { error } => {
                // Backend errors are logged but do not tear the call down;
                // the backend keeps the session alive after most of them.
                warn!(
                    conn_id = %self.conn_id,
                    error_type = %error.error_type,
                    message = %error.message,
                    "AI backend reported an error"
                );
                self.logs.append(
                    LogCategory::Error,
                    format!("AI error: {}", error.message),
                    Some(json!({ "type": error.error_type, "code": error.code })),
                );
                RelayOutcome::Forwarded
            }
            ServerEvent::SessionCreated { session } => {
                info!(conn_id = %self.conn_id, "AI session created");
                self.session_acked = true;
                self.logs
                    .append(LogCategory::Session, "AI session created", Some(session));
                self.send_greeting(ai);
                RelayOutcome::Forwarded
            }
            ServerEvent::SessionUpdated { session } => {
                debug!(conn_id = %self.conn_id, "AI session updated");
                self.logs
                    .append(LogCategory::Session, "AI session updated", Some(session));
                RelayOutcome::Forwarded
            }
            ServerEvent::ResponseCreated => {
                debug!(conn_id = %self.conn_id, "AI response started");
                RelayOutcome::Forwarded
            }
            ServerEvent::AudioDelta { delta } => {
                self.audio_chunk_counter += 1;
                self.relay_ai_audio(&delta, telephony)
            }
            ServerEvent::AudioTranscriptDone { transcript } => {
                info!(conn_id = %self.conn_id, "assistant transcript complete");
                self.logs
                    .append(LogCategory::Transcript, transcript, None);
                RelayOutcome::Forwarded
            }
            ServerEvent::ResponseDone => {
                self.logs.append(
                    LogCategory::Info,
                    format!("{} audio chunks sent", self.audio_chunk_counter),
                    None,
                );
                self.audio_chunk_counter = 0;
                RelayOutcome::Forwarded
            }
            ServerEvent::Other => {
                trace!(conn_id = %self.conn_id, "unhandled AI event kind");
                RelayOutcome::Forwarded
            }
        }
    }

    fn relay_ai_audio(&mut self, delta: &str, telephony: &mut impl TelephonySink) -> RelayOutcome {
        let stream_sid = match &self.stream_sid {
            Some(sid) => sid,
            None => {
                // Audio has nowhere to go before the start frame names the
                // stream; dropping is the contract, never buffering.
                warn!(conn_id = %self.conn_id, "AI audio before start frame, dropping");
                self.logs.append(
                    LogCategory::Error,
                    "AI audio received before stream start; dropped",
                    None,
                );
                return RelayOutcome::DroppedNoStreamSid;
            }
        };

        if !telephony.is_writable() {
            return RelayOutcome::DroppedNotWritable;
        }

        telephony.send_media(&translate::media_out(stream_sid, delta));
        RelayOutcome::Forwarded
    }

    /// Trigger the greeting once the session acknowledgment has arrived.
    /// Safe to call more than once; only the first call sends anything.
    fn send_greeting(&mut self, ai: &mut impl AiSink) {
        if self.greeting_sent || !ai.is_writable() {
            return;
        }
        self.greeting_sent = true;
        info!(conn_id = %self.conn_id, "requesting greeting from assistant");
        ai.send(translate::greeting_request(&self.agent));
    }

    /// Fallback greeting trigger, fired after a short settle delay in case
    /// the session acknowledgment never arrives. A no-op when the ack path
    /// already greeted.
    pub fn on_greeting_timeout(&mut self, ai: &mut impl AiSink) {
        if !self.session_acked {
            debug!(conn_id = %self.conn_id, "greeting settle timer fired before session ack");
        }
        self.send_greeting(ai);
    }

    /// The telephony leg has gone away; shut down the AI leg.
    pub fn on_telephony_closed(&mut self, ai: &mut impl AiSink) {
        self.on_ai_closed_or_stop(ai);
    }

    fn on_ai_closed_or_stop(&mut self, ai: &mut impl AiSink) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        info!(conn_id = %self.conn_id, "closing AI leg");
        ai.close();
        self.logs.append(
            LogCategory::Session,
            match &self.stream_sid {
                Some(sid) => format!("Call ended: {}", sid),
                None => "Call ended before stream start".to_string(),
            },
            None,
        );
        self.state = SessionState::Closed;
    }

    /// The AI leg has gone away; shut down the telephony leg.
    pub fn on_ai_closed(&mut self, telephony: &mut impl TelephonySink) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        info!(conn_id = %self.conn_id, "AI leg closed, ending call");
        telephony.close();
        self.logs.append(
            LogCategory::Session,
            match &self.stream_sid {
                Some(sid) => format!("Call ended: {}", sid),
                None => "Call ended before stream start".to_string(),
            },
            None,
        );
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::openai::messages::{ApiError, ClientEvent};
    use crate::telephony::{MediaMeta, StartMeta};

    /// Records everything the bridge sends to the AI leg.
    struct FakeAi {
        sent: Vec<ClientEvent>,
        writable: bool,
        close_calls: u32,
    }

    impl FakeAi {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                writable: true,
                close_calls: 0,
            }
        }
    }

    impl AiSink for FakeAi {
        fn is_writable(&self) -> bool {
            self.writable
        }
        fn send(&mut self, event: ClientEvent) {
            self.sent.push(event);
        }
        fn close(&mut self) {
            self.close_calls += 1;
            self.writable = false;
        }
    }

    /// Records everything the bridge sends to the telephony leg.
    struct FakeTelephony {
        sent: Vec<TwilioOutbound>,
        writable: bool,
        close_calls: u32,
    }

    impl FakeTelephony {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                writable: true,
                close_calls: 0,
            }
        }
    }

    impl TelephonySink for FakeTelephony {
        fn is_writable(&self) -> bool {
            self.writable
        }
        fn send_media(&mut self, frame: &TwilioOutbound) {
            self.sent.push(frame.clone());
        }
        fn close(&mut self) {
            self.close_calls += 1;
            self.writable = false;
        }
    }

    fn session() -> CallSession {
        CallSession::new(
            "test-conn".to_string(),
            AppConfig::default().openai,
            Arc::new(LogStore::new()),
        )
    }

    fn start_event(sid: &str) -> TwilioEvent {
        TwilioEvent::Start {
            start: StartMeta {
                stream_sid: sid.to_string(),
                call_sid: None,
            },
        }
    }

    fn media_event(payload: &str, timestamp: &str) -> TwilioEvent {
        TwilioEvent::Media {
            media: MediaMeta {
                timestamp: Some(timestamp.to_string()),
                payload: payload.to_string(),
            },
        }
    }

    #[test]
    fn test_full_relay_scenario() {
        let mut bridge = session();
        let mut ai = FakeAi::new();
        let mut tel = FakeTelephony::new();

        bridge.on_ai_opened(&mut ai);
        assert_eq!(bridge.state(), SessionState::AwaitingStart);
        // session.update goes out before anything else
        assert!(matches!(ai.sent[0], ClientEvent::SessionUpdate { .. }));

        bridge.on_telephony_event(start_event("CA123"), &mut ai);
        assert_eq!(bridge.state(), SessionState::Active);
        assert_eq!(bridge.stream_sid(), Some("CA123"));

        let outcome = bridge.on_telephony_event(media_event("QUJD", "160"), &mut ai);
        assert_eq!(outcome, RelayOutcome::Forwarded);
        assert_eq!(bridge.latest_media_timestamp(), 160);
        match ai.sent.last().unwrap() {
            ClientEvent::InputAudioBufferAppend { audio } => assert_eq!(audio, "QUJD"),
            other => panic!("unexpected event: {:?}", other),
        }

        let outcome = bridge.on_ai_event(
            ServerEvent::AudioDelta {
                delta: "UkVQTFk=".to_string(),
            },
            &mut tel,
            &mut ai,
        );
        assert_eq!(outcome, RelayOutcome::Forwarded);
        let frame = tel.sent.last().unwrap();
        assert_eq!(frame.stream_sid, "CA123");
        assert_eq!(frame.media.payload, "UkVQTFk=");
    }

    #[test]
    fn test_duplicate_start_does_not_reset_call() {
        let mut bridge = session();
        let mut ai = FakeAi::new();

        bridge.on_ai_opened(&mut ai);
        bridge.on_telephony_event(start_event("CA123"), &mut ai);
        bridge.on_telephony_event(media_event("QUJD", "500"), &mut ai);

        bridge.on_telephony_event(start_event("CA999"), &mut ai);
        assert_eq!(bridge.stream_sid(), Some("CA123"));
        assert_eq!(bridge.latest_media_timestamp(), 500);
        assert_eq!(bridge.state(), SessionState::Active);
    }

    #[test]
    fn test_media_before_start_is_dropped() {
        let mut bridge = session();
        let mut ai = FakeAi::new();

        bridge.on_ai_opened(&mut ai);
        let sent_before = ai.sent.len();
        let outcome = bridge.on_telephony_event(media_event("QUJD", "0"), &mut ai);
        assert_eq!(outcome, RelayOutcome::DroppedNotWritable);
        assert_eq!(ai.sent.len(), sent_before);
    }

    #[test]
    fn test_media_dropped_when_ai_not_writable() {
        let mut bridge = session();
        let mut ai = FakeAi::new();

        bridge.on_ai_opened(&mut ai);
        bridge.on_telephony_event(start_event("CA123"), &mut ai);
        ai.writable = false;

        let sent_before = ai.sent.len();
        let outcome = bridge.on_telephony_event(media_event("QUJD", "40"), &mut ai);
        assert_eq!(outcome, RelayOutcome::DroppedNotWritable);
        // Dropped means dropped: nothing queued for later
        assert_eq!(ai.sent.len(), sent_before);
        // Timestamp still advances even when the frame is not forwarded
        assert_eq!(bridge.latest_media_timestamp(), 40);
    }

    #[test]
    fn test_ai_audio_before_start_is_dropped_and_logged() {
        let logs = Arc::new(LogStore::new());
        let mut bridge = CallSession::new(
            "test-conn".to_string(),
            AppConfig::default().openai,
            logs.clone(),
        );
        let mut ai = FakeAi::new();
        let mut tel = FakeTelephony::new();

        bridge.on_ai_opened(&mut ai);
        let outcome = bridge.on_ai_event(
            ServerEvent::AudioDelta {
                delta: "QUJD".to_string(),
            },
            &mut tel,
            &mut ai,
        );
        assert_eq!(outcome, RelayOutcome::DroppedNoStreamSid);
        assert!(tel.sent.is_empty());
        assert!(logs
            .snapshot()
            .iter()
            .any(|e| e.message.contains("before stream start")));
    }

    #[test]
    fn test_greeting_sent_once_on_session_ack() {
        let mut bridge = session();
        let mut ai = FakeAi::new();
        let mut tel = FakeTelephony::new();

        bridge.on_ai_opened(&mut ai);
        assert!(!bridge.session_acked());
        bridge.on_ai_event(
            ServerEvent::SessionCreated {
                session: json!({}),
            },
            &mut tel,
            &mut ai,
        );
        assert!(bridge.session_acked());

        let greetings = ai
            .sent
            .iter()
            .filter(|e| matches!(e, ClientEvent::ResponseCreate { .. }))
            .count();
        assert_eq!(greetings, 1);

        // Fallback timer firing afterwards must not greet again
        bridge.on_greeting_timeout(&mut ai);
        let greetings = ai
            .sent
            .iter()
            .filter(|e| matches!(e, ClientEvent::ResponseCreate { .. }))
            .count();
        assert_eq!(greetings, 1);
    }

    #[test]
    fn test_greeting_timeout_fires_without_ack() {
        let mut bridge = session();
        let mut ai = FakeAi::new();

        bridge.on_ai_opened(&mut ai);
        bridge.on_greeting_timeout(&mut ai);
        assert!(!bridge.session_acked());
        assert!(ai
            .sent
            .iter()
            .any(|e| matches!(e, ClientEvent::ResponseCreate { .. })));
    }

    #[test]
    fn test_chunk_counter_resets_on_response_done() {
        let logs = Arc::new(LogStore::new());
        let mut bridge = CallSession::new(
            "test-conn".to_string(),
            AppConfig::default().openai,
            logs.clone(),
        );
        let mut ai = FakeAi::new();
        let mut tel = FakeTelephony::new();

        bridge.on_ai_opened(&mut ai);
        bridge.on_telephony_event(start_event("CA123"), &mut ai);
        for _ in 0..3 {
            bridge.on_ai_event(
                ServerEvent::AudioDelta {
                    delta: "QUJD".to_string(),
                },
                &mut tel,
                &mut ai,
            );
        }
        bridge.on_ai_event(ServerEvent::ResponseDone, &mut tel, &mut ai);

        assert!(logs
            .snapshot()
            .iter()
            .any(|e| e.message == "3 audio chunks sent"));

        // Counter restarted for the next response
        bridge.on_ai_event(
            ServerEvent::AudioDelta {
                delta: "QUJD".to_string(),
            },
            &mut tel,
            &mut ai,
        );
        bridge.on_ai_event(ServerEvent::ResponseDone, &mut tel, &mut ai);
        assert!(logs
            .snapshot()
            .iter()
            .any(|e| e.message == "1 audio chunks sent"));
    }

    #[test]
    fn test_backend_error_is_logged_but_non_fatal() {
        let logs = Arc::new(LogStore::new());
        let mut bridge = CallSession::new(
            "test-conn".to_string(),
            AppConfig::default().openai,
            logs.clone(),
        );
        let mut ai = FakeAi::new();
        let mut tel = FakeTelephony::new();

        bridge.on_ai_opened(&mut ai);
        bridge.on_telephony_event(start_event("CA123"), &mut ai);
        bridge.on_ai_event(
            ServerEvent::Error {
                error: ApiError {
                    error_type: "invalid_request_error".to_string(),
                    code: None,
                    message: "bad session".to_string(),
                },
            },
            &mut tel,
            &mut ai,
        );

        assert_eq!(bridge.state(), SessionState::Active);
        assert_eq!(ai.close_calls, 0);
        assert!(logs
            .snapshot()
            .iter()
            .any(|e| e.category == LogCategory::Error));
    }

    #[test]
    fn test_teardown_closes_peer_exactly_once() {
        let mut bridge = session();
        let mut ai = FakeAi::new();

        bridge.on_ai_opened(&mut ai);
        bridge.on_telephony_event(start_event("CA123"), &mut ai);

        bridge.on_telephony_closed(&mut ai);
        assert_eq!(bridge.state(), SessionState::Closed);
        assert_eq!(ai.close_calls, 1);

        // A second teardown signal is a no-op
        bridge.on_telephony_closed(&mut ai);
        assert_eq!(ai.close_calls, 1);
    }

    #[test]
    fn test_ai_close_tears_down_telephony_once() {
        let mut bridge = session();
        let mut ai = FakeAi::new();
        let mut tel = FakeTelephony::new();

        bridge.on_ai_opened(&mut ai);
        bridge.on_telephony_event(start_event("CA123"), &mut ai);

        bridge.on_ai_closed(&mut tel);
        assert_eq!(bridge.state(), SessionState::Closed);
        assert_eq!(tel.close_calls, 1);

        bridge.on_ai_closed(&mut tel);
        assert_eq!(tel.close_calls, 1);
    }

    #[test]
    fn test_transcript_is_logged() {
        let logs = Arc::new(LogStore::new());
        let mut bridge = CallSession::new(
            "test-conn".to_string(),
            AppConfig::default().openai,
            logs.clone(),
        );
        let mut ai = FakeAi::new();
        let mut tel = FakeTelephony::new();

        bridge.on_ai_opened(&mut ai);
        bridge.on_ai_event(
            ServerEvent::AudioTranscriptDone {
                transcript: "Hello, how can I help?".to_string(),
            },
            &mut tel,
            &mut ai,
        );

        let snapshot = logs.snapshot();
        assert!(snapshot
            .iter()
            .any(|e| e.category == LogCategory::Transcript
                && e.message == "Hello, how can I help?"));
    }
}
