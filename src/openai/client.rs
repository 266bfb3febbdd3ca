//! # AI Backend Connection
//!
//! Owns the outbound WebSocket to the realtime voice API. Each call gets one
//! connection, driven by a dedicated tokio task:
//!
//! - Client events arrive over an mpsc channel (the `AiHandle` side) and are
//!   serialized onto the socket.
//! - Server events are parsed and forwarded to the call's actor mailbox as
//!   `AiLegEvent`s.
//!
//! There is no reconnect: a phone call whose AI leg drops is over, and the
//! bridge ends the telephony leg in response to `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::bridge::AiSink;
use crate::config::OpenAiConfig;
use crate::logstore::{LogCategory, LogStore};
use crate::openai::messages::{ClientEvent, ServerEvent};

/// Lifecycle and traffic notifications delivered to the call actor.
#[derive(Debug)]
pub enum AiLegEvent {
    /// Socket established and ready for the session configuration
    Opened,
    /// One parsed server event
    Event(ServerEvent),
    /// Socket gone, with a reason when the close was abnormal
    Closed(Option<String>),
}

/// The bridge-facing half of the AI connection.
///
/// Sends are best-effort by design: once the connection task has exited (or
/// before it has opened) the handle reports not-writable and `send` drops
/// the event, matching the bridge's no-queueing contract.
pub struct AiHandle {
    tx: Option<mpsc::UnboundedSender<ClientEvent>>,
    writable: Arc<AtomicBool>,
}

impl AiSink for AiHandle {
    fn is_writable(&self) -> bool {
        self.tx.is_some() && self.writable.load(Ordering::Relaxed)
    }

    fn send(&mut self, event: ClientEvent) {
        if !self.is_writable() {
            return;
        }
        if let Some(tx) = &self.tx {
            // A send error means the task already exited; the Closed event
            // is on its way to the actor, so dropping here is fine.
            let _ = tx.send(event);
        }
    }

    fn close(&mut self) {
        self.writable.store(false, Ordering::Relaxed);
        // Dropping the sender ends the connection task's command loop,
        // which sends a close frame and tears the socket down.
        self.tx.take();
    }
}

/// Open the AI leg for one call.
///
/// Returns immediately with the command handle and the event stream; the
/// connection itself is established by a spawned task, which reports the
/// result as `Opened` or `Closed` on the stream.
pub fn connect(
    conn_id: String,
    cfg: OpenAiConfig,
    logs: Arc<LogStore>,
) -> (AiHandle, mpsc::UnboundedReceiver<AiLegEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel::<AiLegEvent>();
    let writable = Arc::new(AtomicBool::new(false));

    let handle = AiHandle {
        tx: Some(cmd_tx),
        writable: writable.clone(),
    };

    tokio::spawn(run_connection(conn_id, cfg, logs, cmd_rx, evt_tx, writable));

    (handle, evt_rx)
}

async fn run_connection(
    conn_id: String,
    cfg: OpenAiConfig,
    logs: Arc<LogStore>,
    mut commands: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::UnboundedSender<AiLegEvent>,
    writable: Arc<AtomicBool>,
) {
    let url = format!("wss://api.openai.com/v1/realtime?model={}", cfg.model);

    let mut request = match url.into_client_request() {
        Ok(request) => request,
        Err(e) => {
            report_connect_failure(&conn_id, &logs, &events, format!("bad request: {}", e));
            return;
        }
    };

    let auth = match HeaderValue::from_str(&format!("Bearer {}", cfg.api_key)) {
        Ok(value) => value,
        Err(e) => {
            report_connect_failure(&conn_id, &logs, &events, format!("bad credential: {}", e));
            return;
        }
    };
    request.headers_mut().insert("Authorization", auth);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (stream, _response) = match connect_async(request).await {
        Ok(ok) => ok,
        Err(e) => {
            report_connect_failure(&conn_id, &logs, &events, format!("connect failed: {}", e));
            return;
        }
    };

    info!(conn_id = %conn_id, model = %cfg.model, "AI backend connected");
    writable.store(true, Ordering::Relaxed);
    if events.send(AiLegEvent::Opened).is_err() {
        return;
    }

    let (mut sink, mut source) = stream.split();
    let mut close_reason: Option<String> = None;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(conn_id = %conn_id, "failed to serialize client event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        close_reason = Some(format!("send failed: {}", e));
                        break;
                    }
                }
                None => {
                    // Handle dropped: orderly shutdown from the bridge side
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(raw))) => {
                    if let Some(event) = parse_server_event(&raw, &conn_id, &logs) {
                        if events.send(AiLegEvent::Event(event)).is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(conn_id = %conn_id, "AI backend closed the socket");
                    close_reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                Some(Ok(_)) => {} // binary/pong frames carry nothing we use
                Some(Err(e)) => {
                    close_reason = Some(format!("read failed: {}", e));
                    break;
                }
                None => break,
            },
        }
    }

    writable.store(false, Ordering::Relaxed);
    info!(conn_id = %conn_id, reason = ?close_reason, "AI leg finished");
    let _ = events.send(AiLegEvent::Closed(close_reason));
}

/// Parse one inbound backend frame, logging a single error-category entry on
/// failure. A malformed frame is dropped and never terminates the session.
fn parse_server_event(raw: &str, conn_id: &str, logs: &LogStore) -> Option<ServerEvent> {
    match serde_json::from_str(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(conn_id = %conn_id, "unparseable AI event: {}", e);
            logs.append(
                LogCategory::Error,
                format!("Unparseable AI event: {}", e),
                None,
            );
            None
        }
    }
}

fn report_connect_failure(
    conn_id: &str,
    logs: &LogStore,
    events: &mpsc::UnboundedSender<AiLegEvent>,
    reason: String,
) {
    error!(conn_id = %conn_id, "AI backend connection failed: {}", reason);
    logs.append(
        LogCategory::Error,
        format!("AI connection failed: {}", reason),
        None,
    );
    let _ = events.send(AiLegEvent::Closed(Some(reason)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_unwritable_until_connected() {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let mut handle = AiHandle {
            tx: Some(cmd_tx),
            writable: Arc::new(AtomicBool::new(false)),
        };
        assert!(!handle.is_writable());

        handle.writable.store(true, Ordering::Relaxed);
        assert!(handle.is_writable());

        handle.close();
        assert!(!handle.is_writable());
    }

    #[test]
    fn test_send_after_close_is_a_noop() {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let mut handle = AiHandle {
            tx: Some(cmd_tx),
            writable: Arc::new(AtomicBool::new(true)),
        };

        handle.send(ClientEvent::InputAudioBufferAppend {
            audio: "QUJD".to_string(),
        });
        assert!(cmd_rx.try_recv().is_ok());

        handle.close();
        handle.send(ClientEvent::InputAudioBufferAppend {
            audio: "QUJD".to_string(),
        });
        // Channel is gone; nothing queued, nothing panicked
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn test_malformed_backend_frame_logs_exactly_one_error() {
        let logs = LogStore::new();

        assert!(parse_server_event("{not json", "test-conn", &logs).is_none());

        let snapshot = logs.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].category, LogCategory::Error);
    }

    #[test]
    fn test_valid_backend_frame_parses_without_logging() {
        let logs = LogStore::new();

        let raw = r#"{"type":"response.audio.delta","delta":"QUJD"}"#;
        assert!(matches!(
            parse_server_event(raw, "test-conn", &logs),
            Some(ServerEvent::AudioDelta { .. })
        ));
        assert!(logs.is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let mut handle = AiHandle {
            tx: Some(cmd_tx),
            writable: Arc::new(AtomicBool::new(true)),
        };
        handle.close();
        handle.close();
        assert!(!handle.is_writable());
    }
}
