//! # Telephony Media Stream Handler
//!
//! Handles the telephony gateway's media stream WebSocket. Each phone call
//! produces one connection to `/media-stream`, which this module upgrades
//! into a `MediaStreamSocket` actor.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: The gateway connects after our TwiML told it to
//! 2. **Start**: A `start` frame names the stream for this call
//! 3. **Media**: `media` frames carry base64 mu-law audio both ways
//! 4. **Stop**: A `stop` frame (or socket close) ends the call
//!
//! ## Actor Model:
//! Each connection is an independent Actix actor. The AI leg runs as a tokio
//! task (see `openai::client`) whose events are added to the actor's mailbox
//! as a stream, so both legs are serialized through one actor context and
//! the bridge state machine never needs its own locking.

use crate::bridge::{CallSession, RelayOutcome, TelephonySink};
use crate::openai::client::{self, AiHandle, AiLegEvent};
use crate::state::AppState;
use crate::telephony::{self, TwilioOutbound};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket actor bridging one phone call to the AI backend.
pub struct MediaStreamSocket {
    app_state: web::Data<AppState>,
    /// Relay state machine for this call
    bridge: CallSession,
    /// Command handle for the AI leg
    ai: AiHandle,
    /// Event stream receiver, consumed into the mailbox on start
    ai_events: Option<tokio::sync::mpsc::UnboundedReceiver<AiLegEvent>>,
    /// Whether the telephony socket is still accepting writes
    tel_open: bool,
    /// Fallback delay before the greeting trigger
    greeting_settle: Duration,
}

impl MediaStreamSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        let conn_id = Uuid::new_v4().to_string();
        let config = app_state.get_config();
        let logs = app_state.logs.clone();

        let (ai, ai_events) = client::connect(conn_id.clone(), config.openai.clone(), logs.clone());
        let bridge = CallSession::new(conn_id, config.openai.clone(), logs);

        Self {
            app_state,
            bridge,
            ai,
            ai_events: Some(ai_events),
            tel_open: true,
            greeting_settle: Duration::from_millis(config.openai.greeting_settle_ms),
        }
    }
}

/// Outbound half of the telephony socket as the bridge sees it. Borrows the
/// actor context and the open flag for the duration of one event.
struct WsSink<'a, 'b> {
    ctx: &'a mut ws::WebsocketContext<MediaStreamSocket>,
    open: &'b mut bool,
}

impl TelephonySink for WsSink<'_, '_> {
    fn is_writable(&self) -> bool {
        *self.open
    }

    fn send_media(&mut self, frame: &TwilioOutbound) {
        if !*self.open {
            return;
        }
        match serde_json::to_string(frame) {
            Ok(json) => self.ctx.text(json),
            Err(e) => error!("failed to serialize outbound media frame: {}", e),
        }
    }

    fn close(&mut self) {
        if *self.open {
            *self.open = false;
            self.ctx.close(None);
            self.ctx.stop();
        }
    }
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the telephony connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!("media stream connection started");
        self.app_state.call_started();

        // Route AI leg events through this actor's mailbox
        if let Some(events) = self.ai_events.take() {
            ctx.add_stream(UnboundedReceiverStream::new(events));
        }
    }

    /// Called when the telephony connection stops for any reason.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("media stream connection stopped");
        self.tel_open = false;
        self.bridge.on_telephony_closed(&mut self.ai);
        self.app_state.call_ended();
    }
}

/// Inbound frames from the telephony gateway.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let event = match telephony::parse_event(&text, &self.app_state.logs) {
                    Some(event) => event,
                    None => return, // malformed frame already logged
                };

                let was_media = matches!(event, telephony::TwilioEvent::Media { .. });
                let outcome = self.bridge.on_telephony_event(event, &mut self.ai);
                if was_media && outcome == RelayOutcome::Forwarded {
                    self.app_state.record_frame_to_ai();
                }

                // A stop frame means the gateway is done with this call
                if self.bridge.state() == crate::bridge::SessionState::Closed {
                    self.tel_open = false;
                    ctx.close(None);
                    ctx.stop();
                }
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Binary(_)) => {
                // The gateway speaks JSON text frames only
                warn!("unexpected binary frame on media stream");
            }
            Ok(ws::Message::Close(reason)) => {
                info!("media stream closed by gateway: {:?}", reason);
                self.tel_open = false;
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("unexpected continuation frame on media stream");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("media stream protocol error: {}", err);
                self.tel_open = false;
                ctx.stop();
            }
        }
    }
}

/// Events from the AI leg's connection task.
impl StreamHandler<AiLegEvent> for MediaStreamSocket {
    fn handle(&mut self, event: AiLegEvent, ctx: &mut Self::Context) {
        match event {
            AiLegEvent::Opened => {
                self.bridge.on_ai_opened(&mut self.ai);

                // Fallback greeting in case the session ack never arrives;
                // a no-op when the ack path already greeted.
                ctx.run_later(self.greeting_settle, |act, _ctx| {
                    act.bridge.on_greeting_timeout(&mut act.ai);
                });
            }
            AiLegEvent::Event(server_event) => {
                let this = &mut *self;
                let mut sink = WsSink {
                    ctx,
                    open: &mut this.tel_open,
                };
                let was_delta = matches!(
                    server_event,
                    crate::openai::messages::ServerEvent::AudioDelta { .. }
                );
                let outcome = this.bridge.on_ai_event(server_event, &mut sink, &mut this.ai);
                if was_delta && outcome == RelayOutcome::Forwarded {
                    this.app_state.record_frame_to_caller();
                }
            }
            AiLegEvent::Closed(reason) => {
                if let Some(reason) = &reason {
                    warn!("AI leg closed: {}", reason);
                } else {
                    debug!("AI leg closed");
                }
                let this = &mut *self;
                let mut sink = WsSink {
                    ctx,
                    open: &mut this.tel_open,
                };
                this.bridge.on_ai_closed(&mut sink);
            }
        }
    }
}

/// Media stream endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Handles the initial HTTP request from the telephony gateway and upgrades
/// it to a WebSocket connection driven by the `MediaStreamSocket` actor.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "new media stream connection from: {:?}",
        req.connection_info().peer_addr()
    );

    ws::start(MediaStreamSocket::new(app_state), &req, stream)
}
