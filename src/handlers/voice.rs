use actix_web::{HttpRequest, HttpResponse};
use tracing::info;

/// /voice — call webhook for the telephony gateway.
///
/// Returns the TwiML that tells the gateway to open a media stream back to
/// this server. The stream URL is derived from the Host header so the same
/// deployment works behind any public hostname. Registered for every HTTP
/// method because the gateway can be configured to use GET or POST.
pub async fn voice_webhook(req: HttpRequest) -> HttpResponse {
    let host = req.connection_info().host().to_string();
    info!(host = %host, "voice webhook hit, returning stream TwiML");

    let twiml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
    <Response>
      <Say>Connecting you to Genie. Please wait.</Say>
      <Connect>
        <Stream url="wss://{}/media-stream" />
      </Connect>
    </Response>"#,
        host
    );

    HttpResponse::Ok().content_type("text/xml").body(twiml)
}
