use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::bot::Bot;
use crate::platform::webhook::{verify_signature, WebhookEnvelope, SIGNATURE_HEADER};

#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<Bot>,
    pub channel_secret: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/callback", post(callback))
        .with_state(state)
}

/// Serve the webhook until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .context("Failed to read webhook address")?;
    info!("Webhook listening on http://{}/callback", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Webhook server failed")
}

async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, StatusCode> {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        warn!("Callback without {} header", SIGNATURE_HEADER);
        return Err(StatusCode::BAD_REQUEST);
    };

    debug!("Request body: {}", String::from_utf8_lossy(&body));

    if !verify_signature(&state.channel_secret, &body, signature) {
        warn!("Invalid signature. Please check your channel access token/channel secret.");
        return Err(StatusCode::BAD_REQUEST);
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|e| {
        warn!("Malformed webhook body: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    debug!(
        "{} events for destination {}",
        envelope.events.len(),
        envelope.destination
    );

    // Failures are logged and swallowed so the platform does not redeliver
    for event in &envelope.events {
        if let Err(e) = state.bot.handle_event(event).await {
            error!("Error handling event: {:#}", e);
        }
    }

    Ok("OK")
}
