//! Inbound webhook envelope and signature check for LINE callbacks.
//!
//! LINE signs each callback body with HMAC-SHA256 keyed by the channel
//! secret and sends the base64 digest in `X-Line-Signature`.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

type HmacSha256 = Hmac<Sha256>;

/// Returns true when `signature` is the base64 HMAC-SHA256 of `body`.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64_STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
pub fn sign(channel_secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(channel_secret.as_bytes()).unwrap();
    mac.update(body);
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Webhook event, dispatched on its `type` field. Only message events are
/// modelled; follow, unfollow, postback and the rest land in `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Message(MessageEvent),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// Absent when the channel is in standby mode.
    #[serde(default)]
    pub reply_token: Option<String>,
    pub source: Source,
    pub message: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// "user", "group" or "room"
    #[serde(rename = "type")]
    pub kind: String,
    /// Absent for group/room senders who have not consented to sharing it.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text { text: String },
    #[serde(other)]
    Other,
}
