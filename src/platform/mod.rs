pub mod line;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;

/// Outbound calls the bot makes against the messaging platform.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    /// Fetch the display name for a user id.
    async fn get_display_name(&self, user_id: &str) -> Result<String>;

    /// Answer an inbound event using its one-time reply token.
    async fn reply_text(&self, reply_token: &str, text: &str) -> Result<()>;

    /// Send an unsolicited message to a user.
    async fn push_text(&self, user_id: &str, text: &str) -> Result<()>;
}
