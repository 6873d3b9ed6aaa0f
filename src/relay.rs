use std::sync::Arc;

use tracing::{info, warn};

use crate::platform::MessagingApi;
use crate::profiles::ProfileCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Pushes one message to every user currently in the profile cache.
pub struct BroadcastRelay {
    profiles: Arc<ProfileCache>,
    api: Arc<dyn MessagingApi>,
}

impl BroadcastRelay {
    pub fn new(profiles: Arc<ProfileCache>, api: Arc<dyn MessagingApi>) -> Self {
        Self { profiles, api }
    }

    /// Send `text` to each known user in turn. A failed push is logged and
    /// counted; it never stops the rest of the batch. No retries.
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        let recipients = self.profiles.snapshot().await;
        let mut report = BroadcastReport::default();

        info!("Broadcasting to {} users", recipients.len());

        for profile in &recipients {
            report.attempted += 1;
            if let Err(e) = self.api.push_text(&profile.user_id, text).await {
                report.failed += 1;
                warn!(
                    "Push to {} ({}) failed: {:#}",
                    profile.display_name, profile.user_id, e
                );
            }
        }

        info!(
            "Broadcast finished: {} sent, {} failed",
            report.attempted - report.failed,
            report.failed
        );
        report
    }
}
