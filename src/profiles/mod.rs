pub mod table;

use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use self::table::ProfileTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
}

/// Known users and their latest display names.
///
/// Entries are created on a user's first message and overwritten on every
/// later one; nothing is ever evicted. Each entry is replaced whole under
/// the write lock, so `snapshot` never sees a half-applied upsert. With a
/// table attached, every upsert is also written to SQLite.
pub struct ProfileCache {
    entries: RwLock<HashMap<String, String>>,
    table: Option<ProfileTable>,
}

impl ProfileCache {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            table: None,
        }
    }

    pub fn with_table(table: ProfileTable) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            table: Some(table),
        }
    }

    /// Insert or overwrite the display name for `user_id`.
    ///
    /// The write lock is held across the table write so memory and SQLite
    /// agree on the last writer. A failed table write is logged; the
    /// in-memory entry is still updated.
    pub async fn upsert(&self, user_id: &str, display_name: &str) {
        let mut entries = self.entries.write().await;

        if let Some(table) = &self.table {
            if let Err(e) = table.upsert(user_id, display_name).await {
                warn!("Failed to persist profile: {:#}", e);
            }
        }

        entries.insert(user_id.to_string(), display_name.to_string());
        debug!("Cached profile {} -> {}", user_id, display_name);
    }

    pub async fn get(&self, user_id: &str) -> Option<String> {
        self.entries.read().await.get(user_id).cloned()
    }

    /// Point-in-time copy of every known profile.
    pub async fn snapshot(&self) -> Vec<UserProfile> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(user_id, display_name)| UserProfile {
                user_id: user_id.clone(),
                display_name: display_name.clone(),
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Load persisted rows into memory. Returns how many were loaded; a
    /// cache without a table loads nothing.
    pub async fn restore(&self) -> Result<usize> {
        let Some(table) = &self.table else {
            return Ok(0);
        };

        let rows = table.load_all().await?;
        let count = rows.len();
        let mut entries = self.entries.write().await;
        for row in rows {
            entries.insert(row.user_id, row.display_name);
        }
        info!("Restored {} profiles from storage", count);
        Ok(count)
    }
}
