use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::UserProfile;

/// SQLite table mirroring the profile cache, one row per user id.
#[derive(Clone)]
pub struct ProfileTable {
    conn: Arc<Mutex<Connection>>,
}

impl ProfileTable {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Migrate on the raw connection before it goes behind the async Mutex
        Self::run_migrations(&conn)?;

        info!("Profile table initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .context("Failed to run profile table migrations")?;
        Ok(())
    }

    pub async fn upsert(&self, user_id: &str, display_name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO user_profiles (user_id, display_name)
             VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = datetime('now')",
            rusqlite::params![user_id, display_name],
        )
        .with_context(|| format!("Failed to store profile for {}", user_id))?;
        Ok(())
    }

    pub async fn load_all(&self) -> Result<Vec<UserProfile>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT user_id, display_name FROM user_profiles")
            .context("Failed to prepare profile query")?;
        let profiles = stmt
            .query_map([], |row| {
                Ok(UserProfile {
                    user_id: row.get(0)?,
                    display_name: row.get(1)?,
                })
            })
            .context("Failed to map rows")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect rows")?;
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_inserts_then_overwrites() {
        let table = ProfileTable::open_in_memory().unwrap();

        table.upsert("U1", "Alice").await.unwrap();
        table.upsert("U2", "Bob").await.unwrap();
        table.upsert("U1", "Alice Liddell").await.unwrap();

        let mut rows = table.load_all().await.unwrap();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        assert_eq!(
            rows,
            vec![
                UserProfile {
                    user_id: "U1".to_string(),
                    display_name: "Alice Liddell".to_string(),
                },
                UserProfile {
                    user_id: "U2".to_string(),
                    display_name: "Bob".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let table = ProfileTable::open_in_memory().unwrap();
        table.upsert("U1", "Alice").await.unwrap();

        {
            let conn = table.conn.lock().await;
            ProfileTable::run_migrations(&conn).unwrap();
        }

        assert_eq!(table.load_all().await.unwrap().len(), 1);
    }
}
