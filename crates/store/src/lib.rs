//! SQLite implementation of the bridge's durable storage.
//!
//! Three tables: `bot_metrics` (string key/value, also used for the
//! serialized correlation store), `pm_threads` (IRC nick → gateway thread),
//! and `channel_users` (member sets as JSON arrays). Schema is created on
//! open; there is no separate migration step.

use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    sqlx::{Row, SqlitePool},
    tracing::{debug, info},
    trestle_bridge::{BridgeStore, ThreadMapping},
    trestle_common::now_ms,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&db_url).await?;
        Self::migrate(&pool).await?;
        info!(path = %path.display(), "sqlite store opened");
        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS bot_metrics (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS pm_threads (
                irc_nick TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                last_activity INTEGER NOT NULL
            )
            ",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS channel_users (
                channel TEXT PRIMARY KEY,
                users TEXT NOT NULL,
                last_updated INTEGER NOT NULL
            )
            ",
        )
        .execute(pool)
        .await?;
        debug!("database tables created/verified");
        Ok(())
    }

    /// Drop stale rows: PM threads idle for over a week, member lists older
    /// than a day (they are rebuilt from `names` on reconnect anyway).
    pub async fn cleanup(&self) -> Result<()> {
        let now = now_ms() as i64;
        let week_ago = now - 7 * 24 * 60 * 60 * 1000;
        let day_ago = now - 24 * 60 * 60 * 1000;

        sqlx::query("DELETE FROM pm_threads WHERE last_activity < ?")
            .bind(week_ago)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM channel_users WHERE last_updated < ?")
            .bind(day_ago)
            .execute(&self.pool)
            .await?;
        debug!("database cleanup completed");
        Ok(())
    }
}

#[async_trait]
impl BridgeStore for SqliteStore {
    async fn save_metric(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO bot_metrics (key, value, updated_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_metric(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM bot_metrics WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn save_thread_mapping(
        &self,
        nick: &str,
        thread_id: &str,
        channel_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO pm_threads (irc_nick, thread_id, channel_id, last_activity) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(nick.to_lowercase())
        .bind(thread_id)
        .bind(channel_id)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_thread_mapping(&self, nick: &str) -> Result<Option<ThreadMapping>> {
        let row = sqlx::query(
            "SELECT irc_nick, thread_id, channel_id, last_activity FROM pm_threads \
             WHERE irc_nick = ?",
        )
        .bind(nick.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ThreadMapping {
            nick: r.get(0),
            thread_id: r.get(1),
            channel_id: r.get(2),
            last_activity_ms: r.get::<i64, _>(3) as u64,
        }))
    }

    async fn all_thread_mappings(&self) -> Result<Vec<ThreadMapping>> {
        let rows =
            sqlx::query("SELECT irc_nick, thread_id, channel_id, last_activity FROM pm_threads")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| ThreadMapping {
                nick: r.get(0),
                thread_id: r.get(1),
                channel_id: r.get(2),
                last_activity_ms: r.get::<i64, _>(3) as u64,
            })
            .collect())
    }

    async fn rename_thread_mapping(&self, old_nick: &str, new_nick: &str) -> Result<()> {
        sqlx::query("UPDATE pm_threads SET irc_nick = ?, last_activity = ? WHERE irc_nick = ?")
            .bind(new_nick.to_lowercase())
            .bind(now_ms() as i64)
            .bind(old_nick.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_thread_mapping(&self, nick: &str) -> Result<()> {
        sqlx::query("DELETE FROM pm_threads WHERE irc_nick = ?")
            .bind(nick.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_channel_members(&self, channel: &str, members: &BTreeSet<String>) -> Result<()> {
        let users = serde_json::to_string(&members.iter().collect::<Vec<_>>())?;
        sqlx::query(
            "INSERT OR REPLACE INTO channel_users (channel, users, last_updated) VALUES (?, ?, ?)",
        )
        .bind(channel)
        .bind(users)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_channel_members(&self, channel: &str) -> Result<BTreeSet<String>> {
        let row = sqlx::query("SELECT users FROM channel_users WHERE channel = ?")
            .bind(channel)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(serde_json::from_str(&r.get::<String, _>(0))?),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn all_channel_members(&self) -> Result<HashMap<String, BTreeSet<String>>> {
        let rows = sqlx::query("SELECT channel, users FROM channel_users")
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            let channel: String = row.get(0);
            match serde_json::from_str(&row.get::<String, _>(1)) {
                Ok(users) => {
                    out.insert(channel, users);
                },
                Err(e) => {
                    tracing::warn!(channel, error = %e, "skipping corrupt member list");
                },
            }
        }
        Ok(out)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("database connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metric_round_trip() {
        let store = SqliteStore::in_memory().await.expect("open store");
        assert_eq!(store.get_metric("uptime_start").await.expect("get"), None);

        store
            .save_metric("uptime_start", "12345")
            .await
            .expect("save");
        store
            .save_metric("uptime_start", "67890")
            .await
            .expect("overwrite");
        assert_eq!(
            store.get_metric("uptime_start").await.expect("get"),
            Some("67890".into())
        );
    }

    #[tokio::test]
    async fn thread_mappings_are_keyed_by_lowercase_nick() {
        let store = SqliteStore::in_memory().await.expect("open store");
        store
            .save_thread_mapping("Alice", "t1", "c1")
            .await
            .expect("save");

        let mapping = store
            .get_thread_mapping("ALICE")
            .await
            .expect("get")
            .expect("mapping exists");
        assert_eq!(mapping.nick, "alice");
        assert_eq!(mapping.thread_id, "t1");

        store
            .rename_thread_mapping("alice", "Alicia")
            .await
            .expect("rename");
        assert!(
            store
                .get_thread_mapping("alice")
                .await
                .expect("get")
                .is_none()
        );
        let renamed = store
            .get_thread_mapping("alicia")
            .await
            .expect("get")
            .expect("renamed mapping exists");
        assert_eq!(renamed.thread_id, "t1");

        store.delete_thread_mapping("alicia").await.expect("delete");
        assert!(store.all_thread_mappings().await.expect("all").is_empty());
    }

    #[tokio::test]
    async fn channel_member_round_trip() {
        let store = SqliteStore::in_memory().await.expect("open store");
        let members: BTreeSet<String> =
            ["alice", "bob"].iter().map(|s| (*s).to_owned()).collect();
        store
            .save_channel_members("#irc-general", &members)
            .await
            .expect("save");

        assert_eq!(
            store
                .get_channel_members("#irc-general")
                .await
                .expect("get"),
            members
        );
        assert!(
            store
                .get_channel_members("#unknown")
                .await
                .expect("get")
                .is_empty()
        );

        let all = store.all_channel_members().await.expect("all");
        assert_eq!(all.len(), 1);
        assert_eq!(all["#irc-general"], members);
    }

    #[tokio::test]
    async fn cleanup_retains_fresh_rows() {
        let store = SqliteStore::in_memory().await.expect("open store");
        store
            .save_thread_mapping("alice", "t1", "c1")
            .await
            .expect("save");
        let members: BTreeSet<String> = ["bob".to_owned()].into_iter().collect();
        store
            .save_channel_members("#irc", &members)
            .await
            .expect("save");

        store.cleanup().await.expect("cleanup");
        assert_eq!(store.all_thread_mappings().await.expect("all").len(), 1);
        assert_eq!(
            store.get_channel_members("#irc").await.expect("get"),
            members
        );
    }

    #[tokio::test]
    async fn reopening_a_file_preserves_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trestle.db");

        {
            let store = SqliteStore::open(&path).await.expect("open");
            store.save_metric("k", "v").await.expect("save");
            store.close().await.expect("close");
        }

        let store = SqliteStore::open(&path).await.expect("reopen");
        assert_eq!(store.get_metric("k").await.expect("get"), Some("v".into()));
    }
}
