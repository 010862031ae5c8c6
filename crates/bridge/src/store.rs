//! Durable-storage collaborator.
//!
//! Persistence is soft-fail everywhere: a storage error degrades durability
//! (state will not survive a restart) but never correctness, so callers log
//! and continue. `trestle-store` provides the SQLite implementation.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

/// A persisted IRC-nick → gateway-thread mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMapping {
    pub nick: String,
    pub thread_id: String,
    pub channel_id: String,
    pub last_activity_ms: u64,
}

/// Async key/value-like durable storage.
#[async_trait]
pub trait BridgeStore: Send + Sync {
    async fn save_metric(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn get_metric(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn save_thread_mapping(
        &self,
        nick: &str,
        thread_id: &str,
        channel_id: &str,
    ) -> anyhow::Result<()>;
    async fn get_thread_mapping(&self, nick: &str) -> anyhow::Result<Option<ThreadMapping>>;
    async fn all_thread_mappings(&self) -> anyhow::Result<Vec<ThreadMapping>>;
    async fn rename_thread_mapping(&self, old_nick: &str, new_nick: &str) -> anyhow::Result<()>;
    async fn delete_thread_mapping(&self, nick: &str) -> anyhow::Result<()>;

    async fn save_channel_members(
        &self,
        channel: &str,
        members: &BTreeSet<String>,
    ) -> anyhow::Result<()>;
    async fn get_channel_members(&self, channel: &str) -> anyhow::Result<BTreeSet<String>>;
    async fn all_channel_members(&self) -> anyhow::Result<HashMap<String, BTreeSet<String>>>;

    async fn close(&self) -> anyhow::Result<()>;
}
