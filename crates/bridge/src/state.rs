//! Application state owned by the bridge: per-channel membership and the
//! IRC-nick → PM-thread map.
//!
//! Both maps are loaded from durable storage at connect and written back as
//! they change. Storage failures only degrade durability, so every write
//! here logs and continues.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, RwLock},
};

use tracing::warn;

use crate::store::BridgeStore;

pub struct AppState {
    store: Arc<dyn BridgeStore>,
    /// Normalized (lowercase) line channel → member nicks.
    channel_members: RwLock<HashMap<String, BTreeSet<String>>>,
    /// Lowercase IRC nick → gateway thread id.
    pm_threads: RwLock<HashMap<String, String>>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn BridgeStore>) -> Self {
        Self {
            store,
            channel_members: RwLock::new(HashMap::new()),
            pm_threads: RwLock::new(HashMap::new()),
        }
    }

    /// Load persisted membership and thread mappings.
    pub async fn load(&self) {
        match self.store.all_channel_members().await {
            Ok(members) => {
                *self.write_members() = members;
            },
            Err(e) => warn!(error = %e, "failed to load channel members"),
        }
        match self.store.all_thread_mappings().await {
            Ok(mappings) => {
                let mut threads = self.write_threads();
                for mapping in mappings {
                    threads.insert(mapping.nick.to_lowercase(), mapping.thread_id);
                }
            },
            Err(e) => warn!(error = %e, "failed to load thread mappings"),
        }
    }

    // ── Channel membership ──────────────────────────────────────────────

    /// Replace the member set for a channel (a `names` listing).
    pub async fn set_members(&self, channel: &str, nicks: impl IntoIterator<Item = String>) {
        let channel = channel.to_lowercase();
        let members: BTreeSet<String> = nicks.into_iter().collect();
        self.write_members().insert(channel.clone(), members.clone());
        self.persist_members(&channel, &members).await;
    }

    pub async fn add_member(&self, channel: &str, nick: &str) {
        let channel = channel.to_lowercase();
        let members = {
            let mut map = self.write_members();
            let members = map.entry(channel.clone()).or_default();
            members.insert(nick.to_owned());
            members.clone()
        };
        self.persist_members(&channel, &members).await;
    }

    /// Remove a nick from one channel. Returns true when the nick was
    /// present.
    pub async fn remove_member(&self, channel: &str, nick: &str) -> bool {
        let channel = channel.to_lowercase();
        let (removed, members) = {
            let mut map = self.write_members();
            match map.get_mut(&channel) {
                Some(members) => (members.remove(nick), Some(members.clone())),
                None => (false, None),
            }
        };
        if let Some(members) = members {
            self.persist_members(&channel, &members).await;
        }
        removed
    }

    /// Channels a nick is currently seen in (used for quits and renames).
    #[must_use]
    pub fn channels_of(&self, nick: &str) -> Vec<String> {
        self.read_members()
            .iter()
            .filter(|(_, members)| members.contains(nick))
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Swap a nick in one channel. Returns true when the old nick was
    /// present.
    pub async fn rename_member(&self, channel: &str, old_nick: &str, new_nick: &str) -> bool {
        let channel = channel.to_lowercase();
        let (renamed, members) = {
            let mut map = self.write_members();
            match map.get_mut(&channel) {
                Some(members) => {
                    let renamed = members.remove(old_nick);
                    if renamed {
                        members.insert(new_nick.to_owned());
                    }
                    (renamed, Some(members.clone()))
                },
                None => (false, None),
            }
        };
        if renamed && let Some(members) = members {
            self.persist_members(&channel, &members).await;
        }
        renamed
    }

    /// Drop a channel's member view entirely (the bridge itself parted; the
    /// list would only go stale).
    pub fn forget_channel(&self, channel: &str) {
        self.write_members().remove(&channel.to_lowercase());
    }

    #[must_use]
    pub fn has_channel(&self, channel: &str) -> bool {
        self.read_members().contains_key(&channel.to_lowercase())
    }

    async fn persist_members(&self, channel: &str, members: &BTreeSet<String>) {
        if let Err(e) = self.store.save_channel_members(channel, members).await {
            warn!(channel, error = %e, "failed to persist channel members");
        }
    }

    // ── PM threads ──────────────────────────────────────────────────────

    #[must_use]
    pub fn pm_thread(&self, nick: &str) -> Option<String> {
        self.read_threads().get(&nick.to_lowercase()).cloned()
    }

    pub async fn remember_pm_thread(&self, nick: &str, thread_id: &str, channel_id: &str) {
        self.write_threads()
            .insert(nick.to_lowercase(), thread_id.to_owned());
        if let Err(e) = self
            .store
            .save_thread_mapping(&nick.to_lowercase(), thread_id, channel_id)
            .await
        {
            warn!(nick, error = %e, "failed to persist thread mapping");
        }
    }

    /// Re-key a PM thread after a nick change. Returns the thread id when
    /// one was mapped.
    pub async fn rename_pm_thread(&self, old_nick: &str, new_nick: &str) -> Option<String> {
        let thread_id = {
            let mut threads = self.write_threads();
            let thread_id = threads.remove(&old_nick.to_lowercase())?;
            threads.insert(new_nick.to_lowercase(), thread_id.clone());
            thread_id
        };
        if let Err(e) = self
            .store
            .rename_thread_mapping(&old_nick.to_lowercase(), &new_nick.to_lowercase())
            .await
        {
            warn!(old_nick, new_nick, error = %e, "failed to persist thread rename");
        }
        Some(thread_id)
    }

    // ── Lock helpers (poison-safe, never held across await) ─────────────

    fn read_members(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, BTreeSet<String>>> {
        self.channel_members.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_members(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, BTreeSet<String>>> {
        self.channel_members
            .write()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn read_threads(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.pm_threads.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_threads(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.pm_threads.write().unwrap_or_else(|e| e.into_inner())
    }
}
