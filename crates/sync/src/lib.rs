//! Cross-network message correlation.
//!
//! The line protocol has no native edit or delete, so the bridge remembers
//! which destination lines each source message produced. When the gateway
//! later edits or deletes that message, the synchronizer replays a
//! correlated "(edited)" / "(deleted)" annotation into the same destination
//! channel, one per originally sent line.
//!
//! The store is bounded by a retention window: entries older than the edit
//! window are evicted lazily on access and by a periodic sweep, so memory
//! stays bounded independent of traffic volume. The whole store serializes
//! to JSON so it can be flushed to durable storage at shutdown and reloaded
//! at startup, keeping recently sent messages correlatable across a restart.

use std::time::Duration;

use {
    dashmap::DashMap,
    serde::{Deserialize, Serialize},
    tracing::debug,
    trestle_common::now_ms,
};

/// One physically sent destination line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedLine {
    pub channel: String,
    pub rendered: String,
    pub author: String,
    pub created_at_ms: u64,
}

/// A correlated annotation to deliver to a destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub channel: String,
    pub text: String,
}

/// Serializable image of the correlation store.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub messages: Vec<(String, Vec<TrackedLine>)>,
}

/// Read-only snapshot of synchronizer state.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub tracked_messages: usize,
    pub edit_window_minutes: u64,
}

/// Correlation store mapping a source message id to its destination lines.
pub struct MessageSynchronizer {
    edit_window: Duration,
    entries: DashMap<String, Vec<TrackedLine>>,
}

impl MessageSynchronizer {
    #[must_use]
    pub fn new(edit_window: Duration) -> Self {
        Self {
            edit_window,
            entries: DashMap::new(),
        }
    }

    /// Register one successfully sent destination line. A multi-line source
    /// message yields one call per line, all sharing `source_id`.
    pub fn record_message(&self, source_id: &str, channel: &str, rendered: &str, author: &str) {
        self.record_at(source_id, channel, rendered, author, now_ms());
    }

    fn record_at(&self, source_id: &str, channel: &str, rendered: &str, author: &str, at_ms: u64) {
        self.entries
            .entry(source_id.to_owned())
            .or_default()
            .push(TrackedLine {
                channel: channel.to_owned(),
                rendered: rendered.to_owned(),
                author: author.to_owned(),
                created_at_ms: at_ms,
            });
    }

    /// Produce "(edited)" annotations for a source message, one per
    /// originally recorded destination line, carrying the new text.
    ///
    /// An unknown id or an entry beyond the retention window produces no
    /// output: history predating the bridge never generates synthetic noise.
    #[must_use]
    pub fn handle_edit(&self, source_id: &str, new_text: &str) -> Vec<Annotation> {
        self.handle_edit_at(source_id, new_text, now_ms())
    }

    fn handle_edit_at(&self, source_id: &str, new_text: &str, now: u64) -> Vec<Annotation> {
        self.lookup(source_id, now)
            .into_iter()
            .map(|line| Annotation {
                channel: line.channel,
                text: format!("<{}> (edited): {new_text}", line.author),
            })
            .collect()
    }

    /// Produce "(deleted)" annotations, one per recorded destination line.
    /// The target protocol cannot retract text, so deletion is represented,
    /// not enacted.
    #[must_use]
    pub fn handle_delete(&self, source_id: &str) -> Vec<Annotation> {
        self.handle_delete_at(source_id, now_ms())
    }

    fn handle_delete_at(&self, source_id: &str, now: u64) -> Vec<Annotation> {
        self.lookup(source_id, now)
            .into_iter()
            .map(|line| Annotation {
                channel: line.channel,
                text: format!("<{}> (deleted): {}", line.author, line.rendered),
            })
            .collect()
    }

    /// Bulk-delete convenience: annotations for every id, in input order.
    #[must_use]
    pub fn handle_bulk_delete(&self, source_ids: &[String]) -> Vec<Annotation> {
        let now = now_ms();
        source_ids
            .iter()
            .flat_map(|id| self.handle_delete_at(id, now))
            .collect()
    }

    /// Look up the lines for `source_id`, lazily evicting an expired entry.
    fn lookup(&self, source_id: &str, now: u64) -> Vec<TrackedLine> {
        let Some(entry) = self.entries.get(source_id) else {
            return Vec::new();
        };
        let lines = entry.value().clone();
        drop(entry);

        if lines
            .first()
            .is_some_and(|line| self.expired(line.created_at_ms, now))
        {
            self.entries.remove(source_id);
            debug!(source_id, "correlation entry expired");
            return Vec::new();
        }
        lines
    }

    fn expired(&self, created_at_ms: u64, now: u64) -> bool {
        now.saturating_sub(created_at_ms) > self.edit_window.as_millis() as u64
    }

    /// Drop every entry older than the retention window. Called from a
    /// periodic task; lookups also evict lazily.
    pub fn sweep(&self) {
        self.sweep_at(now_ms());
    }

    fn sweep_at(&self, now: u64) {
        self.entries.retain(|_, lines| {
            lines
                .first()
                .is_none_or(|line| !self.expired(line.created_at_ms, now))
        });
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            tracked_messages: self.entries.len(),
            edit_window_minutes: self.edit_window.as_secs() / 60,
        }
    }

    /// Serializable image of the store, for flushing at shutdown.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            messages: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    /// Reload a snapshot, dropping entries already beyond the window.
    pub fn restore(&self, snapshot: SyncSnapshot) {
        let now = now_ms();
        for (source_id, lines) in snapshot.messages {
            if lines
                .first()
                .is_some_and(|line| self.expired(line.created_at_ms, now))
            {
                continue;
            }
            self.entries.insert(source_id, lines);
        }
    }
}
