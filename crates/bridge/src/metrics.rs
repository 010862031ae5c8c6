//! Relay counters.
//!
//! Plain atomics with a serializable snapshot; the bridge flushes the
//! snapshot through the durable store periodically and at shutdown so
//! operators can see totals across restarts.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct BridgeMetrics {
    discord_to_irc: AtomicU64,
    irc_to_discord: AtomicU64,
    commands: AtomicU64,
    attachments: AtomicU64,
    messages_blocked: AtomicU64,
    spam_detected: AtomicU64,
    edits_relayed: AtomicU64,
    deletes_relayed: AtomicU64,
    pm_messages: AtomicU64,
    status_notices: AtomicU64,
    webhook_errors: AtomicU64,
    connection_errors: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub discord_to_irc: u64,
    pub irc_to_discord: u64,
    pub commands: u64,
    pub attachments: u64,
    pub messages_blocked: u64,
    pub spam_detected: u64,
    pub edits_relayed: u64,
    pub deletes_relayed: u64,
    pub pm_messages: u64,
    pub status_notices: u64,
    pub webhook_errors: u64,
    pub connection_errors: u64,
}

macro_rules! counter {
    ($bump:ident, $field:ident) => {
        pub fn $bump(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl BridgeMetrics {
    counter!(record_discord_to_irc, discord_to_irc);
    counter!(record_irc_to_discord, irc_to_discord);
    counter!(record_command, commands);
    counter!(record_attachment, attachments);
    counter!(record_message_blocked, messages_blocked);
    counter!(record_spam_detected, spam_detected);
    counter!(record_edit_relayed, edits_relayed);
    counter!(record_delete_relayed, deletes_relayed);
    counter!(record_pm_message, pm_messages);
    counter!(record_status_notice, status_notices);
    counter!(record_webhook_error, webhook_errors);
    counter!(record_connection_error, connection_errors);

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            discord_to_irc: self.discord_to_irc.load(Ordering::Relaxed),
            irc_to_discord: self.irc_to_discord.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            attachments: self.attachments.load(Ordering::Relaxed),
            messages_blocked: self.messages_blocked.load(Ordering::Relaxed),
            spam_detected: self.spam_detected.load(Ordering::Relaxed),
            edits_relayed: self.edits_relayed.load(Ordering::Relaxed),
            deletes_relayed: self.deletes_relayed.load(Ordering::Relaxed),
            pm_messages: self.pm_messages.load(Ordering::Relaxed),
            status_notices: self.status_notices.load(Ordering::Relaxed),
            webhook_errors: self.webhook_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
        }
    }

    /// Seed counters from a persisted snapshot so totals survive restarts.
    pub fn restore(&self, snapshot: &MetricsSnapshot) {
        self.discord_to_irc
            .store(snapshot.discord_to_irc, Ordering::Relaxed);
        self.irc_to_discord
            .store(snapshot.irc_to_discord, Ordering::Relaxed);
        self.commands.store(snapshot.commands, Ordering::Relaxed);
        self.attachments
            .store(snapshot.attachments, Ordering::Relaxed);
        self.messages_blocked
            .store(snapshot.messages_blocked, Ordering::Relaxed);
        self.spam_detected
            .store(snapshot.spam_detected, Ordering::Relaxed);
        self.edits_relayed
            .store(snapshot.edits_relayed, Ordering::Relaxed);
        self.deletes_relayed
            .store(snapshot.deletes_relayed, Ordering::Relaxed);
        self.pm_messages
            .store(snapshot.pm_messages, Ordering::Relaxed);
        self.status_notices
            .store(snapshot.status_notices, Ordering::Relaxed);
        self.webhook_errors
            .store(snapshot.webhook_errors, Ordering::Relaxed);
        self.connection_errors
            .store(snapshot.connection_errors, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip() {
        let metrics = BridgeMetrics::default();
        metrics.record_discord_to_irc();
        metrics.record_discord_to_irc();
        metrics.record_message_blocked();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.discord_to_irc, 2);
        assert_eq!(snapshot.messages_blocked, 1);

        let restored = BridgeMetrics::default();
        restored.restore(&snapshot);
        assert_eq!(restored.snapshot().discord_to_irc, 2);
    }
}
