//! Collaborator traits for the wire-level clients and the optional
//! object-storage uploader.
//!
//! The bridge core never talks to a client library directly; the adapter
//! crates implement these traits and translate their library's events into
//! the sum types in [`crate::event`].

use async_trait::async_trait;

/// Per-message identity for webhook-style delivery.
#[derive(Debug, Clone, Default)]
pub struct WebhookProfile {
    pub username: String,
    pub avatar_url: Option<String>,
    /// When false, `@everyone`/`@here` in the content must not ping.
    pub allow_everyone: bool,
}

/// A member visible in a gateway channel, for avatar resolution and
/// mention rewriting.
#[derive(Debug, Clone)]
pub struct MemberProfile {
    pub user_id: String,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
}

/// A gateway channel reference resolved to a concrete channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub id: String,
    /// Name without the leading `#`.
    pub name: String,
    pub guild_id: Option<String>,
}

/// Outbound surface of the gateway network.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn send(&self, channel_id: &str, text: &str) -> anyhow::Result<()>;

    /// Deliver through a configured webhook so the message carries the
    /// original sender's name and avatar.
    async fn send_webhook(
        &self,
        webhook_url: &str,
        text: &str,
        profile: WebhookProfile,
    ) -> anyhow::Result<()>;

    async fn send_dm(&self, user_id: &str, text: &str) -> anyhow::Result<()>;

    async fn send_to_thread(&self, thread_id: &str, text: &str) -> anyhow::Result<()>;

    /// Find or create a thread with the given name under a parent channel.
    async fn ensure_thread(
        &self,
        parent_channel_id: &str,
        name: &str,
        auto_archive_minutes: u16,
    ) -> anyhow::Result<String>;

    async fn rename_thread(&self, thread_id: &str, name: &str) -> anyhow::Result<()>;
}

/// Synchronous cache lookups against the gateway's session state.
pub trait GatewayDirectory: Send + Sync {
    /// Channel name (without `#`) for a channel id.
    fn channel_name(&self, channel_id: &str) -> Option<String>;

    /// Role name for a role id.
    fn role_name(&self, guild_id: Option<&str>, role_id: &str) -> Option<String>;

    /// Display name (nickname, falling back to username) for a user id.
    fn user_display_name(&self, guild_id: Option<&str>, user_id: &str) -> Option<String>;

    /// Resolve a configured channel reference (opaque id or `#name`).
    fn resolve_channel(&self, reference: &str) -> Option<ResolvedChannel>;

    /// Members able to see a channel.
    fn channel_members(&self, channel_id: &str) -> Vec<MemberProfile>;

    /// Mention string for `@username#discriminator` (case-insensitive
    /// username, exact discriminator).
    fn member_mention(
        &self,
        guild_id: Option<&str>,
        username: &str,
        discriminator: &str,
    ) -> Option<String>;

    /// Mention string for a custom `:emoji:` (case-sensitive).
    fn emoji_mention(&self, guild_id: Option<&str>, name: &str) -> Option<String>;

    /// Mention string for a `#channel` reference (case-insensitive).
    fn channel_mention(&self, guild_id: Option<&str>, name: &str) -> Option<String>;

    /// Whether the bridge may ping `@everyone` in this channel.
    fn can_mention_everyone(&self, channel_id: &str) -> bool;
}

/// Outbound surface of the line-protocol network.
#[async_trait]
pub trait LineClient: Send + Sync {
    /// Send a line to a channel or nick.
    async fn say(&self, target: &str, text: &str) -> anyhow::Result<()>;

    async fn join(&self, channel: &str) -> anyhow::Result<()>;

    /// The bridge's current nick on this network.
    fn nickname(&self) -> String;
}

/// Durable object storage for uploaded files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a file and return its public URL.
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        content_type: Option<&str>,
    ) -> anyhow::Result<String>;
}

/// Best-effort attachment-URL upgrade. Never required for correctness: a
/// `None` means the original URL is relayed as-is.
#[async_trait]
pub trait AttachmentUpgrader: Send + Sync {
    async fn upgrade(&self, url: &str, name: &str, content_type: Option<&str>) -> Option<String>;
}
