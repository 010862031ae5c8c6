//! Config schema types for the bridge.

use std::{collections::HashMap, path::PathBuf};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Default IRC nick color palette (mIRC color names understood by
/// [`trestle-bridge`]'s formatter).
pub const DEFAULT_NICK_COLORS: &[&str] = &[
    "light_blue",
    "dark_blue",
    "light_red",
    "dark_red",
    "light_green",
    "dark_green",
    "magenta",
    "light_magenta",
    "orange",
    "yellow",
    "cyan",
    "light_cyan",
];

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub discord: DiscordConfig,
    pub irc: IrcConfig,
    /// Discord channel (id or `#name`) → IRC channel. The IRC side may carry
    /// a trailing channel key (`"#chan key"`); the key is used when joining
    /// but stripped from the mapping.
    pub mapping: HashMap<String, String>,
    /// Discord channel (id or `#name`) → webhook URL for native-looking
    /// relayed messages.
    pub webhooks: HashMap<String, String>,
    pub ignore: IgnoreConfig,
    pub format: FormatConfig,
    /// Message prefixes treated as bot commands and relayed raw.
    pub command_characters: Vec<String>,
    /// Color IRC nicks deterministically per sender.
    pub nick_color: bool,
    /// Palette used when `nick_color` is enabled.
    pub nick_colors: Vec<String>,
    /// Insert a zero-width space into relayed nicks so users present on
    /// both networks are not pinged twice.
    pub parallel_ping_fix: bool,
    pub rate_limit: RateLimitSettings,
    pub recovery: RecoverySettings,
    pub sync: SyncSettings,
    pub pm: PmConfig,
    /// SQLite database path. Defaults to `trestle.db` in the working
    /// directory.
    pub db_path: Option<PathBuf>,
    /// Optional object-storage uploader for attachment URLs.
    pub media: Option<MediaConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            discord: DiscordConfig::default(),
            irc: IrcConfig::default(),
            mapping: HashMap::new(),
            webhooks: HashMap::new(),
            ignore: IgnoreConfig::default(),
            format: FormatConfig::default(),
            command_characters: Vec::new(),
            nick_color: true,
            nick_colors: DEFAULT_NICK_COLORS.iter().map(|s| (*s).into()).collect(),
            parallel_ping_fix: false,
            rate_limit: RateLimitSettings::default(),
            recovery: RecoverySettings::default(),
            sync: SyncSettings::default(),
            pm: PmConfig::default(),
            db_path: None,
            media: None,
        }
    }
}

/// Liveness endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Discord connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// IRC connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrcConfig {
    pub server: String,
    pub port: u16,
    pub nickname: String,
    pub use_tls: bool,
    /// Server password, if the network requires one.
    pub password: Option<String>,
    /// Raw IRC lines sent after registration (e.g. NickServ auth).
    pub auto_send_commands: Vec<String>,
    /// Relay join/part/quit/nick notices to Discord.
    pub status_notices: bool,
    /// Also announce the bridge's own joins.
    pub announce_self_join: bool,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 6697,
            nickname: String::new(),
            use_tls: true,
            password: None,
            auto_send_commands: Vec::new(),
            status_notices: false,
            announce_self_join: false,
        }
    }
}

/// Senders whose messages are never relayed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// IRC nicks, matched case-insensitively.
    pub irc: Vec<String>,
    /// Discord usernames, matched case-insensitively.
    pub discord: Vec<String>,
    /// Discord user ids, matched exactly.
    pub discord_ids: Vec<String>,
}

/// Message templates. `{$token}` placeholders are substituted; unmatched
/// tokens are left verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Discord → IRC text lines. Tokens: displayUsername, author, nickname,
    /// text, discordChannel, ircChannel.
    pub irc_text: String,
    /// Discord → IRC attachment lines. Adds: attachmentURL.
    pub url_attachment: String,
    /// Line announcing a relayed command. Adds: side. Empty disables the
    /// prelude.
    pub command_prelude: String,
    /// IRC → Discord messages (non-webhook). Tokens: author, nickname,
    /// displayUsername, text, withMentions, withFilteredMentions,
    /// discordChannel, ircChannel.
    pub discord_text: String,
    /// Fallback webhook avatar URL template. Token: nickname.
    pub webhook_avatar_url: Option<String>,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            irc_text: "<{$displayUsername}> {$text}".into(),
            url_attachment: "<{$displayUsername}> {$attachmentURL}".into(),
            command_prelude: "Command sent from {$side} by {$nickname}:".into(),
            discord_text: "**<{$author}>** {$withMentions}".into(),
            webhook_avatar_url: None,
        }
    }
}

/// Admission-control settings (see `trestle-limiter`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_messages: usize,
    pub window_secs: u64,
    pub warning_threshold: u32,
    pub block_secs: u64,
    pub spam_detection: bool,
    /// Notify senders when their messages are rejected.
    pub notify_sender: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            window_secs: 60,
            warning_threshold: 3,
            block_secs: 300,
            spam_detection: true,
            notify_sender: true,
        }
    }
}

/// Connection-recovery settings (see `trestle-recovery`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub circuit_threshold: u32,
    pub cooldown_secs: u64,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    pub max_attempts: u32,
    pub attempt_timeout_secs: u64,
    pub silence_timeout_secs: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            circuit_threshold: 5,
            cooldown_secs: 60,
            base_delay_ms: 1000,
            max_delay_secs: 30,
            max_attempts: 10,
            attempt_timeout_secs: 30,
            silence_timeout_secs: 300,
        }
    }
}

/// Edit/delete correlation settings (see `trestle-sync`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// How long edits and deletes remain correlatable.
    pub edit_window_minutes: u64,
    /// Cadence of the periodic eviction sweep.
    pub sweep_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            edit_window_minutes: 30,
            sweep_interval_secs: 300,
        }
    }
}

/// IRC private messages relayed into Discord threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PmConfig {
    /// Discord channel (id or `#name`) that hosts PM threads. Unset
    /// disables the feature.
    pub channel: Option<String>,
    pub thread_prefix: String,
    pub auto_archive_minutes: u16,
}

impl Default for PmConfig {
    fn default() -> Self {
        Self {
            channel: None,
            thread_prefix: "PM: ".into(),
            auto_archive_minutes: 60,
        }
    }
}

/// Object-storage uploader settings. Attachment bytes are PUT to
/// `{endpoint}/{key_prefix}{name}` and referenced as
/// `{public_url_base}/{key}`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub endpoint: String,
    pub public_url_base: String,
    pub key_prefix: Option<String>,
    /// Bearer token sent with uploads, if the endpoint requires one.
    #[serde(serialize_with = "serialize_opt_secret")]
    pub auth_token: Option<Secret<String>>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            public_url_base: String::new(),
            key_prefix: None,
            auth_token: None,
        }
    }
}

impl std::fmt::Debug for MediaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaConfig")
            .field("endpoint", &self.endpoint)
            .field("public_url_base", &self.public_url_base)
            .field("key_prefix", &self.key_prefix)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn serialize_opt_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.format.irc_text, "<{$displayUsername}> {$text}");
        assert_eq!(cfg.rate_limit.max_messages, 10);
        assert_eq!(cfg.recovery.circuit_threshold, 5);
        assert_eq!(cfg.sync.edit_window_minutes, 30);
        assert_eq!(cfg.pm.thread_prefix, "PM: ");
        assert_eq!(cfg.irc.port, 6697);
        assert!(cfg.irc.use_tls);
        assert!(cfg.nick_color);
        assert_eq!(cfg.nick_colors.len(), DEFAULT_NICK_COLORS.len());
    }

    #[test]
    fn deserialize_from_toml() {
        let toml = r##"
            command_characters = ["!", "."]
            nick_color = true

            [discord]
            token = "abc123"

            [irc]
            server = "irc.libera.chat"
            nickname = "trestlebot"

            [mapping]
            "#general" = "#irc-general"

            [rate_limit]
            max_messages = 5
            window_secs = 60
        "##;
        let cfg: BridgeConfig = toml::from_str(toml).expect("config parses");
        assert_eq!(cfg.discord.token.expose_secret(), "abc123");
        assert_eq!(cfg.irc.server, "irc.libera.chat");
        assert_eq!(cfg.mapping["#general"], "#irc-general");
        assert_eq!(cfg.rate_limit.max_messages, 5);
        // defaults for unspecified fields
        assert_eq!(cfg.rate_limit.warning_threshold, 3);
        assert!(cfg.webhooks.is_empty());
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg: BridgeConfig =
            toml::from_str("[discord]\ntoken = \"very-secret\"").expect("config parses");
        let rendered = format!("{:?}", cfg.discord);
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
