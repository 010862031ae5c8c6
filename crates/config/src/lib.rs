//! Configuration loading, validation, and env substitution.
//!
//! Config files: `trestle.toml`, `trestle.yaml`, or `trestle.json`
//! Searched in `./` then `~/.config/trestle/`. When no file exists the
//! loader falls back to environment variables (`DISCORD_TOKEN`,
//! `IRC_SERVER`, `IRC_NICKNAME`, `CHANNEL_MAPPING`, ...), so the bridge can
//! run in a container without a mounted config.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{discover_and_load, load_config, load_from_env},
    schema::{
        BridgeConfig, DiscordConfig, FormatConfig, IgnoreConfig, IrcConfig, MediaConfig, PmConfig,
        RateLimitSettings, RecoverySettings, ServerConfig, SyncSettings,
    },
    validate::{ConfigError, validate},
};
