//! Startup validation.
//!
//! Configuration problems are the only errors allowed to reach the process
//! boundary; everything found here is fatal before any connection is opened.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use crate::schema::BridgeConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration field: {0}")]
    MissingField(&'static str),

    #[error("invalid channel mapping: {0}")]
    InvalidMapping(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Validate a loaded config. Every check here guards an assumption the rest
/// of the bridge makes without re-checking.
pub fn validate(config: &BridgeConfig) -> Result<(), ConfigError> {
    if config.discord.token.expose_secret().is_empty() {
        return Err(ConfigError::MissingField("discord.token"));
    }
    if config.irc.server.is_empty() {
        return Err(ConfigError::MissingField("irc.server"));
    }
    if config.irc.nickname.is_empty() {
        return Err(ConfigError::MissingField("irc.nickname"));
    }
    if config.mapping.is_empty() {
        return Err(ConfigError::MissingField("mapping"));
    }

    for (discord_channel, irc_channel) in &config.mapping {
        if discord_channel.is_empty() {
            return Err(ConfigError::InvalidMapping(
                "empty Discord channel key".into(),
            ));
        }
        let name = irc_channel.split_whitespace().next().unwrap_or_default();
        if !name.starts_with('#') {
            return Err(ConfigError::InvalidMapping(format!(
                "IRC channel {irc_channel:?} for {discord_channel:?} must start with '#'"
            )));
        }
    }

    if config.nick_color && config.nick_colors.is_empty() {
        // An empty palette with coloring enabled would divide by zero at the
        // first relayed message; catch it here instead.
        return Err(ConfigError::Invalid(
            "nick_color is enabled but nick_colors is empty".into(),
        ));
    }

    if let Some(media) = &config.media {
        if media.endpoint.is_empty() {
            return Err(ConfigError::MissingField("media.endpoint"));
        }
        if media.public_url_base.is_empty() {
            return Err(ConfigError::MissingField("media.public_url_base"));
        }
    }

    Ok(())
}
