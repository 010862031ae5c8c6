use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    env_subst::substitute_env,
    schema::BridgeConfig,
    validate::{ConfigError, validate},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["trestle.toml", "trestle.yaml", "trestle.yml", "trestle.json"];

/// Load and validate config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let raw = substitute_env(&raw);
    let config = parse_config(&raw, path)?;
    validate(&config)?;
    Ok(config)
}

/// Discover and load config from standard locations, falling back to
/// environment variables when no file exists.
///
/// Search order:
/// 1. `./trestle.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/trestle/trestle.{toml,yaml,yml,json}` (user-global)
/// 3. environment variables (`DISCORD_TOKEN`, `IRC_SERVER`, ...)
pub fn discover_and_load() -> Result<BridgeConfig, ConfigError> {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        return load_config(&path);
    }
    debug!("no config file found, reading environment");
    load_from_env()
}

/// Build a config purely from environment variables. Used for container
/// deployments without a mounted config file.
pub fn load_from_env() -> Result<BridgeConfig, ConfigError> {
    let mut config = BridgeConfig::default();

    if let Ok(token) = std::env::var("DISCORD_TOKEN") {
        config.discord.token = token.into();
    }
    if let Ok(server) = std::env::var("IRC_SERVER") {
        config.irc.server = server;
    }
    if let Ok(nickname) = std::env::var("IRC_NICKNAME") {
        config.irc.nickname = nickname;
    }
    if let Ok(port) = std::env::var("IRC_PORT")
        && let Ok(port) = port.parse()
    {
        config.irc.port = port;
    }
    if let Ok(mapping) = std::env::var("CHANNEL_MAPPING") {
        config.mapping = serde_json::from_str(&mapping)
            .map_err(|e| ConfigError::Invalid(format!("CHANNEL_MAPPING is not valid JSON: {e}")))?;
    }
    if let Ok(webhooks) = std::env::var("WEBHOOKS") {
        config.webhooks = serde_json::from_str(&webhooks)
            .map_err(|e| ConfigError::Invalid(format!("WEBHOOKS is not valid JSON: {e}")))?;
    }
    if let Ok(chars) = std::env::var("COMMAND_CHARACTERS") {
        config.command_characters = serde_json::from_str(&chars).map_err(|e| {
            ConfigError::Invalid(format!("COMMAND_CHARACTERS is not valid JSON: {e}"))
        })?;
    }
    config.parallel_ping_fix = env_flag("PARALLEL_PING_FIX", config.parallel_ping_fix);
    config.nick_color = env_flag("IRC_NICK_COLOR", config.nick_color);
    config.irc.status_notices = env_flag("IRC_STATUS_NOTICES", config.irc.status_notices);
    if let Ok(channel) = std::env::var("PM_CHANNEL") {
        config.pm.channel = Some(channel);
    }

    validate(&config)?;
    Ok(config)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v == "true" || v == "1",
        Err(_) => default,
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/trestle/
    if let Some(dirs) = directories::ProjectDirs::from("", "", "trestle") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

fn parse_config(raw: &str, path: &Path) -> Result<BridgeConfig, ConfigError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let parsed = match ext {
        "toml" => toml::from_str(raw).map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(raw).map_err(|e| e.to_string()),
        _ => Err(format!("unsupported config format: .{ext}")),
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create temp config");
        file.write_all(body.as_bytes()).expect("write temp config");
        path
    }

    const MINIMAL: &str = r##"
        [discord]
        token = "tok"

        [irc]
        server = "irc.example.org"
        nickname = "bridge"

        [mapping]
        "#general" = "#irc-general"
    "##;

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "trestle.toml", MINIMAL);
        let config = load_config(&path).expect("config loads");
        assert_eq!(config.irc.nickname, "bridge");
    }

    #[test]
    fn loads_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &dir,
            "trestle.json",
            r##"{
                "discord": {"token": "tok"},
                "irc": {"server": "irc.example.org", "nickname": "bridge"},
                "mapping": {"#general": "#irc-general"}
            }"##,
        );
        let config = load_config(&path).expect("config loads");
        assert_eq!(config.mapping["#general"], "#irc-general");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config(Path::new("/nonexistent/trestle.toml"))
            .expect_err("missing file must fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_at_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "trestle.toml", "[discord]\ntoken = \"tok\"");
        let err = load_config(&path).expect_err("config without irc settings must fail");
        assert!(matches!(err, ConfigError::MissingField(_)));
    }
}
