//! Process boundary: config loading, telemetry, the liveness endpoint, and
//! the bridge lifecycle. Only configuration errors exit the process;
//! transport failures are handed to the recovery manager.

mod liveness;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Result,
    async_trait::async_trait,
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    trestle_bridge::{Bridge, BridgeDeps, BridgeStore},
    trestle_common::types::NetworkSide,
    trestle_config::BridgeConfig,
    trestle_discord::DiscordTransport,
    trestle_irc::IrcTransport,
    trestle_media::MediaUpgrader,
    trestle_recovery::{Reconnector, RecoveryConfig, RecoveryManager},
    trestle_store::SqliteStore,
};

#[derive(Parser)]
#[command(name = "trestle", about = "Trestle — resilient Discord/IRC bridge")]
struct Cli {
    /// Path to the config file. Defaults to discovering
    /// trestle.{toml,yaml,json} in ./ and ~/.config/trestle/, then
    /// environment variables.
    #[arg(short, long, env = "TRESTLE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Validate the configuration and exit.
    #[arg(long, default_value_t = false)]
    check: bool,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// The recovery manager's externally supplied reconnection procedure: the
/// gateway session resumes on its own (probe it), the line connection is
/// rebuilt from scratch.
struct TransportReconnector {
    discord: Arc<DiscordTransport>,
    irc: Arc<IrcTransport>,
}

#[async_trait]
impl Reconnector for TransportReconnector {
    async fn reconnect(&self, service: NetworkSide) -> Result<()> {
        match service {
            NetworkSide::Gateway => self.discord.check_alive().await,
            NetworkSide::Line => self.irc.reconnect().await,
        }
    }
}

fn recovery_config(config: &BridgeConfig) -> RecoveryConfig {
    RecoveryConfig {
        circuit_threshold: config.recovery.circuit_threshold,
        cooldown: Duration::from_secs(config.recovery.cooldown_secs),
        base_delay: Duration::from_millis(config.recovery.base_delay_ms),
        max_delay: Duration::from_secs(config.recovery.max_delay_secs),
        max_attempts: config.recovery.max_attempts,
        attempt_timeout: Duration::from_secs(config.recovery.attempt_timeout_secs),
        silence_timeout: Duration::from_secs(config.recovery.silence_timeout_secs),
        ..RecoveryConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    // Configuration problems are the only fatal startup errors.
    let config = match &cli.config {
        Some(path) => trestle_config::load_config(path)?,
        None => trestle_config::discover_and_load()?,
    };
    if cli.check {
        println!("configuration OK");
        return Ok(());
    }

    run(config).await;
    Ok(())
}

async fn run(config: BridgeConfig) {
    // Durable storage; falling back to in-memory only degrades durability.
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("trestle.db"));
    let store: Arc<dyn BridgeStore> = match SqliteStore::open(&db_path).await {
        Ok(store) => {
            if let Err(e) = store.cleanup().await {
                warn!(error = %e, "database cleanup failed");
            }
            Arc::new(store)
        },
        Err(e) => {
            warn!(path = %db_path.display(), error = %e, "falling back to in-memory storage");
            match SqliteStore::in_memory().await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(error = %e, "in-memory storage unavailable, persistence disabled");
                    return;
                },
            }
        },
    };

    let (gateway_tx, gateway_rx) = tokio::sync::mpsc::unbounded_channel();
    let (line_tx, line_rx) = tokio::sync::mpsc::unbounded_channel();
    let (recovery_tx, recovery_rx) = tokio::sync::mpsc::unbounded_channel();

    info!("connecting to discord and irc");
    let discord = match DiscordTransport::connect(&config.discord.token, gateway_tx).await {
        Ok(transport) => transport,
        Err(e) => {
            // A client that cannot even be built means a bad token shape,
            // not transport weather.
            warn!(error = %e, "failed to initialize discord client");
            return;
        },
    };

    let join_list = trestle_bridge::ChannelMap::new(&config.mapping)
        .join_list()
        .to_vec();
    let irc = IrcTransport::new(config.irc.clone(), join_list, line_tx);

    let reconnector = Arc::new(TransportReconnector {
        discord: Arc::clone(&discord),
        irc: Arc::clone(&irc),
    });
    let recovery = RecoveryManager::new(recovery_config(&config), reconnector, recovery_tx);

    let upgrader: Option<Arc<dyn trestle_bridge::AttachmentUpgrader>> = config
        .media
        .clone()
        .map(|media| Arc::new(MediaUpgrader::new(media)) as Arc<_>);

    let bridge = match Bridge::new(BridgeDeps {
        config: config.clone(),
        gateway: discord.clone(),
        directory: discord.clone(),
        line: irc.clone(),
        store,
        recovery: recovery.clone(),
        upgrader,
    }) {
        Ok(bridge) => Arc::new(bridge),
        Err(e) => {
            warn!(error = %e, "failed to assemble bridge");
            return;
        },
    };

    // First IRC connection; failure starts a recovery cycle instead of
    // crashing.
    if let Err(e) = irc.connect().await {
        warn!(error = %e, "initial irc connection failed, scheduling recovery");
        recovery.record_failure(NetworkSide::Line, &e);
    }

    bridge.connect(gateway_rx, line_rx, recovery_rx).await;

    let liveness = tokio::spawn(liveness::serve(
        Arc::clone(&bridge),
        config.server.bind.clone(),
        config.server.port,
    ));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => warn!(error = %e, "signal listener failed, shutting down"),
    }

    bridge.disconnect().await;
    irc.disconnect();
    liveness.abort();
    info!("goodbye");
}
