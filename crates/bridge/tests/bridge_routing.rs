//! End-to-end routing tests against stub collaborators.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    trestle_bridge::{
        Bridge, BridgeDeps, BridgeStore, GatewayAuthor, GatewayClient, GatewayDirectory,
        GatewayMessage, LineClient, MemberProfile, ResolvedChannel, ThreadMapping, WebhookProfile,
    },
    trestle_common::types::NetworkSide,
    trestle_config::BridgeConfig,
    trestle_recovery::{Reconnector, RecoveryConfig, RecoveryManager},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Stub collaborators ──────────────────────────────────────────────────

#[derive(Default)]
struct StubGateway {
    sent: Mutex<Vec<(String, String)>>,
    webhook_sent: Mutex<Vec<(String, String, WebhookProfile)>>,
    dms: Mutex<Vec<(String, String)>>,
    thread_sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl GatewayClient for StubGateway {
    async fn send(&self, channel_id: &str, text: &str) -> anyhow::Result<()> {
        lock(&self.sent).push((channel_id.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn send_webhook(
        &self,
        webhook_url: &str,
        text: &str,
        profile: WebhookProfile,
    ) -> anyhow::Result<()> {
        lock(&self.webhook_sent).push((webhook_url.to_owned(), text.to_owned(), profile));
        Ok(())
    }

    async fn send_dm(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        lock(&self.dms).push((user_id.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn send_to_thread(&self, thread_id: &str, text: &str) -> anyhow::Result<()> {
        lock(&self.thread_sent).push((thread_id.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn ensure_thread(
        &self,
        _parent_channel_id: &str,
        name: &str,
        _auto_archive_minutes: u16,
    ) -> anyhow::Result<String> {
        Ok(format!("thread-{name}"))
    }

    async fn rename_thread(&self, _thread_id: &str, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct StubDirectory {
    /// channel reference (`#name` or id) → resolved channel
    channels: HashMap<String, ResolvedChannel>,
    members: Vec<MemberProfile>,
}

impl StubDirectory {
    fn with_general() -> Self {
        let general = ResolvedChannel {
            id: "1000".into(),
            name: "general".into(),
            guild_id: Some("g1".into()),
        };
        let mut channels = HashMap::new();
        channels.insert("#general".into(), general.clone());
        channels.insert("1000".into(), general);
        Self {
            channels,
            members: Vec::new(),
        }
    }
}

impl GatewayDirectory for StubDirectory {
    fn channel_name(&self, channel_id: &str) -> Option<String> {
        self.channels.get(channel_id).map(|c| c.name.clone())
    }

    fn role_name(&self, _guild_id: Option<&str>, _role_id: &str) -> Option<String> {
        None
    }

    fn user_display_name(&self, _guild_id: Option<&str>, _user_id: &str) -> Option<String> {
        None
    }

    fn resolve_channel(&self, reference: &str) -> Option<ResolvedChannel> {
        self.channels.get(reference).cloned()
    }

    fn channel_members(&self, _channel_id: &str) -> Vec<MemberProfile> {
        self.members.clone()
    }

    fn member_mention(
        &self,
        _guild_id: Option<&str>,
        _username: &str,
        _discriminator: &str,
    ) -> Option<String> {
        None
    }

    fn emoji_mention(&self, _guild_id: Option<&str>, _name: &str) -> Option<String> {
        None
    }

    fn channel_mention(&self, _guild_id: Option<&str>, _name: &str) -> Option<String> {
        None
    }

    fn can_mention_everyone(&self, _channel_id: &str) -> bool {
        false
    }
}

#[derive(Default)]
struct StubLine {
    said: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl LineClient for StubLine {
    async fn say(&self, target: &str, text: &str) -> anyhow::Result<()> {
        lock(&self.said).push((target.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn join(&self, _channel: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn nickname(&self) -> String {
        "trestlebot".into()
    }
}

#[derive(Default)]
struct MemStore {
    metrics: Mutex<HashMap<String, String>>,
    threads: Mutex<HashMap<String, ThreadMapping>>,
    members: Mutex<HashMap<String, BTreeSet<String>>>,
}

#[async_trait]
impl BridgeStore for MemStore {
    async fn save_metric(&self, key: &str, value: &str) -> anyhow::Result<()> {
        lock(&self.metrics).insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn get_metric(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(lock(&self.metrics).get(key).cloned())
    }

    async fn save_thread_mapping(
        &self,
        nick: &str,
        thread_id: &str,
        channel_id: &str,
    ) -> anyhow::Result<()> {
        lock(&self.threads).insert(
            nick.to_owned(),
            ThreadMapping {
                nick: nick.to_owned(),
                thread_id: thread_id.to_owned(),
                channel_id: channel_id.to_owned(),
                last_activity_ms: 0,
            },
        );
        Ok(())
    }

    async fn get_thread_mapping(&self, nick: &str) -> anyhow::Result<Option<ThreadMapping>> {
        Ok(lock(&self.threads).get(nick).cloned())
    }

    async fn all_thread_mappings(&self) -> anyhow::Result<Vec<ThreadMapping>> {
        Ok(lock(&self.threads).values().cloned().collect())
    }

    async fn rename_thread_mapping(&self, old_nick: &str, new_nick: &str) -> anyhow::Result<()> {
        let mut threads = lock(&self.threads);
        if let Some(mut mapping) = threads.remove(old_nick) {
            mapping.nick = new_nick.to_owned();
            threads.insert(new_nick.to_owned(), mapping);
        }
        Ok(())
    }

    async fn delete_thread_mapping(&self, nick: &str) -> anyhow::Result<()> {
        lock(&self.threads).remove(nick);
        Ok(())
    }

    async fn save_channel_members(
        &self,
        channel: &str,
        members: &BTreeSet<String>,
    ) -> anyhow::Result<()> {
        lock(&self.members).insert(channel.to_owned(), members.clone());
        Ok(())
    }

    async fn get_channel_members(&self, channel: &str) -> anyhow::Result<BTreeSet<String>> {
        Ok(lock(&self.members).get(channel).cloned().unwrap_or_default())
    }

    async fn all_channel_members(&self) -> anyhow::Result<HashMap<String, BTreeSet<String>>> {
        Ok(lock(&self.members).clone())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct NoopReconnector;

#[async_trait]
impl Reconnector for NoopReconnector {
    async fn reconnect(&self, _service: NetworkSide) -> anyhow::Result<()> {
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    bridge: Bridge,
    gateway: Arc<StubGateway>,
    line: Arc<StubLine>,
    store: Arc<MemStore>,
}

fn base_config() -> BridgeConfig {
    let mut config = BridgeConfig {
        discord: trestle_config::DiscordConfig {
            token: String::from("tok").into(),
        },
        ..BridgeConfig::default()
    };
    config.irc.server = "irc.example.org".into();
    config.irc.nickname = "trestlebot".into();
    config
        .mapping
        .insert("#general".into(), "#irc-general".into());
    config.rate_limit.max_messages = 5;
    config.rate_limit.window_secs = 60;
    // Deterministic rendered lines in assertions.
    config.nick_color = false;
    config
}

fn harness(config: BridgeConfig) -> Harness {
    harness_with_store(config, Arc::new(MemStore::default()))
}

fn harness_with_store(config: BridgeConfig, store: Arc<MemStore>) -> Harness {
    let gateway = Arc::new(StubGateway::default());
    let line = Arc::new(StubLine::default());
    let (events, _rx) = mpsc::unbounded_channel();
    let recovery = RecoveryManager::new(
        RecoveryConfig {
            max_attempts: 0,
            ..RecoveryConfig::default()
        },
        Arc::new(NoopReconnector),
        events,
    );
    let bridge = Bridge::new(BridgeDeps {
        config,
        gateway: gateway.clone(),
        directory: Arc::new(StubDirectory::with_general()),
        line: line.clone(),
        store: store.clone(),
        recovery,
        upgrader: None,
    })
    .expect("bridge builds from a valid config");
    Harness {
        bridge,
        gateway,
        line,
        store,
    }
}

fn gateway_message(id: &str, text: &str) -> GatewayMessage {
    GatewayMessage {
        id: id.to_owned(),
        channel_id: "1000".to_owned(),
        channel_name: Some("general".to_owned()),
        guild_id: Some("g1".to_owned()),
        author: GatewayAuthor {
            id: "42".to_owned(),
            username: "alice".to_owned(),
            display_name: "alice".to_owned(),
            is_self: false,
        },
        content: text.to_owned(),
        ..GatewayMessage::default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn relays_gateway_messages_to_the_mapped_channel() {
    let h = harness(base_config());
    h.bridge
        .route_from_gateway(gateway_message("1", "hello world"))
        .await;

    let said = lock(&h.line.said);
    assert_eq!(said.len(), 1);
    assert_eq!(said[0].0, "#irc-general");
    assert_eq!(said[0].1, "<alice> hello world");
}

#[tokio::test]
async fn sixth_rapid_message_is_rejected_and_not_relayed() {
    let h = harness(base_config());
    for i in 1..=6 {
        h.bridge
            .route_from_gateway(gateway_message(&i.to_string(), &format!("message {i}")))
            .await;
    }

    let said = lock(&h.line.said);
    assert_eq!(said.len(), 5, "messages 1-5 relay, message 6 is rejected");
    assert!(said.iter().all(|(channel, _)| channel == "#irc-general"));

    // The sender got exactly one warning notice.
    let dms = lock(&h.gateway.dms);
    assert_eq!(dms.len(), 1);
    assert!(dms[0].1.contains("Rate limit"));
}

#[tokio::test]
async fn unmapped_channels_are_dropped_silently() {
    let h = harness(base_config());
    let mut msg = gateway_message("1", "hello");
    msg.channel_id = "9999".into();
    msg.channel_name = Some("random".into());
    h.bridge.route_from_gateway(msg).await;
    assert!(lock(&h.line.said).is_empty());
}

#[tokio::test]
async fn self_and_ignored_senders_are_dropped() {
    let mut config = base_config();
    config.ignore.discord.push("Muted".into());
    let h = harness(config);

    let mut own = gateway_message("1", "own message");
    own.author.is_self = true;
    h.bridge.route_from_gateway(own).await;

    let mut muted = gateway_message("2", "spam");
    muted.author.username = "muted".into();
    h.bridge.route_from_gateway(muted).await;

    assert!(lock(&h.line.said).is_empty());
}

#[tokio::test]
async fn multiline_messages_relay_line_by_line() {
    let h = harness(base_config());
    h.bridge
        .route_from_gateway(gateway_message("7", "one\ntwo\r\nthree"))
        .await;

    let said = lock(&h.line.said);
    let texts: Vec<&str> = said.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(texts, ["<alice> one", "<alice> two", "<alice> three"]);
}

#[tokio::test]
async fn commands_emit_a_prelude_and_raw_text() {
    let mut config = base_config();
    config.command_characters.push("!".into());
    let h = harness(config);
    h.bridge
        .route_from_gateway(gateway_message("9", "!roll 2d6"))
        .await;

    let said = lock(&h.line.said);
    assert_eq!(said.len(), 2);
    assert_eq!(said[0].1, "Command sent from Discord by alice:");
    assert_eq!(said[1].1, "!roll 2d6");
}

#[tokio::test]
async fn edit_replays_one_annotation_per_recorded_line() {
    let h = harness(base_config());
    h.bridge
        .route_from_gateway(gateway_message("11", "first\nsecond"))
        .await;
    lock(&h.line.said).clear();

    h.bridge
        .handle_gateway_edit(gateway_message("11", "corrected"))
        .await;

    let said = lock(&h.line.said);
    assert_eq!(said.len(), 2);
    for (channel, text) in said.iter() {
        assert_eq!(channel, "#irc-general");
        assert!(text.contains("(edited)"));
        assert!(text.contains("corrected"));
    }
}

#[tokio::test]
async fn edit_of_unknown_message_produces_nothing() {
    let h = harness(base_config());
    h.bridge
        .handle_gateway_edit(gateway_message("404", "whatever"))
        .await;
    assert!(lock(&h.line.said).is_empty());
}

#[tokio::test]
async fn delete_replays_deleted_annotations() {
    let h = harness(base_config());
    h.bridge
        .route_from_gateway(gateway_message("13", "doomed"))
        .await;
    lock(&h.line.said).clear();

    h.bridge.handle_gateway_delete("13").await;

    let said = lock(&h.line.said);
    assert_eq!(said.len(), 1);
    assert!(said[0].1.contains("(deleted)"));
    assert!(said[0].1.contains("doomed"));
}

#[tokio::test]
async fn line_messages_relay_into_the_gateway_channel() {
    let h = harness(base_config());
    h.bridge
        .route_from_line("bob", "#IRC-General", "hi discord")
        .await;

    let sent = lock(&h.gateway.sent);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "1000");
    assert_eq!(sent[0].1, "**<bob>** hi discord");
}

#[tokio::test]
async fn line_messages_prefer_webhooks_with_padded_usernames() {
    let mut config = base_config();
    config.webhooks.insert(
        "#general".into(),
        "https://gateway.example/api/webhooks/555/token".into(),
    );
    let h = harness(config);
    h.bridge.route_from_line("x", "#irc-general", "short nick").await;

    assert!(lock(&h.gateway.sent).is_empty());
    let webhook_sent = lock(&h.gateway.webhook_sent);
    assert_eq!(webhook_sent.len(), 1);
    assert_eq!(webhook_sent[0].2.username, "x_");
    assert!(!webhook_sent[0].2.allow_everyone);
}

#[tokio::test]
async fn own_webhook_messages_are_never_relayed_back() {
    let mut config = base_config();
    config.webhooks.insert(
        "#general".into(),
        "https://gateway.example/api/webhooks/555/token".into(),
    );
    let h = harness(config);

    let mut msg = gateway_message("21", "looped");
    msg.author.id = "555".into();
    h.bridge.route_from_gateway(msg).await;
    assert!(lock(&h.line.said).is_empty());
}

#[tokio::test]
async fn join_and_part_notices_track_membership() {
    let mut config = base_config();
    config.irc.status_notices = true;
    let h = harness(config);

    h.bridge
        .handle_line_names(
            "#irc-general",
            vec!["bob".to_owned(), "carol".to_owned()],
        )
        .await;
    h.bridge.handle_line_join("#irc-general", "dave").await;
    h.bridge
        .handle_line_part("#irc-general", "bob", "bye")
        .await;
    h.bridge
        .handle_line_quit("carol", "ping timeout", &[])
        .await;

    let sent = lock(&h.gateway.sent);
    let texts: Vec<&str> = sent.iter().map(|(_, t)| t.as_str()).collect();
    assert!(texts.contains(&"*dave* has joined the channel"));
    assert!(texts.contains(&"*bob* has left the channel (bye)"));
    assert!(texts.contains(&"*carol* has quit (ping timeout)"));

    // Membership survived in the store.
    let members = h
        .store
        .get_channel_members("#irc-general")
        .await
        .expect("store read");
    assert!(members.contains("dave"));
    assert!(!members.contains("bob"));
    assert!(!members.contains("carol"));
}

#[tokio::test]
async fn line_private_messages_open_a_thread() {
    let mut config = base_config();
    config.pm.channel = Some("#general".into());
    let h = harness(config);

    h.bridge.handle_line_pm("eve", "psst").await;
    h.bridge.handle_line_pm("eve", "again").await;

    let thread_sent = lock(&h.gateway.thread_sent);
    assert_eq!(thread_sent.len(), 2);
    assert_eq!(thread_sent[0].0, "thread-PM: eve");
    assert!(thread_sent[0].1.contains("psst"));
}

#[tokio::test]
async fn malformed_webhook_urls_are_rejected_at_startup() {
    let mut config = base_config();
    config.webhooks.insert("#general".into(), "not-a-url".into());

    let (events, _rx) = mpsc::unbounded_channel();
    let recovery = RecoveryManager::new(
        RecoveryConfig {
            max_attempts: 0,
            ..RecoveryConfig::default()
        },
        Arc::new(NoopReconnector),
        events,
    );
    let result = Bridge::new(BridgeDeps {
        config,
        gateway: Arc::new(StubGateway::default()),
        directory: Arc::new(StubDirectory::with_general()),
        line: Arc::new(StubLine::default()),
        store: Arc::new(MemStore::default()),
        recovery,
        upgrader: None,
    });
    assert!(result.is_err(), "a webhook url without id/token must fail");
}

#[tokio::test]
async fn correlation_store_survives_a_restart() {
    let store = Arc::new(MemStore::default());
    let h = harness_with_store(base_config(), store.clone());
    h.bridge
        .route_from_gateway(gateway_message("31", "before restart"))
        .await;
    h.bridge.flush().await;

    // A new bridge over the same store picks the correlation back up.
    let restarted = harness_with_store(base_config(), store);
    restarted.bridge.restore_persisted().await;
    restarted
        .bridge
        .handle_gateway_edit(gateway_message("31", "after restart"))
        .await;

    {
        let said = lock(&restarted.line.said);
        assert_eq!(said.len(), 1);
        assert!(said[0].1.contains("(edited)"));
        assert!(said[0].1.contains("after restart"));
    }

    // Unknown ids still miss after the reload.
    restarted.bridge.handle_gateway_delete("404").await;
    assert_eq!(lock(&restarted.line.said).len(), 1);
}
