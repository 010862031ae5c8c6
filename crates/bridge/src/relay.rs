//! The bridge core: admission control, content rewriting, destination
//! resolution, delivery, and correlation bookkeeping.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    trestle_common::types::NetworkSide,
    trestle_config::BridgeConfig,
    trestle_limiter::{RateLimitConfig, RateLimiter, Rejection},
    trestle_recovery::RecoveryManager,
    trestle_sync::MessageSynchronizer,
};

use crate::{
    client::{
        AttachmentUpgrader, GatewayClient, GatewayDirectory, LineClient, MemberProfile,
        ResolvedChannel, WebhookProfile,
    },
    error::{Context, Result},
    event::{Attachment, GatewayAuthor, GatewayMessage, ThreadInfo},
    format, mapping::ChannelMap,
    metrics::{BridgeMetrics, MetricsSnapshot},
    rewrite,
    state::AppState,
    store::BridgeStore,
};

/// Store keys for serialized state that survives restarts.
const SYNC_SNAPSHOT_KEY: &str = "message_sync_history";
const METRICS_KEY: &str = "bridge_metrics";

/// Everything the bridge core needs injected.
pub struct BridgeDeps {
    pub config: BridgeConfig,
    pub gateway: Arc<dyn GatewayClient>,
    pub directory: Arc<dyn GatewayDirectory>,
    pub line: Arc<dyn LineClient>,
    pub store: Arc<dyn BridgeStore>,
    pub recovery: RecoveryManager,
    pub upgrader: Option<Arc<dyn AttachmentUpgrader>>,
}

pub struct Bridge {
    pub(crate) config: BridgeConfig,
    pub(crate) map: ChannelMap,
    pub(crate) limiter: RateLimiter,
    pub(crate) sync: MessageSynchronizer,
    pub(crate) recovery: RecoveryManager,
    pub(crate) gateway: Arc<dyn GatewayClient>,
    pub(crate) directory: Arc<dyn GatewayDirectory>,
    pub(crate) line: Arc<dyn LineClient>,
    pub(crate) store: Arc<dyn BridgeStore>,
    pub(crate) upgrader: Option<Arc<dyn AttachmentUpgrader>>,
    pub(crate) state: AppState,
    pub(crate) metrics: BridgeMetrics,
    /// Ids of the bridge's own webhooks, so their messages are never
    /// relayed back.
    webhook_ids: HashSet<String>,
    pub(crate) cancel: CancellationToken,
}

impl Bridge {
    pub fn new(deps: BridgeDeps) -> Result<Self> {
        trestle_config::validate(&deps.config)?;

        let config = deps.config;
        let map = ChannelMap::new(&config.mapping);
        let limiter = RateLimiter::new(RateLimitConfig {
            max_messages: config.rate_limit.max_messages,
            window: Duration::from_secs(config.rate_limit.window_secs),
            warning_threshold: config.rate_limit.warning_threshold,
            block_duration: Duration::from_secs(config.rate_limit.block_secs),
            spam_detection: config.rate_limit.spam_detection,
        });
        let sync = MessageSynchronizer::new(Duration::from_secs(
            config.sync.edit_window_minutes * 60,
        ));
        // Webhook URLs end in /<id>/<token>; a URL without both segments
        // can never have produced a message we should skip, so treat it as
        // a configuration mistake up front.
        let mut webhook_ids = HashSet::new();
        for (channel, url) in &config.webhooks {
            let id = url
                .rsplit('/')
                .nth(1)
                .filter(|segment| !segment.is_empty())
                .with_context(|| format!("invalid webhook url for {channel}"))?;
            webhook_ids.insert(id.to_owned());
        }

        let state = AppState::new(Arc::clone(&deps.store));
        Ok(Self {
            config,
            map,
            limiter,
            sync,
            recovery: deps.recovery,
            gateway: deps.gateway,
            directory: deps.directory,
            line: deps.line,
            store: deps.store,
            upgrader: deps.upgrader,
            state,
            metrics: BridgeMetrics::default(),
            webhook_ids,
            cancel: CancellationToken::new(),
        })
    }

    // ── Gateway → line ──────────────────────────────────────────────────

    pub async fn route_from_gateway(&self, msg: GatewayMessage) {
        // Self-originated and webhook-originated messages would loop.
        if msg.author.is_self || self.webhook_ids.contains(&msg.author.id) {
            return;
        }
        if self.ignored_gateway_user(&msg.author) {
            debug!(user = %msg.author.username, "ignoring gateway sender");
            return;
        }

        if let Some(thread) = msg.thread.clone()
            && thread.name.starts_with(&self.config.pm.thread_prefix)
        {
            self.route_gateway_pm(&msg, &thread).await;
            return;
        }

        let text = rewrite::gateway_to_plain(&msg, self.directory.as_ref());

        let identity = NetworkSide::Gateway.qualify(&msg.author.id);
        if let Some(rejection) = self.admission(&identity, &msg.author.username, &text) {
            if rejection.should_notify() && self.config.rate_limit.notify_sender {
                let notice = format!("Rate limit warning: {rejection}. Please slow down.");
                if let Err(e) = self.gateway.send_dm(&msg.author.id, &notice).await {
                    debug!(user = %msg.author.username, error = %e, "could not deliver rate limit notice");
                }
            }
            return;
        }

        let channel_label = msg
            .channel_name
            .as_ref()
            .map(|name| format!("#{name}"))
            .unwrap_or_else(|| msg.channel_id.clone());
        let Some(irc_channel) = self
            .map
            .line_channel_for(&msg.channel_id, Some(channel_label.as_str()))
        else {
            debug!(channel = %channel_label, "no mapping for gateway channel, dropping");
            return;
        };

        let nickname = msg.author.display_name.clone();
        let mut display = nickname.clone();
        if self.config.parallel_ping_fix {
            display = format::apply_ping_fix(&display);
        }
        if self.config.nick_color
            && let Some(color) = format::nick_color_for(&nickname, &self.config.nick_colors)
        {
            display = format::wrap_nick_color(color, &display);
        }

        if self.is_command(&text) {
            debug!(channel = irc_channel, "relaying command to irc");
            if !self.config.format.command_prelude.is_empty() {
                let prelude = format::substitute_template(
                    &self.config.format.command_prelude,
                    &[
                        ("side", "Discord"),
                        ("nickname", &nickname),
                        ("author", &nickname),
                    ],
                );
                self.say_line(irc_channel, &prelude).await;
            }
            if self.say_line(irc_channel, &text).await {
                self.sync
                    .record_message(&msg.id, irc_channel, &text, &nickname);
                self.metrics.record_discord_to_irc();
                self.metrics.record_command();
            }
            return;
        }

        let mut relayed = false;
        if !text.is_empty() {
            let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
            for raw_line in normalized.split('\n') {
                let converted = format::convert_discord_to_irc(raw_line);
                if converted.is_empty() {
                    continue;
                }
                let out = format::substitute_template(
                    &self.config.format.irc_text,
                    &[
                        ("displayUsername", &display),
                        ("author", &nickname),
                        ("nickname", &nickname),
                        ("text", &converted),
                        ("discordChannel", &channel_label),
                        ("ircChannel", irc_channel),
                    ],
                );
                if self.say_line(irc_channel, &out).await {
                    self.sync
                        .record_message(&msg.id, irc_channel, &out, &nickname);
                    relayed = true;
                }
            }
        }
        if relayed {
            self.metrics.record_discord_to_irc();
        }

        for attachment in &msg.attachments {
            let url = self.upgrade_attachment(attachment).await;
            let out = format::substitute_template(
                &self.config.format.url_attachment,
                &[
                    ("displayUsername", &display),
                    ("author", &nickname),
                    ("nickname", &nickname),
                    ("attachmentURL", &url),
                    ("discordChannel", &channel_label),
                    ("ircChannel", irc_channel),
                ],
            );
            if self.say_line(irc_channel, &out).await {
                self.sync
                    .record_message(&msg.id, irc_channel, &out, &nickname);
                self.metrics.record_attachment();
            }
        }
    }

    /// Replay "(edited)" annotations for an edited gateway message.
    pub async fn handle_gateway_edit(&self, msg: GatewayMessage) {
        let new_text = rewrite::gateway_to_plain(&msg, self.directory.as_ref());
        if new_text.is_empty() {
            return;
        }
        let converted = format::convert_discord_to_irc(&new_text).replace('\n', " ");
        for annotation in self.sync.handle_edit(&msg.id, &converted) {
            if self.say_line(&annotation.channel, &annotation.text).await {
                self.metrics.record_edit_relayed();
            }
        }
    }

    /// Replay "(deleted)" annotations for a deleted gateway message.
    pub async fn handle_gateway_delete(&self, id: &str) {
        for annotation in self.sync.handle_delete(id) {
            if self.say_line(&annotation.channel, &annotation.text).await {
                self.metrics.record_delete_relayed();
            }
        }
    }

    pub async fn handle_gateway_delete_bulk(&self, ids: &[String]) {
        for annotation in self.sync.handle_bulk_delete(ids) {
            if self.say_line(&annotation.channel, &annotation.text).await {
                self.metrics.record_delete_relayed();
            }
        }
    }

    // ── Line → gateway ──────────────────────────────────────────────────

    pub async fn route_from_line(&self, author: &str, channel: &str, text: &str) {
        let Some(gateway_ref) = self.map.gateway_ref_for(channel) else {
            debug!(channel, "no mapping for line channel, dropping");
            return;
        };
        let Some(dest) = self.directory.resolve_channel(gateway_ref) else {
            info!(
                channel = gateway_ref,
                "mapped to a channel the bridge isn't in, dropping"
            );
            return;
        };

        if self.ignored_line_user(author) {
            debug!(nick = author, "ignoring line sender");
            return;
        }

        let identity = NetworkSide::Line.qualify(author);
        if let Some(rejection) = self.admission(&identity, author, text) {
            if rejection.should_notify() && self.config.rate_limit.notify_sender {
                let notice = format!("Rate limit warning: {rejection}. Please slow down.");
                if let Err(e) = self.line.say(author, &notice).await {
                    debug!(nick = author, error = %e, "could not deliver rate limit notice");
                }
            }
            return;
        }

        let with_format = format::convert_irc_to_discord(text);
        let channel_label = format!("#{}", dest.name);

        if self.is_command(text) {
            debug!(channel = %channel_label, "relaying command to discord");
            if !self.config.format.command_prelude.is_empty() {
                let prelude = format::substitute_template(
                    &self.config.format.command_prelude,
                    &[("side", "IRC"), ("nickname", author), ("author", author)],
                );
                self.send_gateway(&dest.id, &prelude).await;
            }
            if self.send_gateway(&dest.id, text).await {
                self.metrics.record_irc_to_discord();
                self.metrics.record_command();
            }
            return;
        }

        let with_mentions = rewrite::line_to_gateway(
            &with_format,
            dest.guild_id.as_deref(),
            self.directory.as_ref(),
        );

        // Webhooks first: the relayed message carries the sender's own
        // name and avatar.
        if let Some(webhook_url) = self.config.webhooks.get(gateway_ref) {
            let profile = WebhookProfile {
                username: format::webhook_username(author),
                avatar_url: self.resolve_avatar(author, &dest),
                allow_everyone: self.directory.can_mention_everyone(&dest.id),
            };
            debug!(channel = %channel_label, "relaying to discord via webhook");
            match self.gateway.send_webhook(webhook_url, &with_mentions, profile).await {
                Ok(()) => self.metrics.record_irc_to_discord(),
                Err(e) => {
                    warn!(error = %e, "webhook send failed");
                    self.metrics.record_webhook_error();
                },
            }
            return;
        }

        let filtered = format::filter_everyone(&with_mentions);
        let out = format::substitute_template(
            &self.config.format.discord_text,
            &[
                ("author", author),
                ("nickname", author),
                ("displayUsername", author),
                ("text", &with_format),
                ("withMentions", &with_mentions),
                ("withFilteredMentions", &filtered),
                ("discordChannel", &channel_label),
                ("ircChannel", channel),
            ],
        );
        if self.send_gateway(&dest.id, &out).await {
            self.metrics.record_irc_to_discord();
        }
    }

    /// Resolve a webhook avatar for a nick: exact-case membership match
    /// first, then case-insensitive; exactly one match uses that member's
    /// avatar, otherwise the templated fallback URL (or none).
    fn resolve_avatar(&self, nick: &str, dest: &ResolvedChannel) -> Option<String> {
        let members = self.directory.channel_members(&dest.id);
        let matches_nick = |member: &&MemberProfile, sensitive: bool| {
            if sensitive {
                member.username == nick || member.nickname.as_deref() == Some(nick)
            } else {
                member.username.eq_ignore_ascii_case(nick)
                    || member
                        .nickname
                        .as_deref()
                        .is_some_and(|n| n.eq_ignore_ascii_case(nick))
            }
        };

        let mut found: Vec<&MemberProfile> =
            members.iter().filter(|m| matches_nick(m, true)).collect();
        if found.is_empty() {
            found = members.iter().filter(|m| matches_nick(m, false)).collect();
        }

        if found.len() == 1
            && let Some(url) = &found[0].avatar_url
        {
            return Some(url.clone());
        }

        self.config
            .format
            .webhook_avatar_url
            .as_ref()
            .map(|template| format::substitute_template(template, &[("nickname", nick)]))
    }

    // ── Status notices and membership ───────────────────────────────────

    pub async fn handle_line_join(&self, channel: &str, nick: &str) {
        if !self.config.irc.status_notices {
            return;
        }
        let own = self.line.nickname();
        if nick == own && !self.config.irc.announce_self_join {
            return;
        }
        // Self-join is announced before names arrives (which includes our
        // own nick), so only track other users here.
        if nick != own {
            self.state.add_member(channel, nick).await;
        }
        self.send_status_notice(channel, &format!("*{nick}* has joined the channel"))
            .await;
    }

    pub async fn handle_line_part(&self, channel: &str, nick: &str, reason: &str) {
        let own = self.line.nickname();
        if nick == own {
            // Our own view of the channel is gone; keeping the list would
            // only let it go stale.
            debug!(channel, "bridge parted, dropping member list");
            self.state.forget_channel(channel);
            return;
        }
        if !self.config.irc.status_notices {
            return;
        }
        if !self.state.remove_member(channel, nick).await && !self.state.has_channel(channel) {
            warn!(channel, nick, "no member list for channel on part");
        }
        self.send_status_notice(channel, &format!("*{nick}* has left the channel ({reason})"))
            .await;
    }

    pub async fn handle_line_quit(&self, nick: &str, reason: &str, channels: &[String]) {
        if !self.config.irc.status_notices || nick == self.line.nickname() {
            return;
        }
        let channels = if channels.is_empty() {
            self.state.channels_of(nick)
        } else {
            channels.to_vec()
        };
        for channel in channels {
            if !self.state.remove_member(&channel, nick).await {
                continue;
            }
            self.send_status_notice(&channel, &format!("*{nick}* has quit ({reason})"))
                .await;
        }
    }

    pub async fn handle_line_nick(&self, old_nick: &str, new_nick: &str, channels: &[String]) {
        self.update_pm_thread_for_nick_change(old_nick, new_nick)
            .await;

        if !self.config.irc.status_notices {
            return;
        }
        let channels = if channels.is_empty() {
            self.state.channels_of(old_nick)
        } else {
            channels.to_vec()
        };
        for channel in channels {
            if !self.state.rename_member(&channel, old_nick, new_nick).await {
                continue;
            }
            self.send_status_notice(&channel, &format!("*{old_nick}* is now known as {new_nick}"))
                .await;
        }
    }

    pub async fn handle_line_names(&self, channel: &str, nicks: Vec<String>) {
        if !self.config.irc.status_notices {
            return;
        }
        debug!(channel, count = nicks.len(), "replacing member list");
        self.state.set_members(channel, nicks).await;
    }

    pub async fn handle_line_invite(&self, channel: &str, from: &str) {
        if self.map.gateway_ref_for(channel).is_none() {
            debug!(channel, from, "invited to unmapped channel, not joining");
            return;
        }
        debug!(channel, from, "accepting invite");
        if let Err(e) = self.line.join(channel).await {
            warn!(channel, error = %e, "failed to join invited channel");
        }
    }

    /// Send a notice to the mapped gateway channel exactly as given.
    async fn send_status_notice(&self, line_channel: &str, text: &str) {
        let Some(gateway_ref) = self.map.gateway_ref_for(line_channel) else {
            return;
        };
        let Some(dest) = self.directory.resolve_channel(gateway_ref) else {
            return;
        };
        if self.send_gateway(&dest.id, text).await {
            self.metrics.record_status_notice();
        }
    }

    // ── Private messages ────────────────────────────────────────────────

    /// Relay an inbound line-protocol private message into its PM thread,
    /// creating the thread on first contact.
    pub async fn handle_line_pm(&self, from: &str, text: &str) {
        let Some(pm_channel) = self.config.pm.channel.clone() else {
            debug!(from, "private message received but pm.channel is not configured");
            return;
        };
        if self.ignored_line_user(from) {
            return;
        }
        let Some(parent) = self.directory.resolve_channel(&pm_channel) else {
            warn!(channel = %pm_channel, "pm channel not found");
            return;
        };

        let thread_id = match self.state.pm_thread(from) {
            Some(id) => id,
            None => {
                let name = format!("{}{}", self.config.pm.thread_prefix, sanitize_nick(from));
                match self
                    .gateway
                    .ensure_thread(&parent.id, &name, self.config.pm.auto_archive_minutes)
                    .await
                {
                    Ok(id) => {
                        self.state.remember_pm_thread(from, &id, &parent.id).await;
                        id
                    },
                    Err(e) => {
                        warn!(from, error = %e, "failed to create pm thread");
                        return;
                    },
                }
            },
        };

        let with_format = format::convert_irc_to_discord(text);
        let out = format::substitute_template(
            &self.config.format.discord_text,
            &[
                ("author", from),
                ("nickname", from),
                ("displayUsername", from),
                ("text", &with_format),
                ("withMentions", &with_format),
                ("ircChannel", "PM"),
            ],
        );
        match self.gateway.send_to_thread(&thread_id, &out).await {
            Ok(()) => self.metrics.record_pm_message(),
            Err(e) => warn!(from, error = %e, "failed to relay pm to thread"),
        }
    }

    /// Relay a gateway message posted inside a PM thread back to its nick.
    async fn route_gateway_pm(&self, msg: &GatewayMessage, thread: &ThreadInfo) {
        let Some(nick) = thread.name.strip_prefix(&self.config.pm.thread_prefix) else {
            return;
        };
        if nick.is_empty() || msg.author.is_self {
            return;
        }
        if self.ignored_gateway_user(&msg.author) {
            return;
        }

        let text = rewrite::gateway_to_plain(msg, self.directory.as_ref());
        if text.trim().is_empty() {
            for attachment in &msg.attachments {
                let url = self.upgrade_attachment(attachment).await;
                let out = format!("[Attachment: {}] {url}", attachment.name);
                if self.say_line(nick, &out).await {
                    self.metrics.record_pm_message();
                }
            }
            return;
        }

        let converted = format::convert_discord_to_irc(&text);
        let mut relayed = false;
        for line in converted.split('\n') {
            if line.trim().is_empty() {
                continue;
            }
            relayed |= self.say_line(nick, line).await;
        }
        if relayed {
            self.metrics.record_pm_message();
        }
    }

    async fn update_pm_thread_for_nick_change(&self, old_nick: &str, new_nick: &str) {
        let Some(thread_id) = self.state.rename_pm_thread(old_nick, new_nick).await else {
            return;
        };
        let name = format!("{}{}", self.config.pm.thread_prefix, sanitize_nick(new_nick));
        if let Err(e) = self.gateway.rename_thread(&thread_id, &name).await {
            warn!(old_nick, new_nick, error = %e, "failed to rename pm thread");
        }
        let notice = format!("IRC user changed nickname: `{old_nick}` is now `{new_nick}`");
        if let Err(e) = self.gateway.send_to_thread(&thread_id, &notice).await {
            debug!(error = %e, "failed to announce nick change in pm thread");
        }
    }

    // ── Shared helpers ──────────────────────────────────────────────────

    fn admission(&self, identity: &str, display_name: &str, text: &str) -> Option<Rejection> {
        let rejection = self.limiter.check_message(identity, display_name, text)?;
        warn!(identity, display_name, reason = %rejection, "message rejected by admission control");
        self.metrics.record_message_blocked();
        if matches!(rejection, Rejection::Spam { .. }) {
            self.metrics.record_spam_detected();
        }
        Some(rejection)
    }

    fn is_command(&self, text: &str) -> bool {
        self.config
            .command_characters
            .iter()
            .any(|prefix| !prefix.is_empty() && text.starts_with(prefix.as_str()))
    }

    fn ignored_gateway_user(&self, author: &GatewayAuthor) -> bool {
        self.config
            .ignore
            .discord
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&author.username))
            || self.config.ignore.discord_ids.iter().any(|id| *id == author.id)
    }

    fn ignored_line_user(&self, nick: &str) -> bool {
        self.config
            .ignore
            .irc
            .iter()
            .any(|name| name.eq_ignore_ascii_case(nick))
    }

    async fn upgrade_attachment(&self, attachment: &Attachment) -> String {
        if let Some(upgrader) = &self.upgrader
            && let Some(url) = upgrader
                .upgrade(
                    &attachment.url,
                    &attachment.name,
                    attachment.content_type.as_deref(),
                )
                .await
        {
            debug!(name = %attachment.name, "using uploaded attachment url");
            return url;
        }
        attachment.url.clone()
    }

    /// Send to the line network, reporting transport failures to the
    /// recovery manager. Returns whether the send succeeded.
    async fn say_line(&self, target: &str, text: &str) -> bool {
        match self.line.say(target, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target, error = %e, "line send failed");
                self.metrics.record_connection_error();
                self.recovery.record_failure(NetworkSide::Line, &e);
                false
            },
        }
    }

    /// Send to the gateway network, reporting transport failures to the
    /// recovery manager. Returns whether the send succeeded.
    async fn send_gateway(&self, channel_id: &str, text: &str) -> bool {
        match self.gateway.send(channel_id, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(channel_id, error = %e, "gateway send failed");
                self.metrics.record_connection_error();
                self.recovery.record_failure(NetworkSide::Gateway, &e);
                false
            },
        }
    }

    // ── Lifecycle and persistence ───────────────────────────────────────

    /// Load persisted state and start the dispatch loops and maintenance
    /// tasks. Returns once everything is spawned; the tasks run until
    /// [`Bridge::disconnect`].
    pub async fn connect(
        self: &Arc<Self>,
        gateway_rx: tokio::sync::mpsc::UnboundedReceiver<crate::event::GatewayEvent>,
        line_rx: tokio::sync::mpsc::UnboundedReceiver<crate::event::LineEvent>,
        recovery_rx: tokio::sync::mpsc::UnboundedReceiver<trestle_recovery::RecoveryEvent>,
    ) {
        self.restore_persisted().await;
        self.recovery.spawn_watchdog();

        tokio::spawn(crate::dispatch::gateway_loop(Arc::clone(self), gateway_rx));
        tokio::spawn(crate::dispatch::line_loop(Arc::clone(self), line_rx));
        tokio::spawn(crate::dispatch::recovery_loop(Arc::clone(self), recovery_rx));
        tokio::spawn(maintenance_loop(Arc::clone(self)));

        info!("bridge connected");
    }

    /// Stop dispatch, flush serializable state, and close the store.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        self.recovery.shutdown();
        self.flush().await;
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "failed to close store");
        }
        info!("bridge disconnected");
    }

    /// Load persisted membership, thread mappings, correlation entries and
    /// metric totals. Called from [`Bridge::connect`]; separate so a restart
    /// can be driven in tests.
    pub async fn restore_persisted(&self) {
        self.state.load().await;

        match self.store.get_metric(SYNC_SNAPSHOT_KEY).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(snapshot) => {
                    self.sync.restore(snapshot);
                    let stats = self.sync.stats();
                    info!(tracked = stats.tracked_messages, "restored correlation store");
                },
                Err(e) => warn!(error = %e, "corrupt correlation snapshot, starting empty"),
            },
            Ok(None) => {},
            Err(e) => warn!(error = %e, "failed to load correlation snapshot"),
        }

        if let Ok(Some(json)) = self.store.get_metric(METRICS_KEY).await
            && let Ok(snapshot) = serde_json::from_str::<MetricsSnapshot>(&json)
        {
            self.metrics.restore(&snapshot);
        }
    }

    /// Flush serializable state through the durable store. Failures only
    /// degrade durability and are logged.
    pub async fn flush(&self) {
        match serde_json::to_string(&self.sync.snapshot()) {
            Ok(json) => {
                if let Err(e) = self.store.save_metric(SYNC_SNAPSHOT_KEY, &json).await {
                    warn!(error = %e, "failed to flush correlation store");
                }
            },
            Err(e) => warn!(error = %e, "failed to serialize correlation store"),
        }
        match serde_json::to_string(&self.metrics.snapshot()) {
            Ok(json) => {
                if let Err(e) = self.store.save_metric(METRICS_KEY, &json).await {
                    warn!(error = %e, "failed to flush metrics");
                }
            },
            Err(e) => warn!(error = %e, "failed to serialize metrics"),
        }
    }

    /// Token cancelled at [`Bridge::disconnect`]; external tasks (the
    /// liveness endpoint) tie their shutdown to it.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Operational snapshot for the liveness endpoint.
    #[must_use]
    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "limiter": self.limiter.stats(),
            "blocked_users": self.limiter.blocked_users(),
            "sync": self.sync.stats(),
            "metrics": self.metrics.snapshot(),
            "health": {
                "discord": self.recovery.health(NetworkSide::Gateway),
                "irc": self.recovery.health(NetworkSide::Line),
            },
            "recent_attempts": {
                "discord": self.recovery.history(NetworkSide::Gateway),
                "irc": self.recovery.history(NetworkSide::Line),
            },
        })
    }
}

/// Periodic correlation-store sweep and state flush.
async fn maintenance_loop(bridge: Arc<Bridge>) {
    let sweep_every = Duration::from_secs(bridge.config.sync.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(sweep_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            () = bridge.cancel.cancelled() => break,
            _ = ticker.tick() => {
                bridge.sync.sweep();
                bridge.flush().await;
            },
        }
    }
}

/// Strip characters that would break gateway thread names.
fn sanitize_nick(nick: &str) -> String {
    nick.chars()
        .map(|c| {
            if matches!(c, '<' | '>' | '@' | '#' | '&' | '!') {
                '_'
            } else {
                c
            }
        })
        .take(80)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_nick_replaces_breaking_characters() {
        assert_eq!(sanitize_nick("we<ird@nick"), "we_ird_nick");
        assert_eq!(sanitize_nick("plain"), "plain");
    }
}
