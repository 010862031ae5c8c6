//! Outbound Discord client and cache directory over serenity handles.

use std::sync::Arc;

use {
    anyhow::{Context as _, Result},
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serenity::{
        all::{ChannelId, GatewayIntents, UserId},
        builder::{CreateAllowedMentions, CreateThread, EditThread, ExecuteWebhook},
        cache::Cache,
        http::Http,
        model::channel::AutoArchiveDuration,
        model::webhook::Webhook,
    },
    tokio::sync::mpsc::UnboundedSender,
    tracing::{info, warn},
};

use trestle_bridge::{
    GatewayClient, GatewayDirectory, MemberProfile, ResolvedChannel, WebhookProfile,
    event::GatewayEvent,
};

use crate::handler::DiscordHandler;

/// Discord connection: spawns the serenity client and exposes the HTTP and
/// cache handles behind the bridge's collaborator traits.
pub struct DiscordTransport {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordTransport {
    /// Required gateway intents for the bridge.
    #[must_use]
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MEMBERS
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
    }

    /// Connect and start the gateway session in a background task. Events
    /// flow into `events` until the session ends.
    pub async fn connect(
        token: &Secret<String>,
        events: UnboundedSender<GatewayEvent>,
    ) -> Result<Arc<Self>> {
        let handler = DiscordHandler {
            events: events.clone(),
        };
        let mut client = serenity::Client::builder(token.expose_secret(), Self::intents())
            .event_handler(handler)
            .await
            .context("failed to build discord client")?;

        let transport = Arc::new(Self {
            http: Arc::clone(&client.http),
            cache: Arc::clone(&client.cache),
        });

        tokio::spawn(async move {
            info!("starting discord gateway session");
            if let Err(e) = client.start().await {
                warn!(error = %e, "discord gateway session ended with error");
                let _ = events.send(GatewayEvent::TransportError(e.to_string()));
            }
            let _ = events.send(GatewayEvent::Disconnected("gateway session ended".into()));
        });

        Ok(transport)
    }

    /// Cheap liveness probe used by the recovery manager's reconnection
    /// procedure; serenity resumes the gateway session on its own.
    pub async fn check_alive(&self) -> Result<()> {
        self.http
            .get_current_user()
            .await
            .context("discord liveness probe failed")?;
        Ok(())
    }

    fn channel(&self, id: &str) -> Result<ChannelId> {
        let id: u64 = id.parse().context("invalid channel id")?;
        anyhow::ensure!(id != 0, "invalid channel id");
        Ok(ChannelId::new(id))
    }
}

#[async_trait]
impl GatewayClient for DiscordTransport {
    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        self.channel(channel_id)?.say(&self.http, text).await?;
        Ok(())
    }

    async fn send_webhook(
        &self,
        webhook_url: &str,
        text: &str,
        profile: WebhookProfile,
    ) -> Result<()> {
        let webhook = Webhook::from_url(&self.http, webhook_url).await?;
        let mut builder = ExecuteWebhook::new().content(text).username(profile.username);
        if let Some(avatar) = profile.avatar_url {
            builder = builder.avatar_url(avatar);
        }
        if !profile.allow_everyone {
            builder = builder.allowed_mentions(
                CreateAllowedMentions::new()
                    .everyone(false)
                    .all_users(true)
                    .all_roles(true),
            );
        }
        webhook.execute(&self.http, false, builder).await?;
        Ok(())
    }

    async fn send_dm(&self, user_id: &str, text: &str) -> Result<()> {
        let id: u64 = user_id.parse().context("invalid user id")?;
        anyhow::ensure!(id != 0, "invalid user id");
        let channel = UserId::new(id).create_dm_channel(&self.http).await?;
        channel.id.say(&self.http, text).await?;
        Ok(())
    }

    async fn send_to_thread(&self, thread_id: &str, text: &str) -> Result<()> {
        self.channel(thread_id)?.say(&self.http, text).await?;
        Ok(())
    }

    async fn ensure_thread(
        &self,
        parent_channel_id: &str,
        name: &str,
        auto_archive_minutes: u16,
    ) -> Result<String> {
        let parent = self.channel(parent_channel_id)?;

        // Reuse an existing thread with the same name if the cache knows
        // one, so restarts do not fork conversations.
        let guild_id = self.cache.channel(parent).map(|c| c.guild_id);
        if let Some(guild_id) = guild_id
            && let Some(guild) = self.cache.guild(guild_id)
            && let Some(thread) = guild
                .threads
                .iter()
                .find(|t| t.parent_id == Some(parent) && t.name == name)
        {
            return Ok(thread.id.get().to_string());
        }

        let thread = parent
            .create_thread(
                &self.http,
                CreateThread::new(name)
                    .auto_archive_duration(archive_duration(auto_archive_minutes)),
            )
            .await?;
        info!(thread = %thread.name, "created pm thread");
        Ok(thread.id.get().to_string())
    }

    async fn rename_thread(&self, thread_id: &str, name: &str) -> Result<()> {
        self.channel(thread_id)?
            .edit_thread(&self.http, EditThread::new().name(name))
            .await?;
        Ok(())
    }
}

fn archive_duration(minutes: u16) -> AutoArchiveDuration {
    match minutes {
        0..=60 => AutoArchiveDuration::OneHour,
        61..=1440 => AutoArchiveDuration::OneDay,
        1441..=4320 => AutoArchiveDuration::ThreeDays,
        _ => AutoArchiveDuration::OneWeek,
    }
}

impl GatewayDirectory for DiscordTransport {
    fn channel_name(&self, channel_id: &str) -> Option<String> {
        let id: u64 = channel_id.parse().ok().filter(|id| *id != 0)?;
        self.cache.channel(ChannelId::new(id)).map(|c| c.name.clone())
    }

    fn role_name(&self, guild_id: Option<&str>, role_id: &str) -> Option<String> {
        let guild_id: u64 = guild_id?.parse().ok().filter(|id| *id != 0)?;
        let role_id: u64 = role_id.parse().ok().filter(|id| *id != 0)?;
        let guild = self.cache.guild(serenity::all::GuildId::new(guild_id))?;
        guild
            .roles
            .get(&serenity::all::RoleId::new(role_id))
            .map(|role| role.name.clone())
    }

    fn user_display_name(&self, guild_id: Option<&str>, user_id: &str) -> Option<String> {
        let user_id: u64 = user_id.parse().ok().filter(|id| *id != 0)?;
        let user_id = UserId::new(user_id);

        if let Some(guild_id) = guild_id
            && let Ok(gid) = guild_id.parse::<u64>()
            && gid != 0
            && let Some(guild) = self.cache.guild(serenity::all::GuildId::new(gid))
            && let Some(member) = guild.members.get(&user_id)
        {
            return Some(member.display_name().to_owned());
        }
        self.cache
            .user(user_id)
            .map(|user| user.global_name.clone().unwrap_or_else(|| user.name.clone()))
    }

    fn resolve_channel(&self, reference: &str) -> Option<ResolvedChannel> {
        if let Some(name) = reference.strip_prefix('#') {
            for guild_id in self.cache.guilds() {
                let Some(guild) = self.cache.guild(guild_id) else {
                    continue;
                };
                if let Some(channel) = guild
                    .channels
                    .values()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                {
                    return Some(ResolvedChannel {
                        id: channel.id.get().to_string(),
                        name: channel.name.clone(),
                        guild_id: Some(guild_id.get().to_string()),
                    });
                }
            }
            return None;
        }

        let id: u64 = reference.parse().ok().filter(|id| *id != 0)?;
        let channel = self.cache.channel(ChannelId::new(id))?;
        Some(ResolvedChannel {
            id: channel.id.get().to_string(),
            name: channel.name.clone(),
            guild_id: Some(channel.guild_id.get().to_string()),
        })
    }

    fn channel_members(&self, channel_id: &str) -> Vec<MemberProfile> {
        let Ok(id) = channel_id.parse::<u64>() else {
            return Vec::new();
        };
        if id == 0 {
            return Vec::new();
        }
        let Some(guild_id) = self.cache.channel(ChannelId::new(id)).map(|c| c.guild_id) else {
            return Vec::new();
        };
        let Some(guild) = self.cache.guild(guild_id) else {
            return Vec::new();
        };
        guild
            .members
            .values()
            .map(|member| MemberProfile {
                user_id: member.user.id.get().to_string(),
                username: member.user.name.clone(),
                nickname: member.nick.clone(),
                avatar_url: member.user.avatar_url(),
            })
            .collect()
    }

    fn member_mention(
        &self,
        guild_id: Option<&str>,
        username: &str,
        discriminator: &str,
    ) -> Option<String> {
        let guild_id: u64 = guild_id?.parse().ok().filter(|id| *id != 0)?;
        let guild = self.cache.guild(serenity::all::GuildId::new(guild_id))?;
        guild
            .members
            .values()
            .find(|member| {
                member.user.name.eq_ignore_ascii_case(username)
                    && member
                        .user
                        .discriminator
                        .map(|d| format!("{:04}", d.get()))
                        .as_deref()
                        == Some(discriminator)
            })
            .map(|member| format!("<@{}>", member.user.id.get()))
    }

    fn emoji_mention(&self, guild_id: Option<&str>, name: &str) -> Option<String> {
        let guild_id: u64 = guild_id?.parse().ok().filter(|id| *id != 0)?;
        let guild = self.cache.guild(serenity::all::GuildId::new(guild_id))?;
        guild
            .emojis
            .values()
            .find(|emoji| emoji.name == name)
            .map(|emoji| emoji.to_string())
    }

    fn channel_mention(&self, guild_id: Option<&str>, name: &str) -> Option<String> {
        let guild_id: u64 = guild_id?.parse().ok().filter(|id| *id != 0)?;
        let guild = self.cache.guild(serenity::all::GuildId::new(guild_id))?;
        guild
            .channels
            .values()
            .find(|channel| channel.name.eq_ignore_ascii_case(name))
            .map(|channel| format!("<#{}>", channel.id.get()))
    }

    fn can_mention_everyone(&self, channel_id: &str) -> bool {
        let Ok(id) = channel_id.parse::<u64>() else {
            return false;
        };
        if id == 0 {
            return false;
        }
        let Some(channel) = self.cache.channel(ChannelId::new(id)).map(|c| c.clone()) else {
            return false;
        };
        let Some(guild) = self.cache.guild(channel.guild_id) else {
            return false;
        };
        let current = self.cache.current_user().id;
        let Some(member) = guild.members.get(&current) else {
            return false;
        };
        guild
            .user_permissions_in(&channel, member)
            .mention_everyone()
    }
}
