//! Serenity event handler translating gateway callbacks into bridge events.

use {
    serenity::{
        all::{
            ChannelId, ChannelType, Context, EventHandler, GuildId, Message, MessageId,
            MessageUpdateEvent, Ready,
        },
        async_trait,
    },
    tokio::sync::mpsc::UnboundedSender,
    tracing::{debug, info},
};

use trestle_bridge::event::{
    Attachment, EmbedBlock, GatewayAuthor, GatewayEvent, GatewayMessage, MentionedUser,
    ThreadInfo,
};

pub struct DiscordHandler {
    pub events: UnboundedSender<GatewayEvent>,
}

impl DiscordHandler {
    fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(bot_name = %ready.user.name, guilds = ready.guilds.len(), "discord session ready");
        self.emit(GatewayEvent::Ready);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        debug!(channel_id = msg.channel_id.get(), "received discord message");
        let built = build_message(&ctx, &msg);
        self.emit(GatewayEvent::Message(Box::new(built)));
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Message>,
        new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        let built = match new {
            Some(msg) => build_message(&ctx, &msg),
            // Partial update: carry what the event itself provides.
            None => GatewayMessage {
                id: event.id.get().to_string(),
                channel_id: event.channel_id.get().to_string(),
                guild_id: event.guild_id.map(|g| g.get().to_string()),
                content: event.content.clone().unwrap_or_default(),
                mentions: event
                    .mentions
                    .unwrap_or_default()
                    .iter()
                    .map(|user| MentionedUser {
                        id: user.id.get().to_string(),
                        display_name: display_name_of(&ctx, event.guild_id, user),
                    })
                    .collect(),
                ..GatewayMessage::default()
            },
        };
        if built.content.is_empty() && built.embeds.is_empty() {
            return;
        }
        self.emit(GatewayEvent::MessageEdit(Box::new(built)));
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        _channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        self.emit(GatewayEvent::MessageDelete {
            id: deleted_message_id.get().to_string(),
        });
    }

    async fn message_delete_bulk(
        &self,
        _ctx: Context,
        _channel_id: ChannelId,
        multiple_deleted_messages_ids: Vec<MessageId>,
        _guild_id: Option<GuildId>,
    ) {
        self.emit(GatewayEvent::MessageDeleteBulk {
            ids: multiple_deleted_messages_ids
                .iter()
                .map(|id| id.get().to_string())
                .collect(),
        });
    }
}

/// Server nickname when cached, global display name otherwise.
fn display_name_of(
    ctx: &Context,
    guild_id: Option<GuildId>,
    user: &serenity::all::User,
) -> String {
    if let Some(guild_id) = guild_id
        && let Some(guild) = ctx.cache.guild(guild_id)
        && let Some(member) = guild.members.get(&user.id)
        && let Some(nick) = &member.nick
    {
        return nick.clone();
    }
    user.global_name.clone().unwrap_or_else(|| user.name.clone())
}

fn build_message(ctx: &Context, msg: &Message) -> GatewayMessage {
    let is_self = msg.author.id == ctx.cache.current_user().id;

    let (channel_name, thread) = match ctx.cache.channel(msg.channel_id) {
        Some(channel) => {
            let is_thread = matches!(
                channel.kind,
                ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
            );
            if is_thread {
                (
                    None,
                    Some(ThreadInfo {
                        id: channel.id.get().to_string(),
                        name: channel.name.clone(),
                        parent_id: channel.parent_id.map(|p| p.get().to_string()),
                    }),
                )
            } else {
                (Some(channel.name.clone()), None)
            }
        },
        None => (None, None),
    };

    GatewayMessage {
        id: msg.id.get().to_string(),
        channel_id: msg.channel_id.get().to_string(),
        channel_name,
        guild_id: msg.guild_id.map(|g| g.get().to_string()),
        thread,
        author: GatewayAuthor {
            id: msg.author.id.get().to_string(),
            username: msg.author.name.clone(),
            display_name: msg
                .member
                .as_ref()
                .and_then(|member| member.nick.clone())
                .unwrap_or_else(|| display_name_of(ctx, msg.guild_id, &msg.author)),
            is_self,
        },
        content: msg.content.clone(),
        mentions: msg
            .mentions
            .iter()
            .map(|user| MentionedUser {
                id: user.id.get().to_string(),
                display_name: display_name_of(ctx, msg.guild_id, user),
            })
            .collect(),
        attachments: msg
            .attachments
            .iter()
            .map(|attachment| Attachment {
                name: attachment.filename.clone(),
                url: attachment.url.clone(),
                content_type: attachment.content_type.clone(),
            })
            .collect(),
        embeds: msg
            .embeds
            .iter()
            .map(|embed| EmbedBlock {
                title: embed.title.clone(),
                description: embed.description.clone(),
                fields: embed
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.value.clone()))
                    .collect(),
                image_url: embed.image.as_ref().map(|image| image.url.clone()),
                footer: embed.footer.as_ref().map(|footer| footer.text.clone()),
            })
            .collect(),
    }
}
