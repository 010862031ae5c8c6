//! Event sum types for the two networks.
//!
//! Each adapter translates its client library's callbacks into one of these
//! enums and pushes them down an unbounded channel; a single dispatch loop
//! per connection pattern-matches on the variant and forwards to the bridge
//! core.

/// Sender of a gateway message.
#[derive(Debug, Clone, Default)]
pub struct GatewayAuthor {
    pub id: String,
    pub username: String,
    /// Server nickname when set, username otherwise.
    pub display_name: String,
    /// True for the bridge's own user.
    pub is_self: bool,
}

/// A user mentioned in a gateway message, for `<@id>` rewriting.
#[derive(Debug, Clone)]
pub struct MentionedUser {
    pub id: String,
    pub display_name: String,
}

/// An attachment carried by a gateway message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    pub content_type: Option<String>,
}

/// A structured content block (embed) on a gateway message.
#[derive(Debug, Clone, Default)]
pub struct EmbedBlock {
    pub title: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<(String, String)>,
    pub image_url: Option<String>,
    pub footer: Option<String>,
}

/// The thread a gateway message was posted in, if any.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// A message received from the gateway network.
#[derive(Debug, Clone, Default)]
pub struct GatewayMessage {
    pub id: String,
    pub channel_id: String,
    /// Channel name without the leading `#`, when known.
    pub channel_name: Option<String>,
    pub guild_id: Option<String>,
    pub thread: Option<ThreadInfo>,
    pub author: GatewayAuthor,
    pub content: String,
    pub mentions: Vec<MentionedUser>,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<EmbedBlock>,
}

impl Default for ThreadInfo {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            parent_id: None,
        }
    }
}

/// Events emitted by the gateway adapter.
#[derive(Debug)]
pub enum GatewayEvent {
    /// Session established and caches primed.
    Ready,
    Message(Box<GatewayMessage>),
    /// A previously sent message was edited. Carries the updated message;
    /// adapters fill in as much as the edit event provides.
    MessageEdit(Box<GatewayMessage>),
    MessageDelete { id: String },
    MessageDeleteBulk { ids: Vec<String> },
    /// Transport-level error; routed to the recovery manager.
    TransportError(String),
    Disconnected(String),
}

/// Events emitted by the line-protocol adapter.
#[derive(Debug)]
pub enum LineEvent {
    /// Registration with the server completed.
    Registered,
    Message {
        from: String,
        channel: String,
        text: String,
    },
    Notice {
        from: String,
        channel: String,
        text: String,
    },
    /// A `/me`-style action.
    Action {
        from: String,
        channel: String,
        text: String,
    },
    /// A private message to the bridge itself.
    PrivateMessage { from: String, text: String },
    Join {
        channel: String,
        nick: String,
    },
    Part {
        channel: String,
        nick: String,
        reason: String,
    },
    Quit {
        nick: String,
        reason: String,
        channels: Vec<String>,
    },
    Nick {
        old_nick: String,
        new_nick: String,
        channels: Vec<String>,
    },
    /// Full member list for a channel, replacing any previous view.
    Names {
        channel: String,
        nicks: Vec<String>,
    },
    Invite {
        channel: String,
        from: String,
    },
    TransportError(String),
    Closed(String),
}
