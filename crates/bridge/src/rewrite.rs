//! Rich-text reference rewriting.
//!
//! Gateway → line: `<@id>` mentions, `<#id>` channel references, `<@&id>`
//! role references, and custom emotes become plain text, with fixed
//! placeholders when a reference no longer resolves. Embeds expand into an
//! ordered plain-text approximation.
//!
//! Line → gateway: `@username#1234`, `:emoji:`, and `#channel` become native
//! mentions when they resolve, and stay verbatim when they do not.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::{
    client::GatewayDirectory,
    event::{EmbedBlock, GatewayMessage},
};

static CHANNEL_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#(\d+)>").unwrap_or_else(|e| panic!("channel regex: {e}")));
static ROLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@&(\d+)>").unwrap_or_else(|e| panic!("role regex: {e}")));
static EMOTE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a?(:\w+:)\d+>").unwrap_or_else(|e| panic!("emote regex: {e}")));
static USER_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?(\d+)>").unwrap_or_else(|e| panic!("user regex: {e}")));

static IRC_USER_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([^\s#]+)#(\d+)").unwrap_or_else(|e| panic!("irc mention regex: {e}"))
});
static IRC_EMOJI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\w+):").unwrap_or_else(|e| panic!("irc emoji regex: {e}")));
static IRC_CHANNEL: LazyLock<Regex> = LazyLock::new(|| {
    // Channel names can't contain spaces, #, @, ', !, ?, , or .
    Regex::new(r"#([^\s#@'!?,.]+)").unwrap_or_else(|e| panic!("irc channel regex: {e}"))
});

/// Rewrite a gateway message into the line protocol's plain form and expand
/// its embeds. Unresolvable references become fixed placeholders.
#[must_use]
pub fn gateway_to_plain(msg: &GatewayMessage, dir: &dyn GatewayDirectory) -> String {
    let guild = msg.guild_id.as_deref();

    // Known mentions first (the event carries display names); anything left
    // is resolved through the directory or replaced with a placeholder.
    let mut text = msg.content.clone();
    for mention in &msg.mentions {
        let display = format!("@{}", mention.display_name);
        text = text.replace(&format!("<@{}>", mention.id), &display);
        text = text.replace(&format!("<@!{}>", mention.id), &display);
    }

    let embed_text = msg
        .embeds
        .iter()
        .map(|embed| expand_embed(embed, dir, guild))
        .collect::<Vec<_>>()
        .join("\n");
    if !embed_text.is_empty() {
        text = format!("{text}\n{embed_text}");
    }
    let text = text.trim().to_owned();

    let text = USER_REF.replace_all(&text, |caps: &Captures<'_>| {
        dir.user_display_name(guild, &caps[1])
            .map_or_else(|| caps[0].to_owned(), |name| format!("@{name}"))
    });
    let text = CHANNEL_REF.replace_all(&text, |caps: &Captures<'_>| {
        dir.channel_name(&caps[1])
            .map_or_else(|| "#deleted-channel".to_owned(), |name| format!("#{name}"))
    });
    let text = ROLE_REF.replace_all(&text, |caps: &Captures<'_>| {
        dir.role_name(guild, &caps[1])
            .map_or_else(|| "@deleted-role".to_owned(), |name| format!("@{name}"))
    });
    EMOTE_REF.replace_all(&text, "$1").into_owned()
}

/// Expand one embed block into ordered plain text: title, description,
/// fields, image, footer. Titles and field names carry the line protocol's
/// bold code.
fn expand_embed(embed: &EmbedBlock, dir: &dyn GatewayDirectory, guild: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(title) = &embed.title {
        out.push_str(&format!("\u{2}{title}\u{2}\n"));
    }
    if let Some(description) = &embed.description {
        out.push_str(description);
        out.push('\n');
    }
    for (name, value) in &embed.fields {
        let value = USER_REF.replace_all(value, |caps: &Captures<'_>| {
            dir.user_display_name(guild, &caps[1])
                .map_or_else(|| caps[0].to_owned(), |name| format!("@{name}"))
        });
        out.push_str(&format!("\u{2}{name}\u{2}\n{value}\n"));
    }
    if let Some(url) = &embed.image_url {
        out.push_str(url);
        out.push('\n');
    }
    if let Some(footer) = &embed.footer {
        out.push_str(footer);
    }
    out.trim_end().to_owned()
}

/// Rewrite line-protocol text into gateway mentions where they resolve.
#[must_use]
pub fn line_to_gateway(text: &str, guild: Option<&str>, dir: &dyn GatewayDirectory) -> String {
    // @username#1234 → mention. Skips usernames with spaces; matches the
    // username case-insensitively the way the gateway does.
    let text = IRC_USER_MENTION.replace_all(text, |caps: &Captures<'_>| {
        dir.member_mention(guild, &caps[1], &caps[2])
            .unwrap_or_else(|| caps[0].to_owned())
    });
    // :emoji: → custom emote, case-sensitively.
    let text = IRC_EMOJI.replace_all(&text, |caps: &Captures<'_>| {
        dir.emoji_mention(guild, &caps[1])
            .unwrap_or_else(|| caps[0].to_owned())
    });
    // #channel → channel mention, case-insensitively.
    IRC_CHANNEL
        .replace_all(&text, |caps: &Captures<'_>| {
            dir.channel_mention(guild, &caps[1])
                .unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}
