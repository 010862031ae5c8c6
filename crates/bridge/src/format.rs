//! Text-style translation between the two dialects, nick coloring, and
//! `{$token}` template substitution.

use std::sync::LazyLock;

use regex::Regex;

/// Usernames need to be between 2 and 32 characters for webhooks.
const USERNAME_MIN_LENGTH: usize = 2;
const USERNAME_MAX_LENGTH: usize = 32;

const COLOR: char = '\u{3}';
const RESET: char = '\u{f}';

/// mIRC color codes by the names used in config palettes.
const COLOR_CODES: &[(&str, &str)] = &[
    ("white", "00"),
    ("black", "01"),
    ("dark_blue", "02"),
    ("dark_green", "03"),
    ("light_red", "04"),
    ("dark_red", "05"),
    ("magenta", "06"),
    ("orange", "07"),
    ("yellow", "08"),
    ("light_green", "09"),
    ("cyan", "10"),
    ("light_cyan", "11"),
    ("light_blue", "12"),
    ("light_magenta", "13"),
    ("gray", "14"),
    ("light_gray", "15"),
];

static TEMPLATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\$(.+?)\}").unwrap_or_else(|e| panic!("token regex: {e}")));

static IRC_COLOR_CODES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("\u{3}\\d{1,2}(,\\d{1,2})?|\u{3}|\u{f}")
        .unwrap_or_else(|e| panic!("color regex: {e}"))
});

/// What to do with a style delimiter left open at end of input.
#[derive(Clone, Copy, PartialEq)]
enum Unmatched {
    /// Emit the literal marker back (markdown: the user typed a `*`).
    Literal,
    /// Drop it (IRC styles the rest of the line; nothing to restore).
    Drop,
}

struct StyleMarker {
    marker: &'static str,
    open: &'static str,
    close: &'static str,
}

/// Pair up style delimiters with a stack so nesting converts correctly
/// (`**bold *italics***` keeps the italics inside the bold). A delimiter
/// matching the innermost open marker closes it; anything else opens.
fn convert_styles(text: &str, markers: &[StyleMarker], unmatched: Unmatched) -> String {
    let mut out = String::with_capacity(text.len());
    // (marker index, byte position in `out` where the opener belongs)
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut rest = text;

    'outer: while !rest.is_empty() {
        // The innermost open marker closes first; this is what resolves a
        // run like `***` at the end of `**bold *italics***` correctly.
        if let Some(&(top_idx, pos)) = stack.last() {
            let top = &markers[top_idx];
            if rest.starts_with(top.marker) {
                rest = &rest[top.marker.len()..];
                stack.pop();
                out.insert_str(pos, top.open);
                out.push_str(top.close);
                continue;
            }
        }
        for (idx, style) in markers.iter().enumerate() {
            if rest.starts_with(style.marker) {
                rest = &rest[style.marker.len()..];
                stack.push((idx, out.len()));
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    // Innermost first so earlier byte positions stay valid.
    while let Some((idx, pos)) = stack.pop() {
        if unmatched == Unmatched::Literal {
            out.insert_str(pos, markers[idx].marker);
        }
    }
    out
}

/// Convert markdown styling to mIRC control codes. Strikethrough has no
/// IRC equivalent and is stripped.
#[must_use]
pub fn convert_discord_to_irc(text: &str) -> String {
    const MARKERS: &[StyleMarker] = &[
        StyleMarker {
            marker: "**",
            open: "\u{2}",
            close: "\u{2}",
        },
        StyleMarker {
            marker: "__",
            open: "\u{1f}",
            close: "\u{1f}",
        },
        StyleMarker {
            marker: "~~",
            open: "",
            close: "",
        },
        StyleMarker {
            marker: "*",
            open: "\u{1d}",
            close: "\u{1d}",
        },
        StyleMarker {
            marker: "_",
            open: "\u{1d}",
            close: "\u{1d}",
        },
    ];
    convert_styles(text, MARKERS, Unmatched::Literal)
}

/// Convert mIRC control codes to markdown. Color codes have no markdown
/// equivalent and are stripped; reverse video renders as italics.
#[must_use]
pub fn convert_irc_to_discord(text: &str) -> String {
    const MARKERS: &[StyleMarker] = &[
        StyleMarker {
            marker: "\u{2}",
            open: "**",
            close: "**",
        },
        StyleMarker {
            marker: "\u{1d}",
            open: "*",
            close: "*",
        },
        StyleMarker {
            marker: "\u{1f}",
            open: "__",
            close: "__",
        },
        StyleMarker {
            marker: "\u{16}",
            open: "*",
            close: "*",
        },
    ];
    let stripped = IRC_COLOR_CODES.replace_all(text, "");
    convert_styles(&stripped, MARKERS, Unmatched::Drop)
}

/// Wrap a nick in an mIRC color. Unknown color names leave the nick
/// uncolored.
#[must_use]
pub fn wrap_nick_color(color: &str, nick: &str) -> String {
    match COLOR_CODES.iter().find(|(name, _)| *name == color) {
        Some((_, code)) => format!("{COLOR}{code}{nick}{RESET}"),
        None => nick.to_owned(),
    }
}

/// Deterministic palette pick: first character code plus name length,
/// modulo the palette size, so a given name always gets the same color.
#[must_use]
pub fn nick_color_for<'a>(nick: &str, palette: &'a [String]) -> Option<&'a str> {
    if palette.is_empty() {
        return None;
    }
    let first = nick.chars().next().map_or(0, |c| c as usize);
    let index = (first + nick.chars().count()) % palette.len();
    palette.get(index).map(String::as_str)
}

/// Insert a zero-width space after the first character so a user present
/// on both networks is not pinged by their own relayed messages.
#[must_use]
pub fn apply_ping_fix(nick: &str) -> String {
    let mut chars = nick.chars();
    match chars.next() {
        Some(first) => format!("{first}\u{200b}{}", chars.as_str()),
        None => String::new(),
    }
}

/// Truncate then pad a nick into the webhook username length limits.
#[must_use]
pub fn webhook_username(nick: &str) -> String {
    let mut name: String = nick.chars().take(USERNAME_MAX_LENGTH).collect();
    while name.chars().count() < USERNAME_MIN_LENGTH {
        name.push('_');
    }
    name
}

/// Substitute `{$token}` placeholders. Unmatched tokens are left verbatim;
/// substitution never errors.
#[must_use]
pub fn substitute_template(template: &str, values: &[(&str, &str)]) -> String {
    TEMPLATE_TOKEN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let token = &caps[1];
            values
                .iter()
                .find(|(name, _)| *name == token)
                .map_or_else(|| caps[0].to_owned(), |(_, value)| (*value).to_owned())
        })
        .into_owned()
}

/// Defuse `@everyone`/`@here` by inserting a zero-width space.
#[must_use]
pub fn filter_everyone(text: &str) -> String {
    static EVERYONE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)@(here|everyone)").unwrap_or_else(|e| panic!("everyone regex: {e}"))
    });
    EVERYONE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("@\u{200b}{}", &caps[1])
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discord_bold_to_irc() {
        assert_eq!(convert_discord_to_irc("**text**"), "\u{2}text\u{2}");
    }

    #[test]
    fn discord_italic_to_irc() {
        assert_eq!(convert_discord_to_irc("*text*"), "\u{1d}text\u{1d}");
        assert_eq!(convert_discord_to_irc("_text_"), "\u{1d}text\u{1d}");
    }

    #[test]
    fn discord_underline_to_irc() {
        assert_eq!(convert_discord_to_irc("__text__"), "\u{1f}text\u{1f}");
    }

    #[test]
    fn discord_strikethrough_is_stripped() {
        assert_eq!(convert_discord_to_irc("~~text~~"), "text");
    }

    #[test]
    fn discord_nested_markdown_to_irc() {
        assert_eq!(
            convert_discord_to_irc("**bold *italics***"),
            "\u{2}bold \u{1d}italics\u{1d}\u{2}"
        );
    }

    #[test]
    fn unmatched_markdown_is_left_verbatim() {
        assert_eq!(convert_discord_to_irc("2 * 3 = 6"), "2 * 3 = 6");
    }

    #[test]
    fn irc_bold_to_discord() {
        assert_eq!(convert_irc_to_discord("\u{2}text\u{2}"), "**text**");
    }

    #[test]
    fn irc_reverse_to_discord() {
        assert_eq!(convert_irc_to_discord("\u{16}text\u{16}"), "*text*");
    }

    #[test]
    fn irc_italic_to_discord() {
        assert_eq!(convert_irc_to_discord("\u{1d}text\u{1d}"), "*text*");
    }

    #[test]
    fn irc_underline_to_discord() {
        assert_eq!(convert_irc_to_discord("\u{1f}text\u{1f}"), "__text__");
    }

    #[test]
    fn irc_color_codes_are_stripped() {
        assert_eq!(convert_irc_to_discord("\u{3}06,08text\u{3}"), "text");
    }

    #[test]
    fn irc_nested_styles_to_discord() {
        assert_eq!(
            convert_irc_to_discord("\u{2}bold \u{16}italics\u{16}\u{2}"),
            "**bold *italics***"
        );
        assert_eq!(
            convert_irc_to_discord("\u{2}bold \u{1f}underline\u{1f}\u{2}"),
            "**bold __underline__**"
        );
    }

    #[test]
    fn nick_color_is_deterministic() {
        let palette: Vec<String> = ["light_blue", "dark_red", "yellow"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        let first = nick_color_for("alice", &palette);
        assert_eq!(first, nick_color_for("alice", &palette));
        assert!(first.is_some());
    }

    #[test]
    fn nick_color_wraps_with_mirc_codes() {
        let wrapped = wrap_nick_color("light_blue", "alice");
        assert_eq!(wrapped, "\u{3}12alice\u{f}");
        // Unknown colors leave the nick readable rather than garbled.
        assert_eq!(wrap_nick_color("mauve", "alice"), "alice");
    }

    #[test]
    fn ping_fix_splits_the_nick() {
        assert_eq!(apply_ping_fix("alice"), "a\u{200b}lice");
        assert_eq!(apply_ping_fix(""), "");
    }

    #[test]
    fn webhook_usernames_are_padded_and_sliced() {
        assert_eq!(webhook_username("a"), "a_");
        assert_eq!(webhook_username("ab"), "ab");
        let long = "x".repeat(40);
        assert_eq!(webhook_username(&long).chars().count(), 32);
    }

    #[test]
    fn template_substitution_fills_known_tokens() {
        let out = substitute_template(
            "<{$displayUsername}> {$text}",
            &[("displayUsername", "alice"), ("text", "hi there")],
        );
        assert_eq!(out, "<alice> hi there");
    }

    #[test]
    fn template_substitution_leaves_unmatched_tokens() {
        let out = substitute_template("{$author} says {$mystery}", &[("author", "bob")]);
        assert_eq!(out, "bob says {$mystery}");
    }

    #[test]
    fn everyone_mentions_are_defused() {
        let out = filter_everyone("hey @everyone and @HERE");
        assert!(!out.contains("@everyone"));
        assert!(!out.contains("@HERE"));
        assert!(out.contains('\u{200b}'));
    }
}
