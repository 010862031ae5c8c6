//! Bidirectional channel mapping.

use std::collections::HashMap;

/// Maps a gateway channel reference (opaque id or `#name`) to a
/// line-protocol channel and back.
///
/// Line-side names are lowercase-normalized and any ` key` suffix (a
/// channel password) is stripped from the mapping, though the full string
/// is kept for the join list. The inverse map is derived from the forward
/// map; construction is last-write-wins per key.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    forward: HashMap<String, String>,
    inverse: HashMap<String, String>,
    join_list: Vec<String>,
}

impl ChannelMap {
    #[must_use]
    pub fn new(mapping: &HashMap<String, String>) -> Self {
        let mut map = Self::default();
        for (gateway_ref, line_channel) in mapping {
            map.insert(gateway_ref, line_channel);
        }
        map
    }

    fn insert(&mut self, gateway_ref: &str, line_channel: &str) {
        let stripped = line_channel
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        self.forward.insert(gateway_ref.to_owned(), stripped.clone());
        self.inverse.insert(stripped, gateway_ref.to_owned());
        self.join_list.push(line_channel.to_owned());
    }

    /// Line channel for a gateway channel, trying the opaque id first and
    /// the `#name` form second.
    #[must_use]
    pub fn line_channel_for(&self, channel_id: &str, channel_name: Option<&str>) -> Option<&str> {
        if let Some(found) = self.forward.get(channel_id) {
            return Some(found);
        }
        let name = channel_name?;
        self.forward.get(name).map(String::as_str)
    }

    /// Gateway channel reference for a line channel (case-insensitive).
    #[must_use]
    pub fn gateway_ref_for(&self, line_channel: &str) -> Option<&str> {
        self.inverse
            .get(&line_channel.to_lowercase())
            .map(String::as_str)
    }

    /// Channels to join on the line network, passwords included.
    #[must_use]
    pub fn join_list(&self) -> &[String] {
        &self.join_list
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> ChannelMap {
        ChannelMap::new(
            &entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        )
    }

    #[test]
    fn inverse_of_forward_is_identity() {
        let entries = [
            ("#discord", "#irc"),
            ("1234", "#channelforid"),
            ("#other", "#more"),
        ];
        let map = map(&entries);
        for (gateway_ref, _) in entries {
            let line = map
                .line_channel_for(gateway_ref, None)
                .expect("forward lookup");
            assert_eq!(map.gateway_ref_for(line), Some(gateway_ref));
        }
    }

    #[test]
    fn line_names_are_lowercased() {
        let map = map(&[("#discord", "#IRC"), ("#otherDiscord", "#OtherIRC")]);
        assert_eq!(map.line_channel_for("#discord", None), Some("#irc"));
        assert_eq!(map.line_channel_for("#otherDiscord", None), Some("#otherirc"));
        // Inbound lookups are case-insensitive too.
        assert_eq!(map.gateway_ref_for("#OTHERIRC"), Some("#otherDiscord"));
    }

    #[test]
    fn channel_keys_are_cleared_from_the_mapping() {
        let map = map(&[("#discord", "#irc channelKey")]);
        assert_eq!(map.line_channel_for("#discord", None), Some("#irc"));
        assert_eq!(map.gateway_ref_for("#irc"), Some("#discord"));
        assert!(map.join_list().contains(&"#irc channelKey".to_owned()));
    }

    #[test]
    fn id_lookup_takes_precedence_over_name() {
        let map = map(&[("1234", "#by-id"), ("#general", "#by-name")]);
        assert_eq!(map.line_channel_for("1234", Some("#general")), Some("#by-id"));
        assert_eq!(map.line_channel_for("9999", Some("#general")), Some("#by-name"));
        assert_eq!(map.line_channel_for("9999", Some("#unmapped")), None);
    }
}
