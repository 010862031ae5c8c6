use serde::{Deserialize, Serialize};

/// Which of the two bridged networks an event or identity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSide {
    /// The gateway network (persistent session, channels, threads, webhooks).
    Gateway,
    /// The line-protocol network (join/part/quit semantics).
    Line,
}

impl NetworkSide {
    /// Human-readable side label used in command preludes and notices.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Gateway => "Discord",
            Self::Line => "IRC",
        }
    }

    /// Prefix used to network-qualify sender identities, so the same
    /// display name on different networks is tracked separately.
    #[must_use]
    pub fn qualify(self, id: &str) -> String {
        match self {
            Self::Gateway => format!("discord:{id}"),
            Self::Line => format!("irc:{id}"),
        }
    }
}

impl std::fmt::Display for NetworkSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_identities_differ_per_network() {
        assert_ne!(
            NetworkSide::Gateway.qualify("alice"),
            NetworkSide::Line.qualify("alice")
        );
    }
}
