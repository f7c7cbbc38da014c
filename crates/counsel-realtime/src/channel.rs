//! Channel kinds.

use std::fmt;
use std::str::FromStr;

use counsel_core::CoreError;
use serde::{Deserialize, Serialize};

/// Kind of broadcast group. A channel is `(kind, key)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    /// A chat group; key is the group id.
    Chat,
    /// A user's notification feed; key is the user id.
    Notifications,
}

impl ChannelKind {
    /// Stored name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "notifications" => Ok(Self::Notifications),
            other => Err(CoreError::internal(format!("unknown channel kind '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in [ChannelKind::Chat, ChannelKind::Notifications] {
            assert_eq!(kind.as_str().parse::<ChannelKind>().unwrap(), kind);
        }
        assert!("lobby".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn serde_uses_stored_names() {
        assert_eq!(serde_json::to_string(&ChannelKind::Notifications).unwrap(), "\"notifications\"");
    }
}
