//! Archived entities.
//!
//! A [`Message`] owns its attachments, embeds and reactions; they are always
//! written and read together with it. Users, servers and channels are the
//! identities messages point at.

use serde::{Deserialize, Serialize};

/// Id of the sentinel user standing in for the chat platform itself.
///
/// Platform-authored messages (system and welcome messages) are not captured
/// independently, so replies to them point at a placeholder owned by this user.
pub const PLATFORM_USER_ID: i64 = -1;

/// A captured message with all of its child rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub channel_id: i64,
    pub text: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub edit_timestamp: Option<i64>,
    pub replied_to_id: Option<i64>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Create a message without edits, reply link or children.
    pub fn new(id: i64, sender_id: i64, channel_id: i64, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id,
            sender_id,
            channel_id,
            text: text.into(),
            timestamp,
            edit_timestamp: None,
            replied_to_id: None,
            attachments: Vec::new(),
            embeds: Vec::new(),
            reactions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    /// Download URL with volatile query parameters stripped.
    pub normalized_url: String,
    pub download_url: String,
    pub size: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Raw embed payload, stored exactly as captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub json: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji_id: Option<i64>,
    pub emoji_name: Option<String>,
    pub emoji_flags: EmojiFlags,
    pub count: u32,
}

/// Emoji flag bits as stored in `reactions.emoji_flags`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmojiFlags(u8);

impl EmojiFlags {
    pub const NONE: Self = Self(0);
    pub const ANIMATED: Self = Self(1);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for EmojiFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub discriminator: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Server,
    Group,
    Direct,
}

impl ServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerKind::Server => "server",
            ServerKind::Group => "group",
            ServerKind::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "server" => Some(ServerKind::Server),
            "group" => Some(ServerKind::Group),
            "direct" => Some(ServerKind::Direct),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub kind: ServerKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub server: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub position: Option<i64>,
    pub topic: Option<String>,
    pub nsfw: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emoji_flags() {
        let flags = EmojiFlags::from_bits(1);
        assert!(flags.contains(EmojiFlags::ANIMATED));
        assert!(!EmojiFlags::NONE.contains(EmojiFlags::ANIMATED));
        assert_eq!((EmojiFlags::NONE | EmojiFlags::ANIMATED).bits(), 1);
    }

    #[test]
    fn test_server_kind_round_trips_through_text() {
        for kind in [ServerKind::Server, ServerKind::Group, ServerKind::Direct] {
            assert_eq!(ServerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ServerKind::parse("guild"), None);
    }

    #[test]
    fn test_attachment_serializes_type_field() {
        let attachment = Attachment {
            id: 7,
            name: "a.png".into(),
            content_type: Some("image/png".into()),
            normalized_url: "https://cdn/a.png".into(),
            download_url: "https://cdn/a.png?ex=1".into(),
            size: 10,
            width: Some(2),
            height: None,
        };
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["type"], "image/png");
    }
}
