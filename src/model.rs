use std::fmt;

use time::{OffsetDateTime, macros::format_description};
use uuid::Uuid;

pub const SYSTEM_AUTHOR_ID: &str = "system";
pub const SYSTEM_NAME: &str = "System";

const AVATAR_API: &str = "https://ui-avatars.com/api/";

/// Placeholder avatar keyed by display name.
pub fn avatar_url(name: &str) -> String {
    reqwest::Url::parse_with_params(
        AVATAR_API,
        &[("name", name), ("background", "4f46e5"), ("color", "fff")],
    )
    .map(String::from)
    .unwrap_or_else(|_| format!("{AVATAR_API}?name={name}&background=4f46e5&color=fff"))
}

/// The signed-in user. Only [`crate::session::SessionState`] creates or clears one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: String,
}

impl Identity {
    /// Builds an identity from whatever the identity provider handed back,
    /// filling in the display name and avatar when they are missing.
    pub fn from_profile(
        id: impl Into<String>,
        display_name: Option<String>,
        email: Option<String>,
        photo_url: Option<String>,
    ) -> Identity {
        let display_name = display_name.filter(|name| !name.trim().is_empty());
        let avatar_url = photo_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| avatar_url(display_name.as_deref().unwrap_or("User")));

        Identity {
            id: id.into(),
            display_name: display_name.unwrap_or_else(|| "Anonymous".to_owned()),
            email,
            avatar_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> RoomId {
        RoomId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        RoomId::new(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,

    pub name: String,
    pub description: String,
    pub member_count: u32,
    pub created_by: Option<String>,
}

impl Room {
    pub fn seed(id: &str, name: &str, description: &str, member_count: u32) -> Room {
        Room {
            id: RoomId::new(id),
            name: name.to_owned(),
            description: description.to_owned(),
            member_count,
            created_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub text: String,

    pub author_id: String,
    pub author_name: String,
    pub author_avatar_url: String,

    pub room_id: RoomId,
    pub timestamp: OffsetDateTime,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.author_id == SYSTEM_AUTHOR_ID
    }

    pub fn is_from(&self, identity: &Identity) -> bool {
        self.author_id == identity.id
    }
}

/// A message on its way to the feed. The timestamp is left for the server
/// to fill in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub text: String,

    pub author_id: Option<String>,
    pub author_name: String,
    pub author_avatar_url: String,

    pub room_id: RoomId,
}

impl MessageDraft {
    pub fn from_identity(text: impl Into<String>, identity: &Identity, room_id: &RoomId) -> MessageDraft {
        MessageDraft {
            text: text.into(),
            author_id: Some(identity.id.clone()),
            author_name: identity.display_name.clone(),
            author_avatar_url: identity.avatar_url.clone(),
            room_id: room_id.clone(),
        }
    }

    pub fn welcome(room: &Room) -> MessageDraft {
        MessageDraft {
            text: format!("Welcome to #{}! 👋", room.name),
            author_id: None,
            author_name: SYSTEM_NAME.to_owned(),
            author_avatar_url: avatar_url(SYSTEM_NAME),
            room_id: room.id.clone(),
        }
    }

    /// Turns the draft into a local-only message with a client id and clock.
    pub fn into_local_echo(self, now: OffsetDateTime) -> Message {
        Message {
            id: Uuid::now_v7().to_string(),
            text: self.text,
            author_id: self.author_id.unwrap_or_else(|| SYSTEM_AUTHOR_ID.to_owned()),
            author_name: self.author_name,
            author_avatar_url: self.author_avatar_url,
            room_id: self.room_id,
            timestamp: now,
        }
    }
}

/// The fixed two-message conversation shown when the live query fails.
pub fn placeholder_conversation(room_id: &RoomId, now: OffsetDateTime) -> Vec<Message> {
    let system = |id: &str, text: &str| Message {
        id: id.to_owned(),
        text: text.to_owned(),
        author_id: SYSTEM_AUTHOR_ID.to_owned(),
        author_name: SYSTEM_NAME.to_owned(),
        author_avatar_url: avatar_url(SYSTEM_NAME),
        room_id: room_id.clone(),
        timestamp: now,
    };

    vec![
        system("1", "Welcome to the chat! 👋"),
        system("2", "This is a real-time chat application"),
    ]
}

/// `HH:MM` in the timestamp's own offset.
pub fn format_time(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(format_description!("[hour]:[minute]"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn identity_fills_in_missing_profile_fields() {
        let identity = Identity::from_profile("u1", None, None, None);
        assert_eq!(identity.display_name, "Anonymous");
        assert_eq!(
            identity.avatar_url,
            "https://ui-avatars.com/api/?name=User&background=4f46e5&color=fff"
        );

        let identity = Identity::from_profile("u2", Some("Alice".into()), None, Some("https://x/a.png".into()));
        assert_eq!(identity.display_name, "Alice");
        assert_eq!(identity.avatar_url, "https://x/a.png");
    }

    #[test]
    fn avatar_is_keyed_by_name() {
        assert!(avatar_url("Bob Smith").contains("name=Bob+Smith"));
        assert_ne!(avatar_url("Alice"), avatar_url("Bob"));
    }

    #[test]
    fn placeholder_is_two_system_messages() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let placeholder = placeholder_conversation(&RoomId::new("general"), now);
        assert_eq!(placeholder.len(), 2);
        assert!(placeholder.iter().all(Message::is_system));
        assert_eq!(placeholder[0].id, "1");
        assert_eq!(placeholder[1].text, "This is a real-time chat application");
    }

    #[test]
    fn welcome_draft_has_no_author_id() {
        let room = Room::seed("lobby", "Lobby", "New chat room", 1);
        let draft = MessageDraft::welcome(&room);
        assert_eq!(draft.text, "Welcome to #Lobby! 👋");
        assert_eq!(draft.author_id, None);

        let echo = draft.into_local_echo(datetime!(2024-05-01 12:00 UTC));
        assert!(echo.is_system());
    }

    #[test]
    fn formats_hours_and_minutes() {
        assert_eq!(format_time(datetime!(2024-05-01 09:05:59 UTC)), "09:05");
    }

    #[test]
    fn room_id_honours_width() {
        assert_eq!(format!("[{:<8}]", RoomId::new("help")), "[help    ]");
    }

    #[test]
    fn is_from_matches_the_author() {
        let alice = Identity::from_profile("alice", Some("Alice".into()), None, None);
        let draft = MessageDraft::from_identity("hi", &alice, &RoomId::new("general"));
        let message = draft.into_local_echo(OffsetDateTime::now_utc());
        assert!(message.is_from(&alice));
        assert!(!message.is_system());
    }
}
