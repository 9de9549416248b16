use crate::model::{Identity, Room, RoomId};

pub const NEW_ROOM_DESCRIPTION: &str = "New chat room";

/// Lowercases the name and turns every character outside `[a-z0-9]` into a
/// hyphen. Applying it twice gives the same result as applying it once.
pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect()
}

pub(crate) fn new_room(name: &str, creator: &Identity) -> Room {
    Room {
        id: RoomId::new(slug(name)),
        name: name.to_owned(),
        description: NEW_ROOM_DESCRIPTION.to_owned(),
        member_count: 1,
        created_by: Some(creator.id.clone()),
    }
}
