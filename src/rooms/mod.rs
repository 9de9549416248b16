mod new;

pub use new::{NEW_ROOM_DESCRIPTION, slug};

use tracing::info;

use crate::model::{Identity, Room, RoomId};

pub const DEFAULT_ROOM: &str = "general";

/// Rooms known to this client. Lives for the session only and is not
/// shared with other clients.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: Vec<Room>,
    active: Option<RoomId>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        RoomRegistry::seeded()
    }
}

impl RoomRegistry {
    pub fn seeded() -> RoomRegistry {
        RoomRegistry {
            rooms: vec![
                Room::seed("general", "General Chat", "General discussions", 12),
                Room::seed("random", "Random", "Anything goes", 8),
                Room::seed("help", "Help Desk", "Get help here", 5),
            ],
            active: Some(RoomId::new(DEFAULT_ROOM)),
        }
    }

    pub fn empty() -> RoomRegistry {
        RoomRegistry { rooms: Vec::new(), active: None }
    }

    /// Adds a room named `name` and makes it active. Slugs are not checked
    /// for uniqueness; both rooms stay listed and the newest one is selected.
    pub fn create(&mut self, name: &str, creator: &Identity) -> Room {
        let room = new::new_room(name, creator);
        info!(room_id = %room.id, room_name = name, creator = %creator.id, "room created");

        self.rooms.push(room.clone());
        self.active = Some(room.id.clone());
        room
    }

    /// Selects `room_id` if it is listed.
    pub fn select(&mut self, room_id: &RoomId) -> bool {
        if self.get(room_id).is_none() {
            return false;
        }
        self.active = Some(room_id.clone());
        true
    }

    pub fn active_id(&self) -> Option<&RoomId> {
        self.active.as_ref()
    }

    /// The active room. With duplicate slugs the last created one wins.
    pub fn active(&self) -> Option<&Room> {
        self.get(self.active.as_ref()?)
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.iter().rev().find(|room| &room.id == room_id)
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::from_profile("alice", Some("Alice".into()), None, None)
    }

    #[test]
    fn seeded_with_three_rooms_and_general_active() {
        let registry = RoomRegistry::seeded();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.active().map(|room| room.name.as_str()), Some("General Chat"));
    }

    #[test]
    fn create_selects_the_new_room() {
        let mut registry = RoomRegistry::seeded();
        let room = registry.create("Book Club", &alice());
        assert_eq!(registry.active_id(), Some(&room.id));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn duplicate_slugs_both_stay_and_last_wins() {
        let mut registry = RoomRegistry::empty();
        registry.create("Book Club", &alice());
        registry.create("book club", &alice());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active().map(|room| room.name.as_str()), Some("book club"));
    }

    #[test]
    fn select_ignores_unknown_rooms() {
        let mut registry = RoomRegistry::seeded();
        assert!(!registry.select(&RoomId::new("nope")));
        assert!(registry.select(&RoomId::new("help")));
        assert_eq!(registry.active_id(), Some(&RoomId::new("help")));
    }
}
