use crate::model::{Identity, MessageDraft, RoomId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input, or no room or identity. Nothing changed.
    Ignored,
    /// The input was taken; the draft should be written to the feed.
    Dispatched(MessageDraft),
}

/// The outgoing message buffer.
#[derive(Debug, Default)]
pub struct Composer {
    input: String,
}

impl Composer {
    pub fn new() -> Composer {
        Composer::default()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Takes the buffer as a draft for `room`, authored by `identity`. The
    /// buffer is cleared before the write is attempted; if the write fails
    /// the caller falls back to a local echo of the returned draft.
    pub fn submit(&mut self, room: Option<&RoomId>, identity: Option<&Identity>) -> SubmitOutcome {
        let (Some(room), Some(identity)) = (room, identity) else {
            return SubmitOutcome::Ignored;
        };
        if self.input.trim().is_empty() {
            return SubmitOutcome::Ignored;
        }

        let text = std::mem::take(&mut self.input);
        SubmitOutcome::Dispatched(MessageDraft::from_identity(text, identity, room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::from_profile("alice", Some("Alice".into()), None, None)
    }

    #[test]
    fn whitespace_is_a_no_op_and_keeps_the_buffer() {
        let mut composer = Composer::new();
        let room = RoomId::new("general");

        composer.set_input("   \n\t");
        assert_eq!(composer.submit(Some(&room), Some(&alice())), SubmitOutcome::Ignored);
        assert_eq!(composer.input(), "   \n\t");

        composer.set_input("");
        assert_eq!(composer.submit(Some(&room), Some(&alice())), SubmitOutcome::Ignored);
    }

    #[test]
    fn needs_room_and_identity() {
        let mut composer = Composer::new();
        composer.set_input("hi");

        assert_eq!(composer.submit(None, Some(&alice())), SubmitOutcome::Ignored);
        assert_eq!(composer.submit(Some(&RoomId::new("general")), None), SubmitOutcome::Ignored);
        assert_eq!(composer.input(), "hi");
    }

    #[test]
    fn submit_clears_the_buffer_and_tags_the_author() {
        let mut composer = Composer::new();
        composer.set_input("hello there");

        let SubmitOutcome::Dispatched(draft) = composer.submit(Some(&RoomId::new("random")), Some(&alice())) else {
            panic!("expected a draft");
        };
        assert_eq!(composer.input(), "");
        assert_eq!(draft.text, "hello there");
        assert_eq!(draft.author_id.as_deref(), Some("alice"));
        assert_eq!(draft.author_name, "Alice");
        assert_eq!(draft.room_id, RoomId::new("random"));
    }
}
