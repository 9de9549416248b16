use tracing::info;

use crate::model::Identity;

/// What a renderer should show for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// No identity callback has arrived yet.
    Loading,
    Login,
    Chat,
}

/// The current identity, driven only by the feed's identity subscription.
#[derive(Debug, Default)]
pub struct SessionState {
    identity: Option<Identity>,
    resolved: bool,
}

impl SessionState {
    pub fn new() -> SessionState {
        SessionState::default()
    }

    /// Applies one identity callback. Returns true when the signed-in state
    /// (present or absent) flipped.
    pub fn apply(&mut self, identity: Option<Identity>) -> bool {
        let was_present = self.identity.is_some();
        match &identity {
            Some(identity) => info!(user_id = %identity.id, display_name = %identity.display_name, "signed in"),
            None if was_present => info!("signed out"),
            None => {}
        }

        self.identity = identity;
        self.resolved = true;
        was_present != self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn screen(&self) -> Screen {
        match (self.resolved, &self.identity) {
            (false, _) => Screen::Loading,
            (true, None) => Screen::Login,
            (true, Some(_)) => Screen::Chat,
        }
    }
}
