//! The client context: owns every piece of chat state and applies the
//! events the feed produces, one at a time, on the caller's task.

use std::{collections::VecDeque, fmt, sync::Arc};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    AppError,
    composer::{Composer, SubmitOutcome},
    feed::{CollectionPath, IdentitySink, RemoteFeed, SnapshotResult, Subscription},
    model::{Identity, Message, MessageDraft, Room, RoomId},
    rooms::RoomRegistry,
    session::{Screen, SessionState},
    sync::{DEFAULT_ECHO_WINDOW, MessageSync, SyncState},
};

/// Where a failure happened. Each kind is contained where it occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Sign-in or sign-out rejected. Shown to the user.
    Auth,
    /// The live query failed. Replaced by placeholder content.
    Subscription,
    /// A message append failed. Replaced by a local echo.
    Write,
    /// The welcome message of a new room could not be posted. Logged.
    Welcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    SignIn,
    SignOut,
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthAction::SignIn => f.write_str("Login"),
            AuthAction::SignOut => f.write_str("Logout"),
        }
    }
}

/// A blocking notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub failure: Failure,
    pub text: String,
}

#[derive(Debug)]
pub enum Event {
    Identity(Option<Identity>),
    Snapshot {
        generation: u64,
        outcome: SnapshotResult,
    },
    WriteFailed {
        draft: MessageDraft,
        error: AppError,
    },
    WelcomeFailed {
        room_id: RoomId,
        error: AppError,
    },
    AuthFailed {
        action: AuthAction,
        error: AppError,
    },
}

impl Event {
    pub fn failure(&self) -> Option<Failure> {
        match self {
            Event::Identity(_) | Event::Snapshot { outcome: Ok(_), .. } => None,
            Event::Snapshot { outcome: Err(_), .. } => Some(Failure::Subscription),
            Event::WriteFailed { .. } => Some(Failure::Write),
            Event::WelcomeFailed { .. } => Some(Failure::Welcome),
            Event::AuthFailed { .. } => Some(Failure::Auth),
        }
    }
}

pub struct ChatClient<F: RemoteFeed> {
    feed: Arc<F>,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,

    session: SessionState,
    rooms: RoomRegistry,
    sync: MessageSync,
    composer: Composer,

    notices: VecDeque<Notice>,
    last_failure: Option<Failure>,
    identity_subscription: Option<Subscription>,
}

impl<F: RemoteFeed> ChatClient<F> {
    pub fn new(feed: Arc<F>) -> ChatClient<F> {
        ChatClient::with_echo_window(feed, DEFAULT_ECHO_WINDOW)
    }

    pub fn with_echo_window(feed: Arc<F>, echo_window: time::Duration) -> ChatClient<F> {
        let (tx, rx) = mpsc::unbounded_channel();
        ChatClient {
            feed,
            tx,
            rx,
            session: SessionState::new(),
            rooms: RoomRegistry::seeded(),
            sync: MessageSync::new(echo_window),
            composer: Composer::new(),
            notices: VecDeque::new(),
            last_failure: None,
            identity_subscription: None,
        }
    }

    /// Subscribes to identity changes. Must run inside a tokio runtime.
    pub fn start(&mut self) {
        if self.identity_subscription.is_some() {
            return;
        }
        let sink = IdentitySink::new(self.tx.clone());
        self.identity_subscription = Some(self.feed.subscribe_identity(sink));
        info!("chat client started");
    }

    /// Releases every subscription.
    pub fn shutdown(mut self) {
        if let Some(subscription) = self.identity_subscription.take() {
            subscription.cancel();
        }
        self.sync.teardown();
        info!("chat client shut down");
    }

    /// Waits for the next event and applies it.
    pub async fn process_next(&mut self) {
        // the client holds a sender, so the queue never closes
        if let Some(event) = self.rx.recv().await {
            self.handle(event);
        }
    }

    /// Applies every event already queued. Returns how many there were.
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.handle(event);
            count += 1;
        }
        count
    }

    pub fn handle(&mut self, event: Event) {
        if let Some(failure) = event.failure() {
            self.last_failure = Some(failure);
        }

        match event {
            Event::Identity(identity) => {
                self.session.apply(identity);
                self.reconcile();
            }
            Event::Snapshot { generation, outcome } => {
                self.sync.apply_snapshot(generation, outcome);
            }
            Event::WriteFailed { draft, error } => {
                warn!(room_id = %draft.room_id, %error, "message write failed, echoing locally");
                self.sync.push_echo(draft.into_local_echo(OffsetDateTime::now_utc()));
            }
            Event::WelcomeFailed { room_id, error } => {
                error!(%room_id, %error, "error creating welcome message");
            }
            Event::AuthFailed { action, error } => {
                error!(%action, %error, "auth request failed");
                self.notices.push_back(Notice {
                    failure: Failure::Auth,
                    text: format!("{action} failed: {error}"),
                });
            }
        }
    }

    fn reconcile(&mut self) {
        self.sync.reconcile(
            self.rooms.active_id(),
            self.session.is_signed_in(),
            &*self.feed,
            &self.tx,
        );
    }

    pub fn sign_in(&self) {
        self.spawn_auth(AuthAction::SignIn);
    }

    pub fn sign_out(&self) {
        self.spawn_auth(AuthAction::SignOut);
    }

    fn spawn_auth(&self, action: AuthAction) {
        let feed = self.feed.clone();
        let tx = self.tx.clone();
        debug!(%action, "auth request dispatched");

        tokio::spawn(async move {
            let result = match action {
                AuthAction::SignIn => feed.sign_in().await,
                AuthAction::SignOut => feed.sign_out().await,
            };
            if let Err(error) = result {
                let _ = tx.send(Event::AuthFailed { action, error });
            }
        });
    }

    pub fn select_room(&mut self, room_id: &RoomId) -> bool {
        if !self.rooms.select(room_id) {
            return false;
        }
        self.reconcile();
        true
    }

    /// Creates a room, selects it and posts its welcome message. Needs a
    /// non-blank name and a signed-in user.
    pub fn create_room(&mut self, name: &str) -> Option<Room> {
        if name.trim().is_empty() {
            return None;
        }
        let creator = self.session.identity()?.clone();

        let room = self.rooms.create(name, &creator);
        self.reconcile();

        let draft = MessageDraft::welcome(&room);
        let feed = self.feed.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let room_id = draft.room_id.clone();
            let path = CollectionPath::room_messages(&room_id);
            if let Err(error) = feed.append_document(path, draft).await {
                let _ = tx.send(Event::WelcomeFailed { room_id, error });
            }
        });

        Some(room)
    }

    pub fn input(&self) -> &str {
        self.composer.input()
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.composer.set_input(text);
    }

    /// Sends the composer's text to the active room. Returns false when it
    /// was a no-op.
    pub fn submit(&mut self) -> bool {
        let outcome = self.composer.submit(self.rooms.active_id(), self.session.identity());
        let SubmitOutcome::Dispatched(draft) = outcome else {
            return false;
        };

        let feed = self.feed.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let path = CollectionPath::room_messages(&draft.room_id);
            if let Err(error) = feed.append_document(path, draft.clone()).await {
                let _ = tx.send(Event::WriteFailed { draft, error });
            }
        });
        true
    }

    pub fn screen(&self) -> Screen {
        self.session.screen()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    pub fn messages(&self) -> &[Message] {
        self.sync.messages()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn rooms(&self) -> &[Room] {
        self.rooms.rooms()
    }

    pub fn active_room(&self) -> Option<&Room> {
        self.rooms.active()
    }

    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }

    /// The kind of the most recent contained failure, if any.
    pub fn last_failure(&self) -> Option<Failure> {
        self.last_failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Identity;

    fn draft() -> MessageDraft {
        let alice = Identity::from_profile("alice", Some("Alice".into()), None, None);
        MessageDraft::from_identity("hi", &alice, &RoomId::new("general"))
    }

    #[test]
    fn failures_are_tagged_by_where_they_happened() {
        let cases = [
            (Event::Identity(None), None),
            (Event::Snapshot { generation: 1, outcome: Ok(Vec::new()) }, None),
            (Event::Snapshot { generation: 1, outcome: Err("offline".into()) }, Some(Failure::Subscription)),
            (Event::WriteFailed { draft: draft(), error: "denied".into() }, Some(Failure::Write)),
            (Event::WelcomeFailed { room_id: RoomId::new("book-club"), error: "denied".into() }, Some(Failure::Welcome)),
            (Event::AuthFailed { action: AuthAction::SignIn, error: "popup closed".into() }, Some(Failure::Auth)),
        ];

        for (event, expected) in cases {
            assert_eq!(event.failure(), expected, "{event:?}");
        }
    }

    #[test]
    fn auth_actions_read_like_buttons() {
        assert_eq!(AuthAction::SignIn.to_string(), "Login");
        assert_eq!(AuthAction::SignOut.to_string(), "Logout");
    }
}
