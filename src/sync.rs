//! Mirrors the live query of the active room into local state.

use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    client::Event,
    feed::{CollectionPath, CollectionQuery, RemoteFeed, SnapshotResult, SnapshotSink, Subscription},
    model::{self, Message, RoomId},
};

pub const DEFAULT_ECHO_WINDOW: Duration = Duration::seconds(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No room selected or nobody signed in.
    Idle,
    /// Subscribed, waiting for the first result set.
    Subscribing,
    Live,
    /// The live query failed; the placeholder conversation is shown until
    /// the next resubscription.
    Degraded,
}

#[derive(Debug)]
pub struct MessageSync {
    state: SyncState,
    key: Option<(Option<RoomId>, bool)>,
    room: Option<RoomId>,

    generation: u64,
    subscription: Option<Subscription>,

    authoritative: Vec<Message>,
    echoes: Vec<Message>,
    visible: Vec<Message>,
    echo_window: Duration,
}

impl Default for MessageSync {
    fn default() -> Self {
        MessageSync::new(DEFAULT_ECHO_WINDOW)
    }
}

impl MessageSync {
    pub fn new(echo_window: Duration) -> MessageSync {
        MessageSync {
            state: SyncState::Idle,
            key: None,
            room: None,
            generation: 0,
            subscription: None,
            authoritative: Vec::new(),
            echoes: Vec::new(),
            visible: Vec::new(),
            echo_window,
        }
    }

    /// Re-establishes the live query when the (room, signed-in) pair changed.
    /// The previous subscription is released before a new one is started.
    /// Returns true if anything changed.
    pub fn reconcile<F: RemoteFeed>(
        &mut self,
        room: Option<&RoomId>,
        signed_in: bool,
        feed: &F,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> bool {
        let key = (room.cloned(), signed_in);
        if self.key.as_ref() == Some(&key) {
            return false;
        }
        self.key = Some(key);

        self.release();
        self.generation += 1;
        self.authoritative.clear();
        self.echoes.clear();
        self.visible.clear();

        match room {
            Some(room) if signed_in => {
                let query = CollectionQuery::ordered(CollectionPath::room_messages(room));
                let sink = SnapshotSink::new(self.generation, tx.clone());
                self.subscription = Some(feed.subscribe_collection(query, sink));
                self.room = Some(room.clone());
                self.state = SyncState::Subscribing;
                info!(room_id = %room, generation = self.generation, "subscribing to room");
            }
            _ => {
                self.room = None;
                self.state = SyncState::Idle;
                debug!(generation = self.generation, "message sync idle");
            }
        }
        true
    }

    /// Releases the subscription and forgets the room.
    pub fn teardown(&mut self) {
        self.release();
        self.generation += 1;
        self.key = None;
        self.room = None;
        self.state = SyncState::Idle;
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    /// Applies a result set from the feed. Snapshots from an earlier
    /// subscription are dropped. Returns true if local state changed.
    pub fn apply_snapshot(&mut self, generation: u64, outcome: SnapshotResult) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale snapshot");
            return false;
        }
        let Some(room) = self.room.clone() else {
            return false;
        };
        if self.state == SyncState::Degraded {
            debug!(room_id = %room, "ignoring snapshot while degraded");
            return false;
        }

        match outcome {
            Ok(messages) => {
                self.confirm_echoes(&messages);
                self.authoritative = messages;
                self.state = SyncState::Live;
                debug!(room_id = %room, count = self.authoritative.len(), echoes = self.echoes.len(), "snapshot applied");
            }
            Err(err) => {
                warn!(room_id = %room, error = %err, "live query failed, showing placeholder conversation");
                self.release();
                self.authoritative = model::placeholder_conversation(&room, OffsetDateTime::now_utc());
                self.echoes.clear();
                self.state = SyncState::Degraded;
            }
        }

        self.rebuild();
        true
    }

    /// Shows a message that never reached the feed. Dropped if it belongs to
    /// a room that is no longer active.
    pub fn push_echo(&mut self, echo: Message) -> bool {
        if self.room.as_ref() != Some(&echo.room_id) {
            debug!(room_id = %echo.room_id, "discarding echo for inactive room");
            return false;
        }

        self.echoes.push(echo);
        self.rebuild();
        true
    }

    /// Drops echoes the feed now holds. Each authoritative message confirms
    /// at most one echo.
    fn confirm_echoes(&mut self, messages: &[Message]) {
        let mut used = vec![false; messages.len()];
        let window = self.echo_window;
        self.echoes.retain(|echo| {
            let found = messages
                .iter()
                .enumerate()
                .find(|(i, message)| !used[*i] && confirms(message, echo, window));
            match found {
                Some((i, _)) => {
                    used[i] = true;
                    false
                }
                None => true,
            }
        });
    }

    fn rebuild(&mut self) {
        let mut visible = self.authoritative.clone();
        for echo in &self.echoes {
            let at = visible.partition_point(|message| message.timestamp <= echo.timestamp);
            visible.insert(at, echo.clone());
        }
        self.visible = visible;
    }

    pub fn messages(&self) -> &[Message] {
        &self.visible
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for MessageSync {
    fn drop(&mut self) {
        self.release();
    }
}

fn confirms(message: &Message, echo: &Message, window: Duration) -> bool {
    message.author_id == echo.author_id
        && message.text == echo.text
        && (message.timestamp - echo.timestamp).abs() <= window
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{MemoryFeed, model::Identity};

    fn alice() -> Identity {
        Identity::from_profile("alice", Some("Alice".into()), None, None)
    }

    fn message(id: &str, text: &str, at: OffsetDateTime) -> Message {
        Message {
            id: id.to_owned(),
            text: text.to_owned(),
            author_id: "bob".to_owned(),
            author_name: "Bob".to_owned(),
            author_avatar_url: model::avatar_url("Bob"),
            room_id: RoomId::new("general"),
            timestamp: at,
        }
    }

    fn live_sync(feed: &MemoryFeed) -> (MessageSync, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sync = MessageSync::default();
        assert!(sync.reconcile(Some(&RoomId::new("general")), true, feed, &tx));
        (sync, rx)
    }

    #[tokio::test]
    async fn idle_without_identity() {
        let feed = MemoryFeed::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sync = MessageSync::default();

        sync.reconcile(Some(&RoomId::new("general")), false, &feed, &tx);
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!sync.is_subscribed());
    }

    #[tokio::test]
    async fn same_key_does_not_resubscribe() {
        let feed = MemoryFeed::new();
        let (mut sync, _rx) = live_sync(&feed);
        let generation = sync.generation();

        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(!sync.reconcile(Some(&RoomId::new("general")), true, &feed, &tx));
        assert_eq!(sync.generation(), generation);
    }

    #[tokio::test]
    async fn snapshot_replaces_state_verbatim() {
        let feed = MemoryFeed::new();
        let (mut sync, _rx) = live_sync(&feed);
        let t = datetime!(2024-05-01 12:00 UTC);

        sync.apply_snapshot(sync.generation(), Ok(vec![message("m1", "a", t), message("m2", "b", t)]));
        assert_eq!(sync.state(), SyncState::Live);
        assert_eq!(sync.messages().len(), 2);

        sync.apply_snapshot(sync.generation(), Ok(vec![message("m3", "c", t)]));
        let ids: Vec<_> = sync.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m3"]);
    }

    #[tokio::test]
    async fn stale_generation_is_dropped() {
        let feed = MemoryFeed::new();
        let (mut sync, _rx) = live_sync(&feed);
        let stale = sync.generation();

        let (tx, _rx2) = mpsc::unbounded_channel();
        sync.reconcile(Some(&RoomId::new("random")), true, &feed, &tx);

        let t = datetime!(2024-05-01 12:00 UTC);
        assert!(!sync.apply_snapshot(stale, Ok(vec![message("m1", "old room", t)])));
        assert!(sync.messages().is_empty());
        assert_eq!(sync.state(), SyncState::Subscribing);
    }

    #[tokio::test]
    async fn error_degrades_to_placeholder_and_stays() {
        let feed = MemoryFeed::new();
        let (mut sync, _rx) = live_sync(&feed);
        let t = datetime!(2024-05-01 12:00 UTC);
        sync.apply_snapshot(sync.generation(), Ok(vec![message("m1", "a", t)]));

        sync.apply_snapshot(sync.generation(), Err("connection reset".into()));
        assert_eq!(sync.state(), SyncState::Degraded);
        assert!(!sync.is_subscribed());
        let ids: Vec<_> = sync.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);

        assert!(!sync.apply_snapshot(sync.generation(), Ok(vec![message("m9", "late", t)])));
        assert_eq!(sync.state(), SyncState::Degraded);
    }

    #[tokio::test]
    async fn echo_is_merged_then_confirmed() {
        let feed = MemoryFeed::new();
        let (mut sync, _rx) = live_sync(&feed);
        let t = datetime!(2024-05-01 12:00 UTC);
        sync.apply_snapshot(sync.generation(), Ok(vec![message("m1", "a", t)]));

        let draft = model::MessageDraft::from_identity("hi", &alice(), &RoomId::new("general"));
        let echo = draft.into_local_echo(t + Duration::seconds(5));
        assert!(sync.push_echo(echo.clone()));
        assert_eq!(sync.messages().len(), 2);
        assert_eq!(sync.messages()[1].text, "hi");

        // an unrelated snapshot keeps the echo
        sync.apply_snapshot(sync.generation(), Ok(vec![message("m1", "a", t)]));
        assert_eq!(sync.messages().len(), 2);

        let mut confirmed = echo.clone();
        confirmed.id = "server-id".to_owned();
        confirmed.timestamp = t + Duration::seconds(6);
        sync.apply_snapshot(sync.generation(), Ok(vec![message("m1", "a", t), confirmed]));
        let ids: Vec<_> = sync.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "server-id"]);
    }

    #[tokio::test]
    async fn one_confirmation_clears_one_echo() {
        let feed = MemoryFeed::new();
        let (mut sync, _rx) = live_sync(&feed);
        let t = datetime!(2024-05-01 12:00 UTC);
        sync.apply_snapshot(sync.generation(), Ok(Vec::new()));

        let draft = model::MessageDraft::from_identity("ok", &alice(), &RoomId::new("general"));
        let first = draft.clone().into_local_echo(t);
        sync.push_echo(first.clone());
        sync.push_echo(draft.into_local_echo(t + Duration::seconds(1)));
        assert_eq!(sync.messages().len(), 2);

        let mut stored = first;
        stored.id = "server-id".to_owned();
        sync.apply_snapshot(sync.generation(), Ok(vec![stored]));

        let ids: Vec<_> = sync.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "server-id");
        assert_eq!(sync.messages()[1].text, "ok");
    }

    #[tokio::test]
    async fn echo_for_another_room_is_discarded() {
        let feed = MemoryFeed::new();
        let (mut sync, _rx) = live_sync(&feed);

        let draft = model::MessageDraft::from_identity("hi", &alice(), &RoomId::new("help"));
        assert!(!sync.push_echo(draft.into_local_echo(OffsetDateTime::now_utc())));
        assert!(sync.messages().is_empty());
    }
}
