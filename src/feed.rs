//! The boundary with the remote backend: a live-query service with an
//! identity subscription and append-only writes.
//!
//! Backends never call back into client state directly. Everything they
//! produce goes through a sink onto the client's event queue, tagged so the
//! client can tell a stale subscription from the current one.

use std::{fmt, future::Future};

use tokio::{sync::mpsc, task::AbortHandle};
use tracing::debug;

use crate::{
    AppError, AppResult,
    client::Event,
    model::{Identity, Message, MessageDraft, RoomId},
};

pub const ORDER_KEY: &str = "timestamp";

/// `rooms/{room}/messages`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    room_id: RoomId,
}

impl CollectionPath {
    pub fn room_messages(room_id: &RoomId) -> CollectionPath {
        CollectionPath { room_id: room_id.clone() }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The document that owns the collection, `rooms/{room}`.
    pub fn parent(&self) -> String {
        format!("rooms/{}", self.room_id)
    }

    pub fn collection_id(&self) -> &'static str {
        "messages"
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.parent(), self.collection_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub path: CollectionPath,
    pub order_by: &'static str,
}

impl CollectionQuery {
    /// The whole collection, oldest first.
    pub fn ordered(path: CollectionPath) -> CollectionQuery {
        CollectionQuery { path, order_by: ORDER_KEY }
    }
}

/// A running subscription. Dropping or cancelling it stops the backing task,
/// after which it delivers nothing more.
pub struct Subscription {
    label: String,
    handle: Option<AbortHandle>,
}

impl Subscription {
    pub fn start<F>(label: impl Into<String>, task: F) -> Subscription
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        debug!(%label, "subscription started");
        Subscription {
            label,
            handle: Some(tokio::spawn(task).abort_handle()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(label = %self.label, "subscription released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

pub type SnapshotResult = Result<Vec<Message>, AppError>;

/// Where a live query delivers its ordered result sets.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Event>,
}

impl SnapshotSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Event>) -> SnapshotSink {
        SnapshotSink { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the client is gone; the caller should stop.
    pub fn deliver(&self, outcome: SnapshotResult) -> bool {
        self.tx
            .send(Event::Snapshot { generation: self.generation, outcome })
            .is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct IdentitySink {
    tx: mpsc::UnboundedSender<Event>,
}

impl IdentitySink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> IdentitySink {
        IdentitySink { tx }
    }

    pub fn deliver(&self, identity: Option<Identity>) -> bool {
        self.tx.send(Event::Identity(identity)).is_ok()
    }
}

pub trait RemoteFeed: Send + Sync + 'static {
    /// Fires at least once with the current identity, then on every change.
    fn subscribe_identity(&self, sink: IdentitySink) -> Subscription;

    fn sign_in(&self) -> impl Future<Output = AppResult<()>> + Send;

    fn sign_out(&self) -> impl Future<Output = AppResult<()>> + Send;

    /// Delivers the full ordered result set on start and whenever it changes.
    /// An error is delivered once and ends the subscription.
    fn subscribe_collection(&self, query: CollectionQuery, sink: SnapshotSink) -> Subscription;

    /// Appends one document; its timestamp is assigned by the backend.
    fn append_document(&self, path: CollectionPath, draft: MessageDraft) -> impl Future<Output = AppResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn room_messages_path() {
        let path = CollectionPath::room_messages(&RoomId::new("general"));
        assert_eq!(path.to_string(), "rooms/general/messages");
        assert_eq!(path.parent(), "rooms/general");
        assert_eq!(CollectionQuery::ordered(path).order_by, "timestamp");
    }

    #[tokio::test]
    async fn cancel_stops_the_task() {
        let subscription = Subscription::start("forever", async {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
        assert!(subscription.is_active());
        subscription.cancel();
    }

    #[tokio::test]
    async fn sink_reports_closed_client() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = SnapshotSink::new(3, tx);
        assert!(sink.deliver(Ok(Vec::new())));
        drop(rx);
        assert!(!sink.deliver(Ok(Vec::new())));
    }
}
