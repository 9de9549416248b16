//! An in-process feed. Live queries re-run whenever a shared revision
//! counter moves, so every write fans out to every open query the way the
//! hosted backend does.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::debug;

use crate::{
    AppResult,
    feed::{CollectionPath, CollectionQuery, IdentitySink, RemoteFeed, SnapshotSink, Subscription},
    model::{Identity, Message, MessageDraft, SYSTEM_AUTHOR_ID},
};

#[derive(Clone)]
pub struct MemoryFeed {
    inner: Arc<Inner>,
}

struct Inner {
    collections: Mutex<HashMap<CollectionPath, Vec<Message>>>,
    revision: watch::Sender<u64>,
    identity: watch::Sender<Option<Identity>>,
    account: Mutex<Identity>,

    live_queries: AtomicUsize,
    next_id: AtomicU64,

    fail_sign_in: AtomicBool,
    fail_sign_out: AtomicBool,
    fail_writes: AtomicBool,
    fail_queries: AtomicBool,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        MemoryFeed::new()
    }
}

impl MemoryFeed {
    pub fn new() -> MemoryFeed {
        MemoryFeed {
            inner: Arc::new(Inner {
                collections: Mutex::new(HashMap::new()),
                revision: watch::Sender::new(0),
                identity: watch::Sender::new(None),
                account: Mutex::new(Identity::from_profile("local", Some("Local User".into()), None, None)),
                live_queries: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                fail_sign_in: AtomicBool::new(false),
                fail_sign_out: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                fail_queries: AtomicBool::new(false),
            }),
        }
    }

    /// The identity `sign_in` will produce.
    pub fn with_account(self, identity: Identity) -> MemoryFeed {
        *lock(&self.inner.account) = identity;
        self
    }

    /// Changes the signed-in identity as if it happened on another device.
    pub fn set_identity(&self, identity: Option<Identity>) {
        self.inner.identity.send_replace(identity);
    }

    /// Stores a message as if another client wrote it.
    pub fn insert(&self, message: Message) {
        let path = CollectionPath::room_messages(&message.room_id);
        self.inner.store(path, message);
    }

    /// Server-side contents of a collection, in query order.
    pub fn documents(&self, path: &CollectionPath) -> Vec<Message> {
        self.inner.snapshot(path)
    }

    /// Live queries whose task is still running.
    pub fn live_queries(&self) -> usize {
        self.inner.live_queries.load(Ordering::SeqCst)
    }

    pub fn fail_sign_in(&self, fail: bool) {
        self.inner.fail_sign_in.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.inner.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes new and running live queries fail.
    pub fn fail_queries(&self, fail: bool) {
        self.inner.fail_queries.store(fail, Ordering::SeqCst);
        self.inner.bump();
    }
}

impl Inner {
    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn store(&self, path: CollectionPath, message: Message) {
        lock(&self.collections).entry(path).or_default().push(message);
        self.bump();
    }

    fn snapshot(&self, path: &CollectionPath) -> Vec<Message> {
        let mut messages = lock(&self.collections)
            .get(path)
            .cloned()
            .unwrap_or_default();
        // stable, so ties keep arrival order
        messages.sort_by_key(|message| message.timestamp);
        messages
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct LiveQueryGuard(Arc<Inner>);

impl LiveQueryGuard {
    fn new(inner: Arc<Inner>) -> LiveQueryGuard {
        inner.live_queries.fetch_add(1, Ordering::SeqCst);
        LiveQueryGuard(inner)
    }
}

impl Drop for LiveQueryGuard {
    fn drop(&mut self) {
        self.0.live_queries.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemoteFeed for MemoryFeed {
    fn subscribe_identity(&self, sink: IdentitySink) -> Subscription {
        let mut identity = self.inner.identity.subscribe();

        Subscription::start("identity", async move {
            loop {
                let current = identity.borrow_and_update().clone();
                if !sink.deliver(current) {
                    return;
                }
                if identity.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    async fn sign_in(&self) -> AppResult<()> {
        if self.inner.fail_sign_in.load(Ordering::SeqCst) {
            return Err("sign-in popup was closed")?;
        }

        let account = lock(&self.inner.account).clone();
        self.inner.identity.send_replace(Some(account));
        Ok(())
    }

    async fn sign_out(&self) -> AppResult<()> {
        if self.inner.fail_sign_out.load(Ordering::SeqCst) {
            return Err("sign-out rejected")?;
        }

        self.inner.identity.send_replace(None);
        Ok(())
    }

    fn subscribe_collection(&self, query: CollectionQuery, sink: SnapshotSink) -> Subscription {
        let inner = self.inner.clone();
        let guard = LiveQueryGuard::new(inner.clone());
        let mut revision = inner.revision.subscribe();
        let path = query.path;

        Subscription::start(format!("{path} (generation {})", sink.generation()), async move {
            let _guard = guard;
            let mut last: Option<Vec<Message>> = None;

            loop {
                revision.borrow_and_update();
                if inner.fail_queries.load(Ordering::SeqCst) {
                    sink.deliver(Err(format!("permission denied on {path}").into()));
                    return;
                }

                let snapshot = inner.snapshot(&path);
                if last.as_ref() != Some(&snapshot) {
                    if !sink.deliver(Ok(snapshot.clone())) {
                        return;
                    }
                    last = Some(snapshot);
                }

                if revision.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    async fn append_document(&self, path: CollectionPath, draft: MessageDraft) -> AppResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(format!("write to {path} failed: backend unavailable"))?;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id: format!("doc-{id}"),
            text: draft.text,
            author_id: draft.author_id.unwrap_or_else(|| SYSTEM_AUTHOR_ID.to_owned()),
            author_name: draft.author_name,
            author_avatar_url: draft.author_avatar_url,
            room_id: draft.room_id,
            timestamp: OffsetDateTime::now_utc(),
        };
        debug!(%path, id = %message.id, "document appended");

        self.inner.store(path, message);
        Ok(())
    }
}
