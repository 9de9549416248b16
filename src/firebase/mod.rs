//! Firebase backend: Google/GitHub sign-in through Identity Toolkit,
//! messages in Firestore.

mod clients;
mod firestore;
mod lockin;
mod login;

pub use clients::{ClientProvider, Credentials};

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use time::OffsetDateTime;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info};

use crate::{
    config::Config,
    feed::{CollectionPath, CollectionQuery, IdentitySink, RemoteFeed, SnapshotSink, Subscription},
    model::{Identity, Message, MessageDraft},
    AppResult,
};

use firestore::Firestore;
use lockin::AuthTokens;

pub struct FirebaseFeed {
    shared: Arc<Shared>,
}

struct Shared {
    credentials: Credentials,
    provider: ClientProvider,
    redirect_port: u16,
    login_timeout: Duration,
    poll_interval: Duration,

    http_client: reqwest::Client,
    firestore: Firestore,

    tokens: Mutex<Option<AuthTokens>>,
    identity: watch::Sender<Option<Identity>>,
}

impl FirebaseFeed {
    pub fn new(config: &Config, credentials: Credentials) -> AppResult<FirebaseFeed> {
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(FirebaseFeed {
            shared: Arc::new(Shared {
                firestore: Firestore::new(&credentials.project_id),
                credentials,
                provider: config.provider,
                redirect_port: config.redirect_port,
                login_timeout: config.login_timeout,
                poll_interval: config.poll_interval,
                http_client,
                tokens: Mutex::new(None),
                identity: watch::Sender::new(None),
            }),
        })
    }
}

impl Shared {
    fn tokens(&self) -> std::sync::MutexGuard<'_, Option<AuthTokens>> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A current ID token, refreshed first if it is about to expire.
    async fn id_token(&self) -> AppResult<String> {
        let Some(tokens) = self.tokens().clone() else {
            return Err("not signed in")?;
        };
        if !tokens.is_stale(OffsetDateTime::now_utc()) {
            return Ok(tokens.id_token);
        }

        let fresh = lockin::refresh(&self.http_client, &self.credentials, &tokens.refresh_token).await?;
        let id_token = fresh.id_token.clone();
        *self.tokens() = Some(fresh);
        Ok(id_token)
    }

    async fn query(&self, query: &CollectionQuery) -> AppResult<Vec<Message>> {
        let id_token = self.id_token().await?;
        self.firestore.run_query(&self.http_client, &id_token, query).await
    }
}

impl RemoteFeed for FirebaseFeed {
    fn subscribe_identity(&self, sink: IdentitySink) -> Subscription {
        let mut identity = self.shared.identity.subscribe();

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
        let shared = &self.shared;
        let client = shared.credentials.get_client(
            shared.provider,
            login::redirect_url(shared.redirect_port, shared.provider)?,
        )?;

        let grant = login::authorize(&client, shared.provider, shared.redirect_port, shared.login_timeout).await?;
        let (identity, tokens) = lockin::lockin(&client, &shared.http_client, &shared.credentials, shared.provider, grant).await?;

        *shared.tokens() = Some(tokens);
        shared.identity.send_replace(Some(identity));
        Ok(())
    }

    async fn sign_out(&self) -> AppResult<()> {
        *self.shared.tokens() = None;
        self.shared.identity.send_replace(None);
        info!("firebase session dropped");
        Ok(())
    }

    /// Polls the ordered query and delivers the result set whenever it
    /// differs from the last one delivered.
    fn subscribe_collection(&self, query: CollectionQuery, sink: SnapshotSink) -> Subscription {
        let shared = self.shared.clone();
        let label = format!("{} (generation {})", query.path, sink.generation());

        Subscription::start(label, async move {
            let mut ticker = tokio::time::interval(shared.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<Vec<Message>> = None;

            loop {
                ticker.tick().await;
                match shared.query(&query).await {
                    Ok(snapshot) => {
                        if last.as_ref() == Some(&snapshot) {
                            continue;
                        }
                        debug!(path = %query.path, count = snapshot.len(), "snapshot changed");
                        if !sink.deliver(Ok(snapshot.clone())) {
                            return;
                        }
                        last = Some(snapshot);
                    }
                    Err(err) => {
                        sink.deliver(Err(err));
                        return;
                    }
                }
            }
        })
    }

    async fn append_document(&self, path: CollectionPath, draft: MessageDraft) -> AppResult<()> {
        let id_token = self.shared.id_token().await?;
        self.shared.firestore.commit(&self.shared.http_client, &id_token, &path, &draft).await?;
        debug!(%path, "document committed");
        Ok(())
    }
}
