use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    response::Html,
    routing::get,
    Router,
};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::AppResult;

use super::clients::{ClientProvider, HappyClient};

#[derive(Debug, Deserialize)]
pub(crate) struct LockinQuery {
    pub(crate) state: Option<String>,
    pub(crate) code: Option<String>,
    pub(crate) error: Option<String>,
}

/// What the provider handed back through the redirect, ready to exchange.
pub(crate) struct Grant {
    pub(crate) code: AuthorizationCode,
    pub(crate) pkce_verifier: PkceCodeVerifier,
}

#[derive(Clone)]
struct LoopbackState {
    provider: ClientProvider,
    reply: Arc<Mutex<Option<oneshot::Sender<LockinQuery>>>>,
}

pub(crate) fn redirect_url(port: u16, provider: ClientProvider) -> AppResult<RedirectUrl> {
    Ok(RedirectUrl::new(format!("http://localhost:{port}/lockin/{}", provider.slug()))?)
}

#[debug_handler]
async fn lockin_page(
    Path(provider): Path<ClientProvider>,
    Query(query): Query<LockinQuery>,
    State(state): State<LoopbackState>,
) -> Html<&'static str> {
    if provider != state.provider {
        warn!(%provider, expected = %state.provider, "redirect for the wrong provider");
        return Html("<p>Unexpected sign-in provider.</p>");
    }

    let reply = state.reply.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    match reply {
        Some(reply) => {
            let _ = reply.send(query);
            Html("<p>Signed in. You can close this tab.</p>")
        }
        None => Html("<p>This sign-in was already handled.</p>"),
    }
}

/// Runs the authorization-code + PKCE flow through a loopback listener on
/// `port` and waits up to `timeout` for the browser to come back.
pub(crate) async fn authorize(
    client: &HappyClient,
    provider: ClientProvider,
    port: u16,
    timeout: Duration,
) -> AppResult<Grant> {
    let (pkce_code_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (authorize_url, csrf_state) = client.authorize_url(CsrfToken::new_random)
        .add_scopes(provider.scopes().iter().map(|scope| Scope::new(scope.to_string())))
        .set_pkce_challenge(pkce_code_challenge)
        .url();

    let (reply_tx, reply_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = Router::new()
        .route("/lockin/{provider}", get(lockin_page))
        .with_state(LoopbackState {
            provider,
            reply: Arc::new(Mutex::new(Some(reply_tx))),
        });

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            warn!(error = %err, "login listener failed");
        }
        debug!("login listener stopped");
    });

    info!(%provider, url = %authorize_url, "open this URL in a browser to sign in");
    let reply = tokio::time::timeout(timeout, reply_rx).await;
    let _ = stop_tx.send(());

    let LockinQuery { state, code, error } = reply?.map_err(|_| "login listener closed")?;
    if let Some(error) = error {
        return Err(format!("{provider} sign-in denied: {error}"))?;
    }

    let state = CsrfToken::new(state.ok_or("OAuth: without state")?);
    let code = AuthorizationCode::new(code.ok_or("OAuth: without code")?);
    if state.secret().as_str() != csrf_state.secret().as_str() {
        return Err("csrf tokens don't match")?;
    }

    Ok(Grant { code, pkce_verifier })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_points_at_the_loopback_route() {
        let url = redirect_url(8080, ClientProvider::Github).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/lockin/github");
    }
}
