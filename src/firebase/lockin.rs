use oauth2::TokenResponse;
use serde::Serialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::{model::Identity, AppResult, GetField};

use super::{
    clients::{ClientProvider, Credentials, HappyClient},
    login::Grant,
};

/// Refresh this long before the ID token actually expires.
const EXPIRY_MARGIN: Duration = Duration::seconds(60);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FirebaseRequest {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

/// Firebase tokens for the signed-in user.
#[derive(Clone)]
pub(crate) struct AuthTokens {
    pub(crate) id_token: String,
    pub(crate) refresh_token: String,
    pub(crate) expires_at: OffsetDateTime,
}

impl AuthTokens {
    fn from_json(body: &Value, id_token: &str, refresh_token: &str, expires_in: &str, now: OffsetDateTime) -> AppResult<AuthTokens> {
        let expires_in: i64 = body.get_str_field(expires_in)?
            .parse()
            .map_err(|err| format!("bad token lifetime in {body}: {err}"))?;

        Ok(AuthTokens {
            id_token: body.get_str_field(id_token)?,
            refresh_token: body.get_str_field(refresh_token)?,
            expires_at: now + Duration::seconds(expires_in),
        })
    }

    pub(crate) fn is_stale(&self, now: OffsetDateTime) -> bool {
        now + EXPIRY_MARGIN >= self.expires_at
    }
}

pub(crate) fn identity_from_idp(body: &Value) -> AppResult<Identity> {
    Ok(Identity::from_profile(
        body.get_str_field("localId")?,
        body.get_opt_str_field("displayName"),
        body.get_opt_str_field("email"),
        body.get_opt_str_field("photoUrl"),
    ))
}

/// Exchanges the provider code for an access token, then trades that for a
/// Firebase session.
pub(crate) async fn lockin(
    client: &HappyClient,
    http_client: &reqwest::Client,
    credentials: &Credentials,
    provider: ClientProvider,
    grant: Grant,
) -> AppResult<(Identity, AuthTokens)> {
    let token_result = client
        .exchange_code(grant.code)
        .set_pkce_verifier(grant.pkce_verifier)
        .request_async(http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let body: Value = http_client.post(credentials.idp_url())
        .json(&FirebaseRequest {
            post_body: format!("access_token={access_token}&providerId={}", provider.id()),
            request_uri: "http://localhost/".to_owned(),
            return_idp_credential: true,
            return_secure_token: true,
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let identity = identity_from_idp(&body)?;
    let tokens = AuthTokens::from_json(&body, "idToken", "refreshToken", "expiresIn", OffsetDateTime::now_utc())?;

    info!(user_id = %identity.id, %provider, "welcome u/{}", identity.display_name);
    Ok((identity, tokens))
}

pub(crate) async fn refresh(
    http_client: &reqwest::Client,
    credentials: &Credentials,
    refresh_token: &str,
) -> AppResult<AuthTokens> {
    let body: Value = http_client.post(credentials.refresh_url())
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    debug!("id token refreshed");
    AuthTokens::from_json(&body, "id_token", "refresh_token", "expires_in", OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn identity_and_tokens_from_sign_in_response() {
        let body = json!({
            "localId": "uid-1",
            "displayName": "Alice",
            "email": "alice@example.com",
            "idToken": "id",
            "refreshToken": "refresh",
            "expiresIn": "3600",
        });

        let identity = identity_from_idp(&body).unwrap();
        assert_eq!(identity.id, "uid-1");
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
        assert!(identity.avatar_url.contains("name=Alice"));

        let now = datetime!(2024-05-01 12:00 UTC);
        let tokens = AuthTokens::from_json(&body, "idToken", "refreshToken", "expiresIn", now).unwrap();
        assert_eq!(tokens.expires_at, datetime!(2024-05-01 13:00 UTC));
        assert!(!tokens.is_stale(now));
        assert!(tokens.is_stale(datetime!(2024-05-01 12:59:30 UTC)));
    }

    #[test]
    fn missing_local_id_is_an_error() {
        assert!(identity_from_idp(&json!({ "displayName": "Nobody" })).is_err());
    }
}
