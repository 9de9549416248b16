use std::{fmt, str::FromStr};

use oauth2::{basic::BasicClient, AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, TokenUrl};
use serde::Deserialize;
use serde_json::Value;

use crate::{AppResult, GetField};

pub(crate) type HappyClient = Client<oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>, oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardRevocableToken, oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>, oauth2::EndpointSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointSet>;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

impl ClientProvider {
    /// Firebase provider id, as passed to `signInWithIdp`.
    pub fn id(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google.com",
            Github => "github.com",
        }
    }

    /// Path segment of the loopback redirect.
    pub fn slug(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    pub(crate) fn scopes(&self) -> &'static [&'static str] {
        use ClientProvider::*;
        match self {
            Google => &["openid", "email", "profile"],
            Github => &["read:user", "user:email"],
        }
    }

    fn endpoints(&self) -> (&'static str, &'static str) {
        use ClientProvider::*;
        match self {
            Google => ("https://accounts.google.com/o/oauth2/auth", "https://oauth2.googleapis.com/token"),
            Github => ("https://github.com/login/oauth/authorize", "https://github.com/login/oauth/access_token"),
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for ClientProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(ClientProvider::Google),
            "github" => Ok(ClientProvider::Github),
            other => Err(format!("unknown sign-in provider {other:?}")),
        }
    }
}

#[derive(Clone)]
struct OAuthKeys {
    client_id: ClientId,
    client_secret: ClientSecret,
}

impl OAuthKeys {
    fn from_json(json: Option<&Value>) -> AppResult<Option<OAuthKeys>> {
        let Some(json) = json else {
            return Ok(None);
        };
        Ok(Some(OAuthKeys {
            client_id: ClientId::new(json.get_str_field("client_id")?),
            client_secret: ClientSecret::new(json.get_str_field("client_secret")?),
        }))
    }
}

/// Static service credentials: the Firebase project plus the OAuth apps
/// of each sign-in provider that is configured.
#[derive(Clone)]
pub struct Credentials {
    pub(crate) api_key: String,
    pub(crate) project_id: String,
    google: Option<OAuthKeys>,
    github: Option<OAuthKeys>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .field("google", &self.google.is_some())
            .field("github", &self.github.is_some())
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn from_json(json: &Value) -> AppResult<Credentials> {
        let firebase = json.get_obj_field("firebase")?;

        Ok(
            Credentials {
                api_key: firebase.get_str_field("apikey")?,
                project_id: firebase.get_str_field("project_id")?,
                google: OAuthKeys::from_json(json.get("google"))?,
                github: OAuthKeys::from_json(json.get("github"))?,
            }
        )
    }

    pub(crate) fn idp_url(&self) -> String {
        format!(
            "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp?key={}",
            self.api_key
        )
    }

    pub(crate) fn refresh_url(&self) -> String {
        format!("https://securetoken.googleapis.com/v1/token?key={}", self.api_key)
    }

    pub(crate) fn get_client(&self, provider: ClientProvider, redirect_url: RedirectUrl) -> AppResult<HappyClient> {
        use ClientProvider::*;
        let keys = match provider {
            Google => self.google.clone(),
            Github => self.github.clone(),
        }.ok_or(format!("OAuth provider {provider} keys not supplied"))?;

        let (auth_url, token_url) = provider.endpoints();
        Ok(
            BasicClient::new(keys.client_id)
            .set_client_secret(keys.client_secret)
            .set_auth_uri(AuthUrl::new(auth_url.to_owned())?)
            .set_token_uri(TokenUrl::new(token_url.to_owned())?)
            .set_redirect_uri(redirect_url)
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_firebase_and_optional_providers() {
        let credentials = Credentials::from_json(&json!({
            "firebase": { "apikey": "k3y", "project_id": "chatapp" },
            "google": { "client_id": "gid", "client_secret": "gsecret" },
        }))
        .unwrap();

        assert_eq!(credentials.project_id, "chatapp");
        assert!(credentials.idp_url().ends_with("accounts:signInWithIdp?key=k3y"));

        let redirect = RedirectUrl::new("http://localhost:8080/lockin/google".to_owned()).unwrap();
        assert!(credentials.get_client(ClientProvider::Google, redirect.clone()).is_ok());
        assert!(credentials.get_client(ClientProvider::Github, redirect).is_err());
    }

    #[test]
    fn missing_firebase_section_is_an_error() {
        assert!(Credentials::from_json(&json!({ "google": {} })).is_err());
    }

    #[test]
    fn provider_from_str() {
        assert_eq!("Google".parse(), Ok(ClientProvider::Google));
        assert_eq!(" github ".parse(), Ok(ClientProvider::Github));
        assert!("myspace".parse::<ClientProvider>().is_err());
    }
}
