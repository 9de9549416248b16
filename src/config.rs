use std::{path::PathBuf, str::FromStr, time::Duration};

use tracing::debug;

use crate::{firebase::{ClientProvider, Credentials}, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process feed, nothing leaves the machine.
    Memory,
    Firebase,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "firebase" => Ok(Backend::Firebase),
            other => Err(format!("unknown backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub credentials_path: Option<PathBuf>,
    pub provider: ClientProvider,
    pub poll_interval: Duration,
    pub redirect_port: u16,
    pub login_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: Backend::Memory,
            credentials_path: None,
            provider: ClientProvider::Google,
            poll_interval: Duration::from_millis(2000),
            redirect_port: 8080,
            login_timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Reads `ROOMSYNC_*` variables from the environment and `.env`.
    pub fn from_env() -> AppResult<Config> {
        Config::from_vars(|key| dotenv::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> AppResult<Config> {
        let mut config = Config::default();

        if let Some(backend) = var("ROOMSYNC_BACKEND") {
            config.backend = backend.parse()?;
        }
        if let Some(path) = var("ROOMSYNC_CREDENTIALS") {
            config.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(provider) = var("ROOMSYNC_PROVIDER") {
            config.provider = provider.parse()?;
        }
        if let Some(ms) = var("ROOMSYNC_POLL_INTERVAL_MS") {
            let ms: u64 = parse_number(&ms, "ROOMSYNC_POLL_INTERVAL_MS")?;
            if ms == 0 {
                return Err("ROOMSYNC_POLL_INTERVAL_MS must be positive")?;
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(port) = var("ROOMSYNC_REDIRECT_PORT") {
            config.redirect_port = parse_number(&port, "ROOMSYNC_REDIRECT_PORT")?;
        }
        if let Some(secs) = var("ROOMSYNC_LOGIN_TIMEOUT_SECS") {
            config.login_timeout = Duration::from_secs(parse_number(&secs, "ROOMSYNC_LOGIN_TIMEOUT_SECS")?);
        }

        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Loads the service credentials file. Only the Firebase backend needs it.
    pub fn credentials(&self) -> AppResult<Credentials> {
        let path = self.credentials_path
            .as_ref()
            .ok_or("ROOMSYNC_CREDENTIALS is not set")?;
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Credentials::from_json(&json)
    }
}

fn parse_number<T: FromStr>(raw: &str, key: &str) -> AppResult<T>
where
    T::Err: std::fmt::Display,
{
    Ok(raw.trim().parse().map_err(|err| format!("{key}: {err}"))?)
}
