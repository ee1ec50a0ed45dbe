use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::errors::{SheetError, SheetResult};

pub const ENV_SPREADSHEET_URL: &str = "SHEETFEED_SPREADSHEET_URL";
pub const ENV_SECRET_KEY: &str = "SHEETFEED_SECRET_KEY";
pub const ENV_CONNECTION_ADAPTER: &str = "SHEETFEED_CONNECTION_ADAPTER";
pub const ENV_AUTH_SCHEME: &str = "SHEETFEED_AUTH_SCHEME";
pub const ENV_TIMEOUT_SECS: &str = "SHEETFEED_TIMEOUT_SECS";

/// How the held token is rendered into the `Authorization` header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthScheme {
    #[default]
    Bearer,
    AuthSub,
}

impl AuthScheme {
    pub fn header_value(self, token: &str) -> String {
        match self {
            Self::Bearer => format!("Bearer {token}"),
            Self::AuthSub => format!("AuthSub token=\"{token}\""),
        }
    }
}

impl FromStr for AuthScheme {
    type Err = SheetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bearer" => Ok(Self::Bearer),
            "authsub" => Ok(Self::AuthSub),
            other => Err(SheetError::Configuration(format!(
                "unknown auth scheme '{other}' (expected bearer or authsub)"
            ))),
        }
    }
}

/// Which [`HttpTransport`](crate::HttpTransport) backs the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionAdapter {
    #[default]
    Reqwest,
    /// In-process [`MockSheetService`](crate::MockSheetService).
    Memory,
}

impl FromStr for ConnectionAdapter {
    type Err = SheetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reqwest" | "http" => Ok(Self::Reqwest),
            "memory" | "mock" => Ok(Self::Memory),
            other => Err(SheetError::Configuration(format!(
                "unknown connection adapter '{other}' (expected reqwest or memory)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SheetConfig {
    /// Spreadsheet document URL; its origin becomes the connection site.
    pub spreadsheet_url: Url,
    pub secret_key: String,
    pub connection_adapter: ConnectionAdapter,
    pub auth_scheme: AuthScheme,
    pub request_timeout: Option<Duration>,
}

impl SheetConfig {
    pub fn new(spreadsheet_url: &str, secret_key: impl Into<String>) -> SheetResult<Self> {
        Ok(Self {
            spreadsheet_url: parse_spreadsheet_url(spreadsheet_url)?,
            secret_key: secret_key.into(),
            connection_adapter: ConnectionAdapter::default(),
            auth_scheme: AuthScheme::default(),
            request_timeout: None,
        })
    }

    pub fn from_env() -> SheetResult<Self> {
        Self::from_env_or(None)
    }

    /// Like [`SheetConfig::from_env`], using `fallback_url` when
    /// `SHEETFEED_SPREADSHEET_URL` is unset.
    pub fn from_env_or(fallback_url: Option<&str>) -> SheetResult<Self> {
        let url = env_value(ENV_SPREADSHEET_URL)
            .or_else(|| fallback_url.map(str::to_string))
            .ok_or_else(|| {
                SheetError::Configuration(format!("{ENV_SPREADSHEET_URL} is not set"))
            })?;
        let secret_key = env_value(ENV_SECRET_KEY).unwrap_or_default();
        let mut config = Self::new(&url, secret_key)?;

        if let Some(adapter) = env_value(ENV_CONNECTION_ADAPTER) {
            config.connection_adapter = adapter.parse()?;
        }
        if let Some(scheme) = env_value(ENV_AUTH_SCHEME) {
            config.auth_scheme = scheme.parse()?;
        }
        if let Some(secs) = env_value(ENV_TIMEOUT_SECS) {
            let secs = secs.parse::<u64>().map_err(|_| {
                SheetError::Configuration(format!(
                    "{ENV_TIMEOUT_SECS} must be whole seconds: {secs}"
                ))
            })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn with_spreadsheet_url(mut self, spreadsheet_url: &str) -> SheetResult<Self> {
        self.spreadsheet_url = parse_spreadsheet_url(spreadsheet_url)?;
        Ok(self)
    }

    /// Scheme, host and port of the spreadsheet URL.
    pub fn site(&self) -> String {
        self.spreadsheet_url.origin().ascii_serialization()
    }

    pub fn spreadsheet_path(&self) -> String {
        let mut path = self.spreadsheet_url.path().to_string();
        if let Some(query) = self.spreadsheet_url.query() {
            path.push('?');
            path.push_str(query);
        }
        path
    }
}

fn parse_spreadsheet_url(raw: &str) -> SheetResult<Url> {
    let url = Url::parse(raw).map_err(|err| {
        SheetError::Configuration(format!("invalid spreadsheet url '{raw}': {err}"))
    })?;
    if url.cannot_be_a_base() {
        return Err(SheetError::Configuration(format!(
            "spreadsheet url must be hierarchical: {url}"
        )));
    }
    Ok(url)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
