//! Client and session configuration.

use crate::{Result, link};
use http::{HeaderMap, HeaderValue, header::USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{path::Path, time::Duration};

/// The default debounce window for [SearchSession::submit](crate::SearchSession::submit).
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Client and session configuration.
///
/// Everything has a default, so an empty JSON object is a valid config.
///
/// # Examples
///
/// ```
/// use stac_query::Config;
///
/// let config: Config = serde_json::from_str(r#"{"headers": {"Authorization": "Bearer token"}}"#).unwrap();
/// assert_eq!(config.debounce_ms, 300);
/// assert_eq!(config.header_map().unwrap()["authorization"], "Bearer token");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Headers sent with every request, e.g. `Authorization`.
    pub headers: Map<String, Value>,

    /// How long [SearchSession::submit](crate::SearchSession::submit) waits
    /// for more calls before searching, in milliseconds.
    pub debounce_ms: u64,

    /// A request timeout, in seconds. No timeout if unset.
    pub timeout_secs: Option<u64>,

    /// The user agent for outgoing requests.
    pub user_agent: String,
}

impl Config {
    /// Reads a config from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Config> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(Into::into)
    }

    /// Adds a default header.
    pub fn header(mut self, key: impl ToString, value: impl ToString) -> Config {
        let _ = self
            .headers
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    /// Returns the default headers as a [HeaderMap].
    pub fn header_map(&self) -> Result<HeaderMap> {
        link::header_map(&self.headers)
    }

    /// Returns the debounce window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Builds the [reqwest::Client] described by this config.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut default_headers = HeaderMap::new();
        let _ = default_headers.insert(USER_AGENT, HeaderValue::from_str(&self.user_agent)?);
        let mut builder = reqwest::Client::builder().default_headers(default_headers);
        if let Some(timeout_secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        builder.build().map_err(Into::into)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            headers: Map::new(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            timeout_secs: None,
            user_agent: crate::user_agent().to_string(),
        }
    }
}
