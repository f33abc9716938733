use crate::{Client, Config, QueryKey, Result, SearchMode, item_collection::Root};
use http::{HeaderMap, HeaderValue, header::CONTENT_TYPE};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// Opens a STAC API.
///
/// Fetches the root document at `url` with `headers` (plus `Content-Type:
/// application/json`, unless the headers already set one). The url the
/// response actually came from, after any redirects and without a trailing
/// slash, becomes the client's base url. The client searches with `POST` if
/// the root has a `search` link with a `POST` method, otherwise with `GET`.
///
/// Any failure propagates: a root that can't be read never falls back to `GET`.
///
/// The headers are kept on the returned client and sent with every request.
pub async fn probe(http: &reqwest::Client, url: &str, headers: &HeaderMap) -> Result<Client> {
    let mut request_headers = headers.clone();
    if !request_headers.contains_key(CONTENT_TYPE) {
        let _ = request_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    tracing::debug!("GET {url}");
    let response = http.get(url).headers(request_headers).send().await?;
    let base_url = response.url().as_str().trim_end_matches('/').to_string();
    let root: Root = crate::handle_response(response).await?;
    let search_mode = if root.supports_post_search() {
        SearchMode::Post
    } else {
        SearchMode::Get
    };
    tracing::info!("opened {base_url} (search mode: {search_mode:?})");
    Ok(Client::with_http(http.clone(), &base_url, search_mode)?.with_headers(headers.clone()))
}

/// Probes STAC APIs and remembers the results.
///
/// Opening the same url with the same headers twice only probes once.
#[derive(Debug, Default)]
pub struct Probe {
    http: reqwest::Client,
    headers: HeaderMap,
    clients: Mutex<HashMap<QueryKey, Client>>,
}

impl Probe {
    /// Creates a new probe with a default http client.
    pub fn new() -> Probe {
        Probe::default()
    }

    /// Creates a new probe from a [Config].
    ///
    /// The config's headers are sent with every probe and land on every
    /// client.
    pub fn from_config(config: &Config) -> Result<Probe> {
        Ok(Probe {
            http: config.http_client()?,
            headers: config.header_map()?,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Returns a client for this url, probing it if needed.
    ///
    /// `headers` are layered over the configured ones.
    pub async fn client(&self, url: &str, headers: &HeaderMap) -> Result<Client> {
        let mut merged = self.headers.clone();
        for name in headers.keys() {
            let _ = merged.remove(name);
        }
        for (name, value) in headers {
            let _ = merged.append(name.clone(), value.clone());
        }
        let key = QueryKey::stac_api(url, &merged);
        if let Some(client) = self.cached(&key) {
            tracing::debug!("reusing client for {url}");
            return Ok(client);
        }
        let client = probe(&self.http, url, &merged).await?;
        let _ = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, client.clone());
        Ok(client)
    }

    fn cached(&self, key: &QueryKey) -> Option<Client> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}
