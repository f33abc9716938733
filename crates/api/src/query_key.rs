//! Query keys and an in-memory cache keyed by them.
//!
//! A [QueryKey] is a small, stable identity for a request: two requests that
//! would put the same thing on the wire get equal keys, and transport metadata
//! like headers never takes part. Keys serialize to the tuple form
//! `[domain, kind, identity]`.

use crate::{Link, Result, Search};
use http::{HeaderMap, Method};
use serde::{Serialize, Serializer, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use std::{
    collections::HashMap,
    future::Future,
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// The domain shared by search and pagination keys.
pub const SEARCH_DOMAIN: &str = "stacSearch";

/// A request identity, suitable for deduplication and caching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryKey {
    /// Opening an API: its url and the headers used to probe it.
    StacApi {
        /// The url as given by the caller.
        url: String,

        /// The probe headers, or `None` if there weren't any.
        headers: Option<Map<String, Value>>,
    },

    /// The collection list.
    Collections,

    /// A single collection, by id.
    Collection(String),

    /// A single item, by url.
    Item(String),

    /// A search, identified by every field of its normalized payload.
    Search(Map<String, Value>),

    /// A pagination `GET`, identified by its url.
    Page(String),
}

/// A search-ish request, as issued by a [SearchSession](crate::SearchSession).
#[derive(Clone, Debug)]
pub enum Request {
    /// A search with a payload.
    Search {
        /// The normalized payload.
        payload: Map<String, Value>,

        /// The method to use, if not the client's search mode.
        method: Option<Method>,

        /// Where to send it, if not `{base}/search`.
        href: Option<String>,

        /// Per-call headers.
        headers: HeaderMap,
    },

    /// A plain `GET` of a (pagination) url.
    Get {
        /// The url, used exactly as given.
        url: String,

        /// Per-call headers.
        headers: HeaderMap,
    },
}

/// An in-memory, process-scoped cache of JSON responses keyed by [QueryKey].
///
/// Clones share the same storage. Keys other than [QueryKey::StacApi] don't
/// carry a base url, so a cache should only be used with one API.
#[derive(Clone, Debug, Default)]
pub struct QueryCache(Arc<Mutex<HashMap<QueryKey, Value>>>);

impl QueryKey {
    /// Returns the key for opening an API.
    ///
    /// Only the headers matter, since nothing else changes what the probe sees.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::QueryKey;
    /// use http::HeaderMap;
    /// use serde_json::json;
    ///
    /// let key = QueryKey::stac_api("https://stac.test", &HeaderMap::new());
    /// assert_eq!(key.to_value(), json!(["stacApi", "https://stac.test", null]));
    /// ```
    pub fn stac_api(url: impl ToString, headers: &HeaderMap) -> QueryKey {
        QueryKey::StacApi {
            url: url.to_string(),
            headers: if headers.is_empty() {
                None
            } else {
                Some(headers_to_map(headers))
            },
        }
    }

    /// Returns the key for a search payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::{QueryKey, SearchIntent};
    /// use serde_json::json;
    ///
    /// let search = SearchIntent::new()
    ///     .collections(vec!["collection1".to_string()])
    ///     .limit(25)
    ///     .normalize();
    /// let key = QueryKey::search(&search).unwrap();
    /// assert_eq!(
    ///     key.to_value(),
    ///     json!(["stacSearch", "search", {"collections": ["collection1"], "limit": 25}])
    /// );
    /// ```
    pub fn search(search: &Search) -> Result<QueryKey> {
        Ok(QueryKey::Search(search.to_map()?))
    }

    /// Returns the key for a request.
    ///
    /// Headers, methods, and search hrefs are never part of the key.
    pub fn for_request(request: &Request) -> QueryKey {
        match request {
            Request::Search { payload, .. } => QueryKey::Search(payload.clone()),
            Request::Get { url, .. } => QueryKey::Page(url.clone()),
        }
    }

    /// Returns this key in its tuple form.
    pub fn to_value(&self) -> Value {
        match self {
            QueryKey::StacApi { url, headers } => json!([
                "stacApi",
                url,
                headers.as_ref().map(|headers| json!({"headers": headers}))
            ]),
            QueryKey::Collections => json!(["collections"]),
            QueryKey::Collection(id) => json!(["collection", id]),
            QueryKey::Item(url) => json!(["item", url]),
            QueryKey::Search(payload) => json!([SEARCH_DOMAIN, "search", payload]),
            QueryKey::Page(url) => json!([SEARCH_DOMAIN, "page", url]),
        }
    }
}

impl Request {
    /// Creates a search request against the client's own search endpoint.
    pub fn search(search: &Search, headers: HeaderMap) -> Result<Request> {
        Ok(Request::Search {
            payload: search.to_map()?,
            method: None,
            href: None,
            headers,
        })
    }

    /// Creates the request for following a pagination link.
    ///
    /// A link with a body becomes a search against the link's href, using the
    /// link's method if it has one. If the link asks to merge, `live` is laid
    /// over the body. A link without a body is a plain `GET` of its href.
    pub fn follow(link: &Link, live: Option<&Search>) -> Result<Request> {
        let headers = link.header_map()?;
        match link.payload(live)? {
            Some(payload) => Ok(Request::Search {
                payload,
                method: link.http_method()?,
                href: Some(link.href.clone()),
                headers,
            }),
            None => Ok(Request::Get {
                url: link.href.clone(),
                headers,
            }),
        }
    }

    /// Returns this request's key.
    pub fn query_key(&self) -> QueryKey {
        QueryKey::for_request(self)
    }
}

impl Serialize for QueryKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.to_value(), state);
    }
}

impl QueryCache {
    /// Creates a new, empty cache.
    pub fn new() -> QueryCache {
        QueryCache::default()
    }

    /// Returns the cached value for this key.
    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Stores a value, returning the one it replaced.
    pub fn insert(&self, key: QueryKey, value: Value) -> Option<Value> {
        self.lock().insert(key, value)
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches what it
    /// returns.
    ///
    /// Failures are not cached. To reload, [invalidate](QueryCache::invalidate)
    /// the key first.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::{QueryCache, QueryKey, Result};
    ///
    /// # tokio_test::block_on(async {
    /// let cache = QueryCache::new();
    /// let key = QueryKey::Collection("wildfire".to_string());
    /// let value: String = cache
    ///     .get_or_fetch(key.clone(), || async { Result::Ok("fetched".to_string()) })
    ///     .await
    ///     .unwrap();
    /// let value: String = cache
    ///     .get_or_fetch(key, || async { Result::Ok("not fetched".to_string()) })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(value, "fetched");
    /// # })
    /// ```
    pub async fn get_or_fetch<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(&key) {
            return serde_json::from_value(value).map_err(Into::into);
        }
        let fetched = fetch().await?;
        let _ = self.insert(key, serde_json::to_value(&fetched)?);
        Ok(fetched)
    }

    /// Removes one key.
    pub fn invalidate(&self, key: &QueryKey) -> Option<Value> {
        self.lock().remove(key)
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.lock().clear()
    }

    /// Returns the number of cached values.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Value>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn headers_to_map(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect()
}

// Object keys are hashed in sorted order so that equal maps hash equally no
// matter how they were built.
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(values) => {
            4u8.hash(state);
            values.len().hash(state);
            for value in values {
                hash_value(value, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                key.hash(state);
                hash_value(value, state);
            }
        }
    }
}
