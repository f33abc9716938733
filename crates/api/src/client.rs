use crate::{
    Collection, Collections, Error, Item, ItemCollection, Link, Request, Result, Search, error,
    search::to_query_string,
};
use async_stream::try_stream;
use futures::{Stream, TryStreamExt, pin_mut};
use http::{HeaderMap, HeaderValue, Method, header::CONTENT_TYPE};
use reqwest::Response;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use url::{Url, form_urlencoded};

/// How a STAC API wants its `/search` endpoint called.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
    /// Query string parameters.
    #[default]
    Get,

    /// A JSON body.
    Post,
}

/// A client for one STAC API.
///
/// The base url and the search mode are fixed for the lifetime of a client.
/// Usually you get one from [probe](crate::probe()), which works both out for
/// you.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    search_mode: SearchMode,
    headers: HeaderMap,
}

impl SearchMode {
    /// Returns the HTTP method for this search mode.
    pub fn method(self) -> Method {
        match self {
            SearchMode::Get => Method::GET,
            SearchMode::Post => Method::POST,
        }
    }
}

impl Client {
    /// Creates a new client without probing.
    ///
    /// A trailing slash on the base url is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::{Client, SearchMode};
    ///
    /// let client = Client::new("https://stac.test/api/", SearchMode::Post).unwrap();
    /// assert_eq!(client.base_url(), "https://stac.test/api");
    /// ```
    pub fn new(base_url: &str, search_mode: SearchMode) -> Result<Client> {
        Client::with_http(reqwest::Client::new(), base_url, search_mode)
    }

    /// Creates a new client around an existing [reqwest::Client].
    pub fn with_http(http: reqwest::Client, base_url: &str, search_mode: SearchMode) -> Result<Client> {
        let _ = Url::parse(base_url)?;
        Ok(Client {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            search_mode,
            headers: HeaderMap::new(),
        })
    }

    /// Sets headers that are sent with every request, e.g. `Authorization`.
    ///
    /// These win over per-call headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Client {
        self.headers = headers;
        self
    }

    /// Returns this client's base url.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns this client's search mode.
    pub fn search_mode(&self) -> SearchMode {
        self.search_mode
    }

    /// Returns the headers sent with every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Searches for items.
    ///
    /// The search is sent as `POST {base}/search` with a JSON body, or as
    /// `GET {base}/search?{query}`, depending on the search mode.
    pub async fn search(
        &self,
        search: impl Into<Search>,
        headers: &HeaderMap,
    ) -> Result<ItemCollection> {
        let request = Request::search(&search.into(), headers.clone())?;
        self.execute(&request).await
    }

    /// Returns all collections.
    pub async fn collections(&self) -> Result<Collections> {
        self.get(&format!("{}/collections", self.base_url), &HeaderMap::new())
            .await
    }

    /// Returns a single collection from `{base}/collections/{id}`.
    pub async fn collection(&self, id: &str) -> Result<Collection> {
        self.get(
            &format!("{}/collections/{id}", self.base_url),
            &HeaderMap::new(),
        )
        .await
    }

    /// Returns the item at `href`.
    ///
    /// Items are fetched by url, since that's how they show up in links.
    pub async fn item(&self, href: &str) -> Result<Item> {
        self.get(href, &HeaderMap::new()).await
    }

    /// Finds a collection in the collection list.
    ///
    /// Unlike [Client::collection], a missing id is a 404 [ApiError](crate::ApiError)
    /// built here, since the list itself was found just fine.
    pub async fn find_collection(&self, id: &str) -> Result<Collection> {
        let collections = self.collections().await?;
        collections.find(id).cloned().ok_or_else(|| {
            crate::ApiError::collection_not_found(Some(format!("{}/collections", self.base_url)))
                .into()
        })
    }

    /// Gets and deserializes any href.
    ///
    /// The href is used as-is, so it can point anywhere.
    pub async fn get<T>(&self, href: &str, headers: &HeaderMap) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.fetch(Method::GET, href, None, headers).await?;
        error::handle_response(response).await
    }

    /// Sends a search-ish request.
    pub async fn execute(&self, request: &Request) -> Result<ItemCollection> {
        match request {
            Request::Search {
                payload,
                method,
                href,
                headers,
            } => {
                let method = method.clone().unwrap_or_else(|| self.search_mode.method());
                let url = href.clone().unwrap_or_else(|| self.search_url());
                self.send_search(method, &url, payload, headers).await
            }
            Request::Get { url, headers } => self.get(url, headers).await,
        }
    }

    /// Follows a pagination link.
    ///
    /// See [Request::follow] for how the request is built.
    pub async fn follow(&self, link: &Link, live: Option<&Search>) -> Result<ItemCollection> {
        let request = Request::follow(link, live)?;
        self.execute(&request).await
    }

    /// Returns a stream of result pages, following `next` links until there
    /// aren't any more.
    pub fn search_pages(
        &self,
        search: impl Into<Search>,
        headers: HeaderMap,
    ) -> impl Stream<Item = Result<ItemCollection>> + '_ {
        let search = search.into();
        try_stream! {
            let mut page = self.execute(&Request::search(&search, headers)?).await?;
            loop {
                let next = page.next_link().cloned();
                yield page;
                match next {
                    Some(next) => {
                        tracing::debug!("following next link: {}", next.href);
                        page = self.follow(&next, Some(&search)).await?;
                    }
                    None => break,
                }
            }
        }
    }

    /// Collects items from every page, up to `max_items`.
    ///
    /// `numberMatched` is taken from the first page that has it.
    pub async fn items(
        &self,
        search: impl Into<Search>,
        headers: HeaderMap,
        max_items: Option<usize>,
    ) -> Result<ItemCollection> {
        let pages = self.search_pages(search, headers);
        pin_mut!(pages);
        let mut items = Vec::new();
        let mut number_matched = None;
        while let Some(page) = pages.try_next().await? {
            tracing::info!("got a page with {} item(s)", page.features.len());
            number_matched = number_matched.or(page.number_matched);
            items.extend(page.features);
            if let Some(max_items) = max_items
                && items.len() >= max_items
            {
                items.truncate(max_items);
                break;
            }
        }
        let mut item_collection = ItemCollection::from(items);
        item_collection.number_matched = number_matched;
        Ok(item_collection)
    }

    /// Sends one request.
    ///
    /// Headers are merged in increasing priority: `Content-Type:
    /// application/json`, then `headers`, then this client's own headers. A
    /// payload, if any, is sent as JSON. Non-2xx responses are turned into an
    /// [ApiError](crate::ApiError).
    pub async fn fetch(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Map<String, Value>>,
        headers: &HeaderMap,
    ) -> Result<Response> {
        tracing::debug!("{method} {url}");
        let mut request = self
            .http
            .request(method, url)
            .headers(self.merge_headers(headers));
        if let Some(payload) = payload {
            request = request.body(serde_json::to_vec(payload)?);
        }
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Error::from(crate::ApiError::from_response(response).await))
        }
    }

    async fn send_search(
        &self,
        method: Method,
        url: &str,
        payload: &Map<String, Value>,
        headers: &HeaderMap,
    ) -> Result<ItemCollection> {
        let response = if method == Method::GET {
            let mut url = Url::parse(url)?;
            let query = to_query_string(payload)?;
            if !query.is_empty() {
                let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect();
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .into_owned()
                    .filter(|(key, _)| pairs.iter().all(|(name, _)| name != key))
                    .collect();
                let _ = url
                    .query_pairs_mut()
                    .clear()
                    .extend_pairs(kept)
                    .extend_pairs(pairs);
            }
            self.fetch(method, url.as_str(), None, headers).await?
        } else {
            self.fetch(method, url, Some(payload), headers).await?
        };
        error::handle_response(response).await
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.base_url)
    }

    fn merge_headers(&self, headers: &HeaderMap) -> HeaderMap {
        let mut merged = HeaderMap::new();
        let _ = merged.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        extend_replacing(&mut merged, headers);
        extend_replacing(&mut merged, &self.headers);
        merged
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Client) -> bool {
        self.base_url == other.base_url
            && self.search_mode == other.search_mode
            && self.headers == other.headers
    }
}

fn extend_replacing(target: &mut HeaderMap, source: &HeaderMap) {
    for name in source.keys() {
        let _ = target.remove(name);
    }
    for (name, value) in source {
        let _ = target.append(name.clone(), value.clone());
    }
}
