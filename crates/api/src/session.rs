//! The search orchestrator.
//!
//! A [SearchSession] holds a caller's [SearchIntent], turns it into searches
//! against one [Client], and keeps the latest page of results together with
//! its pagination links.
//!
//! Submissions are debounced and pagination is immediate. Responses can arrive
//! out of order, so every request takes a sequence number and only the latest
//! one is allowed to write results.

use crate::{
    Bbox, Client, Config, Debouncer, Error, ItemCollection, Link, QueryCache, Request, Result,
    SearchIntent, Sortby, config::DEFAULT_DEBOUNCE_MS,
};
use http::HeaderMap;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::watch;

/// Whether a session has a request in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadingState {
    /// Nothing in flight.
    #[default]
    Idle,

    /// The latest request hasn't come back yet.
    Loading,
}

/// Searches one STAC API on behalf of a caller.
///
/// # Examples
///
/// ```no_run
/// use stac_query::{Client, SearchMode, SearchSession};
///
/// # tokio_test::block_on(async {
/// let client = Client::new("https://planetarycomputer.microsoft.com/api/stac/v1", SearchMode::Post).unwrap();
/// let session = SearchSession::new(client);
/// session.set_collections(Some(vec!["sentinel-2-l2a".to_string()]));
/// session.set_limit(Some(10));
/// session.submit();
/// session.idle().await;
/// let results = session.results().unwrap();
/// if let Some(next_page) = session.next_page() {
///     next_page.call().await;
/// }
/// # })
/// ```
#[derive(Debug)]
pub struct SearchSession {
    shared: Arc<Shared>,
    debouncer: Debouncer,
}

/// Loads the page behind a pagination link.
///
/// Handlers are tied to the client that was current when they were created.
/// After [SearchSession::set_client] swaps the client, old handlers do
/// nothing.
#[derive(Clone, Debug)]
pub struct PageHandler {
    shared: Arc<Shared>,
    link: Link,
    epoch: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    changes: watch::Sender<u64>,
}

#[derive(Debug)]
struct State {
    client: Client,
    cache: Option<QueryCache>,
    intent: SearchIntent,
    results: Option<ItemCollection>,
    error: Option<Arc<Error>>,
    next: Option<Link>,
    prev: Option<Link>,
    loading: bool,
    scheduled: Option<u64>,
    submits: u64,
    seq: u64,
    epoch: u64,
}

struct Ticket {
    seq: u64,
    client: Client,
    cache: Option<QueryCache>,
}

impl SearchSession {
    /// Creates a new session with the default debounce window.
    pub fn new(client: Client) -> SearchSession {
        SearchSession::with_debounce(client, Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }

    /// Creates a new session with a custom debounce window.
    pub fn with_debounce(client: Client, window: Duration) -> SearchSession {
        let (changes, _) = watch::channel(0);
        SearchSession {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new(client, None, 0, 0)),
                changes,
            }),
            debouncer: Debouncer::new(window),
        }
    }

    /// Creates a new session with the debounce window from a [Config].
    pub fn from_config(client: Client, config: &Config) -> SearchSession {
        SearchSession::with_debounce(client, config.debounce())
    }

    /// Looks up and stores search and page responses in `cache`.
    pub fn with_cache(self, cache: QueryCache) -> SearchSession {
        self.shared.lock().cache = Some(cache);
        self
    }

    /// Sets the bounding box.
    pub fn set_bbox(&self, bbox: Option<Bbox>) {
        self.update_intent(|intent| intent.bbox = bbox);
    }

    /// Sets the collection ids.
    pub fn set_collections(&self, collections: Option<Vec<String>>) {
        self.update_intent(|intent| intent.collections = collections);
    }

    /// Sets the item ids.
    pub fn set_ids(&self, ids: Option<Vec<String>>) {
        self.update_intent(|intent| intent.ids = ids);
    }

    /// Sets the start of the date range.
    pub fn set_date_range_from(&self, from: Option<String>) {
        self.update_intent(|intent| intent.date_range_from = from);
    }

    /// Sets the end of the date range.
    pub fn set_date_range_to(&self, to: Option<String>) {
        self.update_intent(|intent| intent.date_range_to = to);
    }

    /// Sets the sort order.
    pub fn set_sortby(&self, sortby: Option<Vec<Sortby>>) {
        self.update_intent(|intent| intent.sortby = sortby);
    }

    /// Sets the page size.
    pub fn set_limit(&self, limit: Option<u64>) {
        self.update_intent(|intent| intent.limit = limit);
    }

    /// Schedules a search.
    ///
    /// The search runs once no other submit has come in for the debounce
    /// window, using whatever the intent is at that moment. Must be called
    /// from within a tokio runtime.
    pub fn submit(&self) {
        let (epoch, token) = {
            let mut state = self.shared.lock();
            state.submits += 1;
            state.scheduled = Some(state.submits);
            (state.epoch, state.submits)
        };
        self.shared.notify();
        let shared = self.shared.clone();
        self.debouncer.call(async move { shared.run_submit(epoch, token).await });
    }

    /// Drops a pending submit, if there is one.
    ///
    /// A search that has already started is not affected.
    pub fn cancel(&self) {
        self.debouncer.cancel();
        let was_scheduled = self.shared.lock().scheduled.take();
        if was_scheduled.is_some() {
            self.shared.notify();
        }
    }

    /// Returns a handler for the next page, if the latest results have one.
    pub fn next_page(&self) -> Option<PageHandler> {
        let state = self.shared.lock();
        state.next.clone().map(|link| self.page_handler(link, state.epoch))
    }

    /// Returns a handler for the previous page, if the latest results have one.
    pub fn previous_page(&self) -> Option<PageHandler> {
        let state = self.shared.lock();
        state.prev.clone().map(|link| self.page_handler(link, state.epoch))
    }

    /// Swaps the client.
    ///
    /// If the new client is different from the current one, everything is
    /// reset: intent, results, links, errors, and any pending submit. Results
    /// for requests sent with the old client are dropped when they arrive.
    pub fn set_client(&self, client: Client) {
        {
            let mut state = self.shared.lock();
            if state.client == client {
                return;
            }
            tracing::debug!("client changed to {}, resetting session", client.base_url());
            let cache = state.cache.take();
            *state = State::new(client, cache, state.seq + 1, state.epoch + 1);
        }
        self.debouncer.cancel();
        self.shared.notify();
    }

    /// Returns the current client.
    pub fn client(&self) -> Client {
        self.shared.lock().client.clone()
    }

    /// Returns whether the latest request is in flight.
    pub fn state(&self) -> LoadingState {
        if self.shared.lock().loading {
            LoadingState::Loading
        } else {
            LoadingState::Idle
        }
    }

    /// Returns true if a submit is waiting for its debounce window.
    pub fn is_scheduled(&self) -> bool {
        self.shared.lock().scheduled.is_some()
    }

    /// Returns the current intent.
    pub fn intent(&self) -> SearchIntent {
        self.shared.lock().intent.clone()
    }

    /// Returns the latest page of results.
    pub fn results(&self) -> Option<ItemCollection> {
        self.shared.lock().results.clone()
    }

    /// Returns the latest error.
    pub fn error(&self) -> Option<Arc<Error>> {
        self.shared.lock().error.clone()
    }

    /// Returns a receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Waits until nothing is scheduled and nothing is in flight.
    pub async fn idle(&self) {
        let mut changes = self.subscribe();
        loop {
            {
                let state = self.shared.lock();
                if !state.loading && state.scheduled.is_none() {
                    return;
                }
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    fn update_intent(&self, f: impl FnOnce(&mut SearchIntent)) {
        f(&mut self.shared.lock().intent);
        self.shared.notify();
    }

    fn page_handler(&self, link: Link, epoch: u64) -> PageHandler {
        PageHandler {
            shared: self.shared.clone(),
            link,
            epoch,
        }
    }
}

impl PageHandler {
    /// Returns the link this handler follows.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Loads the page right away, without debouncing.
    ///
    /// The outcome lands in the session: see [SearchSession::results] and
    /// [SearchSession::error].
    pub async fn call(&self) {
        let (ticket, request) = {
            let mut state = self.shared.lock();
            if state.epoch != self.epoch {
                tracing::debug!("ignoring page handler for a previous client");
                return;
            }
            let live = state.intent.normalize();
            let request = Request::follow(&self.link, Some(&live));
            (state.begin(), request)
        };
        self.shared.notify();
        let result = match request {
            Ok(request) => ticket.execute(&request).await,
            Err(err) => Err(err),
        };
        self.shared.finish(ticket.seq, result);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Runs a debounced submit.
    ///
    /// `epoch` and `token` are the values current when the submit was made. A
    /// submit from before a client swap never runs, and only the latest submit
    /// clears the scheduled flag.
    async fn run_submit(&self, epoch: u64, token: u64) {
        let (ticket, request) = {
            let mut state = self.lock();
            if state.epoch != epoch {
                tracing::debug!("ignoring submit for a previous client");
                return;
            }
            if state.scheduled == Some(token) {
                state.scheduled = None;
            }
            let search = state.intent.normalize();
            let request = Request::search(&search, HeaderMap::new());
            (state.begin(), request)
        };
        self.notify();
        let result = match request {
            Ok(request) => ticket.execute(&request).await,
            Err(err) => Err(err),
        };
        self.finish(ticket.seq, result);
    }

    fn finish(&self, seq: u64, result: Result<ItemCollection>) {
        {
            let mut state = self.lock();
            if seq != state.seq {
                tracing::warn!("dropping stale result for request {seq} (latest is {})", state.seq);
                return;
            }
            state.loading = false;
            match result {
                Ok(page) => {
                    state.next = page.next_link().cloned();
                    state.prev = page.prev_link().cloned();
                    state.results = Some(page);
                    state.error = None;
                }
                Err(err) => {
                    tracing::debug!("search failed: {err}");
                    state.next = None;
                    state.prev = None;
                    state.results = None;
                    state.error = Some(Arc::new(err));
                }
            }
        }
        self.notify();
    }
}

impl State {
    fn new(client: Client, cache: Option<QueryCache>, seq: u64, epoch: u64) -> State {
        State {
            client,
            cache,
            intent: SearchIntent::default(),
            results: None,
            error: None,
            next: None,
            prev: None,
            loading: false,
            scheduled: None,
            submits: 0,
            seq,
            epoch,
        }
    }

    fn begin(&mut self) -> Ticket {
        self.seq += 1;
        self.loading = true;
        Ticket {
            seq: self.seq,
            client: self.client.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl Ticket {
    async fn execute(&self, request: &Request) -> Result<ItemCollection> {
        let key = request.query_key();
        if let Some(cache) = &self.cache
            && let Some(value) = cache.get(&key)
        {
            tracing::debug!("cache hit for {}", key.to_value());
            return serde_json::from_value(value).map_err(Into::into);
        }
        let page = self.client.execute(request).await?;
        if let Some(cache) = &self.cache {
            let _ = cache.insert(key, serde_json::to_value(&page)?);
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadingState, SearchSession};
    use crate::{Client, QueryCache, SearchMode, Sortby};
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::{Value, json};
    use std::time::Duration;

    const WINDOW: Duration = Duration::from_millis(20);

    fn page(id: &str, links: Value) -> String {
        json!({
            "type": "FeatureCollection",
            "features": [{"id": id}],
            "links": links
        })
        .to_string()
    }

    async fn session(mode: SearchMode) -> (ServerGuard, SearchSession) {
        let server = Server::new_async().await;
        let client = Client::new(&server.url(), mode).unwrap();
        (server, SearchSession::with_debounce(client, WINDOW))
    }

    #[tokio::test]
    async fn submit_uses_intent_at_expiry() {
        let (mut server, session) = session(SearchMode::Post).await;
        let mock = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({
                "collections": ["wildfire"],
                "bbox": [-0.59, 51.24, 0.30, 51.74],
                "sortby": [{"field": "id", "direction": "asc"}],
                "limit": 10
            })))
            .with_body(page("a", json!([])))
            .expect(1)
            .create_async()
            .await;
        session.set_collections(Some(vec!["wildfire".to_string()]));
        session.submit();
        session.set_bbox(Some([0.30, 51.74, -0.59, 51.24]));
        session.submit();
        session.set_sortby(Some(vec![Sortby::asc("id")]));
        session.set_limit(Some(10));
        session.submit();
        assert!(session.is_scheduled());
        session.idle().await;
        mock.assert_async().await;
        assert_eq!(session.state(), LoadingState::Idle);
        assert_eq!(session.results().unwrap().features[0]["id"], "a");
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn empty_intent_is_unfiltered() {
        let (mut server, session) = session(SearchMode::Get).await;
        let mock = server
            .mock("GET", "/search")
            .match_query(Matcher::Missing)
            .with_body(page("a", json!([])))
            .create_async()
            .await;
        session.set_collections(Some(Vec::new()));
        session.submit();
        session.idle().await;
        mock.assert_async().await;
        assert!(session.results().is_some());
    }

    #[tokio::test]
    async fn pagination() {
        let (mut server, session) = session(SearchMode::Post).await;
        let url = server.url();
        let _first = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({"bbox": [-10.0, -5.0, 10.0, 5.0], "limit": 1})))
            .with_body(page(
                "first",
                json!([{
                    "rel": "next",
                    "href": format!("{url}/search"),
                    "method": "POST",
                    "body": {"limit": 25, "token": "next:abc123", "merge": true}
                }]),
            ))
            .create_async()
            .await;
        let _second = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({
                "bbox": [-10.0, -5.0, 10.0, 5.0],
                "limit": 1,
                "token": "next:abc123"
            })))
            .with_body(page(
                "second",
                json!([{"rel": "previous", "href": format!("{url}/search?page=1")}]),
            ))
            .create_async()
            .await;
        let _third = server
            .mock("GET", "/search")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_body(page("first-again", json!([])))
            .create_async()
            .await;

        assert!(session.next_page().is_none());
        session.set_bbox(Some([10.0, 5.0, -10.0, -5.0]));
        session.set_limit(Some(1));
        session.submit();
        session.idle().await;
        assert!(session.previous_page().is_none());

        session.next_page().unwrap().call().await;
        assert_eq!(session.results().unwrap().features[0]["id"], "second");
        assert!(session.next_page().is_none());

        session.previous_page().unwrap().call().await;
        assert_eq!(session.results().unwrap().features[0]["id"], "first-again");
    }

    #[tokio::test]
    async fn failure_clears_results_but_not_intent() {
        let (mut server, session) = session(SearchMode::Post).await;
        let _ok = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({"limit": 1})))
            .with_body(page("a", json!([{"rel": "next", "href": "https://stac.test/next"}])))
            .create_async()
            .await;
        let _bad = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({"limit": 2})))
            .with_status(400)
            .with_body(json!({"error": "Wrong query"}).to_string())
            .create_async()
            .await;
        session.set_limit(Some(1));
        session.submit();
        session.idle().await;
        assert!(session.results().is_some());
        assert!(session.next_page().is_some());

        session.set_limit(Some(2));
        session.submit();
        session.idle().await;
        assert!(session.results().is_none());
        assert!(session.next_page().is_none());
        let error = session.error().unwrap();
        assert_eq!(error.api_error().unwrap().status, 400);
        assert_eq!(session.intent().limit, Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_results_are_dropped() {
        let (mut server, session) = session(SearchMode::Post).await;
        let _slow = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({"limit": 1})))
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(300));
                w.write_all(page("slow", json!([])).as_bytes())
            })
            .create_async()
            .await;
        let _fast = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({"limit": 2})))
            .with_body(page("fast", json!([])))
            .create_async()
            .await;
        session.set_limit(Some(1));
        session.submit();
        tokio::time::sleep(WINDOW * 3).await;
        assert_eq!(session.state(), LoadingState::Loading);
        session.set_limit(Some(2));
        session.submit();
        session.idle().await;
        assert_eq!(session.results().unwrap().features[0]["id"], "fast");
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(session.results().unwrap().features[0]["id"], "fast");
    }

    #[tokio::test]
    async fn set_client_resets() {
        let (mut server, session) = session(SearchMode::Post).await;
        let mock = server
            .mock("POST", "/search")
            .with_body(page("a", json!([{"rel": "next", "href": "https://stac.test/next"}])))
            .expect(1)
            .create_async()
            .await;
        session.set_limit(Some(5));
        session.submit();
        session.idle().await;
        let handler = session.next_page().unwrap();

        session.set_client(session.client());
        assert!(session.results().is_some());

        session.set_limit(Some(10));
        session.submit();
        session.set_client(Client::new("https://other.test", SearchMode::Get).unwrap());
        assert!(!session.is_scheduled());
        assert!(session.results().is_none());
        assert!(session.next_page().is_none());
        assert_eq!(session.intent().limit, None);
        handler.call().await;
        tokio::time::sleep(WINDOW * 3).await;
        assert!(session.results().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn submit_after_client_swap_does_nothing() {
        let (_server, session) = session(SearchMode::Post).await;
        let mut other = Server::new_async().await;
        let mock = other
            .mock("POST", "/search")
            .with_body(page("a", json!([])))
            .expect(0)
            .create_async()
            .await;
        let epoch = session.shared.lock().epoch;
        session.set_limit(Some(5));
        session.submit();
        session.set_client(Client::new(&other.url(), SearchMode::Post).unwrap());

        // The timer already handed the submit over before the swap.
        session.shared.run_submit(epoch, 1).await;
        assert!(session.results().is_none());
        assert!(session.error().is_none());
        assert_eq!(session.state(), LoadingState::Idle);
        session.idle().await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn older_submit_keeps_newer_scheduled() {
        let mut server = Server::new_async().await;
        let client = Client::new(&server.url(), SearchMode::Post).unwrap();
        let session = SearchSession::with_debounce(client, Duration::from_millis(500));
        let mock = server
            .mock("POST", "/search")
            .with_body(page("a", json!([])))
            .expect(2)
            .create_async()
            .await;
        let epoch = session.shared.lock().epoch;
        session.submit();
        session.submit();
        session.shared.run_submit(epoch, 1).await;
        assert!(session.is_scheduled());
        session.idle().await;
        assert!(!session.is_scheduled());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cache() {
        let (mut server, session) = session(SearchMode::Post).await;
        let session = session.with_cache(QueryCache::new());
        let mock = server
            .mock("POST", "/search")
            .with_body(page("a", json!([])))
            .expect(1)
            .create_async()
            .await;
        session.set_limit(Some(5));
        for _ in 0..2 {
            session.submit();
            session.idle().await;
            assert_eq!(session.results().unwrap().features[0]["id"], "a");
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancel() {
        let (mut server, session) = session(SearchMode::Post).await;
        let mock = server
            .mock("POST", "/search")
            .with_body(page("a", json!([])))
            .expect(0)
            .create_async()
            .await;
        session.submit();
        session.cancel();
        session.idle().await;
        tokio::time::sleep(WINDOW * 3).await;
        assert!(session.results().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn subscribe() {
        let (_server, session) = session(SearchMode::Post).await;
        let mut changes = session.subscribe();
        session.set_ids(Some(vec!["a".to_string()]));
        assert!(changes.has_changed().unwrap());
        let _ = changes.borrow_and_update();
        session.set_date_range_from(Some("2023-01-01".to_string()));
        session.set_date_range_to(Some("2023-12-31".to_string()));
        assert!(changes.has_changed().unwrap());
        assert_eq!(
            session.intent().normalize().datetime.unwrap(),
            "2023-01-01T00:00:00Z/2023-12-31T23:59:59Z"
        );
    }
}
