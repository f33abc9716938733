//! Search, pagination, and error normalization for [STAC API](https://github.com/radiantearth/stac-api-spec) clients.
//!
//! This crate **is**:
//!
//! - A client that works out whether an API wants `GET` or `POST` searches
//! - A payload normalizer (bbox ordering, date ranges, empty filters)
//! - A pagination link follower, including `merge` bodies and link headers
//! - A debounced search session that only ever shows the latest results
//!
//! This crate **is not**:
//!
//! - A server implementation
//! - A STAC validator
//! - A persistent cache
//!
//! # Opening an API
//!
//! [probe] fetches the landing page once and returns a [Client] that knows its
//! base url (after redirects) and its [SearchMode]:
//!
//! ```no_run
//! use http::HeaderMap;
//! use stac_query::{SearchIntent, probe};
//!
//! # tokio_test::block_on(async {
//! let client = probe(
//!     &reqwest::Client::new(),
//!     "https://planetarycomputer.microsoft.com/api/stac/v1",
//!     &HeaderMap::new(),
//! )
//! .await
//! .unwrap();
//! let intent = SearchIntent::new()
//!     .collections(vec!["sentinel-2-l2a".to_string()])
//!     .date_range_from("2023-01-01")
//!     .limit(10);
//! let item_collection = client.search(&intent, &HeaderMap::new()).await.unwrap();
//! # })
//! ```
//!
//! # Errors
//!
//! Anything the API says that isn't a usable answer is an [ApiError], with the
//! status, status text, and the body as JSON or text. Transport failures are
//! left as [Error::Reqwest].

#![warn(missing_docs, unused_qualifications)]

mod client;
pub mod config;
mod debounce;
mod error;
mod item_collection;
pub mod link;
mod probe;
mod query_key;
pub mod search;
pub mod session;
mod sort;

pub use {
    client::{Client, SearchMode},
    config::Config,
    debounce::Debouncer,
    error::{ApiError, Detail, Error, INVALID_JSON_STATUS_TEXT, UNPARSABLE_DETAIL, handle_response},
    item_collection::{Collection, Collections, Item, ItemCollection, Root},
    link::{Link, header_map},
    probe::{Probe, probe},
    query_key::{QueryCache, QueryKey, Request, SEARCH_DOMAIN},
    search::{
        Bbox, Search, SearchIntent, normalize_array, normalize_bbox, normalize_date_range,
        normalize_limit, parse_bbox, to_query_string,
    },
    session::{LoadingState, PageHandler, SearchSession},
    sort::{Direction, Sortby},
};

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns a string suitable for use as a HTTP user agent.
pub fn user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}
