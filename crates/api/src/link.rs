//! Links, and following them for pagination.

use crate::{Result, Search};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Relation type for the next page of results.
pub const NEXT_REL: &str = "next";

/// Relation types for the previous page of results.
///
/// Older APIs say `previous`, newer ones say `prev`.
pub const PREV_RELS: [&str; 2] = ["prev", "previous"];

/// Relation type for the search endpoint on a landing page.
pub const SEARCH_REL: &str = "search";

/// A link, as found in a STAC API response's `links` array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// The actual link in the format of an URL.
    pub href: String,

    /// Relationship between the current document and the linked document.
    pub rel: String,

    /// Media type of the referenced entity.
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub r#type: Option<String>,

    /// A human readable title to be used in rendered displays of the link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// The HTTP method to use when following this link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Headers to send when following this link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,

    /// The request body to send when following this link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Map<String, Value>>,

    /// If true, the body should be merged with the current search parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,

    /// Additional fields on the link.
    #[serde(flatten)]
    pub additional_fields: Map<String, Value>,
}

impl Link {
    /// Creates a new link with the given href and rel type.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::Link;
    /// let link = Link::new("https://stac.test/search?page=2", "next");
    /// assert!(link.is_next());
    /// ```
    pub fn new(href: impl ToString, rel: impl ToString) -> Link {
        Link {
            href: href.to_string(),
            rel: rel.to_string(),
            r#type: None,
            title: None,
            method: None,
            headers: None,
            body: None,
            merge: None,
            additional_fields: Map::new(),
        }
    }

    /// Sets this link's method.
    pub fn method(mut self, method: impl ToString) -> Link {
        self.method = Some(method.to_string());
        self
    }

    /// Sets this link's body.
    pub fn body(mut self, body: Map<String, Value>) -> Link {
        self.body = Some(body);
        self
    }

    /// Returns true if this is a next-page link.
    pub fn is_next(&self) -> bool {
        self.rel == NEXT_REL
    }

    /// Returns true if this is a previous-page link, either `prev` or `previous`.
    pub fn is_prev(&self) -> bool {
        PREV_RELS.contains(&self.rel.as_str())
    }

    /// Returns true if this link advertises `POST` search.
    pub fn is_post_search(&self) -> bool {
        self.rel == SEARCH_REL
            && self
                .method
                .as_deref()
                .is_some_and(|method| method.eq_ignore_ascii_case("POST"))
    }

    /// Returns true if the body should be merged with the live search.
    ///
    /// The flag is honored both on the link and inside its body.
    pub fn should_merge(&self) -> bool {
        self.merge.unwrap_or_default()
            || self
                .body
                .as_ref()
                .and_then(|body| body.get("merge"))
                .and_then(Value::as_bool)
                .unwrap_or_default()
    }

    /// Returns this link's method, if it has a valid one.
    pub fn http_method(&self) -> Result<Option<Method>> {
        self.method
            .as_deref()
            .map(|method| method.to_ascii_uppercase().parse::<Method>())
            .transpose()
            .map_err(Into::into)
    }

    /// Returns this link's headers as a [HeaderMap].
    pub fn header_map(&self) -> Result<HeaderMap> {
        match &self.headers {
            Some(headers) => header_map(headers),
            None => Ok(HeaderMap::new()),
        }
    }

    /// Builds the payload to send when following this link.
    ///
    /// Returns `None` for links without a body, which are followed as plain
    /// `GET`s of their href. If the link asks to be merged, the `live` search
    /// is layered on top of the body, with live fields winning any collision.
    /// The merge flag itself is a client directive and is not sent.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::{Link, Search};
    /// use serde_json::json;
    ///
    /// let body = json!({"limit": 25, "token": "prev:abc123", "merge": true});
    /// let link = Link::new("https://stac.test/search", "prev")
    ///     .body(body.as_object().unwrap().clone());
    /// let live = Search::new().bbox([-10.0, -5.0, 10.0, 5.0]);
    /// let payload = link.payload(Some(&live)).unwrap().unwrap();
    /// assert_eq!(
    ///     serde_json::Value::Object(payload),
    ///     json!({"bbox": [-10.0, -5.0, 10.0, 5.0], "limit": 25, "token": "prev:abc123"})
    /// );
    /// ```
    pub fn payload(&self, live: Option<&Search>) -> Result<Option<Map<String, Value>>> {
        let Some(body) = self.body.as_ref() else {
            return Ok(None);
        };
        let mut payload = body.clone();
        let _ = payload.remove("merge");
        if self.should_merge()
            && let Some(live) = live
        {
            payload.extend(live.to_map()?);
        }
        Ok(Some(payload))
    }
}

/// Converts a JSON object of headers into a [HeaderMap].
///
/// Non-string values are written as their JSON representation.
pub fn header_map(headers: &Map<String, Value>) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let value = match value {
            Value::String(s) => HeaderValue::from_str(s)?,
            _ => HeaderValue::from_str(&value.to_string())?,
        };
        let _ = header_map.insert(HeaderName::from_bytes(key.as_bytes())?, value);
    }
    Ok(header_map)
}

/// Returns the first next-page link.
pub fn next_link(links: &[Link]) -> Option<&Link> {
    links.iter().find(|link| link.is_next())
}

/// Returns the first previous-page link, `prev` or `previous`.
pub fn prev_link(links: &[Link]) -> Option<&Link> {
    links.iter().find(|link| link.is_prev())
}
