use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// The detail used when an error body can be read neither as JSON nor as text.
pub const UNPARSABLE_DETAIL: &str = "Unable to parse error response";

/// The status text used when a successful response has a body that isn't JSON.
pub const INVALID_JSON_STATUS_TEXT: &str = "Invalid JSON Response";

/// Error enum for crate-specific errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The STAC API answered, but not with something we could use.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// [http::header::InvalidHeaderName]
    #[error(transparent)]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// [http::header::InvalidHeaderValue]
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// [http::method::InvalidMethod]
    #[error(transparent)]
    InvalidMethod(#[from] http::method::InvalidMethod),

    /// This vector is not a valid bounding box.
    #[error("invalid bbox: {0:?}")]
    InvalidBbox(Vec<f64>),

    /// This string is not a valid sortby.
    #[error("invalid sortby: {0}")]
    InvalidSortby(String),

    /// [std::io::Error]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// [reqwest::Error]
    ///
    /// Transport failures (connection refused, DNS, TLS) stay in this variant
    /// and are never turned into an [ApiError].
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// [serde_json::Error]
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// [serde_urlencoded::ser::Error]
    #[error(transparent)]
    SerdeUrlencoded(#[from] serde_urlencoded::ser::Error),

    /// [url::ParseError]
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
}

/// A failed or malformed response from a STAC API, in one fixed shape.
///
/// Every HTTP failure in this crate funnels through [ApiError::from_response]
/// or [handle_response], so callers only ever have to look at this structure.
#[derive(Error, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[error("{status} {status_text}")]
pub struct ApiError {
    /// The HTTP status code.
    pub status: u16,

    /// The HTTP status text, e.g. `Bad Request`.
    #[serde(rename = "statusText")]
    pub status_text: String,

    /// The response body, parsed as JSON if possible.
    pub detail: Detail,

    /// The effective url of the response, after any redirects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The body of an error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detail {
    /// The body was not JSON, so it is kept as text.
    Text(String),

    /// The body was JSON.
    Json(Value),
}

impl ApiError {
    /// Builds an error out of a response that isn't `ok`.
    ///
    /// The body is read exactly once. The JSON and text interpretations both
    /// work off of that buffer, so a failed JSON parse never eats the text
    /// fallback.
    pub async fn from_response(response: Response) -> ApiError {
        let status = response.status();
        let url = response.url().to_string();
        let detail = match response.bytes().await {
            Ok(bytes) => Detail::from_bytes(&bytes),
            Err(err) => {
                tracing::debug!("could not read error body from {url}: {err}");
                Detail::Text(UNPARSABLE_DETAIL.to_string())
            }
        };
        ApiError {
            status: status.as_u16(),
            status_text: status_text(status),
            detail,
            url: Some(url),
        }
    }

    /// Builds an error for a successful response whose body isn't JSON.
    pub fn invalid_json(status: StatusCode, url: impl ToString, body: &[u8]) -> ApiError {
        ApiError {
            status: status.as_u16(),
            status_text: INVALID_JSON_STATUS_TEXT.to_string(),
            detail: Detail::Text(String::from_utf8_lossy(body).into_owned()),
            url: Some(url.to_string()),
        }
    }

    /// The error used when a collection list doesn't contain the requested id.
    pub fn collection_not_found(url: Option<String>) -> ApiError {
        ApiError {
            status: StatusCode::NOT_FOUND.as_u16(),
            status_text: "Not found".to_string(),
            detail: Detail::Text("Collection does not exist".to_string()),
            url,
        }
    }
}

impl Detail {
    /// Interprets a body as JSON, then text, then gives up.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::Detail;
    /// use serde_json::json;
    ///
    /// assert_eq!(Detail::from_bytes(br#"{"a": 1}"#), Detail::Json(json!({"a": 1})));
    /// assert_eq!(Detail::from_bytes(b"oops"), Detail::Text("oops".to_string()));
    /// ```
    pub fn from_bytes(bytes: &[u8]) -> Detail {
        if let Ok(value) = serde_json::from_slice(bytes) {
            Detail::Json(value)
        } else if let Ok(text) = std::str::from_utf8(bytes) {
            Detail::Text(text.to_string())
        } else {
            Detail::Text(UNPARSABLE_DETAIL.to_string())
        }
    }
}

impl Error {
    /// Returns the [ApiError] if this is a protocol failure.
    pub fn api_error(&self) -> Option<&ApiError> {
        if let Error::Api(api_error) = self {
            Some(api_error)
        } else {
            None
        }
    }
}

/// Checks a response's status and deserializes its JSON body.
///
/// Non-2xx responses become [ApiError::from_response]. 2xx responses that
/// aren't JSON become [ApiError::invalid_json]. JSON that doesn't fit `T` is a
/// [Error::SerdeJson].
pub async fn handle_response<T>(response: Response) -> crate::Result<T>
where
    T: DeserializeOwned,
{
    if !response.status().is_success() {
        return Err(ApiError::from_response(response).await.into());
    }
    let status = response.status();
    let url = response.url().to_string();
    let bytes = response.bytes().await?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|_| ApiError::invalid_json(status, &url, &bytes))?;
    serde_json::from_value(value).map_err(Error::from)
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(String::from)
        .unwrap_or_else(|| status.as_str().to_string())
}
