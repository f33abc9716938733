//! Search intents, normalized search payloads, and their wire forms.

use crate::{Error, Result, Sortby};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A bounding box, `[minLon, minLat, maxLon, maxLat]`.
pub type Bbox = [f64; 4];

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const OPEN: &str = "..";

/// A caller's in-progress search description, before normalization.
///
/// Every field is optional, and an empty intent means an unfiltered search.
/// Nothing is validated or reordered here; that happens when the intent is
/// turned into a [Search].
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIntent {
    /// Item ids to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// The bounding box, in any corner order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,

    /// Collection ids that matching items must be in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    /// The start of the date range, either a date or a datetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range_from: Option<String>,

    /// The end of the date range, either a date or a datetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range_to: Option<String>,

    /// Sort order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortby: Option<Vec<Sortby>>,

    /// Page size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// The canonical search payload, as it goes over the wire.
///
/// As a `POST` body this is serialized straight to JSON. As a `GET` request it
/// goes through [Search::to_query_string]. Fields that are `None` are never
/// sent.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct Search {
    /// Array of Item ids to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Array of one or more Collection IDs that each matching Item must be in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    /// Requested bounding box, always with min <= max on each axis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,

    /// Single date+time, or a range ('/' separator).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    /// Fields by which to sort results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortby: Option<Vec<Sortby>>,

    /// The maximum number of results to return (page size).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Anything else, e.g. a pagination `token`.
    #[serde(flatten)]
    pub additional_fields: Map<String, Value>,
}

impl SearchIntent {
    /// Creates a new, empty intent.
    pub fn new() -> SearchIntent {
        SearchIntent::default()
    }

    /// Sets the ids of this intent.
    pub fn ids(mut self, ids: Vec<String>) -> SearchIntent {
        self.ids = Some(ids);
        self
    }

    /// Sets the bbox of this intent.
    pub fn bbox(mut self, bbox: Bbox) -> SearchIntent {
        self.bbox = Some(bbox);
        self
    }

    /// Sets the collections of this intent.
    pub fn collections(mut self, collections: Vec<String>) -> SearchIntent {
        self.collections = Some(collections);
        self
    }

    /// Sets the start of the date range.
    pub fn date_range_from(mut self, from: impl ToString) -> SearchIntent {
        self.date_range_from = Some(from.to_string());
        self
    }

    /// Sets the end of the date range.
    pub fn date_range_to(mut self, to: impl ToString) -> SearchIntent {
        self.date_range_to = Some(to.to_string());
        self
    }

    /// Sets the sortby of this intent.
    pub fn sortby(mut self, sortby: Vec<Sortby>) -> SearchIntent {
        self.sortby = Some(sortby);
        self
    }

    /// Sets the limit of this intent.
    pub fn limit(mut self, limit: u64) -> SearchIntent {
        self.limit = Some(limit);
        self
    }

    /// Normalizes this intent into a wire payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::SearchIntent;
    ///
    /// let search = SearchIntent::new()
    ///     .bbox([0.30, 51.74, -0.59, 51.24])
    ///     .collections(Vec::new())
    ///     .date_range_from("2022-01-17")
    ///     .normalize();
    /// assert_eq!(search.bbox, Some([-0.59, 51.24, 0.30, 51.74]));
    /// assert_eq!(search.collections, None);
    /// assert_eq!(search.datetime.as_deref(), Some("2022-01-17T00:00:00Z/.."));
    /// ```
    pub fn normalize(&self) -> Search {
        Search {
            ids: normalize_array(self.ids.clone()),
            collections: normalize_array(self.collections.clone()),
            bbox: normalize_bbox(self.bbox),
            datetime: normalize_date_range(
                self.date_range_from.as_deref(),
                self.date_range_to.as_deref(),
            ),
            sortby: normalize_array(self.sortby.clone()),
            limit: normalize_limit(self.limit),
            additional_fields: Map::new(),
        }
    }
}

impl Search {
    /// Creates a new, empty search.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::Search;
    ///
    /// let search = Search::new();
    /// ```
    pub fn new() -> Search {
        Search::default()
    }

    /// Sets the ids field of this search.
    ///
    /// An empty list clears the filter.
    pub fn ids(mut self, ids: Vec<String>) -> Search {
        self.ids = normalize_array(Some(ids));
        self
    }

    /// Sets the collections of this search.
    ///
    /// An empty list clears the filter.
    pub fn collections(mut self, collections: Vec<String>) -> Search {
        self.collections = normalize_array(Some(collections));
        self
    }

    /// Sets the bbox of this search, reordering its corners if needed.
    pub fn bbox(mut self, bbox: Bbox) -> Search {
        self.bbox = normalize_bbox(Some(bbox));
        self
    }

    /// Sets the datetime of this search.
    pub fn datetime(mut self, datetime: impl ToString) -> Search {
        self.datetime = Some(datetime.to_string());
        self
    }

    /// Sets the limit of this search.
    pub fn limit(mut self, limit: u64) -> Search {
        self.limit = normalize_limit(Some(limit));
        self
    }

    /// Sets the sortby of this search.
    pub fn sortby(mut self, sortby: Vec<Sortby>) -> Search {
        self.sortby = normalize_array(Some(sortby));
        self
    }

    /// Returns this search as a JSON object, exactly as it would be `POST`ed.
    pub fn to_map(&self) -> Result<Map<String, Value>> {
        serde_json::from_value(serde_json::to_value(self)?).map_err(Error::from)
    }

    /// Serializes this search into a `GET` query string.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_query::{Search, Sortby};
    ///
    /// let search = Search::new()
    ///     .collections(vec!["a".to_string(), "b".to_string()])
    ///     .sortby(vec![Sortby::asc("id"), Sortby::desc("datetime")]);
    /// assert_eq!(
    ///     search.to_query_string().unwrap(),
    ///     "collections=a%2Cb&sortby=%2Bid%2C-datetime"
    /// );
    /// ```
    pub fn to_query_string(&self) -> Result<String> {
        to_query_string(&self.to_map()?)
    }
}

impl From<&SearchIntent> for Search {
    fn from(intent: &SearchIntent) -> Search {
        intent.normalize()
    }
}

impl From<SearchIntent> for Search {
    fn from(intent: SearchIntent) -> Search {
        intent.normalize()
    }
}

/// Reorders a bbox's corners so that min <= max on each axis.
///
/// Longitudes are only ever swapped with longitudes, and latitudes with
/// latitudes.
///
/// # Examples
///
/// ```
/// assert_eq!(
///     stac_query::normalize_bbox(Some([0.30, 51.74, -0.59, 51.24])),
///     Some([-0.59, 51.24, 0.30, 51.74])
/// );
/// assert_eq!(stac_query::normalize_bbox(None), None);
/// ```
pub fn normalize_bbox(bbox: Option<Bbox>) -> Option<Bbox> {
    bbox.map(|[min_lon, min_lat, max_lon, max_lat]| {
        [
            min_lon.min(max_lon),
            min_lat.min(max_lat),
            min_lon.max(max_lon),
            min_lat.max(max_lat),
        ]
    })
}

/// Collapses a date range into a single datetime interval.
///
/// A missing bound becomes `..`. Bare dates are widened to the whole day, so
/// the start gets `T00:00:00Z` and the end gets `T23:59:59Z`. A bare year or
/// year-month widens to the whole year or month. Anything else, e.g. a full
/// RFC 3339 datetime, is passed through untouched.
///
/// # Examples
///
/// ```
/// use stac_query::normalize_date_range;
///
/// assert_eq!(
///     normalize_date_range(Some("2022-01-17"), Some("2022-05-17")).unwrap(),
///     "2022-01-17T00:00:00Z/2022-05-17T23:59:59Z"
/// );
/// assert_eq!(
///     normalize_date_range(None, Some("2022-05-17")).unwrap(),
///     "../2022-05-17T23:59:59Z"
/// );
/// assert_eq!(normalize_date_range(None, None), None);
/// ```
pub fn normalize_date_range(from: Option<&str>, to: Option<&str>) -> Option<String> {
    let from = from.map(str::trim).filter(|s| !s.is_empty());
    let to = to.map(str::trim).filter(|s| !s.is_empty());
    if from.is_none() && to.is_none() {
        return None;
    }
    let start = from
        .map(|s| widen(s, expand_datetime_to_start))
        .unwrap_or_else(|| OPEN.to_string());
    let end = to
        .map(|s| widen(s, expand_datetime_to_end))
        .unwrap_or_else(|| OPEN.to_string());
    Some(format!("{start}/{end}"))
}

/// Drops empty lists, so an empty list means "no filter".
///
/// # Examples
///
/// ```
/// assert_eq!(stac_query::normalize_array::<String>(Some(Vec::new())), None);
/// assert_eq!(stac_query::normalize_array(Some(vec![1])), Some(vec![1]));
/// ```
pub fn normalize_array<T>(list: Option<Vec<T>>) -> Option<Vec<T>> {
    list.filter(|list| !list.is_empty())
}

/// Drops a zero limit, which no STAC API accepts.
pub fn normalize_limit(limit: Option<u64>) -> Option<u64> {
    limit.filter(|&limit| limit > 0)
}

/// Parses a comma-delimited bbox, e.g. `-105.1,40.1,-105.0,40.2`.
///
/// # Examples
///
/// ```
/// let bbox = stac_query::parse_bbox("-105.1,40.1,-105.0,40.2").unwrap();
/// assert_eq!(bbox, [-105.1, 40.1, -105.0, 40.2]);
/// ```
pub fn parse_bbox(s: &str) -> Result<Bbox> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::InvalidBbox(Vec::new()))?;
    values
        .clone()
        .try_into()
        .map_err(|_| Error::InvalidBbox(values))
}

/// Serializes a JSON payload into a `GET` query string.
///
/// Arrays are comma-joined, `sortby` objects become `+field`/`-field`, nested
/// objects are written as compact JSON. `null`, `false`, empty strings and
/// empty arrays are left out.
pub fn to_query_string(payload: &Map<String, Value>) -> Result<String> {
    let mut pairs = Vec::with_capacity(payload.len());
    for (key, value) in payload {
        let value = if key == "sortby" {
            sortby_to_query(value)
        } else {
            value_to_query(value)
        };
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            pairs.push((key.as_str(), value));
        }
    }
    serde_urlencoded::to_string(pairs).map_err(Error::from)
}

fn sortby_to_query(value: &Value) -> Option<String> {
    match value {
        Value::Array(entries) => Some(
            entries
                .iter()
                .filter_map(|entry| {
                    serde_json::from_value::<Sortby>(entry.clone())
                        .ok()
                        .map(|sortby| sortby.to_string())
                        .or_else(|| value_to_query(entry))
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => value_to_query(value),
    }
}

fn value_to_query(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("true".to_string()),
        Value::Number(number) => Some(number_to_query(number)),
        Value::String(s) => Some(s.clone()),
        Value::Array(values) => Some(
            values
                .iter()
                .filter_map(value_to_query)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

fn number_to_query(number: &Number) -> String {
    if let Some(n) = number.as_i64() {
        n.to_string()
    } else if let Some(n) = number.as_u64() {
        n.to_string()
    } else if let Some(n) = number.as_f64() {
        n.to_string()
    } else {
        number.to_string()
    }
}

fn widen(s: &str, expand: fn(&str) -> Option<NaiveDateTime>) -> String {
    if s == OPEN {
        return s.to_string();
    }
    expand(s)
        .map(|datetime| datetime.format(DATETIME_FORMAT).to_string())
        .unwrap_or_else(|| s.to_string())
}

/// Expands a partial datetime string to the start of the period.
fn expand_datetime_to_start(s: &str) -> Option<NaiveDateTime> {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;

    // Year only (e.g., "2023") -> 2023-01-01T00:00:00Z
    if let Some(year) = parse_year(s) {
        return NaiveDate::from_ymd_opt(year, 1, 1).map(|date| date.and_time(midnight));
    }

    // Year-Month (e.g., "2023-01") -> 2023-01-01T00:00:00Z
    if let Some((year, month)) = parse_year_month(s) {
        return NaiveDate::from_ymd_opt(year, month, 1).map(|date| date.and_time(midnight));
    }

    // ISO 8601 date (e.g., "2023-06-15") -> 2023-06-15T00:00:00Z
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(midnight))
}

/// Expands a partial datetime string to the end of the period.
fn expand_datetime_to_end(s: &str) -> Option<NaiveDateTime> {
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)?;

    // Year only (e.g., "2023") -> 2023-12-31T23:59:59Z
    if let Some(year) = parse_year(s) {
        return NaiveDate::from_ymd_opt(year, 12, 31).map(|date| date.and_time(end_of_day));
    }

    // Year-Month (e.g., "2023-01") -> 2023-01-31T23:59:59Z
    if let Some((year, month)) = parse_year_month(s) {
        let first_of_next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        return first_of_next
            .and_then(|date| date.pred_opt())
            .map(|date| date.and_time(end_of_day));
    }

    // ISO 8601 date (e.g., "2023-06-15") -> 2023-06-15T23:59:59Z
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(end_of_day))
}

fn parse_year(s: &str) -> Option<i32> {
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

fn parse_year_month(s: &str) -> Option<(i32, u32)> {
    if s.len() != 7 || s.chars().nth(4) != Some('-') {
        return None;
    }
    let (year, month) = s.split_once('-')?;
    let year = parse_year(year)?;
    let month = month.parse::<u32>().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}
