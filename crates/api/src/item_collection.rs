use crate::{Link, link};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A STAC API item, which might not have every field if the API trims them.
pub type Item = Map<String, Value>;

/// A STAC collection, kept as plain JSON.
pub type Collection = Map<String, Value>;

/// A page of search results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemCollection {
    /// Always `FeatureCollection`.
    #[serde(rename = "type", default = "feature_collection")]
    pub r#type: String,

    /// The items on this page.
    #[serde(default)]
    pub features: Vec<Item>,

    /// Links, including any pagination links.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,

    /// The number of items that match the search, if the server knows.
    #[serde(rename = "numberMatched", skip_serializing_if = "Option::is_none")]
    pub number_matched: Option<u64>,

    /// The number of items on this page.
    #[serde(rename = "numberReturned", skip_serializing_if = "Option::is_none")]
    pub number_returned: Option<u64>,

    /// The (deprecated) context extension object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Additional fields.
    #[serde(flatten)]
    pub additional_fields: Map<String, Value>,
}

/// The landing page of a STAC API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Root {
    /// The landing page's links, which advertise the API's capabilities.
    #[serde(default)]
    pub links: Vec<Link>,

    /// Everything else on the landing page.
    #[serde(flatten)]
    pub additional_fields: Map<String, Value>,
}

/// The response of the `/collections` endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Collections {
    /// The collections.
    #[serde(default)]
    pub collections: Vec<Collection>,

    /// Links.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,

    /// Additional fields.
    #[serde(flatten)]
    pub additional_fields: Map<String, Value>,
}

impl ItemCollection {
    /// Returns this page's next link, if it has one.
    pub fn next_link(&self) -> Option<&Link> {
        link::next_link(&self.links)
    }

    /// Returns this page's previous link, if it has one.
    pub fn prev_link(&self) -> Option<&Link> {
        link::prev_link(&self.links)
    }
}

impl Root {
    /// Returns true if this landing page advertises `POST` search.
    pub fn supports_post_search(&self) -> bool {
        self.links.iter().any(Link::is_post_search)
    }
}

impl Collections {
    /// Finds a collection by id.
    pub fn find(&self, id: &str) -> Option<&Collection> {
        self.collections
            .iter()
            .find(|collection| collection.get("id").and_then(Value::as_str) == Some(id))
    }
}

impl From<Vec<Item>> for ItemCollection {
    fn from(features: Vec<Item>) -> ItemCollection {
        ItemCollection {
            r#type: feature_collection(),
            features,
            ..Default::default()
        }
    }
}

fn feature_collection() -> String {
    "FeatureCollection".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Collections, ItemCollection, Root};
    use serde_json::json;

    #[test]
    fn item_collection_links() {
        let item_collection: ItemCollection = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [{"id": "an-id"}],
            "links": [
                {"rel": "previous", "href": "https://stac.test/search?page=1"},
                {"rel": "next", "href": "https://stac.test/search?page=3"}
            ],
            "numberMatched": 100
        }))
        .unwrap();
        assert_eq!(item_collection.features.len(), 1);
        assert_eq!(item_collection.number_matched, Some(100));
        assert!(item_collection.next_link().unwrap().href.ends_with("page=3"));
        assert!(item_collection.prev_link().unwrap().href.ends_with("page=1"));
    }

    #[test]
    fn root_without_links() {
        let root: Root = serde_json::from_value(json!({"id": "root"})).unwrap();
        assert!(!root.supports_post_search());
    }

    #[test]
    fn root_with_post_search() {
        let root: Root = serde_json::from_value(json!({
            "links": [
                {"rel": "search", "href": "https://stac.test/search", "method": "GET"},
                {"rel": "search", "href": "https://stac.test/search", "method": "POST"}
            ]
        }))
        .unwrap();
        assert!(root.supports_post_search());
    }

    #[test]
    fn collections_find() {
        let collections: Collections = serde_json::from_value(json!({
            "collections": [{"id": "a"}, {"id": "b"}]
        }))
        .unwrap();
        assert!(collections.find("b").is_some());
        assert!(collections.find("c").is_none());
    }
}
