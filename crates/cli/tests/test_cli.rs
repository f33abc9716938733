use assert_cmd::Command;
use clap::Parser;
use mockito::{Matcher, Server, ServerGuard};
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use stac_query::{Direction, SearchIntent, Sortby};
use stac_query_cli::StacQuery;
use std::io::Write;
use tracing::Level;

#[fixture]
fn command() -> Command {
    assert_cmd::cargo::cargo_bin_cmd!("stac-query")
}

#[fixture]
fn server() -> ServerGuard {
    let mut server = Server::new();
    let url = server.url();
    let _ = server
        .mock("GET", "/")
        .with_body(
            json!({
                "links": [{"rel": "search", "href": format!("{url}/search"), "method": "POST"}]
            })
            .to_string(),
        )
        .create();
    server
}

#[test]
fn search_intent() {
    let stac_query = StacQuery::parse_from([
        "stac-query",
        "search",
        "https://stac.test",
        "--ids",
        "a,b",
        "--collections",
        "wildfire",
        "--bbox",
        "0.30,51.74,-0.59,51.24",
        "--from",
        "2022-01-17",
        "--to",
        "2022-05-17",
        "--sortby",
        "-datetime,+id",
        "--limit",
        "10",
    ]);
    let intent = stac_query.intent().unwrap().unwrap();
    assert_eq!(
        intent,
        SearchIntent::new()
            .ids(vec!["a".to_string(), "b".to_string()])
            .collections(vec!["wildfire".to_string()])
            .bbox([0.30, 51.74, -0.59, 51.24])
            .date_range_from("2022-01-17")
            .date_range_to("2022-05-17")
            .sortby(vec![Sortby::desc("datetime"), Sortby::asc("id")])
            .limit(10)
    );
    let search = intent.normalize();
    assert_eq!(search.bbox, Some([-0.59, 51.24, 0.30, 51.74]));
    assert_eq!(search.sortby.unwrap()[0].direction, Direction::Desc);
}

#[test]
fn not_a_search() {
    let stac_query = StacQuery::parse_from(["stac-query", "collections", "https://stac.test"]);
    assert!(stac_query.intent().unwrap().is_none());
}

#[test]
fn invalid_bbox() {
    let stac_query =
        StacQuery::parse_from(["stac-query", "search", "https://stac.test", "--bbox", "1,2,3"]);
    let _ = stac_query.intent().unwrap_err();
}

#[test]
fn invalid_header() {
    let _ = StacQuery::try_parse_from([
        "stac-query",
        "--header",
        "no-equals-sign",
        "collections",
        "https://stac.test",
    ])
    .unwrap_err();
}

#[test]
fn log_level() {
    let stac_query = StacQuery::parse_from(["stac-query", "collections", "https://stac.test"]);
    assert_eq!(stac_query.log_level(), Some(Level::ERROR));

    let stac_query =
        StacQuery::parse_from(["stac-query", "-vv", "collections", "https://stac.test"]);
    assert_eq!(stac_query.log_level(), Some(Level::INFO));

    let stac_query = StacQuery::parse_from(["stac-query", "-q", "collections", "https://stac.test"]);
    assert_eq!(stac_query.log_level(), None);
}

#[test]
fn config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "{}",
        json!({"headers": {"x-api-key": "from-file"}, "debounce_ms": 100})
    )
    .unwrap();
    let stac_query = StacQuery::parse_from([
        "stac-query",
        "--config",
        file.path().to_str().unwrap(),
        "--header",
        "authorization=Bearer token",
        "collections",
        "https://stac.test",
    ]);
    let config = stac_query.config().unwrap();
    assert_eq!(config.debounce_ms, 100);
    let headers = config.header_map().unwrap();
    assert_eq!(headers["x-api-key"], "from-file");
    assert_eq!(headers["authorization"], "Bearer token");
}

#[rstest]
fn search(mut command: Command, mut server: ServerGuard) {
    let url = server.url();
    let _first = server
        .mock("POST", "/search")
        .match_header("x-api-key", "secret")
        .match_body(Matcher::Json(json!({"collections": ["wildfire"], "limit": 1})))
        .with_body(
            json!({
                "type": "FeatureCollection",
                "features": [{"id": "first"}],
                "numberMatched": 3,
                "links": [{
                    "rel": "next",
                    "href": format!("{url}/search"),
                    "method": "POST",
                    "body": {"token": "next:2"},
                    "merge": true
                }]
            })
            .to_string(),
        )
        .create();
    let _second = server
        .mock("POST", "/search")
        .match_body(Matcher::Json(
            json!({"collections": ["wildfire"], "limit": 1, "token": "next:2"}),
        ))
        .with_body(
            json!({
                "type": "FeatureCollection",
                "features": [{"id": "second"}],
                "links": [{"rel": "next", "href": format!("{url}/search?page=3")}]
            })
            .to_string(),
        )
        .create();
    let output = command
        .arg("search")
        .arg(&url)
        .arg("--collections")
        .arg("wildfire")
        .arg("--limit")
        .arg("1")
        .arg("-n")
        .arg("2")
        .arg("--header")
        .arg("x-api-key=secret")
        .arg("-c")
        .arg("true")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let item_collection: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(item_collection["type"], "FeatureCollection");
    assert_eq!(item_collection["numberMatched"], 3);
    let ids: Vec<_> = item_collection["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["first", "second"]);
}

#[rstest]
fn collections(mut command: Command, mut server: ServerGuard) {
    let _mock = server
        .mock("GET", "/collections")
        .with_body(json!({"collections": [{"id": "wildfire"}]}).to_string())
        .create();
    let output = command
        .arg("collections")
        .arg(server.url())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let collections: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(collections["collections"][0]["id"], "wildfire");
}

#[rstest]
fn collection_not_found(mut command: Command, mut server: ServerGuard) {
    let _mock = server
        .mock("GET", "/collections/missing")
        .with_status(404)
        .with_body(json!({"code": "NotFound"}).to_string())
        .create();
    let output = command
        .arg("collection")
        .arg(server.url())
        .arg("missing")
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).unwrap();
    assert!(stderr.contains("404 Not Found"), "{stderr}");
    assert!(stderr.contains("NotFound"), "{stderr}");
}

#[rstest]
fn get(mut command: Command, mut server: ServerGuard) {
    let _mock = server
        .mock("GET", "/collections/wildfire/items/an-item")
        .with_body(json!({"id": "an-item"}).to_string())
        .create();
    let url = format!("{}/collections/wildfire/items/an-item", server.url());
    let output = command
        .arg("get")
        .arg(server.url())
        .arg(&url)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let item: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(item["id"], "an-item");
}

#[rstest]
fn unreachable_api(mut command: Command) {
    let _ = command
        .arg("collections")
        .arg("http://127.0.0.1:1")
        .assert()
        .failure();
}
