//! Mock remote site built on wiremock

use catalog_extract::Config;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Catalog path used by every mock site (site root `/plone`)
pub const CATALOG_PATH: &str = "/plone/portal_catalog";

/// Configuration pointing at `server` with a small queue
pub fn site_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.remote.remote_url = server.uri();
    config.catalog.catalog_path = CATALOG_PATH.to_string();
    config.fetch.queue_size = 2;
    config
}

/// Serve `paths` (unsorted is fine) from the catalog endpoint
pub async fn mount_catalog(server: &MockServer, paths: &[&str]) {
    Mock::given(method("POST"))
        .and(path(format!("{CATALOG_PATH}/get_catalog_results")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(paths)))
        .mount(server)
        .await;
}

/// Serve a JSON item at `item_path`, expecting `times` requests
pub async fn mount_item(server: &MockServer, item_path: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("{item_path}/get_item")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_path": item_path,
            "title": format!("Title of {item_path}"),
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// Serve an HTML page (not an item) at `item_path`
pub async fn mount_html(server: &MockServer, item_path: &str) {
    Mock::given(method("GET"))
        .and(path(format!("{item_path}/get_item")))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"))
        .expect(1)
        .mount(server)
        .await;
}
