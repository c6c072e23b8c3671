//! Common test utilities for zvuk-dl end-to-end tests

use serde_json::json;
use std::path::Path;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zvuk_dl::Config;

pub const TOKEN: &str = "0123456789abcdef0123456789abcdef";

/// Configuration pointing every endpoint at `server` and every file under `root`
pub fn test_config(server: &MockServer, root: &Path) -> Config {
    let mut config = Config::default();
    config.session.api_base = server.uri();
    config.session.token = Some(TOKEN.to_string());
    config.cache.path = root.join("api_cache.db");
    config.download.output_dir = root.join("downloads");
    config.download.concurrency = 2;
    config.retry.initial_delay = std::time::Duration::from_millis(10);
    config
}

/// Mount a release with `tracks` as `(id, title)` in declared order
pub async fn mount_release(server: &MockServer, release_id: u64, tracks: &[(u64, &str)]) {
    let ids: Vec<u64> = tracks.iter().map(|(id, _)| *id).collect();
    Mock::given(method("GET"))
        .and(path("/api/tiny/releases"))
        .and(query_param("ids", release_id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"releases": {release_id.to_string(): {
                "title": "Night Drive",
                "credits": "The Band",
                "date": 20200131,
                "track_ids": ids
            }}}
        })))
        .expect(1)
        .mount(server)
        .await;

    let map: serde_json::Map<String, serde_json::Value> = tracks
        .iter()
        .enumerate()
        .map(|(index, (id, title))| {
            (
                id.to_string(),
                json!({
                    "id": id,
                    "title": title,
                    "credits": "The Band",
                    "release_title": "Night Drive",
                    "release_date": "2020-01-31",
                    "position": index + 1,
                    "has_flac": true
                }),
            )
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/tiny/tracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"tracks": map}})))
        .expect(1)
        .mount(server)
        .await;
}

/// Mount a stream endpoint and media body for one item
pub async fn mount_media(server: &MockServer, id: u64, body: &str) {
    Mock::given(method("GET"))
        .and(path("/api/tiny/track/stream"))
        .and(query_param("id", id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"stream": format!("{}/cdn/{}", server.uri(), id)}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/cdn/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.as_bytes().to_vec()))
        .mount(server)
        .await;
}
