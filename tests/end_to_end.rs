//! End-to-end tests: URL in, files on disk and a run report out
//!
//! A wiremock server plays both the catalog API and the media host.

mod common;

use common::{mount_media, mount_release, test_config};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zvuk_dl::{DownloadOutcome, Error, Event, ZvukDownloader};

const RELEASE_URL: &str = "https://zvuk.com/release/29015282";

#[tokio::test]
async fn release_downloads_then_rerun_skips_from_cache() {
    let server = MockServer::start().await;
    let root = TempDir::new().unwrap();
    mount_release(&server, 29015282, &[(1, "Intro"), (2, "Outro: Part/2")]).await;
    mount_media(&server, 1, "first").await;
    mount_media(&server, 2, "second").await;
    let urls = vec![RELEASE_URL.to_string()];

    let downloader = ZvukDownloader::new(test_config(&server, root.path()))
        .await
        .unwrap();
    let report = downloader
        .download(&urls, CancellationToken::new())
        .await
        .unwrap();
    downloader.shutdown().await;

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.exit_code(), 0);
    let album = root.path().join("downloads/Artists/The Band/2020 - Night Drive");
    assert_eq!(
        std::fs::read_to_string(album.join("01 - Intro.flac")).unwrap(),
        "first"
    );
    assert_eq!(
        std::fs::read_to_string(album.join("02 - Outro_ Part_2.flac")).unwrap(),
        "second"
    );

    // Second run: catalog answers come from the cache file, files are already there
    let downloader = ZvukDownloader::new(test_config(&server, root.path()))
        .await
        .unwrap();
    let report = downloader
        .download(&urls, CancellationToken::new())
        .await
        .unwrap();
    downloader.shutdown().await;

    assert_eq!(report.skipped(), 2);
    assert_eq!(report.exit_code(), 0);
    server.verify().await;
}

#[tokio::test]
async fn mixed_inputs_keep_order_and_report_bad_urls() {
    let server = MockServer::start().await;
    let root = TempDir::new().unwrap();
    mount_release(&server, 29015282, &[(1, "Intro")]).await;
    mount_media(&server, 1, "music").await;

    Mock::given(method("GET"))
        .and(path("/api/tiny/podcasts"))
        .and(query_param("ids", "77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"podcasts": {"77": {
                "title": "Talk",
                "author": "Host",
                "episodes": [{"id": 501}]
            }}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tiny/podcast_episodes"))
        .and(query_param("id", "501"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"episodes": {"501": {
                "title": "Ep One",
                "stream_url": format!("{}/cdn/501", server.uri())
            }}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/501"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"talking".to_vec()))
        .mount(&server)
        .await;

    let downloader = ZvukDownloader::new(test_config(&server, root.path()))
        .await
        .unwrap();
    let urls = vec![
        RELEASE_URL.to_string(),
        "https://zvuk.com/search?q=nothing".to_string(),
        "zvuk.com/podcast/77".to_string(),
    ];
    let report = downloader
        .download(&urls, CancellationToken::new())
        .await
        .unwrap();

    let titles: Vec<&str> = report
        .results
        .iter()
        .map(|r| r.track.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Intro", "Ep One"]);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.exit_code(), 0, "a skipped URL does not fail the run");

    let DownloadOutcome::Success { path, .. } = &report.results[1].outcome else {
        panic!("expected the episode to download");
    };
    assert_eq!(path, &root.path().join("downloads/Podcasts/Talk/Ep One.mp3"));
}

#[tokio::test]
async fn rejected_credentials_abort_before_downloading() {
    let server = MockServer::start().await;
    let root = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/api/tiny/releases"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let downloader = ZvukDownloader::new(test_config(&server, root.path()))
        .await
        .unwrap();
    let result = downloader
        .download(&[RELEASE_URL.to_string()], CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::AuthExpired { status: 403 })));
    assert!(!root.path().join("downloads").exists());
    server.verify().await;
}

#[tokio::test]
async fn subscribers_see_resolution_and_downloads() {
    let server = MockServer::start().await;
    let root = TempDir::new().unwrap();
    mount_release(&server, 29015282, &[(1, "Intro"), (2, "Outro")]).await;
    mount_media(&server, 1, "a").await;
    mount_media(&server, 2, "b").await;

    let downloader = ZvukDownloader::new(test_config(&server, root.path()))
        .await
        .unwrap();
    let mut events = downloader.subscribe();
    downloader
        .download(&[RELEASE_URL.to_string()], CancellationToken::new())
        .await
        .unwrap();

    let mut resolved = 0;
    let mut downloaded = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Resolved { tracks, .. } => {
                assert_eq!(tracks, 2);
                resolved += 1;
            }
            Event::TrackDownloaded { .. } => downloaded += 1,
            _ => {}
        }
    }
    assert_eq!(resolved, 1);
    assert_eq!(downloaded, 2);
}

#[tokio::test]
async fn check_auth_reports_subscription() {
    let server = MockServer::start().await;
    let root = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/api/v2/tiny/profile"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"is_prime": false}})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let downloader = ZvukDownloader::new(test_config(&server, root.path()))
        .await
        .unwrap();
    // Never served from the cache
    assert!(!downloader.check_auth().await.unwrap());
    assert!(!downloader.check_auth().await.unwrap());
    server.verify().await;
}
