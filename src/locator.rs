//! Stream location: turn a resolved track into a short-lived media URL.
//!
//! Stream URLs expire quickly and are often single-use, so nothing here goes
//! through the response cache. Retrying is left to the caller, which retries
//! location and transfer together.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::catalog::api;
use crate::error::{Error, FailureClass, Result};
use crate::session::{ApiRequest, Session};
use crate::types::{MediaSource, QualityTier, StreamDescriptor, Track};

/// Locates media streams for resolved tracks
pub struct StreamLocator {
    session: Arc<dyn Session>,
    stream_ttl: Duration,
}

impl StreamLocator {
    /// Create a locator; located URLs are considered valid for `stream_ttl`
    pub fn new(session: Arc<dyn Session>, stream_ttl: Duration) -> Self {
        Self {
            session,
            stream_ttl,
        }
    }

    /// Locate a stream for `track` at `requested` quality or the closest tier below.
    ///
    /// Returns [`Error::Unavailable`] when no tier can be delivered,
    /// [`Error::AuthExpired`] on 401/403 and [`Error::RateLimited`] on 429.
    pub async fn locate(&self, track: &Track, requested: QualityTier) -> Result<StreamDescriptor> {
        let (url, quality) = match track.source {
            MediaSource::Music => self.locate_music(track, requested).await?,
            // Spoken-word media is only published as mp3
            MediaSource::PodcastEpisode => {
                (self.locate_episode(track).await?, QualityTier::CompressedHigh)
            }
            MediaSource::AudiobookChapter => {
                (self.locate_chapter(track).await?, QualityTier::CompressedHigh)
            }
        };

        let downgraded = track.source == MediaSource::Music && quality < requested;
        if downgraded {
            tracing::warn!(
                track_id = %track.id,
                requested = %requested,
                delivered = %quality,
                "Requested quality unavailable, downgraded"
            );
        }

        let ttl = chrono::Duration::from_std(self.stream_ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        Ok(StreamDescriptor {
            track_id: track.id.clone(),
            url,
            expires_at: Utc::now() + ttl,
            quality,
            downgraded,
        })
    }

    async fn locate_music(&self, track: &Track, requested: QualityTier) -> Result<(String, QualityTier)> {
        // No advertised tiers means the catalog did not say; ask for what was requested
        let mut tier = if track.available_qualities.is_empty() {
            Some(requested)
        } else {
            track.best_available(requested)
        };

        let mut last_reason = format!("no quality at or below {} is offered", requested);
        while let Some(quality) = tier {
            let request = api::stream_request(track.id.as_str(), quality);
            match self.fetch(&request).await {
                Ok(body) => match stream_url(&body, "/result/stream") {
                    Some(url) => return Ok((url, quality)),
                    None => last_reason = format!("no {} stream in response", quality),
                },
                Err(e @ Error::Http { .. }) if e.failure_class() == FailureClass::Unavailable => {
                    last_reason = e.to_string();
                }
                Err(e) => return Err(e),
            }
            tracing::debug!(track_id = %track.id, quality = %quality, reason = %last_reason, "Tier unavailable, trying lower");
            tier = quality.lower();
        }

        Err(Error::Unavailable(format!("track {}: {}", track.id, last_reason)))
    }

    async fn locate_episode(&self, track: &Track) -> Result<String> {
        let id = track.id.as_str();
        let body = self.fetch(&api::episode_request(id)).await?;
        stream_url(&body, &format!("/result/episodes/{}/stream_url", id))
            .ok_or_else(|| Error::Unavailable(format!("episode {} has no stream url", id)))
    }

    async fn locate_chapter(&self, track: &Track) -> Result<String> {
        let id = track.id.as_str();
        let body = self.fetch(&api::chapter_request(id)?).await?;
        api::check_graphql(&body)?;
        stream_url(&body, "/data/chapter/mid")
            .ok_or_else(|| Error::Unavailable(format!("chapter {} has no stream url", id)))
    }

    async fn fetch(&self, request: &ApiRequest) -> Result<Value> {
        self.session
            .authenticated_request(request)
            .await?
            .into_result(&request.endpoint)
    }
}

fn stream_url(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::HttpSession;
    use crate::types::TrackId;
    use serde_json::json;
    use std::collections::BTreeSet;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "0123456789abcdef0123456789abcdef";

    fn locator_for(server: &MockServer) -> StreamLocator {
        let session = HttpSession::new(
            &SessionConfig {
                api_base: server.uri(),
                ..Default::default()
            },
            TOKEN,
        )
        .unwrap();
        StreamLocator::new(Arc::new(session), Duration::from_secs(120))
    }

    fn music_track(qualities: &[QualityTier]) -> Track {
        Track {
            id: TrackId::new("55"),
            title: "Song".into(),
            artist_name: "Band".into(),
            album_artist: "Band".into(),
            album_title: "Album".into(),
            release_year: Some(2020),
            duration_seconds: 200,
            available_qualities: qualities.iter().copied().collect::<BTreeSet<_>>(),
            position: 1,
            source: MediaSource::Music,
        }
    }

    async fn mount_stream(server: &MockServer, quality: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(api::TRACK_STREAM))
            .and(query_param("id", "55"))
            .and(query_param("quality", quality))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_locates_requested_tier() {
        let server = MockServer::start().await;
        mount_stream(
            &server,
            "flac",
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": {"stream": "https://cdn.example/55.flac"}})),
        )
        .await;

        let track = music_track(&[QualityTier::CompressedHigh, QualityTier::Lossless]);
        let descriptor = locator_for(&server)
            .locate(&track, QualityTier::Lossless)
            .await
            .unwrap();

        assert_eq!(descriptor.url, "https://cdn.example/55.flac");
        assert_eq!(descriptor.quality, QualityTier::Lossless);
        assert!(!descriptor.downgraded);
        assert!(!descriptor.is_expired());
    }

    #[tokio::test]
    async fn test_advertised_tiers_limit_the_request() {
        let server = MockServer::start().await;
        mount_stream(
            &server,
            "high",
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": {"stream": "https://cdn.example/55.mp3"}})),
        )
        .await;
        Mock::given(method("GET"))
            .and(query_param("quality", "flac"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let track = music_track(&[QualityTier::CompressedLow, QualityTier::CompressedHigh]);
        let descriptor = locator_for(&server)
            .locate(&track, QualityTier::Lossless)
            .await
            .unwrap();

        assert_eq!(descriptor.quality, QualityTier::CompressedHigh);
        assert!(descriptor.downgraded);
    }

    #[tokio::test]
    async fn test_falls_back_when_tier_refused() {
        let server = MockServer::start().await;
        mount_stream(&server, "flac", ResponseTemplate::new(404)).await;
        mount_stream(
            &server,
            "high",
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": {"stream": "https://cdn.example/55.mp3"}})),
        )
        .await;

        let track = music_track(&[
            QualityTier::CompressedLow,
            QualityTier::CompressedHigh,
            QualityTier::Lossless,
        ]);
        let descriptor = locator_for(&server)
            .locate(&track, QualityTier::Lossless)
            .await
            .unwrap();

        assert_eq!(descriptor.quality, QualityTier::CompressedHigh);
        assert!(descriptor.downgraded);
    }

    #[tokio::test]
    async fn test_no_tier_at_all_is_unavailable() {
        let server = MockServer::start().await;
        for quality in ["flac", "high", "mid"] {
            mount_stream(
                &server,
                quality,
                ResponseTemplate::new(200).set_body_json(json!({"result": {"stream": ""}})),
            )
            .await;
        }

        let err = locator_for(&server)
            .locate(&music_track(&[]), QualityTier::Lossless)
            .await
            .unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::Unavailable);
    }

    #[tokio::test]
    async fn test_auth_and_rate_limit_are_not_downgrades() {
        let server = MockServer::start().await;
        mount_stream(&server, "flac", ResponseTemplate::new(403)).await;
        let err = locator_for(&server)
            .locate(&music_track(&[QualityTier::Lossless]), QualityTier::Lossless)
            .await
            .unwrap_err();
        assert!(err.is_auth_expired());

        let server = MockServer::start().await;
        mount_stream(&server, "flac", ResponseTemplate::new(429)).await;
        let err = locator_for(&server)
            .locate(&music_track(&[QualityTier::Lossless]), QualityTier::Lossless)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited));
    }

    #[tokio::test]
    async fn test_episode_stream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(api::PODCAST_EPISODES))
            .and(query_param("id", "55"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"episodes": {"55": {"stream_url": "https://cdn.example/ep.mp3"}}}
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut track = music_track(&[]);
        track.source = MediaSource::PodcastEpisode;
        let locator = locator_for(&server);

        // Never cached: each call asks again
        for _ in 0..2 {
            let descriptor = locator.locate(&track, QualityTier::Lossless).await.unwrap();
            assert_eq!(descriptor.url, "https://cdn.example/ep.mp3");
            assert_eq!(descriptor.quality, QualityTier::CompressedHigh);
            assert!(!descriptor.downgraded);
        }
    }

    #[tokio::test]
    async fn test_chapter_stream_uses_mid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(api::GRAPHQL))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"chapter": {"id": 55, "title": "One", "mid": "https://cdn.example/ch.mp3"}}
            })))
            .mount(&server)
            .await;

        let mut track = music_track(&[]);
        track.source = MediaSource::AudiobookChapter;
        let descriptor = locator_for(&server)
            .locate(&track, QualityTier::CompressedLow)
            .await
            .unwrap();
        assert_eq!(descriptor.url, "https://cdn.example/ch.mp3");
    }
}
