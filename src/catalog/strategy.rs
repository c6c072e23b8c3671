//! Per-kind resolution.
//!
//! Each [`ContentKind`] has one stateless strategy; [`strategy_for`] picks it.
//! Strategies only read through [`CatalogResolver`], so every request they make
//! is cached and retried the same way.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use super::api::{self, BookInfo, EpisodeInfo, PodcastInfo, ReleaseInfo, ReleaseRef, TrackListPage};
use super::pagination::collect_pages;
use super::{CatalogResolver, Resolution};
use crate::error::{Error, Result};
use crate::types::{ContentKind, MediaSource, Track, TrackId};

/// Episode metadata lookups running at once for one podcast
const EPISODE_LOOKUP_CONCURRENCY: usize = 4;

/// Expands one container id into its ordered tracks
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    /// Resolve container `id`, returning tracks in server-declared order
    async fn resolve(&self, resolver: &CatalogResolver, id: &str) -> Result<Resolution>;
}

/// Strategy for a content kind
pub fn strategy_for(kind: ContentKind) -> &'static dyn ResolveStrategy {
    match kind {
        ContentKind::Track => &TrackStrategy,
        ContentKind::Release => &ReleaseStrategy,
        ContentKind::Artist => &ArtistStrategy,
        ContentKind::Playlist => &PlaylistStrategy,
        ContentKind::Selection => &SelectionStrategy,
        ContentKind::Podcast => &PodcastStrategy,
        ContentKind::Audiobook => &AudiobookStrategy,
    }
}

struct TrackStrategy;

#[async_trait]
impl ResolveStrategy for TrackStrategy {
    async fn resolve(&self, resolver: &CatalogResolver, id: &str) -> Result<Resolution> {
        let resolution = resolver.lookup_tracks(&[id.to_string()]).await?;
        if resolution.tracks.is_empty() {
            return Err(Error::Api(format!("track {} not found", id)));
        }
        Ok(resolution)
    }
}

struct ReleaseStrategy;

#[async_trait]
impl ResolveStrategy for ReleaseStrategy {
    async fn resolve(&self, resolver: &CatalogResolver, id: &str) -> Result<Resolution> {
        let body = resolver.fetch_json(&api::release_request(id)).await?;
        let release: ReleaseInfo = api::extract(&body, &format!("/result/releases/{}", id))?;

        let mut resolution = resolver.lookup_tracks(&release.track_ids).await?;
        let year = release.date.as_ref().and_then(api::year_from);
        for (index, track) in resolution.tracks.iter_mut().enumerate() {
            track.album_title = release.title.clone();
            if !release.credits.is_empty() {
                track.album_artist = release.credits.clone();
            }
            if year.is_some() {
                track.release_year = year;
            }
            if track.position == 0 {
                track.position = index as u32 + 1;
            }
        }
        Ok(resolution)
    }
}

struct ArtistStrategy;

impl ArtistStrategy {
    /// Release ids appear either directly under `result` or in `result.releases`
    fn release_ids(body: &Value) -> Result<Vec<String>> {
        let pointer = if body.pointer("/result").is_some_and(Value::is_array) {
            "/result"
        } else {
            "/result/releases"
        };
        let refs: Option<Vec<ReleaseRef>> = api::extract_opt(body, pointer)?;
        Ok(refs.unwrap_or_default().into_iter().map(|r| r.id).collect())
    }
}

#[async_trait]
impl ResolveStrategy for ArtistStrategy {
    async fn resolve(&self, resolver: &CatalogResolver, id: &str) -> Result<Resolution> {
        let paged = collect_pages(resolver.page_size(), |offset, limit| async move {
            let body = resolver
                .fetch_json(&api::artist_releases_request(id, offset, limit))
                .await?;
            Self::release_ids(&body)
        })
        .await?;

        let mut resolution = Resolution::default();
        if let Some(e) = paged.interrupted {
            resolution
                .warnings
                .push(format!("artist {} release list incomplete: {}", id, e));
        }

        tracing::debug!(artist_id = %id, releases = paged.items.len(), "Artist releases listed");
        for release_id in &paged.items {
            match ReleaseStrategy.resolve(resolver, release_id).await {
                Ok(release) => resolution.extend(release),
                Err(e) if e.is_auth_expired() => return Err(e),
                Err(e) => {
                    tracing::warn!(release_id = %release_id, error = %e, "Skipping release");
                    resolution
                        .warnings
                        .push(format!("release {} skipped: {}", release_id, e));
                }
            }
        }
        Ok(resolution)
    }
}

/// Walk a paged track-id list, then look the ids up in order
async fn resolve_track_list<F>(
    resolver: &CatalogResolver,
    label: &str,
    id: &str,
    pointer: &str,
    page_request: F,
) -> Result<Resolution>
where
    F: Fn(&str, usize, usize) -> crate::session::ApiRequest + Sync,
{
    let page_request = &page_request;
    let paged = collect_pages(resolver.page_size(), |offset, limit| async move {
        let body = resolver.fetch_json(&page_request(id, offset, limit)).await?;
        let page: TrackListPage = api::extract(&body, pointer)?;
        if offset == 0 {
            tracing::info!(kind = label, id = %id, title = %page.title, "Listing tracks");
        }
        Ok(page.track_ids)
    })
    .await?;

    let mut resolution = resolver.lookup_tracks(&paged.items).await?;
    if let Some(e) = paged.interrupted {
        resolution.warnings.insert(
            0,
            format!(
                "{} {} truncated after {} tracks: {}",
                label,
                id,
                paged.items.len(),
                e
            ),
        );
    }
    Ok(resolution)
}

struct PlaylistStrategy;

#[async_trait]
impl ResolveStrategy for PlaylistStrategy {
    async fn resolve(&self, resolver: &CatalogResolver, id: &str) -> Result<Resolution> {
        let pointer = format!("/result/playlists/{}", id);
        resolve_track_list(resolver, "playlist", id, &pointer, api::playlist_page_request).await
    }
}

struct SelectionStrategy;

#[async_trait]
impl ResolveStrategy for SelectionStrategy {
    async fn resolve(&self, resolver: &CatalogResolver, id: &str) -> Result<Resolution> {
        resolve_track_list(
            resolver,
            "selection",
            id,
            "/result/selection",
            api::selection_page_request,
        )
        .await
    }
}

struct PodcastStrategy;

#[async_trait]
impl ResolveStrategy for PodcastStrategy {
    async fn resolve(&self, resolver: &CatalogResolver, id: &str) -> Result<Resolution> {
        let body = resolver.fetch_json(&api::podcast_request(id)).await?;
        let podcast: PodcastInfo = api::extract(&body, &format!("/result/podcasts/{}", id))?;
        tracing::info!(podcast_id = %id, title = %podcast.title, episodes = podcast.episodes.len(), "Listing episodes");

        // `buffered` yields in input order regardless of completion order
        let lookups: Vec<_> = podcast
            .episodes
            .iter()
            .map(|episode| lookup_episode(resolver, episode.id.clone()))
            .collect();
        let lookups: Vec<(String, Result<EpisodeInfo>)> = stream::iter(lookups)
            .buffered(EPISODE_LOOKUP_CONCURRENCY)
            .collect()
            .await;

        let mut resolution = Resolution::default();
        for (episode_id, result) in lookups {
            match result {
                Ok(info) => {
                    let position = resolution.tracks.len() as u32 + 1;
                    resolution.tracks.push(Track {
                        id: TrackId::new(episode_id),
                        title: info.title,
                        artist_name: if info.author.is_empty() {
                            podcast.author.clone()
                        } else {
                            info.author
                        },
                        album_artist: podcast.author.clone(),
                        album_title: podcast.title.clone(),
                        release_year: info.publication_date.as_ref().and_then(api::year_from),
                        duration_seconds: info.duration.unwrap_or(0),
                        available_qualities: Default::default(),
                        position,
                        source: MediaSource::PodcastEpisode,
                    });
                }
                Err(e) if e.is_auth_expired() => return Err(e),
                Err(e) => resolution
                    .warnings
                    .push(format!("episode {} skipped: {}", episode_id, e)),
            }
        }
        Ok(resolution)
    }
}

async fn lookup_episode(resolver: &CatalogResolver, id: String) -> (String, Result<EpisodeInfo>) {
    let result = match resolver.fetch_json(&api::episode_request(&id)).await {
        Ok(body) => api::extract(&body, &format!("/result/episodes/{}", id)),
        Err(e) => Err(e),
    };
    (id, result)
}

struct AudiobookStrategy;

#[async_trait]
impl ResolveStrategy for AudiobookStrategy {
    async fn resolve(&self, resolver: &CatalogResolver, id: &str) -> Result<Resolution> {
        let body = resolver.fetch_json(&api::audiobook_request(id)?).await?;
        api::check_graphql(&body)?;
        let book: BookInfo = api::extract(&body, "/data/book")?;
        tracing::info!(audiobook_id = %id, title = %book.title, chapters = book.chapters.len(), "Listing chapters");

        let tracks = book
            .chapters
            .into_iter()
            .enumerate()
            .map(|(index, chapter)| Track {
                id: TrackId::new(chapter.id),
                title: chapter.title,
                artist_name: book.author_name.clone(),
                album_artist: book.author_name.clone(),
                album_title: book.title.clone(),
                release_year: None,
                duration_seconds: 0,
                available_qualities: Default::default(),
                position: index as u32 + 1,
                source: MediaSource::AudiobookChapter,
            })
            .collect();

        Ok(Resolution {
            tracks,
            warnings: Vec::new(),
        })
    }
}
