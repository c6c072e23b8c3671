//! Catalog resolution: one content URL in, an ordered list of tracks out.
//!
//! Split into focused submodules:
//! - [`api`] - wire types, endpoints and request builders
//! - [`pagination`] - offset/limit page walking with partial results
//! - [`strategy`] - one [`ResolveStrategy`] per [`crate::types::ContentKind`]
//!
//! Track order is always the order the service declares; the resolver never
//! sorts or deduplicates. All metadata reads go through the [`ResponseCache`].

pub(crate) mod api;
mod pagination;
mod strategy;


pub use strategy::{ResolveStrategy, strategy_for};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::config::{ResolverConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::session::{ApiRequest, Session, request_with_retry};
use crate::types::{ContentRef, Event, Track};

/// Tracks gathered for one or more containers, plus non-fatal warnings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Tracks in server-declared order, duplicates preserved
    pub tracks: Vec<Track>,
    /// Warnings about items or pages that could not be resolved
    pub warnings: Vec<String>,
}

impl Resolution {
    /// Append another resolution, keeping order
    pub fn extend(&mut self, other: Resolution) {
        self.tracks.extend(other.tracks);
        self.warnings.extend(other.warnings);
    }

    /// True when the result is incomplete
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Turns [`ContentRef`]s into ordered track lists
pub struct CatalogResolver {
    session: Arc<dyn Session>,
    cache: Arc<ResponseCache>,
    config: ResolverConfig,
    retry: RetryConfig,
    bypass_cache: bool,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl CatalogResolver {
    /// Create a resolver reading through `cache`
    pub fn new(
        session: Arc<dyn Session>,
        cache: Arc<ResponseCache>,
        config: ResolverConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            session,
            cache,
            config,
            retry,
            bypass_cache: false,
            event_tx: None,
        }
    }

    /// Ignore stored entries and overwrite them with fresh responses
    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// Publish resolution events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Resolver settings
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one container into its tracks.
    ///
    /// Fails with [`Error::AuthExpired`] when credentials are rejected, and with
    /// [`Error::Resolution`] when nothing could be gathered. Partial results are
    /// returned as `Ok` with warnings.
    pub async fn resolve(&self, content: &ContentRef) -> Result<Resolution> {
        tracing::info!(content = %content, "Resolving content");

        let resolution = strategy_for(content.kind)
            .resolve(self, &content.id)
            .await
            .map_err(|e| match e {
                Error::AuthExpired { .. } | Error::Resolution { .. } => e,
                other => Error::Resolution {
                    content: content.clone(),
                    reason: other.to_string(),
                },
            })?;

        for warning in &resolution.warnings {
            tracing::warn!(content = %content, warning = %warning, "Partial resolution");
            self.emit(Event::ResolutionWarning {
                message: warning.clone(),
            });
        }
        tracing::info!(
            content = %content,
            tracks = resolution.tracks.len(),
            warnings = resolution.warnings.len(),
            "Resolved content"
        );
        self.emit(Event::Resolved {
            content: content.clone(),
            tracks: resolution.tracks.len(),
        });

        Ok(resolution)
    }

    /// Resolve several containers in input order.
    ///
    /// A container that fails to resolve becomes a warning; only an
    /// authentication failure aborts the whole call. When `cancel` fires the
    /// container in progress is abandoned, and the tracks gathered so far are
    /// returned with a warning naming the containers left unresolved.
    pub async fn resolve_all(
        &self,
        contents: &[ContentRef],
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let mut combined = Resolution::default();
        for (done, content) in contents.iter().enumerate() {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.resolve(content) => Some(outcome),
            };
            match outcome {
                Some(Ok(resolution)) => combined.extend(resolution),
                Some(Err(e)) if e.is_auth_expired() => return Err(e),
                Some(Err(e)) => {
                    tracing::error!(content = %content, error = %e, "Resolution failed");
                    combined.warnings.push(e.to_string());
                }
                None => {
                    let remaining = contents.len() - done;
                    tracing::warn!(content = %content, remaining, "Resolution interrupted");
                    combined.warnings.push(format!(
                        "resolution interrupted at {}, {} of {} inputs unresolved",
                        content,
                        remaining,
                        contents.len()
                    ));
                    break;
                }
            }
        }
        Ok(combined)
    }

    /// Read a catalog payload through the cache; non-2xx statuses become errors
    pub(crate) async fn fetch_json(&self, request: &ApiRequest) -> Result<Value> {
        let fetch = || request_with_retry(self.session.as_ref(), request, &self.retry);
        let response = if self.bypass_cache {
            self.cache.refresh(request, fetch).await?
        } else {
            self.cache.get_or_fetch(request, fetch).await?
        };
        response.into_result(&request.endpoint)
    }

    /// Look up metadata for `ids` in batches and return tracks in the same order.
    ///
    /// Ids are fetched once each but every occurrence in `ids` yields a track.
    /// Ids without metadata are reported as warnings.
    pub(crate) async fn lookup_tracks(&self, ids: &[String]) -> Result<Resolution> {
        let mut unique: Vec<String> = Vec::new();
        for id in ids {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }

        let mut resolution = Resolution::default();
        let mut found: HashMap<String, api::TrackInfo> = HashMap::with_capacity(unique.len());

        for chunk in unique.chunks(self.config.track_batch_size.max(1)) {
            match self.fetch_json(&api::tracks_request(chunk)).await {
                Ok(body) => found.extend(api::track_map(&body)?),
                Err(e) if e.is_auth_expired() => return Err(e),
                Err(e) => resolution
                    .warnings
                    .push(format!("track metadata lookup failed for {}: {}", chunk.join(","), e)),
            }
        }

        for id in ids {
            match found.get(id) {
                Some(info) => resolution.tracks.push(info.clone().into_track()),
                None => resolution
                    .warnings
                    .push(format!("track {} has no metadata, skipped", id)),
            }
        }

        Ok(resolution)
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }

    pub(crate) fn page_size(&self) -> usize {
        self.config.page_size
    }
}
