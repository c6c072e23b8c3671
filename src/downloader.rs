//! The top-level downloader: URLs in, files and a [`RunReport`] out.
//!
//! [`ZvukDownloader`] wires the session, response cache, catalog resolver and
//! download scheduler together. All of its pieces can also be used on their own.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::catalog::{CatalogResolver, Resolution};
use crate::config::Config;
use crate::error::Result;
use crate::locator::StreamLocator;
use crate::path::TemplatePathResolver;
use crate::scheduler::DownloadScheduler;
use crate::session::{HttpSession, Session, check_subscription};
use crate::types::{ContentRef, Event, RunReport};

/// Buffered events per subscriber before it starts lagging
const EVENT_BUFFER: usize = 1000;

/// Resolves content URLs and downloads every track they contain
pub struct ZvukDownloader {
    config: Arc<Config>,
    session: Arc<dyn Session>,
    cache: Arc<ResponseCache>,
    resolver: CatalogResolver,
    scheduler: DownloadScheduler,
    event_tx: broadcast::Sender<Event>,
}

impl ZvukDownloader {
    /// Create a downloader authenticated from `config.session`
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, no usable token can be read from
    /// the cookie file, or the cache database cannot be opened.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let session = HttpSession::from_config(&config.session)?;
        Self::with_session(config, Arc::new(session)).await
    }

    /// Create a downloader on top of an existing [`Session`]
    pub async fn with_session(config: Config, session: Arc<dyn Session>) -> Result<Self> {
        config.validate()?;

        let cache = if config.cache.enabled {
            ResponseCache::open(&config.cache.path).await?
        } else {
            ResponseCache::disabled()
        };
        let cache = Arc::new(cache);

        let (event_tx, _rx) = broadcast::channel(EVENT_BUFFER);

        let resolver = CatalogResolver::new(
            Arc::clone(&session),
            Arc::clone(&cache),
            config.resolver.clone(),
            config.retry.clone(),
        )
        .with_events(event_tx.clone());

        let locator = Arc::new(StreamLocator::new(
            Arc::clone(&session),
            config.download.stream_ttl,
        ));
        let paths = Arc::new(TemplatePathResolver::new(
            config.download.path_template.clone(),
        )?);
        let scheduler =
            DownloadScheduler::new(locator, paths, &config.download, config.retry.clone())?
                .with_events(event_tx.clone());

        tracing::info!(
            output_dir = %config.download.output_dir.display(),
            concurrency = config.download.concurrency,
            quality = %config.download.quality,
            cache_enabled = cache.is_enabled(),
            "Downloader initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            session,
            cache,
            resolver,
            scheduler,
            event_tx,
        })
    }

    /// Subscribe to resolution and download events
    ///
    /// Each subscriber receives every event; one that falls more than 1000
    /// events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Verify the credentials; returns whether the subscription is active
    ///
    /// Always asks the service, never the cache.
    pub async fn check_auth(&self) -> Result<bool> {
        let active = check_subscription(self.session.as_ref()).await?;
        if active {
            tracing::info!("Token is valid, subscription active");
        } else {
            tracing::warn!("Token is valid but the subscription is not active");
        }
        Ok(active)
    }

    /// Resolve every URL in input order.
    ///
    /// Unrecognized URLs and containers that fail to resolve become warnings;
    /// only an authentication failure is returned as an error. Firing `cancel`
    /// stops at the container in progress and returns what was gathered.
    pub async fn resolve(&self, urls: &[String], cancel: &CancellationToken) -> Result<Resolution> {
        let mut contents = Vec::with_capacity(urls.len());
        let mut warnings = Vec::new();
        for url in urls {
            match ContentRef::parse(url) {
                Ok(content) => contents.push(content),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Skipping URL");
                    warnings.push(e.to_string());
                }
            }
        }

        let mut resolution = self.resolver.resolve_all(&contents, cancel).await?;
        warnings.append(&mut resolution.warnings);
        resolution.warnings = warnings;
        Ok(resolution)
    }

    /// Resolve `urls` and download every track, stopping early when `cancel` fires
    pub async fn download(&self, urls: &[String], cancel: CancellationToken) -> Result<RunReport> {
        let resolution = self.resolve(urls, &cancel).await?;
        tracing::info!(
            urls = urls.len(),
            tracks = resolution.tracks.len(),
            warnings = resolution.warnings.len(),
            "Resolution complete"
        );

        let mut report = self.scheduler.run(&resolution.tracks, cancel).await;
        report.warnings = resolution.warnings;
        Ok(report)
    }

    /// Release the cache database
    pub async fn shutdown(&self) {
        let stats = self.cache.stats();
        tracing::info!(
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            "Shutting down"
        );
        self.cache.close().await;
    }
}
