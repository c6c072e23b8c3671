//! # zvuk-dl
//!
//! Catalog downloader for a zvuk.com-style streaming service.
//!
//! A content URL (track, release, artist, playlist, selection, podcast or
//! audiobook) is resolved into an ordered list of tracks, each track gets a
//! short-lived stream URL, and a bounded pool of workers writes the media to
//! disk under a configurable path template.
//!
//! ## Pipeline
//!
//! - [`session`] - authenticated API access from a browser cookie
//! - [`cache`] - persistent SQLite cache of catalog responses
//! - [`catalog`] - URL to ordered tracks, one strategy per content kind
//! - [`locator`] - per-track stream URL with quality fallback
//! - [`scheduler`] - bounded-concurrency downloads with retry and cancellation
//!
//! ## Quick Start
//!
//! ```no_run
//! use zvuk_dl::{Config, ZvukDownloader};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = ZvukDownloader::new(Config::default()).await?;
//!
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let urls = vec!["https://zvuk.com/release/29015282".to_string()];
//!     let report = downloader.download(&urls, CancellationToken::new()).await?;
//!     for line in report.summary_lines() {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Persistent response cache
pub mod cache;
/// Catalog resolution
pub mod catalog;
/// Configuration types
pub mod config;
/// Top-level downloader
pub mod downloader;
/// Error types
pub mod error;
/// Stream location
pub mod locator;
/// Destination path naming
pub mod path;
/// Retry logic with linear or exponential backoff
pub mod retry;
/// Download scheduling
pub mod scheduler;
/// Authenticated API session
pub mod session;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use cache::ResponseCache;
pub use catalog::{CatalogResolver, Resolution};
pub use config::Config;
pub use downloader::ZvukDownloader;
pub use error::{Error, FailureClass, Result, TrackError};
pub use locator::StreamLocator;
pub use path::{PathResolver, TemplatePathResolver};
pub use scheduler::DownloadScheduler;
pub use session::{HttpSession, Session};
pub use types::{
    ContentKind, ContentRef, DownloadOutcome, DownloadResult, Event, QualityTier, RunReport,
    StreamDescriptor, Track, TrackId,
};

use tokio_util::sync::CancellationToken;

/// Download `urls` with graceful signal handling.
///
/// A termination signal cancels the run: in-flight transfers are aborted and
/// their partial files removed, and tracks not yet started are reported as not
/// attempted. The cache is closed before returning.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use zvuk_dl::{Config, ZvukDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = ZvukDownloader::new(Config::default()).await?;
///     let urls = vec!["https://zvuk.com/playlist/8110612".to_string()];
///     let report = run_with_shutdown(&downloader, &urls).await?;
///     std::process::exit(report.exit_code());
/// }
/// ```
pub async fn run_with_shutdown(downloader: &ZvukDownloader, urls: &[String]) -> Result<RunReport> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::warn!("Interrupted, cancelling in-flight downloads");
            cancel.cancel();
        })
    };

    let report = downloader.download(urls, cancel).await;
    watcher.abort();
    downloader.shutdown().await;
    report
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
