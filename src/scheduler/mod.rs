//! Bounded-concurrency download scheduler.
//!
//! Split into focused submodules:
//! - [`worker`] - per-track lifecycle: skip check, locate, transfer, commit
//!
//! Tracks are dispatched in input order, at most `concurrency` at a time. Each
//! result lands in the slot of its input index, so the report lines up with the
//! resolved list no matter which transfer finishes first.
//!
//! Two tokens govern a run. The caller's token is the user interrupt: it aborts
//! in-flight transfers. A child token halts dispatch when credentials expire;
//! transfers already running are allowed to finish.

mod worker;


use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{FailureClass, Result, TrackError};
use crate::locator::StreamLocator;
use crate::path::PathResolver;
use crate::types::{DownloadOutcome, DownloadResult, Event, QualityTier, RunReport, Track};

/// Connect timeout for media hosts; transfers themselves are unbounded
const MEDIA_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every worker
pub(crate) struct WorkerContext {
    pub(crate) locator: Arc<StreamLocator>,
    pub(crate) paths: Arc<dyn PathResolver>,
    pub(crate) media: reqwest::Client,
    pub(crate) output_dir: PathBuf,
    pub(crate) temp_dir: PathBuf,
    pub(crate) quality: QualityTier,
    pub(crate) retry: RetryConfig,
    pub(crate) event_tx: Option<broadcast::Sender<Event>>,
}

impl WorkerContext {
    pub(crate) fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }
}

/// Runs per-track downloads with a bounded worker pool
pub struct DownloadScheduler {
    ctx: Arc<WorkerContext>,
    concurrency: usize,
}

impl DownloadScheduler {
    /// Create a scheduler writing under `download.output_dir`
    pub fn new(
        locator: Arc<StreamLocator>,
        paths: Arc<dyn PathResolver>,
        download: &DownloadConfig,
        retry: RetryConfig,
    ) -> Result<Self> {
        let media = reqwest::Client::builder()
            .connect_timeout(MEDIA_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            ctx: Arc::new(WorkerContext {
                locator,
                paths,
                media,
                output_dir: download.output_dir.clone(),
                temp_dir: download.temp_dir(),
                quality: download.quality,
                retry,
                event_tx: None,
            }),
            concurrency: download.concurrency.max(1),
        })
    }

    /// Publish per-track events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
            ctx.event_tx = Some(tx);
        }
        self
    }

    /// Maximum transfers in flight
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Download `tracks`, returning exactly one result per input position.
    ///
    /// Cancelling `cancel` aborts in-flight transfers (their partial files are
    /// removed) and leaves undispatched tracks as [`DownloadOutcome::NotAttempted`].
    pub async fn run(&self, tracks: &[Track], cancel: CancellationToken) -> RunReport {
        let halt = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut join_set = JoinSet::new();
        let mut dispatched = 0;

        tracing::info!(
            tracks = tracks.len(),
            concurrency = self.concurrency,
            quality = %self.ctx.quality,
            "Starting downloads"
        );

        for (index, track) in tracks.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            // Halt may have fired while the permit was being granted
            if halt.is_cancelled() {
                break;
            }

            let ctx = Arc::clone(&self.ctx);
            let track = track.clone();
            let cancel = cancel.clone();
            let halt = halt.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);

            join_set.spawn(async move {
                let _permit = permit;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let outcome = worker::process(&ctx, index, &track, &cancel).await;

                in_flight.fetch_sub(1, Ordering::SeqCst);
                if let DownloadOutcome::Failed(e) = &outcome
                    && e.class == FailureClass::AuthExpired
                {
                    tracing::error!(track_id = %track.id, "Credentials rejected, halting dispatch");
                    halt.cancel();
                }
                (index, outcome)
            });
            dispatched += 1;
        }

        let mut slots: Vec<Option<DownloadOutcome>> = vec![None; tracks.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "Download worker panicked"),
            }
        }

        let results: Vec<DownloadResult> = tracks
            .iter()
            .zip(slots)
            .enumerate()
            .map(|(index, (track, slot))| {
                let outcome = slot.unwrap_or_else(|| {
                    if index < dispatched {
                        DownloadOutcome::Failed(TrackError {
                            class: FailureClass::Unavailable,
                            message: "download worker panicked".to_string(),
                            attempts: 1,
                        })
                    } else {
                        DownloadOutcome::NotAttempted
                    }
                });
                DownloadResult {
                    index,
                    track: track.clone(),
                    outcome,
                }
            })
            .collect();

        let aborted = if cancel.is_cancelled() {
            Some(FailureClass::Cancelled)
        } else if halt.is_cancelled() {
            Some(FailureClass::AuthExpired)
        } else {
            None
        };
        if let Some(class) = aborted {
            tracing::warn!(
                class = %class,
                not_attempted = tracks.len() - dispatched,
                "Run halted before all tracks were dispatched"
            );
            self.ctx.emit(Event::RunAborted { class });
        }

        let report = RunReport {
            results,
            warnings: Vec::new(),
            aborted,
            peak_in_flight: peak.load(Ordering::SeqCst),
        };
        tracing::info!(
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            not_attempted = report.not_attempted(),
            downgraded = report.downgraded(),
            "Downloads finished"
        );
        report
    }
}
