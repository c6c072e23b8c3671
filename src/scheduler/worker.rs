//! Per-track download lifecycle.
//!
//! A track is written to `<temp_dir>/<index>-<id>.part` and renamed into place
//! only after the byte count checks out, so the destination path never holds a
//! partial file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::WorkerContext;
use crate::error::{Error, Result, TrackError};
use crate::path::sanitize;
use crate::retry::retry_counted;
use crate::types::{
    DownloadOutcome, Event, MediaSource, QualityTier, SkipReason, StreamDescriptor, Track,
};

/// Run one track to a terminal outcome
pub(super) async fn process(
    ctx: &WorkerContext,
    index: usize,
    track: &Track,
    cancel: &CancellationToken,
) -> DownloadOutcome {
    ctx.emit(Event::TrackStarted {
        index,
        track_id: track.id.clone(),
    });

    if let Some(path) = existing_destination(ctx, track).await {
        tracing::info!(track_id = %track.id, path = %path.display(), "Already downloaded, skipping");
        ctx.emit(Event::TrackSkipped {
            index,
            track_id: track.id.clone(),
            reason: SkipReason::AlreadyExists,
        });
        return DownloadOutcome::Skipped {
            reason: SkipReason::AlreadyExists,
            path,
        };
    }

    let temp = ctx
        .temp_dir
        .join(format!("{}-{}.part", index, sanitize(track.id.as_str())));
    let attempts = AtomicU32::new(0);

    let result = tokio::select! {
        attempted = retry_counted(&ctx.retry, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            attempt(ctx, track, &temp, cancel)
        }) => attempted.result,
        _ = cancel.cancelled() => Err(Error::Cancelled),
    };

    match result {
        Ok((path, descriptor, bytes)) => {
            tracing::info!(
                track_id = %track.id,
                path = %path.display(),
                quality = %descriptor.quality,
                bytes,
                "Downloaded track"
            );
            ctx.emit(Event::TrackDownloaded {
                index,
                track_id: track.id.clone(),
                path: path.clone(),
                bytes,
            });
            DownloadOutcome::Success {
                path,
                quality: descriptor.quality,
                downgraded: descriptor.downgraded,
                bytes,
            }
        }
        Err(e) => {
            // The temp file may be left behind by a cancelled or failed transfer
            tokio::fs::remove_file(&temp).await.ok();

            let error = TrackError::from_error(&e, attempts.load(Ordering::SeqCst).max(1));
            tracing::error!(
                track_id = %track.id,
                class = %error.class,
                attempts = error.attempts,
                error = %e,
                "Track failed"
            );
            ctx.emit(Event::TrackFailed {
                index,
                track_id: track.id.clone(),
                error: error.clone(),
            });
            DownloadOutcome::Failed(error)
        }
    }
}

/// One locate-transfer-commit attempt
async fn attempt(
    ctx: &WorkerContext,
    track: &Track,
    temp: &Path,
    cancel: &CancellationToken,
) -> Result<(PathBuf, StreamDescriptor, u64)> {
    let mut descriptor = ctx.locator.locate(track, ctx.quality).await?;
    if descriptor.is_expired() {
        tracing::debug!(track_id = %track.id, "Stream expired before transfer, locating again");
        descriptor = ctx.locator.locate(track, ctx.quality).await?;
    }

    let destination = ctx.output_dir.join(ctx.paths.resolve(track, descriptor.quality)?);
    let bytes = transfer(ctx, &descriptor, temp, cancel).await?;
    commit(temp, &destination).await?;
    Ok((destination, descriptor, bytes))
}

/// Stream the media body into `temp`, verifying its length
async fn transfer(
    ctx: &WorkerContext,
    descriptor: &StreamDescriptor,
    temp: &Path,
    cancel: &CancellationToken,
) -> Result<u64> {
    let response = ctx.media.get(&descriptor.url).send().await?;
    let status = response.status().as_u16();
    match status {
        200..=299 => {}
        429 => return Err(Error::RateLimited),
        // Media hosts sign their URLs; a refusal there says nothing about the session
        _ => {
            return Err(Error::Http {
                status,
                endpoint: "media stream".to_string(),
            });
        }
    }
    let expected = response.content_length();

    if let Some(parent) = temp.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| write_error(parent, e))?;
    }
    let mut file = tokio::fs::File::create(temp)
        .await
        .map_err(|e| write_error(temp, e))?;

    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| write_error(temp, e))?;
        received += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| write_error(temp, e))?;
    drop(file);

    match expected {
        Some(expected) if received != expected => {
            Err(Error::IncompleteTransfer { received, expected })
        }
        _ if received == 0 => Err(Error::Unavailable(format!(
            "track {} stream is empty",
            descriptor.track_id
        ))),
        _ => Ok(received),
    }
}

/// Move a verified temp file to its destination
async fn commit(temp: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| write_error(parent, e))?;
    }
    tokio::fs::rename(temp, destination)
        .await
        .map_err(|e| write_error(destination, e))
}

/// First destination that already exists for any tier this track could land in
async fn existing_destination(ctx: &WorkerContext, track: &Track) -> Option<PathBuf> {
    let tiers: Vec<QualityTier> = match track.source {
        MediaSource::Music => std::iter::successors(Some(ctx.quality), QualityTier::lower).collect(),
        MediaSource::PodcastEpisode | MediaSource::AudiobookChapter => {
            vec![QualityTier::CompressedHigh]
        }
    };

    let mut checked: Vec<PathBuf> = Vec::new();
    for tier in tiers {
        let Ok(relative) = ctx.paths.resolve(track, tier) else {
            continue;
        };
        let path = ctx.output_dir.join(relative);
        if checked.contains(&path) {
            continue;
        }
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
        checked.push(path);
    }
    None
}

fn write_error(path: &Path, source: std::io::Error) -> Error {
    Error::Write {
        path: path.to_path_buf(),
        source,
    }
}
