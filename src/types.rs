//! Core types for zvuk-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{Error, FailureClass, TrackError};

/// Identifier of a streamable item (track, podcast episode or audiobook chapter)
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    /// Create a new TrackId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for TrackId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an input URL points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// A single track
    Track,
    /// An album / single / EP
    Release,
    /// Every release of an artist
    Artist,
    /// A user or editorial playlist
    Playlist,
    /// A curated selection
    Selection,
    /// A podcast with its episodes
    Podcast,
    /// An audiobook with its chapters
    Audiobook,
}

impl ContentKind {
    /// All kinds, in URL-matching order
    pub const ALL: [ContentKind; 7] = [
        ContentKind::Track,
        ContentKind::Release,
        ContentKind::Artist,
        ContentKind::Playlist,
        ContentKind::Selection,
        ContentKind::Podcast,
        ContentKind::Audiobook,
    ];

    /// The URL path segment that introduces this kind
    pub fn path_segment(&self) -> &'static str {
        match self {
            ContentKind::Track => "track",
            ContentKind::Release => "release",
            ContentKind::Artist => "artist",
            ContentKind::Playlist => "playlist",
            ContentKind::Selection => "selection",
            ContentKind::Podcast => "podcast",
            ContentKind::Audiobook => "abook",
        }
    }

    /// Look up a kind by its URL path segment
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.path_segment() == segment)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Parsed `(kind, id)` pair identifying what an input URL refers to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    /// Content kind
    pub kind: ContentKind,
    /// Service-side identifier
    pub id: String,
}

impl ContentRef {
    /// Create a new content reference
    pub fn new(kind: ContentKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Parse a content URL such as `https://zvuk.com/release/29015282`.
    ///
    /// The scheme may be omitted. The first path segment naming a known kind
    /// must be followed by a non-empty alphanumeric id; trailing segments and
    /// query strings are ignored.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let trimmed = input.trim();
        let parsed = url::Url::parse(trimmed)
            .or_else(|_| url::Url::parse(&format!("https://{}", trimmed)))
            .map_err(|_| Error::InvalidUrl(input.to_string()))?;

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        for pair in segments.windows(2) {
            if let Some(kind) = ContentKind::from_path_segment(pair[0])
                && pair[1].chars().all(|c| c.is_ascii_alphanumeric())
            {
                return Ok(Self::new(kind, pair[1]));
            }
        }

        Err(Error::InvalidUrl(input.to_string()))
    }
}

impl std::str::FromStr for ContentRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Audio quality tier requested from the stream endpoint
///
/// Ordered from lowest to highest so that `tier.lower()` walks the fallback chain.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// MP3 128 kbit/s
    CompressedLow,
    /// MP3 320 kbit/s
    CompressedHigh,
    /// FLAC
    #[default]
    Lossless,
}

impl QualityTier {
    /// Value of the `quality` query parameter understood by the stream endpoint
    pub fn api_name(&self) -> &'static str {
        match self {
            QualityTier::CompressedLow => "mid",
            QualityTier::CompressedHigh => "high",
            QualityTier::Lossless => "flac",
        }
    }

    /// File extension of media delivered at this tier
    pub fn extension(&self) -> &'static str {
        match self {
            QualityTier::CompressedLow | QualityTier::CompressedHigh => "mp3",
            QualityTier::Lossless => "flac",
        }
    }

    /// The next lower tier, if any
    pub fn lower(&self) -> Option<Self> {
        match self {
            QualityTier::Lossless => Some(QualityTier::CompressedHigh),
            QualityTier::CompressedHigh => Some(QualityTier::CompressedLow),
            QualityTier::CompressedLow => None,
        }
    }

    /// Map the numeric `--format` flag (1=MP3-128, 2=MP3-320, 3=FLAC)
    pub fn from_format_flag(flag: u8) -> Option<Self> {
        match flag {
            1 => Some(QualityTier::CompressedLow),
            2 => Some(QualityTier::CompressedHigh),
            3 => Some(QualityTier::Lossless),
            _ => None,
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QualityTier::CompressedLow => "mp3-128",
            QualityTier::CompressedHigh => "mp3-320",
            QualityTier::Lossless => "flac",
        };
        f.write_str(name)
    }
}

/// Which service endpoint delivers the media for a [`Track`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    /// Music track, located through the quality-aware stream endpoint
    #[default]
    Music,
    /// Podcast episode, carries its own stream URL
    PodcastEpisode,
    /// Audiobook chapter, located through GraphQL
    AudiobookChapter,
}

/// A resolved, downloadable item
///
/// Podcast episodes and audiobook chapters are represented as tracks whose
/// `album_title` is the podcast or book title.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Item identifier
    pub id: TrackId,
    /// Item title
    pub title: String,
    /// Performing artist (credits line)
    pub artist_name: String,
    /// Artist of the parent release, book author or podcast author
    pub album_artist: String,
    /// Title of the parent release, podcast or book
    pub album_title: String,
    /// Release year, when known
    pub release_year: Option<i32>,
    /// Duration in seconds
    pub duration_seconds: u32,
    /// Qualities the service advertises for this item
    pub available_qualities: BTreeSet<QualityTier>,
    /// Track number within its release, or chapter order within a book
    pub position: u32,
    /// How the media stream is located
    pub source: MediaSource,
}

impl Track {
    /// Best advertised tier not above `requested`, if any
    pub fn best_available(&self, requested: QualityTier) -> Option<QualityTier> {
        self.available_qualities
            .range(..=requested)
            .next_back()
            .copied()
    }
}

/// Short-lived authorization to fetch raw media bytes for one track
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Track the stream belongs to
    pub track_id: TrackId,
    /// Direct media URL
    pub url: String,
    /// Instant after which the URL must not be used
    pub expires_at: DateTime<Utc>,
    /// Tier actually delivered
    pub quality: QualityTier,
    /// True when `quality` is lower than the tier that was requested
    pub downgraded: bool,
}

impl StreamDescriptor {
    /// Whether the descriptor is past its validity window
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Why a track was skipped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The destination file already exists
    AlreadyExists,
}

/// Outcome of one track in a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// Written to `path`
    Success {
        /// Final destination path
        path: PathBuf,
        /// Tier delivered
        quality: QualityTier,
        /// True when a lower tier than requested was delivered
        downgraded: bool,
        /// Bytes written
        bytes: u64,
    },
    /// Not fetched
    Skipped {
        /// Skip reason
        reason: SkipReason,
        /// Existing destination path
        path: PathBuf,
    },
    /// Terminal failure
    Failed(TrackError),
    /// Never dispatched because the run was halted first
    NotAttempted,
}

/// Per-track result, attributable to the track's position in the resolved list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Position of the track in the scheduler input
    pub index: usize,
    /// The track
    pub track: Track,
    /// What happened
    pub outcome: DownloadOutcome,
}

impl DownloadResult {
    /// True when a lower tier than requested was delivered
    pub fn downgraded(&self) -> bool {
        matches!(
            self.outcome,
            DownloadOutcome::Success {
                downgraded: true,
                ..
            }
        )
    }

    /// The failure, if this track failed
    pub fn failure(&self) -> Option<&TrackError> {
        match &self.outcome {
            DownloadOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Aggregate outcome of one invocation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// One result per input track, in input order
    pub results: Vec<DownloadResult>,
    /// Non-fatal resolution warnings (partial containers, skipped URLs)
    pub warnings: Vec<String>,
    /// Set when the run was halted before all work was dispatched
    pub aborted: Option<FailureClass>,
    /// Highest number of transfers observed in flight at once
    pub peak_in_flight: usize,
}

impl RunReport {
    /// Number of tracks written
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Success { .. }))
    }

    /// Number of tracks skipped
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Skipped { .. }))
    }

    /// Number of tracks that failed
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Failed(_)))
    }

    /// Number of tracks never dispatched
    pub fn not_attempted(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::NotAttempted))
    }

    /// Number of tracks delivered below the requested tier
    pub fn downgraded(&self) -> usize {
        self.results.iter().filter(|r| r.downgraded()).count()
    }

    /// Failed results, in input order
    pub fn failures(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results.iter().filter(|r| r.failure().is_some())
    }

    /// Whether resolution produced no tracks at all while reporting problems
    pub fn resolution_failed(&self) -> bool {
        self.results.is_empty() && !self.warnings.is_empty()
    }

    /// Process exit code: non-zero on any failure, an aborted run or a
    /// resolution that yielded nothing. Warnings alone do not fail a run that
    /// still produced tracks.
    pub fn exit_code(&self) -> i32 {
        if self.failed() > 0 || self.aborted.is_some() || self.resolution_failed() {
            1
        } else {
            0
        }
    }

    /// User-facing summary: a counts line followed by one line per failure
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} succeeded, {} skipped, {} failed, {} not attempted",
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.not_attempted()
        )];
        if let Some(class) = self.aborted {
            lines.push(format!("run aborted: {}", class));
        }
        for warning in &self.warnings {
            lines.push(format!("WARNING {}", warning));
        }
        for result in self.failures() {
            if let Some(err) = result.failure() {
                lines.push(format!(
                    "FAILED #{} {} - {} [{}]: {}",
                    result.index + 1,
                    result.track.artist_name,
                    result.track.title,
                    err.class,
                    err.message
                ));
            }
        }
        lines
    }

    fn count(&self, pred: impl Fn(&DownloadOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Events emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A container resolved (possibly partially)
    Resolved {
        /// The container
        content: ContentRef,
        /// Number of tracks gathered
        tracks: usize,
    },
    /// Resolution produced a non-fatal warning
    ResolutionWarning {
        /// Warning text
        message: String,
    },
    /// A worker picked up a track
    TrackStarted {
        /// Input position
        index: usize,
        /// Track id
        track_id: TrackId,
    },
    /// A track was written
    TrackDownloaded {
        /// Input position
        index: usize,
        /// Track id
        track_id: TrackId,
        /// Final path
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },
    /// A track was skipped
    TrackSkipped {
        /// Input position
        index: usize,
        /// Track id
        track_id: TrackId,
        /// Reason
        reason: SkipReason,
    },
    /// A track failed terminally
    TrackFailed {
        /// Input position
        index: usize,
        /// Track id
        track_id: TrackId,
        /// Failure
        error: TrackError,
    },
    /// Dispatch was halted
    RunAborted {
        /// Why
        class: FailureClass,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn track(qualities: &[QualityTier]) -> Track {
        Track {
            id: TrackId::from("1"),
            title: "Song".into(),
            artist_name: "Artist".into(),
            album_artist: "Artist".into(),
            album_title: "Album".into(),
            release_year: Some(2020),
            duration_seconds: 180,
            available_qualities: qualities.iter().copied().collect(),
            position: 1,
            source: MediaSource::Music,
        }
    }

    #[test]
    fn test_parse_all_url_forms() {
        let cases = [
            ("https://zvuk.com/track/12776890", ContentKind::Track, "12776890"),
            ("https://zvuk.com/release/29015282", ContentKind::Release, "29015282"),
            ("https://zvuk.com/artist/852542", ContentKind::Artist, "852542"),
            ("https://zvuk.com/playlist/8545187", ContentKind::Playlist, "8545187"),
            ("https://zvuk.com/selection/1", ContentKind::Selection, "1"),
            ("https://zvuk.com/podcast/14574115", ContentKind::Podcast, "14574115"),
            ("https://zvuk.com/abook/24072774", ContentKind::Audiobook, "24072774"),
        ];
        for (url, kind, id) in cases {
            let parsed = ContentRef::parse(url).unwrap();
            assert_eq!(parsed, ContentRef::new(kind, id), "{url}");
        }
    }

    #[test]
    fn test_parse_tolerates_missing_scheme_and_suffixes() {
        let parsed: ContentRef = "zvuk.com/release/42/?utm=x".parse().unwrap();
        assert_eq!(parsed, ContentRef::new(ContentKind::Release, "42"));

        let parsed = ContentRef::parse("https://zvuk.com/en/playlist/7#top").unwrap();
        assert_eq!(parsed, ContentRef::new(ContentKind::Playlist, "7"));
    }

    #[test]
    fn test_parse_rejects_unknown_forms() {
        assert!(ContentRef::parse("https://zvuk.com/profile/1").is_err());
        assert!(ContentRef::parse("https://zvuk.com/track/").is_err());
        assert!(ContentRef::parse("").is_err());
    }

    #[test]
    fn test_quality_fallback_chain() {
        assert_eq!(QualityTier::default(), QualityTier::Lossless);
        assert_eq!(
            QualityTier::Lossless.lower(),
            Some(QualityTier::CompressedHigh)
        );
        assert_eq!(QualityTier::CompressedLow.lower(), None);
        assert_eq!(QualityTier::from_format_flag(2), Some(QualityTier::CompressedHigh));
        assert_eq!(QualityTier::from_format_flag(4), None);
    }

    #[test]
    fn test_best_available_picks_closest_lower_tier() {
        let t = track(&[QualityTier::CompressedLow, QualityTier::CompressedHigh]);
        assert_eq!(
            t.best_available(QualityTier::Lossless),
            Some(QualityTier::CompressedHigh)
        );
        assert_eq!(
            t.best_available(QualityTier::CompressedLow),
            Some(QualityTier::CompressedLow)
        );
        assert_eq!(track(&[]).best_available(QualityTier::Lossless), None);
    }

    #[test]
    fn test_report_counts_and_exit_code() {
        let t = track(&[QualityTier::Lossless]);
        let mut report = RunReport {
            results: vec![
                DownloadResult {
                    index: 0,
                    track: t.clone(),
                    outcome: DownloadOutcome::Skipped {
                        reason: SkipReason::AlreadyExists,
                        path: "a.flac".into(),
                    },
                },
                DownloadResult {
                    index: 1,
                    track: t.clone(),
                    outcome: DownloadOutcome::Success {
                        path: "b.mp3".into(),
                        quality: QualityTier::CompressedHigh,
                        downgraded: true,
                        bytes: 3,
                    },
                },
            ],
            ..Default::default()
        };
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.downgraded(), 1);
        assert_eq!(report.exit_code(), 0, "skips do not fail the run");

        report.results.push(DownloadResult {
            index: 2,
            track: t,
            outcome: DownloadOutcome::Failed(TrackError {
                class: FailureClass::Unavailable,
                message: "gone".into(),
                attempts: 1,
            }),
        });
        assert_eq!(report.exit_code(), 1);
        let lines = report.summary_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("unavailable"));
        assert!(lines[1].starts_with("FAILED #3"));
    }

    #[test]
    fn test_partial_resolution_does_not_fail_the_run() {
        let report = RunReport {
            results: vec![DownloadResult {
                index: 0,
                track: track(&[QualityTier::Lossless]),
                outcome: DownloadOutcome::Success {
                    path: "a.flac".into(),
                    quality: QualityTier::Lossless,
                    downgraded: false,
                    bytes: 1,
                },
            }],
            warnings: vec!["track 4 has no metadata, skipped".into()],
            ..Default::default()
        };
        assert!(!report.resolution_failed());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            report.summary_lines()[1],
            "WARNING track 4 has no metadata, skipped"
        );
    }

    #[test]
    fn test_empty_resolution_fails_the_run() {
        let report = RunReport {
            warnings: vec!["release 9 skipped: gone".into()],
            ..Default::default()
        };
        assert!(report.resolution_failed());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.summary_lines()[1], "WARNING release 9 skipped: gone");

        assert_eq!(RunReport::default().exit_code(), 0, "nothing requested, nothing failed");
    }
}
