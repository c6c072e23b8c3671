//! Destination paths for downloaded media.
//!
//! Music follows the configurable directory template; podcasts and audiobooks
//! use fixed layouts. Every value taken from catalog metadata is sanitized, so
//! a `/` in a title never creates a directory.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{MediaSource, QualityTier, Track};

/// Characters replaced with `_` in path components
const FORBIDDEN: &[char] = &['<', '>', '@', '%', '!', '+', ':', '"', '/', '\\', '|', '?', '*'];

/// Turns a track into a destination path relative to the output directory
pub trait PathResolver: Send + Sync {
    /// Relative path for `track` delivered at `quality`
    fn resolve(&self, track: &Track, quality: QualityTier) -> Result<PathBuf>;
}

/// [`PathResolver`] driven by a `{{.placeholder}}` directory template
///
/// Supported placeholders: `albumArtist`, `artistName`, `albumTitle`,
/// `releaseYear`, `title`.
#[derive(Clone, Debug)]
pub struct TemplatePathResolver {
    template: String,
}

impl TemplatePathResolver {
    /// Create a resolver, rejecting templates with unknown placeholders
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        // Validate against a blank track so errors surface at startup
        render(&template, &Track::default())?;
        Ok(Self { template })
    }

    /// The directory template
    pub fn template(&self) -> &str {
        &self.template
    }
}

impl PathResolver for TemplatePathResolver {
    fn resolve(&self, track: &Track, quality: QualityTier) -> Result<PathBuf> {
        let title = sanitize(&track.title);
        let path = match track.source {
            MediaSource::Music => {
                let dir = render(&self.template, track)?;
                dir.join(format!(
                    "{:02} - {}.{}",
                    track.position,
                    title,
                    quality.extension()
                ))
            }
            MediaSource::PodcastEpisode => Path::new("Podcasts")
                .join(component(&track.album_title))
                .join(format!("{}.mp3", title)),
            MediaSource::AudiobookChapter => Path::new("Audiobooks")
                .join(component(&format!(
                    "{} - {}",
                    track.album_artist, track.album_title
                )))
                .join(format!("{:03} - {}.mp3", track.position, title)),
        };
        Ok(path)
    }
}

/// Replace characters that are unsafe in file names and collapse whitespace
///
/// # Examples
///
/// ```
/// use zvuk_dl::path::sanitize;
///
/// assert_eq!(sanitize("AC/DC:  Live!"), "AC_DC_ Live_");
/// assert_eq!(sanitize("  plain  "), "plain");
/// ```
#[must_use]
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sanitized, never-empty path component
fn component(value: &str) -> String {
    let clean = sanitize(value);
    if clean.is_empty() {
        "Unknown".to_string()
    } else {
        clean
    }
}

fn placeholder(name: &str, track: &Track) -> Option<String> {
    let value = match name {
        "albumArtist" => component(&track.album_artist),
        "artistName" => component(&track.artist_name),
        "albumTitle" => component(&track.album_title),
        "title" => component(&track.title),
        "releaseYear" => track
            .release_year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        _ => return None,
    };
    Some(value)
}

/// Substitute placeholders and split the result into directory components
fn render(template: &str, track: &Track) -> Result<PathBuf> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| template_error(template, "unclosed {{"))?;
        let name = after[..end].trim().trim_start_matches('.');
        let value = placeholder(name, track)
            .ok_or_else(|| template_error(template, &format!("unknown placeholder {}", name)))?;
        out.push_str(&value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    Ok(out
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect())
}

fn template_error(template: &str, reason: &str) -> Error {
    Error::Config {
        message: format!("invalid path template {:?}: {}", template, reason),
        key: Some("download.path_template".to_string()),
    }
}
