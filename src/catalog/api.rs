//! Wire types and request builders for the catalog API.
//!
//! Ids arrive as numbers from some endpoints and strings from others, so every id
//! field goes through [`flex_id`]. Payload shapes that do not match are reported as
//! [`Error::Api`] naming the pointer that was missing.

use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::session::ApiRequest;
use crate::types::{MediaSource, QualityTier, Track, TrackId};

pub(crate) const TRACKS: &str = "/api/tiny/tracks";
pub(crate) const RELEASES: &str = "/api/tiny/releases";
pub(crate) const PLAYLISTS: &str = "/api/tiny/playlists";
pub(crate) const SELECTION: &str = "/api/tiny/selection";
pub(crate) const ARTIST_RELEASES: &str = "/api/tiny/artists/releases";
pub(crate) const PODCASTS: &str = "/api/tiny/podcasts";
pub(crate) const PODCAST_EPISODES: &str = "/api/tiny/podcast_episodes";
pub(crate) const TRACK_STREAM: &str = "/api/tiny/track/stream";
pub(crate) const GRAPHQL: &str = "/api/v1/graphql";

const AUDIOBOOK_QUERY: &str = r#"
query getAudioBookData($id: Int!) {
  book: audioBook(id: $id) {
    id
    title
    authorName
    chapters {
      id
      title
    }
  }
}
"#;

const CHAPTER_QUERY: &str = r#"
query getAudioBookChapter($id: Int!) {
  chapter(id: $id) {
    id
    title
    mid
  }
}
"#;

/// Accept an id encoded as either a JSON number or a string
pub(crate) fn flex_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected id, found {}",
            other
        ))),
    }
}

fn flex_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Id(#[serde(deserialize_with = "flex_id")] String);

    let ids: Option<Vec<Id>> = Option::deserialize(deserializer)?;
    Ok(ids.unwrap_or_default().into_iter().map(|Id(s)| s).collect())
}

/// Four-digit year from `20200131`, `"2020-01-31"` or `"2020"`
pub(crate) fn year_from(value: &Value) -> Option<i32> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    text.get(..4)?.parse().ok()
}

/// Track metadata as returned by `tracks?ids=`
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TrackInfo {
    #[serde(deserialize_with = "flex_id")]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) credits: String,
    #[serde(default)]
    pub(crate) release_title: String,
    #[serde(default)]
    pub(crate) release_date: Option<Value>,
    #[serde(default)]
    pub(crate) position: Option<u32>,
    #[serde(default)]
    pub(crate) duration: Option<u32>,
    #[serde(default)]
    pub(crate) has_flac: Option<bool>,
    #[serde(default)]
    pub(crate) highest_quality: Option<String>,
}

impl TrackInfo {
    /// Tiers the service advertises for this track
    pub(crate) fn qualities(&self) -> BTreeSet<QualityTier> {
        let highest = match self.highest_quality.as_deref() {
            Some("flac") => Some(QualityTier::Lossless),
            Some("high") => Some(QualityTier::CompressedHigh),
            Some("mid") => Some(QualityTier::CompressedLow),
            _ => None,
        };
        let highest = match (highest, self.has_flac) {
            (_, Some(true)) => QualityTier::Lossless,
            (Some(tier), _) => tier,
            (None, Some(false)) => QualityTier::CompressedHigh,
            // Nothing advertised: let the stream endpoint decide
            (None, None) => QualityTier::Lossless,
        };

        let mut tiers = BTreeSet::new();
        let mut tier = Some(highest);
        while let Some(t) = tier {
            tiers.insert(t);
            tier = t.lower();
        }
        tiers
    }

    /// Build a standalone track; release context may be applied afterwards
    pub(crate) fn into_track(self) -> Track {
        let available_qualities = self.qualities();
        Track {
            id: TrackId::new(self.id),
            release_year: self.release_date.as_ref().and_then(year_from),
            album_artist: self.credits.clone(),
            artist_name: self.credits,
            album_title: self.release_title,
            title: self.title,
            duration_seconds: self.duration.unwrap_or(0),
            available_qualities,
            position: self.position.unwrap_or(0),
            source: MediaSource::Music,
        }
    }
}

/// Release metadata as returned by `releases?ids=`
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ReleaseInfo {
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) credits: String,
    #[serde(default)]
    pub(crate) date: Option<Value>,
    #[serde(default, deserialize_with = "flex_ids")]
    pub(crate) track_ids: Vec<String>,
}

/// Playlist or selection page: a title and a slice of track ids
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TrackListPage {
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default, deserialize_with = "flex_ids")]
    pub(crate) track_ids: Vec<String>,
}

/// One entry of an artist's release index
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ReleaseRef {
    #[serde(deserialize_with = "flex_id")]
    pub(crate) id: String,
}

/// Podcast metadata as returned by `podcasts?ids=`
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct PodcastInfo {
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) author: String,
    #[serde(default)]
    pub(crate) episodes: Vec<EpisodeRef>,
}

/// Episode reference inside a podcast payload
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct EpisodeRef {
    #[serde(deserialize_with = "flex_id")]
    pub(crate) id: String,
}

/// Episode metadata as returned by `podcast_episodes?id=`
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct EpisodeInfo {
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) author: String,
    #[serde(default)]
    pub(crate) duration: Option<u32>,
    #[serde(default)]
    pub(crate) publication_date: Option<Value>,
    #[serde(default)]
    pub(crate) stream_url: Option<String>,
}

/// Audiobook metadata from the `getAudioBookData` query
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BookInfo {
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) author_name: String,
    #[serde(default)]
    pub(crate) chapters: Vec<ChapterRef>,
}

/// Chapter reference inside an audiobook payload
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ChapterRef {
    #[serde(deserialize_with = "flex_id")]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: String,
}

pub(crate) fn tracks_request(ids: &[String]) -> ApiRequest {
    ApiRequest::get(TRACKS).param("ids", ids.join(","))
}

pub(crate) fn release_request(id: &str) -> ApiRequest {
    ApiRequest::get(RELEASES).param("ids", id)
}

pub(crate) fn playlist_page_request(id: &str, offset: usize, limit: usize) -> ApiRequest {
    ApiRequest::get(PLAYLISTS)
        .param("ids", id)
        .param("offset", offset)
        .param("limit", limit)
}

pub(crate) fn selection_page_request(id: &str, offset: usize, limit: usize) -> ApiRequest {
    ApiRequest::get(SELECTION)
        .param("id", id)
        .param("include", "track")
        .param("offset", offset)
        .param("limit", limit)
}

pub(crate) fn artist_releases_request(id: &str, offset: usize, limit: usize) -> ApiRequest {
    ApiRequest::get(ARTIST_RELEASES)
        .param("artist_id", id)
        .param("offset", offset)
        .param("limit", limit)
}

pub(crate) fn podcast_request(id: &str) -> ApiRequest {
    ApiRequest::get(PODCASTS).param("ids", id)
}

pub(crate) fn episode_request(id: &str) -> ApiRequest {
    ApiRequest::get(PODCAST_EPISODES).param("id", id)
}

pub(crate) fn stream_request(id: &str, quality: QualityTier) -> ApiRequest {
    ApiRequest::get(TRACK_STREAM)
        .param("id", id)
        .param("quality", quality.api_name())
}

fn graphql_id(id: &str) -> Result<i64> {
    id.parse()
        .map_err(|_| Error::Api(format!("GraphQL id must be numeric, got {}", id)))
}

pub(crate) fn audiobook_request(id: &str) -> Result<ApiRequest> {
    Ok(ApiRequest::post_json(
        GRAPHQL,
        json!({
            "operationName": "getAudioBookData",
            "variables": {"id": graphql_id(id)?},
            "query": AUDIOBOOK_QUERY,
        }),
    ))
}

pub(crate) fn chapter_request(id: &str) -> Result<ApiRequest> {
    Ok(ApiRequest::post_json(
        GRAPHQL,
        json!({
            "operationName": "getAudioBookChapter",
            "variables": {"id": graphql_id(id)?},
            "query": CHAPTER_QUERY,
        }),
    ))
}

/// Decode the value at `pointer`, failing with a payload error naming it
pub(crate) fn extract<T: serde::de::DeserializeOwned>(body: &Value, pointer: &str) -> Result<T> {
    let value = body
        .pointer(pointer)
        .ok_or_else(|| Error::Api(format!("missing {} in response", pointer)))?;
    serde_json::from_value(value.clone())
        .map_err(|e| Error::Api(format!("malformed {}: {}", pointer, e)))
}

/// Like [`extract`], but a missing or null value yields `None`
pub(crate) fn extract_opt<T: serde::de::DeserializeOwned>(
    body: &Value,
    pointer: &str,
) -> Result<Option<T>> {
    match body.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| Error::Api(format!("malformed {}: {}", pointer, e))),
    }
}

/// Fail on a GraphQL `errors` array
pub(crate) fn check_graphql(body: &Value) -> Result<()> {
    match body.get("errors") {
        Some(Value::Array(errors)) if !errors.is_empty() => {
            Err(Error::Api(format!("GraphQL errors: {}", Value::Array(errors.clone()))))
        }
        _ => Ok(()),
    }
}

/// Decode the `result.tracks` map of a tracks lookup, skipping unparsable entries
pub(crate) fn track_map(body: &Value) -> Result<HashMap<String, TrackInfo>> {
    let tracks = body
        .pointer("/result/tracks")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Api("missing /result/tracks in response".to_string()))?;

    let mut map = HashMap::with_capacity(tracks.len());
    for (key, value) in tracks {
        match serde_json::from_value::<TrackInfo>(value.clone()) {
            Ok(info) => {
                map.insert(key.clone(), info);
            }
            Err(e) => {
                tracing::warn!(track_id = %key, error = %e, "Skipping malformed track metadata");
            }
        }
    }
    Ok(map)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_from_variants() {
        assert_eq!(year_from(&json!(20200131)), Some(2020));
        assert_eq!(year_from(&json!("1999-05-01")), Some(1999));
        assert_eq!(year_from(&json!("")), None);
        assert_eq!(year_from(&Value::Null), None);
    }

    #[test]
    fn test_track_info_accepts_numeric_and_string_ids() {
        let a: TrackInfo = serde_json::from_value(json!({"id": 12, "title": "x"})).unwrap();
        let b: TrackInfo = serde_json::from_value(json!({"id": "12", "title": "x"})).unwrap();
        assert_eq!(a.id, "12");
        assert_eq!(b.id, "12");
    }

    #[test]
    fn test_qualities_from_flags() {
        let mut info: TrackInfo =
            serde_json::from_value(json!({"id": 1, "highest_quality": "high"})).unwrap();
        assert_eq!(
            info.qualities().into_iter().collect::<Vec<_>>(),
            vec![QualityTier::CompressedLow, QualityTier::CompressedHigh]
        );
        info.has_flac = Some(true);
        assert!(info.qualities().contains(&QualityTier::Lossless));

        let bare: TrackInfo = serde_json::from_value(json!({"id": 1})).unwrap();
        assert_eq!(bare.qualities().len(), 3);
    }

    #[test]
    fn test_release_track_ids_mixed() {
        let info: ReleaseInfo =
            serde_json::from_value(json!({"title": "R", "track_ids": [1, "2", 3]})).unwrap();
        assert_eq!(info.track_ids, vec!["1", "2", "3"]);
        let empty: ReleaseInfo = serde_json::from_value(json!({"track_ids": null})).unwrap();
        assert!(empty.track_ids.is_empty());
    }

    #[test]
    fn test_extract_reports_pointer() {
        let err = extract::<ReleaseInfo>(&json!({"result": {}}), "/result/releases/1").unwrap_err();
        assert!(err.to_string().contains("/result/releases/1"));
    }

    #[test]
    fn test_graphql_errors_detected() {
        assert!(check_graphql(&json!({"errors": [{"message": "nope"}]})).is_err());
        assert!(check_graphql(&json!({"errors": []})).is_ok());
        assert!(check_graphql(&json!({"data": {}})).is_ok());
    }

    #[test]
    fn test_graphql_requests_need_numeric_ids() {
        assert!(audiobook_request("24072774").is_ok());
        assert!(chapter_request("abc").is_err());
    }
}
