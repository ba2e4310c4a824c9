//! Video metadata as reported by yt-dlp and as exposed to API clients.
//!
//! [`ExtractionResult`] mirrors the subset of `yt-dlp --dump-single-json` we
//! care about. Every field is optional because different videos (and
//! different extractor versions) omit different keys. [`MetadataView`] is the
//! stable shape the frontend consumes: no nulls, placeholders instead.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ExtractionError;
use crate::extractor::Extractor;

/// Descriptions longer than this many characters are cut and suffixed with
/// [`ELLIPSIS`].
pub const DESCRIPTION_LIMIT: usize = 500;
pub const ELLIPSIS: &str = "...";

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_UPLOADER: &str = "Unknown Uploader";

/// Vertical resolutions in display order, best first. Anything not listed
/// sorts after these.
const QUALITY_RANKING: &[u32] = &[2160, 1440, 1080, 720, 480, 360, 240, 144];

/// One entry of yt-dlp's `formats` array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDescriptor {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

/// Raw metadata payload returned by the extractor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionResult {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    /// Seconds. Some extractors report fractional durations.
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    /// `YYYYMMDD`, passed through untouched.
    pub upload_date: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    /// Extension of the selected format, once a format selector is applied.
    pub ext: Option<String>,
    /// Output path yt-dlp would write to for the current `--output` template.
    pub filename: Option<String>,
    #[serde(rename = "_filename")]
    pub legacy_filename: Option<String>,
    pub formats: Option<Vec<StreamDescriptor>>,
}

impl ExtractionResult {
    /// The output filename yt-dlp announced for this result, if any.
    pub fn reported_filename(&self) -> Option<&str> {
        self.filename
            .as_deref()
            .or(self.legacy_filename.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// Client-facing metadata returned by `POST /metadata`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataView {
    pub title: String,
    pub uploader: String,
    pub duration: u64,
    pub duration_text: String,
    pub view_count: u64,
    pub like_count: u64,
    pub upload_date: String,
    pub description: String,
    pub thumbnail: String,
    pub available_formats: Vec<String>,
}

/// Asks the extractor for metadata only; nothing is written to disk.
pub fn fetch(extractor: &dyn Extractor, url: &str) -> Result<ExtractionResult, ExtractionError> {
    info!(%url, "extracting metadata");
    match extractor.extract_info(url, None) {
        Ok(raw) => {
            info!(%url, title = raw.title.as_deref().unwrap_or(UNKNOWN_TITLE), "metadata extracted");
            Ok(raw)
        }
        Err(err) => {
            warn!(%url, error = %err, "metadata extraction failed");
            Err(err)
        }
    }
}

/// Projects raw extractor output onto [`MetadataView`].
pub fn project(raw: &ExtractionResult) -> MetadataView {
    let duration = raw
        .duration
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(|seconds| seconds.round() as u64)
        .unwrap_or(0);

    MetadataView {
        title: non_empty(raw.title.as_deref()).unwrap_or(UNKNOWN_TITLE).to_owned(),
        uploader: non_empty(raw.uploader.as_deref())
            .unwrap_or(UNKNOWN_UPLOADER)
            .to_owned(),
        duration,
        duration_text: if duration > 0 {
            format_duration(duration)
        } else {
            String::new()
        },
        view_count: raw.view_count.unwrap_or(0),
        like_count: raw.like_count.unwrap_or(0),
        upload_date: raw.upload_date.clone().unwrap_or_default(),
        description: truncate_description(raw.description.as_deref().unwrap_or_default()),
        thumbnail: raw.thumbnail.clone().unwrap_or_default(),
        available_formats: available_formats(raw.formats.as_deref().unwrap_or_default()),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

/// Distinct `<height>p` labels, best quality first.
pub fn available_formats(formats: &[StreamDescriptor]) -> Vec<String> {
    let mut heights: Vec<u32> = formats.iter().filter_map(|format| format.height).collect();
    heights.retain(|height| *height > 0);
    heights.sort_unstable_by(|a, b| {
        quality_rank(*a)
            .cmp(&quality_rank(*b))
            .then_with(|| b.cmp(a))
    });
    heights.dedup();
    heights.into_iter().map(|height| format!("{height}p")).collect()
}

fn quality_rank(height: u32) -> usize {
    QUALITY_RANKING
        .iter()
        .position(|ranked| *ranked == height)
        .unwrap_or(QUALITY_RANKING.len())
}

/// Cuts descriptions to [`DESCRIPTION_LIMIT`] characters. Shorter text is
/// returned as is.
pub fn truncate_description(description: &str) -> String {
    match description.char_indices().nth(DESCRIPTION_LIMIT) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &description[..cut]),
        None => description.to_owned(),
    }
}

/// Formats seconds as `m:ss` or `h:mm:ss`.
fn format_duration(duration: u64) -> String {
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
