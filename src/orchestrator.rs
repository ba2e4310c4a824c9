//! One download attempt, end to end.
//!
//! The flow is: scoped work directory, metadata probe to predict the output
//! name, the actual download, locate the produced file (scanning the work
//! directory when the prediction misses), copy it into the serving area, and
//! let the work directory drop. Nothing here retries: yt-dlp leaves partial
//! files and trips rate limits when re-run blindly.
//!
//! Filenames in the serving area derive from video titles, so two concurrent
//! downloads of identically titled videos write to the same serving path.
//! That race is accepted; callers only rely on the file existing when
//! [`Downloader::download`] returns.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::DownloadError;
use crate::extractor::{DownloadOptions, Extractor};
use crate::format::{self, BEST_QUALITY};
use crate::metadata::{ExtractionResult, UNKNOWN_TITLE};

/// Container every download is merged into.
pub const MERGE_FORMAT: &str = "mp4";
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const WORK_DIR_PREFIX: &str = "tubefetch-";

/// Body of `POST /download`.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default = "default_quality")]
    pub quality: String,
}

fn default_quality() -> String {
    BEST_QUALITY.to_owned()
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, quality: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            quality: quality.into(),
        }
    }
}

/// A finished download sitting in the serving area.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    /// Where yt-dlp wrote the file. Gone once the work directory is dropped.
    pub source_path: PathBuf,
    pub serving_path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Drives the extractor for download requests.
pub struct Downloader {
    extractor: Arc<dyn Extractor>,
    work_root: PathBuf,
    serving_dir: PathBuf,
}

impl Downloader {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        work_root: impl Into<PathBuf>,
        serving_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extractor,
            work_root: work_root.into(),
            serving_dir: serving_dir.into(),
        }
    }

    pub fn serving_dir(&self) -> &Path {
        &self.serving_dir
    }

    /// Runs a single download attempt. Blocks for as long as the extractor
    /// does.
    pub fn download(&self, request: &DownloadRequest) -> Result<StagedArtifact, DownloadError> {
        let format = format::resolve(Some(request.quality.as_str()));
        info!(url = %request.url, quality = %request.quality, %format, "starting download");

        let work_dir = tempfile::Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .tempdir_in(&self.work_root)
            .map_err(|err| DownloadError::internal("creating work directory", &self.work_root, err))?;

        let artifact = self.download_in(&work_dir, request, format)?;

        let work_path = work_dir.path().to_path_buf();
        if let Err(err) = work_dir.close() {
            warn!(path = %work_path.display(), error = %err, "failed to remove work directory");
        }
        Ok(artifact)
    }

    /// Steps that run inside the work directory. `work_dir` is dropped by the
    /// caller on every path out of here.
    fn download_in(
        &self,
        work_dir: &TempDir,
        request: &DownloadRequest,
        format: format::FormatExpression,
    ) -> Result<StagedArtifact, DownloadError> {
        let options = DownloadOptions {
            format,
            output_template: work_dir.path().join(OUTPUT_TEMPLATE),
            merge_format: MERGE_FORMAT.to_owned(),
        };

        let info = self.extractor.extract_info(&request.url, Some(&options))?;
        let predicted = predict_output_path(&info, work_dir.path());
        debug!(predicted = %predicted.display(), "predicted output file");

        self.extractor.download(&request.url, &options)?;

        let source_path = locate_artifact(work_dir.path(), &predicted, MERGE_FORMAT)?;
        stage_artifact(&source_path, &self.serving_dir)
    }
}

/// Where the extractor is expected to write its output. Only the file name
/// of a reported path is trusted; the directory is always `work_dir`.
pub fn predict_output_path(info: &ExtractionResult, work_dir: &Path) -> PathBuf {
    let reported = info
        .reported_filename()
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_os_string());
    match reported {
        Some(name) => work_dir.join(name),
        None => {
            let title = info
                .title
                .as_deref()
                .filter(|title| !title.trim().is_empty())
                .unwrap_or(UNKNOWN_TITLE);
            let ext = info.ext.as_deref().unwrap_or(MERGE_FORMAT);
            work_dir.join(format!("{}.{ext}", sanitize_file_stem(title)))
        }
    }
}

fn sanitize_file_stem(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect()
}

/// Returns `predicted` if it exists, else the first `*.extension` file (by
/// name) directly inside `work_dir`.
pub fn locate_artifact(
    work_dir: &Path,
    predicted: &Path,
    extension: &str,
) -> Result<PathBuf, DownloadError> {
    if predicted.is_file() {
        return Ok(predicted.to_path_buf());
    }

    let fallback = WalkDir::new(work_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .find(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        });

    match fallback {
        Some(path) => {
            info!(
                predicted = %predicted.display(),
                found = %path.display(),
                "predicted file missing; using scanned file"
            );
            Ok(path)
        }
        None => Err(DownloadError::ArtifactMissing {
            dir: work_dir.to_path_buf(),
            extension: extension.to_owned(),
        }),
    }
}

/// Copies `source` into `serving_dir` under its base name.
pub fn stage_artifact(source: &Path, serving_dir: &Path) -> Result<StagedArtifact, DownloadError> {
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            DownloadError::internal(
                "reading file name",
                source,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?;

    fs::create_dir_all(serving_dir)
        .map_err(|err| DownloadError::internal("creating serving directory", serving_dir, err))?;
    let serving_path = serving_dir.join(&file_name);
    let size_bytes = fs::copy(source, &serving_path)
        .map_err(|err| DownloadError::internal("copying staged file", &serving_path, err))?;

    info!(path = %serving_path.display(), size_bytes, "download staged");
    Ok(StagedArtifact {
        source_path: source.to_path_buf(),
        serving_path,
        file_name,
        size_bytes,
        created_at: Utc::now(),
    })
}
