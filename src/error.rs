//! Error taxonomy shared by the metadata, download, and HTTP layers.
//!
//! Every call into yt-dlp returns one of these values instead of letting a
//! raw failure escape. The HTTP layer maps them onto status codes and a short
//! `detail` string.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the extraction collaborator.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The extractor binary could not be executed at all.
    #[error("{program} could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// The extractor ran and reported a failure. Carries its own message
    /// (private video, geo-block, unsupported URL, network failure...).
    #[error("{0}")]
    Failed(String),
    /// The extractor succeeded but printed something that is not the JSON
    /// document we asked for.
    #[error("unreadable extractor output: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures of a single download attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Fetching metadata or media through the extractor failed.
    #[error("{0}")]
    ExtractionFailed(#[from] ExtractionError),
    /// The extractor reported success but no media file was left behind.
    #[error("download completed but no {extension} file was found in {}", dir.display())]
    ArtifactMissing { dir: PathBuf, extension: String },
    /// Local filesystem failure while preparing or staging the file.
    #[error("{operation} failed for {}: {source}", path.display())]
    Internal {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DownloadError {
    pub(crate) fn internal(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Internal {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Rejections produced before any extractor call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL is required")]
    MissingUrl,
    #[error("Please provide a valid YouTube URL")]
    UnsupportedUrl,
}
