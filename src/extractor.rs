//! The media-extraction collaborator.
//!
//! [`Extractor`] is the seam between our code and yt-dlp: it either returns
//! metadata or writes a media file, nothing else. [`YtDlp`] is the production
//! implementation and shells out to the `yt-dlp` binary; tests plug in their
//! own implementations.

use std::path::PathBuf;
use std::process::{Command, ExitStatus, Output, Stdio};

use tracing::debug;

use crate::error::ExtractionError;
use crate::format::FormatExpression;
use crate::metadata::ExtractionResult;

/// Options shared by the metadata probe and the actual download so both
/// agree on the output filename.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub format: FormatExpression,
    /// yt-dlp `--output` template, e.g. `/tmp/x/%(title)s.%(ext)s`.
    pub output_template: PathBuf,
    /// Container used when separate audio and video streams get merged.
    pub merge_format: String,
}

/// Black-box media extractor.
///
/// Calls block until the underlying tool exits; async callers must move them
/// onto a blocking thread.
pub trait Extractor: Send + Sync {
    /// Verifies the extractor can be run and returns its version string.
    fn version(&self) -> Result<String, ExtractionError>;

    /// Fetches metadata without downloading media. When `options` are given
    /// the result reflects the selected format and output template.
    fn extract_info(
        &self,
        url: &str,
        options: Option<&DownloadOptions>,
    ) -> Result<ExtractionResult, ExtractionError>;

    /// Downloads (and merges) the selected streams to the output template.
    fn download(&self, url: &str, options: &DownloadOptions) -> Result<(), ExtractionError>;
}

/// Subprocess-backed [`Extractor`].
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
    show_progress: bool,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: None,
            show_progress: false,
        }
    }

    /// Passes `--cookies <path>` on every invocation as long as the file
    /// exists.
    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Lets yt-dlp print its progress bar to our stdout during downloads.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.stdin(Stdio::null());
        if let Some(cookies) = self.cookies.as_ref().filter(|path| path.exists()) {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    fn run(&self, mut command: Command) -> Result<Output, ExtractionError> {
        debug!(program = %self.program.display(), "running extractor");
        let output = command.output().map_err(|source| ExtractionError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(ExtractionError::Failed(failure_message(
                &output.stderr,
                output.status,
            )));
        }
        Ok(output)
    }
}

impl Extractor for YtDlp {
    fn version(&self) -> Result<String, ExtractionError> {
        let mut command = Command::new(&self.program);
        command.arg("--version").stdin(Stdio::null());
        let output = self.run(command)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    fn extract_info(
        &self,
        url: &str,
        options: Option<&DownloadOptions>,
    ) -> Result<ExtractionResult, ExtractionError> {
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-playlist");
        if let Some(options) = options {
            apply_download_options(&mut command, options);
        }
        command.arg("--").arg(url);

        let output = self.run(command)?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn download(&self, url: &str, options: &DownloadOptions) -> Result<(), ExtractionError> {
        let mut command = self.command();
        command.arg("--no-playlist").arg("--no-warnings");
        if self.show_progress {
            command.stdout(Stdio::inherit());
        } else {
            command.arg("--quiet").arg("--no-progress");
        }
        apply_download_options(&mut command, options);
        command.arg("--").arg(url);

        self.run(command).map(|_| ())
    }
}

fn apply_download_options(command: &mut Command, options: &DownloadOptions) {
    command
        .arg("--format")
        .arg(options.format.as_str())
        .arg("--merge-output-format")
        .arg(&options.merge_format)
        .arg("--output")
        .arg(&options.output_template);
}

/// Picks the most useful line out of yt-dlp's stderr: the last `ERROR:` line,
/// else the last non-empty line, else the exit status.
fn failure_message(stderr: &[u8], status: ExitStatus) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|line| (*line).to_owned())
        .unwrap_or_else(|| format!("extractor exited with {status}"))
}
