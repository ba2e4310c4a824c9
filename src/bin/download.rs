use std::{
    env,
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tubefetch::{
    config::DEFAULT_YTDLP,
    error::ValidationError,
    extractor::YtDlp,
    format::{BEST_QUALITY, known_labels},
    orchestrator::{DownloadRequest, Downloader},
    telemetry::{LogFormat, init_logging},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Download a single video with yt-dlp.")]
struct Cli {
    /// Video URL. Prompted for when omitted.
    url: Option<String>,
    #[arg(short = 'o', long = "output", default_value = "downloads", help = "Output directory")]
    output: PathBuf,
    #[arg(
        short = 'q',
        long = "quality",
        default_value = BEST_QUALITY,
        help = "Video quality (2160p, 1440p, 1080p, 720p, 480p, 360p, audio, best)"
    )]
    quality: String,
    #[arg(long = "yt-dlp", env = "YTDLP_PATH", default_value = DEFAULT_YTDLP, help = "yt-dlp executable")]
    ytdlp: PathBuf,
    #[arg(long = "cookies", env = "COOKIES_FILE", help = "Cookies file passed to yt-dlp")]
    cookies: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    init_logging("warn", LogFormat::from_env())?;
    let cli = Cli::parse();

    let url = match cli.url {
        Some(url) => url,
        None => prompt_for_url().context("reading URL from stdin")?,
    };
    let url = url.trim();
    if url.is_empty() {
        bail!(ValidationError::MissingUrl);
    }
    if !known_labels().any(|label| label == cli.quality.trim()) {
        eprintln!(
            "Unknown quality '{}', falling back to best available.",
            cli.quality
        );
    }

    let extractor = YtDlp::new(cli.ytdlp)
        .with_cookies(cli.cookies)
        .with_progress(true);
    let downloader = Downloader::new(Arc::new(extractor), env::temp_dir(), &cli.output);

    println!("Downloading {url} ({})", cli.quality);
    println!("Output directory: {}", downloader.serving_dir().display());
    println!();

    let artifact = downloader
        .download(&DownloadRequest::new(url, cli.quality))
        .context("download failed")?;

    println!();
    println!("Saved {} ({} bytes)", artifact.serving_path.display(), artifact.size_bytes);
    Ok(())
}

fn prompt_for_url() -> Result<String> {
    print!("Enter YouTube URL: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}
