use anyhow::{Context, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tubefetch-env";
pub const CONFIG_PATH_VAR: &str = "TUBEFETCH_CONFIG";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_YTDLP: &str = "yt-dlp";
pub const DEFAULT_ENVIRONMENT: &str = "unknown";
const SERVING_SUBDIR: &str = "tubefetch-serving";

/// Values read from the optional `KEY=VALUE` config file. Everything is
/// optional; environment variables and defaults fill the gaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub serving_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub cleanup_delay_secs: Option<u64>,
    pub ytdlp_path: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub environment: Option<String>,
}

/// Fully resolved settings for the API server.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Shared directory finished downloads are streamed from.
    pub serving_dir: PathBuf,
    /// Parent of the per-request scratch directories.
    pub work_dir: PathBuf,
    pub cleanup_delay: Duration,
    pub ytdlp_path: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub environment: String,
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    let source = path.display().to_string();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            apply_setting(&mut cfg, key.trim(), value, &source)?;
        }
    }
    Ok(Some(cfg))
}

/// Stores one recognised key. Empty values are ignored and unknown keys are
/// skipped.
fn apply_setting(cfg: &mut EnvConfig, key: &str, value: &str, source: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    match key {
        "HOST" => cfg.host = Some(value.to_string()),
        "PORT" => {
            let port: u16 = value
                .parse()
                .with_context(|| format!("Parsing PORT from {source}"))?;
            cfg.port = Some(port);
        }
        "SERVING_DIR" => cfg.serving_dir = Some(PathBuf::from(value)),
        "WORK_DIR" => cfg.work_dir = Some(PathBuf::from(value)),
        "CLEANUP_DELAY_SECS" => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("Parsing CLEANUP_DELAY_SECS from {source}"))?;
            cfg.cleanup_delay_secs = Some(secs);
        }
        "YTDLP_PATH" => cfg.ytdlp_path = Some(PathBuf::from(value)),
        "COOKIES_FILE" => cfg.cookies_file = Some(PathBuf::from(value)),
        "ENVIRONMENT" | "RAILWAY_ENVIRONMENT" => cfg.environment = Some(value.to_string()),
        _ => {}
    }
    Ok(())
}

/// Overlays process environment variables on top of `cfg`.
fn apply_environment<F>(cfg: &mut EnvConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    // RAILWAY_ENVIRONMENT first so an explicit ENVIRONMENT wins.
    for key in [
        "HOST",
        "PORT",
        "SERVING_DIR",
        "WORK_DIR",
        "CLEANUP_DELAY_SECS",
        "YTDLP_PATH",
        "COOKIES_FILE",
        "RAILWAY_ENVIRONMENT",
        "ENVIRONMENT",
    ] {
        if let Some(value) = lookup(key) {
            apply_setting(cfg, key, value.trim(), "environment")?;
        }
    }
    Ok(())
}

pub fn load_service_config() -> Result<ServiceConfig> {
    let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_service_config_from(path, |key| env::var(key).ok())
}

pub fn load_service_config_from<F>(path: impl AsRef<Path>, lookup: F) -> Result<ServiceConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    apply_environment(&mut cfg, lookup)?;

    let temp = env::temp_dir();
    Ok(ServiceConfig {
        host: cfg.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: cfg.port.unwrap_or(DEFAULT_PORT),
        serving_dir: cfg.serving_dir.unwrap_or_else(|| temp.join(SERVING_SUBDIR)),
        work_dir: cfg.work_dir.unwrap_or(temp),
        cleanup_delay: cfg
            .cleanup_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLEANUP_DELAY),
        ytdlp_path: cfg
            .ytdlp_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP)),
        cookies_file: cfg.cookies_file,
        environment: cfg
            .environment
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
    })
}
