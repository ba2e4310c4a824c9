#![forbid(unsafe_code)]

//! Download videos through yt-dlp, either over HTTP or from the command line.
//!
//! The `backend` binary serves [`server::router`]; the `download` binary
//! drives [`orchestrator::Downloader`] directly.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod extractor;
pub mod format;
pub mod metadata;
pub mod orchestrator;
pub mod server;
pub mod telemetry;
