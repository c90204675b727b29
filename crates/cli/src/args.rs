//! Command-line argument parsing (spec §6 external interfaces).

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Final-summary rendering format (spec §11.5 "CLI's optional JSON
/// diagnostic dump").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// A resumable, multi-connection file downloader.
#[derive(Debug, Parser)]
#[command(name = "fluxdm", version, about)]
pub struct Cli {
    /// URLs to download. Ignored if `--input-file` is given.
    pub urls: Vec<String>,

    /// Read URLs from a list file instead of (or in addition to) `urls`
    /// (spec §6 "Input list format").
    #[arg(short = 'i', long = "input-file", value_name = "PATH")]
    pub input_file: Option<PathBuf>,

    /// Destination path for a single URL. Ignored when more than one item
    /// is queued.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Expected checksum for a single URL, as `algorithm:hex`.
    #[arg(short = 'c', long = "checksum", value_name = "ALG:HEX")]
    pub checksum: Option<String>,

    /// Number of items downloaded concurrently.
    #[arg(short = 'j', long = "concurrency", default_value_t = 4)]
    pub concurrency: usize,

    /// Number of range connections per file.
    #[arg(long = "connections", default_value_t = 4)]
    pub connections_per_file: u32,

    /// Suppress the progress bars; only the final summary is printed.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Final summary rendering: human-readable text or a JSON diagnostic
    /// dump of every queued item.
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Increase log verbosity. Repeatable (`-v`, `-vv`).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
