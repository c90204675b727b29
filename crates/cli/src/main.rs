//! The hosting CLI: argument parsing and terminal rendering around the
//! download engine. Contains no chunking, retry, or checksum logic of its
//! own (spec §1 "Out-of-scope"); it only drives `engine::QueueManager` and
//! maps its final `Stats` to a process exit code (spec §6 "Exit
//! conditions").

mod args;
mod render;

use args::OutputFormat;
use clap::Parser;
use engine::{DownloaderConfig, QueueManager};
use render::CliObserver;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_CANCELED: u8 = 2;

fn main() -> ExitCode {
    let cli = args::Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("fluxdm: failed to start async runtime: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("fluxdm: {e}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: args::Cli) -> anyhow::Result<u8> {
    let downloader_config = DownloaderConfig {
        max_concurrency_per_file: cli.connections_per_file,
        ..DownloaderConfig::default()
    };
    let observer = Arc::new(CliObserver::new(!cli.quiet));
    let manager = Arc::new(QueueManager::new(
        cli.concurrency,
        downloader_config,
        observer,
    ));

    let mut item_ids = Vec::new();
    if let Some(path) = &cli.input_file {
        item_ids.extend(manager.load_from_file(path).await?);
    }

    let single_output = if cli.urls.len() == 1 { cli.output.clone() } else { None };
    if cli.urls.len() > 1 && cli.output.is_some() {
        eprintln!("fluxdm: --output ignored when more than one URL is queued");
    }
    for url in &cli.urls {
        item_ids.push(manager.add(url, single_output.clone(), cli.checksum.clone())?);
    }

    {
        let manager = manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.stop();
            }
        });
    }

    manager.run().await?;

    let stats = manager.stats();
    match cli.format {
        OutputFormat::Text => println!(
            "completed {} of {} (failed {}, skipped {}, canceled {})",
            stats.completed, stats.total, stats.failed, stats.skipped, stats.canceled
        ),
        OutputFormat::Json => {
            let items: Vec<_> = item_ids.iter().filter_map(|id| manager.item(*id)).collect();
            let dump = serde_json::json!({ "stats": stats, "items": items });
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
    }

    if stats.failed > 0 {
        Ok(EXIT_FAILURE)
    } else if stats.canceled > 0 {
        Ok(EXIT_CANCELED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
