//! CLI entry point for the album downloader.

use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;
use std::sync::Arc;

use album_dl::download::filename::filename_from_link;
use album_dl::download::{
    ClientSettings, DownloadContext, DownloadEngine, DownloadItem, HttpClient, InterruptFlag,
};
use album_dl::progress::{ProgressSink, TracingProgress};
use album_dl::session_log::FileSessionLog;
use album_dl::status::{HttpStatusSource, ServerStatusCache};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

mod cli;
mod console;

use cli::Args;
use console::ConsoleProgress;

/// Exit status when the run was stopped by Ctrl-C.
const INTERRUPTED_EXIT: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    // Read input: from positional args or stdin
    let links: Vec<String> = if !args.links.is_empty() {
        args.links.clone()
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    if links.is_empty() {
        info!("No links provided. Pass links as arguments or pipe them via stdin.");
        info!("Example: echo 'https://cdn1.example.com/clip.mp4' | album-dl");
        return Ok(ExitCode::SUCCESS);
    }

    let items: Vec<DownloadItem> = links
        .into_iter()
        .map(|link| DownloadItem {
            filename: filename_from_link(&link),
            download_link: link,
        })
        .collect();

    tokio::fs::create_dir_all(&args.custom_path)
        .await
        .with_context(|| format!("creating download directory {}", args.custom_path.display()))?;

    let client = HttpClient::with_settings(&ClientSettings {
        user_agent: args.user_agent.clone(),
        referer: Some(args.download_referer.clone()).filter(|r| !r.trim().is_empty()),
        ..ClientSettings::default()
    })?;

    let status = Arc::new(ServerStatusCache::new(Arc::new(HttpStatusSource::new(
        &args.status_page,
        &args.user_agent,
    )?)));
    if args.skip_status_check {
        debug!("status page priming skipped");
    } else {
        let hosts = status.prime().await;
        debug!(hosts, "status page primed");
    }

    let session_log = FileSessionLog::fresh(&args.session_log)
        .await
        .with_context(|| format!("opening session log {}", args.session_log.display()))?;

    let use_console = !args.disable_ui && !args.quiet && io::stderr().is_terminal();
    let console = use_console.then(|| Arc::new(ConsoleProgress::new(items.len() as u64)));
    let sink: Arc<dyn ProgressSink> = match &console {
        Some(console) => Arc::clone(console) as Arc<dyn ProgressSink>,
        None => Arc::new(TracingProgress::new()),
    };

    let interrupt = Arc::new(InterruptFlag::new());
    {
        let interrupt = Arc::clone(&interrupt);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping after current chunks");
                interrupt.trigger();
            }
        });
    }

    let engine = DownloadEngine::new(DownloadContext {
        transport: Arc::new(client),
        status,
        session_log: Arc::new(session_log),
        sink,
        config: args.download_config(),
        download_dir: args.custom_path.clone(),
        interrupt,
    })?;

    let stats = engine.download_all(items).await?;

    if let Some(console) = &console {
        console.finish();
    }

    info!(
        completed = stats.completed(),
        skipped = stats.skipped(),
        failed = stats.failed(),
        deferred = stats.deferred(),
        retried = stats.retried(),
        "Download complete"
    );

    if stats.was_interrupted() {
        return Ok(ExitCode::from(INTERRUPTED_EXIT));
    }
    if stats.failed() > 0 {
        warn!(
            failed = stats.failed(),
            session_log = %args.session_log.display(),
            "some files could not be downloaded"
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
