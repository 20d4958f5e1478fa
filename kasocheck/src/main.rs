//! kasocheck - chat server activity tracker
//!
//! Records message arrivals per guild and channel, keeps a bounded history and
//! reports how active a guild is on a ten-level scale.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/kasocheck/activity.db (~/.local/share/kasocheck/activity.db)
//! - Logs: $XDG_STATE_HOME/kasocheck/ (~/.local/state/kasocheck/)
//! - Config: $XDG_CONFIG_HOME/kasocheck/config.toml (~/.config/kasocheck/config.toml)

mod backend;
mod history;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use kasocheck_core::activity::{label_for, level_badge};
use kasocheck_core::config::OverlapPolicy;
use kasocheck_core::format::{format_number, format_relative_time_opt, now_utc, parse_timestamp};
use kasocheck_core::ingest::{BackfillOptions, BackfillSummary};
use kasocheck_core::{
    ActivityRecorder, BackfillImporter, Config, EventStore, MessageEvent, ReportAggregator,
    RetentionManager,
};
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use crate::backend::{load_legacy, Backend};
use crate::history::ExportDirSource;

#[derive(Parser)]
#[command(name = "kasocheck")]
#[command(about = "Track and report chat server activity")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one message arrival
    Record {
        /// Guild id (omit for a direct message, which is ignored)
        #[arg(long)]
        guild: Option<String>,

        /// Channel id
        #[arg(long)]
        channel: String,

        /// The author is a bot (ignored)
        #[arg(long)]
        bot: bool,

        /// Arrival time, ISO-8601 UTC (default: now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Show the activity report for a guild
    Report {
        /// Guild id
        #[arg(long)]
        guild: String,

        /// Lookback window in days (default from config)
        #[arg(long)]
        days: Option<u32>,

        /// Number of channels in the top list (default from config)
        #[arg(long)]
        top: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Backfill from this history export before reporting
        #[arg(long, value_name = "DIR")]
        backfill_from: Option<PathBuf>,
    },

    /// Delete events older than the retention horizon
    Prune {
        /// Only prune this guild
        #[arg(long)]
        guild: Option<String>,

        /// Retention in days (default from config)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Record messages from stdin (JSON lines) and sweep retention until Ctrl-C
    Serve,

    /// Import channel history from an export directory
    Backfill {
        /// Guild id the history belongs to
        #[arg(long)]
        guild: String,

        /// Directory with one `<channel_id>.jsonl` file per channel
        #[arg(long, value_name = "DIR")]
        history_dir: PathBuf,

        /// Examine at most this many messages per channel
        #[arg(long)]
        limit: Option<usize>,

        /// Only import the last N days
        #[arg(long)]
        since_days: Option<u32>,

        /// Import everything, even history the store already covers
        #[arg(long)]
        keep_all: bool,
    },

    /// Import a legacy kaso_data.json document
    ImportLegacy {
        /// Path to the legacy document
        file: PathBuf,
    },

    /// Export every stored event as a JSON document
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show store statistics
    Status,

    /// Show the activity level thresholds
    Thresholds,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// One line of `serve` input.
#[derive(Deserialize)]
struct IncomingMessage {
    guild_id: Option<String>,
    channel_id: String,
    #[serde(default)]
    author_bot: bool,
    /// Arrival time; defaults to when the line is read
    at: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Sorry, something went wrong: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        kasocheck_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("kasocheck starting");

    match args.command {
        Command::Record {
            guild,
            channel,
            bot,
            at,
        } => {
            let received_at = match at {
                Some(raw) => parse_timestamp(&raw).context("invalid --at timestamp")?,
                None => now_utc(),
            };
            let (backend, _) = Backend::open(&config.storage, false)?;
            let recorder = ActivityRecorder::new(backend.store());
            let recorded = recorder
                .record(&MessageEvent {
                    scope_group_id: guild,
                    scope_id: channel,
                    author_is_bot: bot,
                    received_at,
                })
                .context("failed to record message")?;
            println!("{}", if recorded { "Recorded" } else { "Ignored" });
        }

        Command::Report {
            guild,
            days,
            top,
            format,
            backfill_from,
        } => {
            let window_days = days.unwrap_or(config.report.window_days);
            if window_days == 0 {
                anyhow::bail!("--days must be at least 1");
            }
            let ladder = config.activity.ladder()?;
            let (backend, _) = Backend::open(&config.storage, backfill_from.is_some())?;
            let store = backend.store();

            if let Some(dir) = backfill_from {
                // Only the report window; older history would fall to retention anyway.
                let summary = backfill(
                    &config,
                    store.clone(),
                    &guild,
                    &dir,
                    BackfillOptions {
                        max_items: None,
                        since_days: Some(window_days),
                    },
                    config.backfill.overlap,
                )
                .await?;
                match format {
                    OutputFormat::Text => println!("{}", render_backfill_summary(&summary)),
                    OutputFormat::Json => eprint!("{}", render_backfill_summary(&summary)),
                }
            }

            let report = ReportAggregator::with_config(store, ladder, &config.report)
                .summarize(&guild, window_days, top.unwrap_or(config.report.top_n))
                .context("failed to build report")?;

            match format {
                OutputFormat::Text => println!("{}", report.render()),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }

        Command::Prune { guild, days } => {
            let mut activity = config.activity.clone();
            if let Some(days) = days {
                if days == 0 {
                    anyhow::bail!("--days must be at least 1");
                }
                activity.retention_days = days;
            }

            let (backend, _) = Backend::open(&config.storage, true)?;
            let store = backend.store();
            let manager = RetentionManager::new(store.clone(), &activity);

            let (cutoff, removed) = match guild {
                Some(guild) => {
                    let cutoff = manager.cutoff_at(now_utc());
                    let removed = store.prune_before(cutoff, Some(&guild))?;
                    store.flush()?;
                    (cutoff, removed)
                }
                None => {
                    let report = manager.sweep().context("retention sweep failed")?;
                    (report.cutoff, report.removed)
                }
            };
            println!(
                "Removed {} events older than {}",
                format_number(removed as u64),
                cutoff.format("%Y-%m-%d %H:%M:%S")
            );
        }

        Command::Serve => {
            let (backend, path) = Backend::open(&config.storage, false)?;
            println!("Store: {} ({})", path.display(), backend.name());
            serve(&config, backend.store()).await?;
        }

        Command::Backfill {
            guild,
            history_dir,
            limit,
            since_days,
            keep_all,
        } => {
            let overlap = if keep_all {
                OverlapPolicy::KeepAll
            } else {
                config.backfill.overlap
            };
            let (backend, _) = Backend::open(&config.storage, true)?;
            let summary = backfill(
                &config,
                backend.store(),
                &guild,
                &history_dir,
                BackfillOptions {
                    max_items: limit,
                    since_days,
                },
                overlap,
            )
            .await?;
            print!("{}", render_backfill_summary(&summary));
        }

        Command::ImportLegacy { file } => {
            let doc = load_legacy(&file)?;
            let (backend, path) = Backend::open(&config.storage, true)?;
            let added = backend
                .import(&doc)
                .context("failed to import legacy document")?;
            println!(
                "Imported {} events into {} ({})",
                format_number(added as u64),
                path.display(),
                backend.name()
            );
        }

        Command::Export { output } => {
            let (backend, _) = Backend::open(&config.storage, false)?;
            let json = backend.export()?.to_json_string()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }

        Command::Status => {
            let (backend, path) = Backend::open(&config.storage, false)?;
            let stats = backend.stats()?;
            let window_days = config.report.window_days;
            let ladder = config.activity.ladder()?;
            let aggregator =
                ReportAggregator::with_config(backend.store(), ladder, &config.report);

            println!("Store: {} ({})", path.display(), backend.name());
            println!("  Events:   {}", format_number(stats.event_count));
            println!("  Guilds:   {}", format_number(stats.group_count));
            println!("  Channels: {}", format_number(stats.scope_count));
            println!("  Oldest:   {}", describe_time(stats.oldest));
            println!("  Newest:   {}", describe_time(stats.newest));
            println!("  Retention: {} days", config.activity.retention_days);
            let log_dir = kasocheck_core::logging::log_dir();
            match kasocheck_core::logging::latest_log_file(&log_dir) {
                Some(file) => println!("Logs: {}", file.display()),
                None => println!("Logs: {}", log_dir.display()),
            }

            let groups = backend.groups()?;
            if !groups.is_empty() {
                println!();
                println!("Guilds (last {} days):", window_days);
                for guild in groups {
                    let report = aggregator.summarize(&guild, window_days, 0)?;
                    println!(
                        "  {}  {}  {} messages  {}",
                        guild,
                        level_badge(report.group_level),
                        format_number(report.total_count),
                        label_for(report.group_level)
                    );
                }
            }
        }

        Command::Thresholds => {
            let ladder = config.activity.ladder()?;
            println!("Activity levels (average messages per day):");
            for line in ladder.describe() {
                println!("  {line}");
            }
            println!();
            println!(
                "Reports cover the last {} days by default; events are kept for {} days.",
                config.report.window_days, config.activity.retention_days
            );
        }
    }

    tracing::info!("kasocheck finished");
    Ok(())
}

fn describe_time(ts: Option<NaiveDateTime>) -> String {
    match ts {
        Some(t) => format!(
            "{} ({})",
            t.format("%Y-%m-%d %H:%M:%S"),
            format_relative_time_opt(ts)
        ),
        None => "-".to_string(),
    }
}

/// Walk an exported history directory into the store with a spinner.
async fn backfill(
    config: &Config,
    store: Arc<dyn EventStore>,
    guild: &str,
    dir: &Path,
    options: BackfillOptions,
    overlap: OverlapPolicy,
) -> Result<BackfillSummary> {
    if !dir.is_dir() {
        anyhow::bail!("history directory not found: {}", dir.display());
    }

    let mut backfill_config = config.backfill.clone();
    backfill_config.overlap = overlap;
    let importer = BackfillImporter::new(store, backfill_config);
    let source = ExportDirSource::new(dir);

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message(format!("Backfilling guild {guild}..."));

    let mut imported = 0usize;
    let summary = importer
        .backfill_group(&source, guild, options, &token, |scope_id, result| {
            match result {
                Ok(outcome) => {
                    imported += outcome.imported;
                    pb.set_message(format!(
                        "#{scope_id}: {} imported ({} total)",
                        format_number(outcome.imported as u64),
                        format_number(imported as u64)
                    ));
                }
                Err(e) => pb.println(format!("#{scope_id}: skipped ({e})")),
            }
            pb.inc(1);
        })
        .await
        .context("backfill failed")?;
    pb.finish_and_clear();

    Ok(summary)
}

fn render_backfill_summary(summary: &BackfillSummary) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    if summary.cancelled {
        out.push_str("Backfill interrupted:\n");
    } else {
        out.push_str("Backfill complete:\n");
    }
    let _ = writeln!(out, "  Channels walked:   {}", summary.scopes_done);
    let _ = writeln!(
        out,
        "  Messages imported: {}",
        format_number(summary.imported as u64)
    );
    let _ = writeln!(
        out,
        "  Already imported:  {}",
        format_number(summary.already_imported as u64)
    );
    let _ = writeln!(out, "  Failed channels:   {}", summary.failed());
    for (scope_id, error) in &summary.failed_scopes {
        let _ = writeln!(out, "    #{scope_id}: {error}");
    }
    out
}

/// Record stdin messages while retention sweeps run in the background.
///
/// Stops on Ctrl-C or end of input, letting an in-flight sweep finish.
async fn serve(config: &Config, store: Arc<dyn EventStore>) -> Result<()> {
    let token = CancellationToken::new();
    let retention = RetentionManager::new(store.clone(), &config.activity).spawn(token);
    let recorder = ActivityRecorder::new(store.clone());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut recorded = 0u64;
    let mut ignored = 0u64;
    let result: Result<()> = loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted, shutting down");
                break Ok(());
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e).context("failed to read stdin"),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message = match parse_incoming(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %format!("{e:#}"), "Skipping malformed input line");
                        ignored += 1;
                        continue;
                    }
                };
                // Appends may rewrite a whole JSON document; keep them off the runtime.
                let recorder = recorder.clone();
                match tokio::task::spawn_blocking(move || recorder.record(&message)).await {
                    Ok(Ok(true)) => recorded += 1,
                    Ok(Ok(false)) => ignored += 1,
                    Ok(Err(e)) => break Err(e).context("failed to record message"),
                    Err(e) => break Err(e).context("record task failed"),
                }
            }
        }
    };

    retention.shutdown().await;
    store.flush().context("failed to flush store")?;
    println!("Recorded {} messages ({} ignored)", format_number(recorded), format_number(ignored));
    result
}

fn parse_incoming(line: &str) -> Result<MessageEvent> {
    let incoming: IncomingMessage = serde_json::from_str(line)?;
    let received_at = match incoming.at {
        Some(raw) => parse_timestamp(&raw)?,
        None => now_utc(),
    };
    Ok(MessageEvent {
        scope_group_id: incoming.guild_id,
        scope_id: incoming.channel_id,
        author_is_bot: incoming.author_bot,
        received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_incoming_defaults() {
        let message = parse_incoming(r#"{"guild_id": "1", "channel_id": "2"}"#).unwrap();
        assert_eq!(message.scope_group_id.as_deref(), Some("1"));
        assert!(!message.author_is_bot);
        assert!(now_utc() - message.received_at < Duration::minutes(1));

        let dm = parse_incoming(r#"{"channel_id": "2", "at": "2025-11-27T12:00:00"}"#).unwrap();
        assert!(dm.scope_group_id.is_none());
        assert_eq!(
            dm.received_at,
            parse_timestamp("2025-11-27T12:00:00").unwrap()
        );
    }

    #[test]
    fn test_parse_incoming_rejects_garbage() {
        assert!(parse_incoming("not json").is_err());
        assert!(parse_incoming(r#"{"channel_id": "2", "at": "yesterday"}"#).is_err());
    }
}
