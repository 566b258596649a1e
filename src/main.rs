//! Thin CLI entry point: loads configuration, wires the stub collaborators
//! (telephony, ASR, file store, record store), runs one Fetch/Transcribe/
//! Persist pass, and prints the run summary and metrics snapshot as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use archivist_core::{ConfigError, Settings};
use archivist_metrics::MetricsCollector;
use archivist_pipeline::{CoordinatorConfig, PipelineCoordinator};
use archivist_progress::{DeletionAuditor, InMemoryProgressStore};
use archivist_provider::StubTelephonyClient;
use archivist_ratelimit::RateLimiter;
use archivist_store::{InMemoryFileStoreClient, InMemoryRecordStore};
use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

struct Args {
    config_path: Option<PathBuf>,
    live: bool,
}

fn parse_args() -> Args {
    let mut config_path = None;
    let mut live = false;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => config_path = iter.next().map(PathBuf::from),
            "--live" => live = true,
            other => eprintln!("ignoring unrecognized argument: {other}"),
        }
    }
    Args { config_path, live }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("ARCHIVIST_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn load_settings(args: &Args) -> Result<Settings, ConfigError> {
    let mut settings = Settings::from_env()?;
    if let Some(path) = &args.config_path {
        settings.apply_overlay(path)?;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = parse_args();

    if args.live {
        eprintln!(
            "--live was requested, but the telephony/ASR/file-store clients are external \
             collaborators not implemented in this repository; run without --live to exercise \
             the pipeline against its in-memory stubs"
        );
        return ExitCode::from(1);
    }

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    match run(settings).await {
        Ok(exit_code) => exit_code,
        Err(err) => {
            eprintln!("unrecoverable error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<ExitCode> {
    let rate_limiter = Arc::new(RateLimiter::new());
    let progress = Arc::new(InMemoryProgressStore::new());
    let metrics = Arc::new(MetricsCollector::new());

    let audit_log_path = PathBuf::from(&settings.stage_dir).join("deletion_audit.jsonl");
    let deletion_auditor = Arc::new(DeletionAuditor::new(settings.stage_dir.clone(), audit_log_path));

    // No page of recordings is scripted: no live provider implementation
    // is wired in yet for the telephony/ASR/file-store collaborators, so
    // the CLI always runs the coordinator against empty stubs until a
    // real client is wired in.
    let telephony_client = Arc::new(StubTelephonyClient::new(vec![]));
    let asr_client = Arc::new(archivist_asr::StubAsrClient::new(vec![]));
    let file_store = Arc::new(InMemoryFileStoreClient::new());
    let record_store = Arc::new(InMemoryRecordStore::new());

    let transcribe_config = archivist_asr::TranscribeConfig {
        poll_interval: settings.asr_poll_interval(),
        max_wait: settings.asr_max_wait(),
        options: archivist_asr::TranscriptionOptions {
            language: settings.asr_language.clone(),
            engine: settings.asr_engine.clone(),
            ..archivist_asr::TranscriptionOptions::default()
        },
        ..archivist_asr::TranscribeConfig::default()
    };

    let coordinator_config = CoordinatorConfig {
        transcribe_workers: settings.concurrency_transcribe,
        persist_workers: settings.concurrency_persist,
        stage_dir: PathBuf::from(&settings.stage_dir),
    };

    let coordinator = PipelineCoordinator::new(
        telephony_client,
        asr_client,
        file_store,
        record_store,
        rate_limiter.clone(),
        progress,
        deletion_auditor,
        metrics.clone(),
        transcribe_config,
        coordinator_config,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("shutdown signal received, cancelling the run");
            signal_cancel.cancel();
        }
    });

    let window_end = Utc::now();
    let window_start = window_end - ChronoDuration::days(settings.window_days);

    let summary = coordinator.run(window_start, window_end, &cancel).await;

    let json = serde_json::to_string_pretty(&summary).context("serializing run summary")?;
    println!("{json}");

    let metrics_json =
        serde_json::to_string_pretty(&metrics.snapshot(&rate_limiter)).context("serializing metrics snapshot")?;
    eprintln!("{metrics_json}");

    if summary.auth_failure {
        return Ok(ExitCode::from(3));
    }
    if summary.cancelled {
        return Ok(ExitCode::from(4));
    }
    Ok(ExitCode::SUCCESS)
}
