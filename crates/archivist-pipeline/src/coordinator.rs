use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use archivist_artifact::CanonicalArtifact;
use archivist_asr::{AsrClient, TranscribeConfig, TranscribeError, TranscribeWorker};
use archivist_core::model::{PipelineProgress, Recording, StageState};
use archivist_core::ErrorKind;
use archivist_metrics::{JobEvent, MetricsCollector, Outcome, Stage};
use archivist_progress::{DeletionAuditor, ProgressStore};
use archivist_provider::{FetchSummary, Fetcher, TelephonyClient};
use archivist_ratelimit::RateLimiter;
use archivist_store::{FileStoreClient, PersistError, PersistWorker, RecordStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound on how many `transcribed` rows a single run will try to
/// resume, so one pathologically large backlog can't starve new fetches.
const RESUME_LIMIT: usize = 1000;

/// Pool sizes and the local directory audio is staged into between
/// download and deletion.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub transcribe_workers: usize,
    pub persist_workers: usize,
    pub stage_dir: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            transcribe_workers: 3,
            persist_workers: 3,
            stage_dir: PathBuf::from("."),
        }
    }
}

/// Per-stage counts for one `run` invocation, plus whether it ended early
/// due to cancellation.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct RunSummary {
    pub discovered: u32,
    pub transcribed: u32,
    pub persisted: u32,
    pub failed: u32,
    pub cancelled: bool,
    pub fetch: FetchSummary,
    /// Set when the fetch stage ended in an upstream authentication
    /// failure rather than completing or being cancelled.
    pub auth_failure: bool,
    pub fetch_error: Option<String>,
    /// One entry per recording that ended the run in `Failed`, carrying the
    /// taxonomy kind of whichever error sent it there.
    pub failures: Vec<(String, ErrorKind)>,
}

#[derive(Default)]
struct Counters {
    transcribed: AtomicU32,
    persisted: AtomicU32,
    failed: AtomicU32,
    failures: Mutex<Vec<(String, ErrorKind)>>,
}

impl Counters {
    fn record_failure(&self, recording_id: String, kind: ErrorKind) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.failures.lock().push((recording_id, kind));
    }
}

/// Hosts the three bounded worker pools described for the run: a single
/// Fetch worker, `N` Transcribe workers, `M` Persist workers, joined by two
/// bounded channels. `run` owns the full lifecycle — start pools, start the
/// Fetcher, wait for input exhaustion, drain, stop pools — and returns once
/// every spawned task has exited, cancelled or not.
pub struct PipelineCoordinator<C, A, F, R>
where
    C: TelephonyClient + 'static,
    A: AsrClient + 'static,
    F: FileStoreClient + 'static,
    R: RecordStore + 'static,
{
    telephony_client: Arc<C>,
    fetcher: Arc<Fetcher<C>>,
    transcribe_worker: Arc<TranscribeWorker<A>>,
    persist_worker: Arc<PersistWorker<F, R>>,
    progress: Arc<dyn ProgressStore>,
    metrics: Arc<MetricsCollector>,
    config: CoordinatorConfig,
}

impl<C, A, F, R> PipelineCoordinator<C, A, F, R>
where
    C: TelephonyClient + 'static,
    A: AsrClient + 'static,
    F: FileStoreClient + 'static,
    R: RecordStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        telephony_client: Arc<C>,
        asr_client: Arc<A>,
        file_store: Arc<F>,
        record_store: Arc<R>,
        rate_limiter: Arc<RateLimiter>,
        progress: Arc<dyn ProgressStore>,
        deletion_auditor: Arc<DeletionAuditor>,
        metrics: Arc<MetricsCollector>,
        transcribe_config: TranscribeConfig,
        config: CoordinatorConfig,
    ) -> Self {
        let fetcher = Arc::new(Fetcher::new(
            telephony_client.clone(),
            rate_limiter.clone(),
            progress.clone(),
        ));
        let transcribe_worker = Arc::new(TranscribeWorker::new(
            asr_client,
            rate_limiter.clone(),
            transcribe_config,
        ));
        let persist_worker = Arc::new(PersistWorker::new(
            file_store,
            record_store,
            deletion_auditor,
            rate_limiter,
        ));

        Self {
            telephony_client,
            fetcher,
            transcribe_worker,
            persist_worker,
            progress,
            metrics,
            config,
        }
    }

    fn audio_path(&self, recording_id: &str) -> PathBuf {
        self.config.stage_dir.join(format!("{recording_id}.mp3"))
    }

    /// Runs one fetch/transcribe/persist pass over `[window_start, window_end]`
    /// and returns a summary, partial if `cancel` fires before completion.
    pub async fn run(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let counters = Arc::new(Counters::default());

        let transcribe_cap = (2 * self.config.transcribe_workers.max(1)) as usize;
        let persist_cap = (2 * self.config.persist_workers.max(1)) as usize;

        let (rec_tx, mut rec_rx) = mpsc::channel::<Recording>(transcribe_cap);
        let (art_tx, mut art_rx) = mpsc::channel::<(Recording, CanonicalArtifact)>(persist_cap);

        let fetch_handle = {
            let fetcher = self.fetcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { fetcher.fetch(window_start, window_end, &rec_tx, &cancel).await })
        };

        // A prior run may have left recordings at `transcribed` — deleted
        // from neither the DB nor disk yet, but skipped by the Fetcher's
        // dedup check since they're no longer `failed`. Resume those
        // alongside the fresh fetch rather than leaving them stranded.
        let resume_handle = {
            let progress = self.progress.clone();
            let persist_worker = self.persist_worker.clone();
            let metrics = self.metrics.clone();
            let counters = counters.clone();
            let persist_workers = self.config.persist_workers;
            let stage_dir = self.config.stage_dir.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                resume_transcribed(progress, persist_worker, metrics, counters, persist_workers, stage_dir, cancel)
                    .await
            })
        };

        let transcribe_sem = Arc::new(Semaphore::new(self.config.transcribe_workers.max(1)));
        let mut transcribe_tasks = JoinSet::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = rec_rx.recv() => item,
            };

            let Some(recording) = next else { break };

            let permit = transcribe_sem
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");

            let telephony_client = self.telephony_client.clone();
            let transcribe_worker = self.transcribe_worker.clone();
            let progress = self.progress.clone();
            let metrics = self.metrics.clone();
            let counters = counters.clone();
            let art_tx = art_tx.clone();
            let audio_path = self.audio_path(&recording.recording_id);
            let cancel = cancel.clone();

            transcribe_tasks.spawn(async move {
                let _permit = permit;
                transcribe_one(
                    recording,
                    audio_path,
                    telephony_client,
                    transcribe_worker,
                    progress,
                    metrics,
                    counters,
                    art_tx,
                    cancel,
                )
                .await
            });

            reap_panics(&mut transcribe_tasks, "transcribe").await;
        }
        drop(art_tx);

        drain_panics(&mut transcribe_tasks, "transcribe").await;

        let persist_sem = Arc::new(Semaphore::new(self.config.persist_workers.max(1)));
        let mut persist_tasks = JoinSet::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = art_rx.recv() => item,
            };

            let Some((recording, artifact)) = next else { break };

            let permit = persist_sem
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");

            let persist_worker = self.persist_worker.clone();
            let progress = self.progress.clone();
            let metrics = self.metrics.clone();
            let counters = counters.clone();
            let audio_path = self.audio_path(&recording.recording_id);
            let cancel = cancel.clone();

            persist_tasks.spawn(async move {
                let _permit = permit;
                persist_one(recording, artifact, audio_path, persist_worker, progress, metrics, counters, cancel).await
            });

            reap_panics(&mut persist_tasks, "persist").await;
        }

        drain_panics(&mut persist_tasks, "persist").await;

        if let Err(join_err) = resume_handle.await {
            error!(error = %join_err, "resume-transcribed task panicked");
        }

        let (fetch_summary, auth_failure, fetch_error) = match fetch_handle.await {
            Ok(Ok(summary)) => (summary, false, None),
            Ok(Err(archivist_provider::FetchError::Auth(message))) => {
                error!(message, "fetch stage aborted on an upstream auth failure");
                (FetchSummary::default(), true, Some(message))
            }
            Ok(Err(err)) => {
                warn!(error = %err, "fetch stage ended with an error");
                (FetchSummary::default(), false, Some(err.to_string()))
            }
            Err(join_err) => {
                error!(error = %join_err, "fetch task panicked");
                (FetchSummary::default(), false, Some(join_err.to_string()))
            }
        };

        RunSummary {
            discovered: fetch_summary.recordings_discovered,
            transcribed: counters.transcribed.load(Ordering::SeqCst),
            persisted: counters.persisted.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            cancelled: cancel.is_cancelled(),
            fetch: fetch_summary,
            auth_failure,
            fetch_error,
            failures: counters.failures.lock().clone(),
        }
    }
}

/// Reaps any already-finished tasks without blocking, logging panics so one
/// bad task never silently vanishes.
async fn reap_panics<T>(tasks: &mut JoinSet<T>, stage: &'static str) {
    while let Some(result) = tasks.try_join_next() {
        log_if_panicked(result, stage);
    }
}

/// Blocks until every remaining task in the pool has exited, logging panics.
async fn drain_panics<T>(tasks: &mut JoinSet<T>, stage: &'static str) {
    while let Some(result) = tasks.join_next().await {
        log_if_panicked(result, stage);
    }
}

fn log_if_panicked<T>(result: Result<T, tokio::task::JoinError>, stage: &'static str) {
    if let Err(join_err) = result {
        if join_err.is_panic() {
            error!(stage, error = %join_err, "worker task panicked; continuing with the rest of the pool");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn transcribe_one<C: TelephonyClient, A: AsrClient>(
    recording: Recording,
    audio_path: PathBuf,
    telephony_client: Arc<C>,
    transcribe_worker: Arc<TranscribeWorker<A>>,
    progress: Arc<dyn ProgressStore>,
    metrics: Arc<MetricsCollector>,
    counters: Arc<Counters>,
    art_tx: mpsc::Sender<(Recording, CanonicalArtifact)>,
    cancel: CancellationToken,
) {
    let recording_id = recording.recording_id.clone();

    if !progress.claim(&recording_id, StageState::Discovered, StageState::Downloaded) {
        info!(recording_id, "discovered->downloaded claim lost to another coordinator, dropping");
        return;
    }

    let audio = match telephony_client.download_audio(&recording.content_uri).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(recording_id, error = %err, "audio download failed");
            progress.mark_failed(&recording_id, &err.to_string());
            counters.record_failure(recording_id.clone(), err.kind());
            metrics.record(failure_event(recording_id, Stage::Fetch, None));
            return;
        }
    };

    if let Some(parent) = audio_path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(recording_id, error = %err, "failed to create staging directory");
            progress.mark_failed(&recording_id, &err.to_string());
            counters.record_failure(recording_id, ErrorKind::LocalIO);
            return;
        }
    }
    if let Err(err) = fs::write(&audio_path, &audio) {
        warn!(recording_id, error = %err, "failed to stage audio to disk");
        progress.mark_failed(&recording_id, &err.to_string());
        counters.record_failure(recording_id, ErrorKind::LocalIO);
        return;
    }

    if !progress.claim(&recording_id, StageState::Downloaded, StageState::Transcribing) {
        info!(recording_id, "downloaded->transcribing claim lost to another coordinator, dropping");
        return;
    }

    let started = Instant::now();
    match transcribe_worker.transcribe(&recording, &audio, &cancel).await {
        Ok(artifact) => {
            progress.claim(&recording_id, StageState::Transcribing, StageState::Transcribed);
            counters.transcribed.fetch_add(1, Ordering::SeqCst);
            metrics.record(JobEvent {
                recording_id: recording_id.clone(),
                stage: Stage::Transcribe,
                outcome: Outcome::Succeeded,
                processing_seconds: Some(started.elapsed().as_secs_f64()),
                audio_duration_seconds: Some(artifact.audio_duration_seconds),
                message: None,
                recorded_at: Utc::now(),
            });
            if art_tx.send((recording, artifact)).await.is_err() {
                info!(recording_id, "persist channel closed, dropping transcribed artifact");
            }
        }
        Err(TranscribeError::Cancelled) => {
            info!(recording_id, "transcription cancelled, left at transcribing for next run");
        }
        Err(err) => {
            warn!(recording_id, error = %err, "transcription failed");
            progress.mark_failed(&recording_id, &err.to_string());
            counters.record_failure(recording_id.clone(), err.kind());
            metrics.record(JobEvent {
                recording_id,
                stage: Stage::Transcribe,
                outcome: timeout_or_failed(&err),
                processing_seconds: Some(started.elapsed().as_secs_f64()),
                audio_duration_seconds: None,
                message: Some(err.to_string()),
                recorded_at: Utc::now(),
            });
        }
    }
}

fn timeout_or_failed(err: &TranscribeError) -> Outcome {
    match err {
        TranscribeError::Timeout(_) => Outcome::Timeout,
        _ => Outcome::Failed,
    }
}

fn failure_event(recording_id: String, stage: Stage, audio_duration_seconds: Option<f64>) -> JobEvent {
    JobEvent {
        recording_id,
        stage,
        outcome: Outcome::Failed,
        processing_seconds: None,
        audio_duration_seconds,
        message: None,
        recorded_at: Utc::now(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn persist_one<F: FileStoreClient, R: RecordStore>(
    recording: Recording,
    artifact: CanonicalArtifact,
    audio_path: PathBuf,
    persist_worker: Arc<PersistWorker<F, R>>,
    progress: Arc<dyn ProgressStore>,
    metrics: Arc<MetricsCollector>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let recording_id = recording.recording_id.clone();
    let started = Instant::now();

    match persist_worker.persist(&artifact, &audio_path, &cancel).await {
        Ok(_deletion_record) => {
            progress.claim(&recording_id, StageState::Transcribed, StageState::Persisted);
            counters.persisted.fetch_add(1, Ordering::SeqCst);
            metrics.record(JobEvent {
                recording_id,
                stage: Stage::Persist,
                outcome: Outcome::Succeeded,
                processing_seconds: Some(started.elapsed().as_secs_f64()),
                audio_duration_seconds: Some(artifact.audio_duration_seconds),
                message: None,
                recorded_at: Utc::now(),
            });
        }
        Err(PersistError::Cancelled) => {
            info!(recording_id, "persist cancelled, left at transcribed for next run");
        }
        Err(err @ PersistError::Deletion(_)) => {
            warn!(recording_id, error = %err, "deletion could not be verified, leaving transcribed for retry");
            metrics.record(JobEvent {
                recording_id,
                stage: Stage::Persist,
                outcome: Outcome::Failed,
                processing_seconds: Some(started.elapsed().as_secs_f64()),
                audio_duration_seconds: None,
                message: Some(err.to_string()),
                recorded_at: Utc::now(),
            });
        }
        Err(err) => {
            warn!(recording_id, error = %err, "persist failed");
            progress.mark_failed(&recording_id, &err.to_string());
            counters.record_failure(recording_id.clone(), err.kind());
            metrics.record(JobEvent {
                recording_id,
                stage: Stage::Persist,
                outcome: Outcome::Failed,
                processing_seconds: Some(started.elapsed().as_secs_f64()),
                audio_duration_seconds: None,
                message: Some(err.to_string()),
                recorded_at: Utc::now(),
            });
        }
    }
}

/// Finds recordings a prior run left at `transcribed` and retries their
/// deletion. Runs with its own bounded pool so it can proceed alongside the
/// fresh fetch rather than waiting for it.
async fn resume_transcribed<F: FileStoreClient, R: RecordStore>(
    progress: Arc<dyn ProgressStore>,
    persist_worker: Arc<PersistWorker<F, R>>,
    metrics: Arc<MetricsCollector>,
    counters: Arc<Counters>,
    persist_workers: usize,
    stage_dir: PathBuf,
    cancel: CancellationToken,
) {
    let rows: Vec<PipelineProgress> = progress.list_by_state(StageState::Transcribed, RESUME_LIMIT);
    if rows.is_empty() {
        return;
    }
    info!(count = rows.len(), "resuming recordings left transcribed by a prior run");

    let sem = Arc::new(Semaphore::new(persist_workers.max(1)));
    let mut tasks = JoinSet::new();

    for row in rows {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = sem.clone().acquire_owned() => permit.expect("semaphore is never closed"),
        };

        let persist_worker = persist_worker.clone();
        let progress = progress.clone();
        let metrics = metrics.clone();
        let counters = counters.clone();
        let audio_path = stage_dir.join(format!("{}.mp3", row.recording_id));

        tasks.spawn(async move {
            let _permit = permit;
            resume_one(row.recording_id, audio_path, persist_worker, progress, metrics, counters).await
        });

        reap_panics(&mut tasks, "resume-persist").await;
    }

    drain_panics(&mut tasks, "resume-persist").await;
}

async fn resume_one<F: FileStoreClient, R: RecordStore>(
    recording_id: String,
    audio_path: PathBuf,
    persist_worker: Arc<PersistWorker<F, R>>,
    progress: Arc<dyn ProgressStore>,
    metrics: Arc<MetricsCollector>,
    counters: Arc<Counters>,
) {
    let started = Instant::now();

    match persist_worker.resume(&recording_id, &audio_path).await {
        Ok(_deletion_record) => {
            progress.claim(&recording_id, StageState::Transcribed, StageState::Persisted);
            counters.persisted.fetch_add(1, Ordering::SeqCst);
            metrics.record(JobEvent {
                recording_id,
                stage: Stage::Persist,
                outcome: Outcome::Succeeded,
                processing_seconds: Some(started.elapsed().as_secs_f64()),
                audio_duration_seconds: None,
                message: None,
                recorded_at: Utc::now(),
            });
        }
        Err(PersistError::Cancelled) => {
            info!(recording_id, "resume cancelled, left at transcribed for next run");
        }
        Err(err @ PersistError::Deletion(_)) => {
            warn!(recording_id, error = %err, "deletion still could not be verified, leaving transcribed for retry");
            metrics.record(JobEvent {
                recording_id,
                stage: Stage::Persist,
                outcome: Outcome::Failed,
                processing_seconds: Some(started.elapsed().as_secs_f64()),
                audio_duration_seconds: None,
                message: Some(err.to_string()),
                recorded_at: Utc::now(),
            });
        }
        Err(err) => {
            warn!(recording_id, error = %err, "resume failed");
            progress.mark_failed(&recording_id, &err.to_string());
            counters.record_failure(recording_id.clone(), err.kind());
            metrics.record(JobEvent {
                recording_id,
                stage: Stage::Persist,
                outcome: Outcome::Failed,
                processing_seconds: Some(started.elapsed().as_secs_f64()),
                audio_duration_seconds: None,
                message: Some(err.to_string()),
                recorded_at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_artifact::{RawAsrResult, RawSegment};
    use archivist_asr::{ScriptedJob, StubAsrClient, TranscriptionOptions};
    use archivist_core::model::{Direction, JobStatus};
    use archivist_progress::InMemoryProgressStore;
    use archivist_provider::{CallLogPage, StubTelephonyClient};
    use archivist_store::{InMemoryFileStoreClient, InMemoryRecordStore};
    use std::time::Duration;

    fn recording(id: &str) -> Recording {
        Recording {
            recording_id: id.to_string(),
            call_id: "call".to_string(),
            session_id: "session".to_string(),
            start_time: "2025-01-15T10:00:00Z".parse().unwrap(),
            duration_seconds: 30,
            from_number: "111".to_string(),
            to_number: "222".to_string(),
            from_name: String::new(),
            to_name: String::new(),
            direction: Direction::Inbound,
            content_uri: format!("handle://{id}"),
        }
    }

    fn succeeding_result() -> RawAsrResult {
        RawAsrResult {
            text: "hello world".to_string(),
            segments: vec![RawSegment {
                start: 0.0,
                end: 1.0,
                text: "hello world".to_string(),
                confidence: Some(0.9),
                speaker: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn happy_path_persists_a_single_discovered_recording() {
        let dir = tempfile::tempdir().unwrap();

        let telephony = Arc::new(
            StubTelephonyClient::new(vec![CallLogPage {
                records: vec![recording("r1")],
                has_more: false,
            }])
            .with_audio("handle://r1", b"fake audio bytes".to_vec()),
        );
        let asr = Arc::new(StubAsrClient::new(vec![ScriptedJob::new(
            vec![JobStatus::Submitted, JobStatus::Succeeded],
            succeeding_result(),
        )]));
        let file_store = Arc::new(InMemoryFileStoreClient::new());
        let record_store = Arc::new(InMemoryRecordStore::new());
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::new());
        let rate_limiter = Arc::new(RateLimiter::new());
        let auditor = Arc::new(DeletionAuditor::new(dir.path(), dir.path().join("audit.jsonl")));
        let metrics = Arc::new(MetricsCollector::new());

        let coordinator = PipelineCoordinator::new(
            telephony,
            asr,
            file_store,
            record_store,
            rate_limiter,
            progress.clone(),
            auditor,
            metrics,
            TranscribeConfig {
                poll_interval: Duration::from_millis(1),
                retry_delay: Duration::from_millis(1),
                ..TranscribeConfig::default()
            },
            CoordinatorConfig {
                transcribe_workers: 2,
                persist_workers: 2,
                stage_dir: dir.path().to_path_buf(),
            },
        );

        let cancel = CancellationToken::new();
        let summary = coordinator.run(Utc::now(), Utc::now(), &cancel).await;

        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.transcribed, 1);
        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.failed, 0);
        assert!(!summary.cancelled);
        assert_eq!(progress.get("r1").unwrap().stage_state, StageState::Persisted);
        assert!(!dir.path().join("r1.mp3").exists(), "audio must be deleted after persist");
    }

    #[tokio::test]
    async fn already_persisted_recording_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();

        let telephony = Arc::new(StubTelephonyClient::new(vec![CallLogPage {
            records: vec![recording("r1")],
            has_more: false,
        }]));
        let asr = Arc::new(StubAsrClient::new(vec![]));
        let file_store = Arc::new(InMemoryFileStoreClient::new());
        let record_store = Arc::new(InMemoryRecordStore::new());
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::new());
        progress.upsert(&recording("r1"));
        progress.claim("r1", StageState::Discovered, StageState::Downloaded);
        progress.claim("r1", StageState::Downloaded, StageState::Transcribing);
        progress.claim("r1", StageState::Transcribing, StageState::Transcribed);
        progress.claim("r1", StageState::Transcribed, StageState::Persisted);

        let rate_limiter = Arc::new(RateLimiter::new());
        let auditor = Arc::new(DeletionAuditor::new(dir.path(), dir.path().join("audit.jsonl")));
        let metrics = Arc::new(MetricsCollector::new());

        let coordinator = PipelineCoordinator::new(
            telephony,
            asr,
            file_store,
            record_store,
            rate_limiter,
            progress.clone(),
            auditor,
            metrics,
            TranscribeConfig::default(),
            CoordinatorConfig {
                transcribe_workers: 1,
                persist_workers: 1,
                stage_dir: dir.path().to_path_buf(),
            },
        );

        let cancel = CancellationToken::new();
        let summary = coordinator.run(Utc::now(), Utc::now(), &cancel).await;

        assert_eq!(summary.discovered, 0);
        assert_eq!(summary.transcribed, 0);
        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.fetch.recordings_deduplicated, 1);
    }

    #[tokio::test]
    async fn asr_timeout_marks_the_recording_failed_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();

        let telephony = Arc::new(
            StubTelephonyClient::new(vec![CallLogPage {
                records: vec![recording("r1")],
                has_more: false,
            }])
            .with_audio("handle://r1", b"fake audio bytes".to_vec()),
        );
        let asr = Arc::new(StubAsrClient::new(vec![ScriptedJob::new(
            vec![JobStatus::Submitted],
            succeeding_result(),
        )]));
        let file_store = Arc::new(InMemoryFileStoreClient::new());
        let record_store = Arc::new(InMemoryRecordStore::new());
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::new());
        let rate_limiter = Arc::new(RateLimiter::new());
        let auditor = Arc::new(DeletionAuditor::new(dir.path(), dir.path().join("audit.jsonl")));
        let metrics = Arc::new(MetricsCollector::new());

        let coordinator = PipelineCoordinator::new(
            telephony,
            asr,
            file_store,
            record_store.clone(),
            rate_limiter,
            progress.clone(),
            auditor,
            metrics,
            TranscribeConfig {
                max_wait: Duration::from_millis(5),
                poll_interval: Duration::from_millis(50),
                max_retries: 1,
                options: TranscriptionOptions::default(),
                ..TranscribeConfig::default()
            },
            CoordinatorConfig {
                transcribe_workers: 1,
                persist_workers: 1,
                stage_dir: dir.path().to_path_buf(),
            },
        );

        let cancel = CancellationToken::new();
        let summary = coordinator.run(Utc::now(), Utc::now(), &cancel).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.failures, vec![("r1".to_string(), ErrorKind::Timeout)]);
        assert_eq!(progress.get("r1").unwrap().stage_state, StageState::Failed);
        assert!(record_store.get("r1").is_none());
        assert!(dir.path().join("r1.mp3").exists(), "audio is never deleted for a failed transcription");
    }

    #[tokio::test]
    async fn a_run_resumes_a_recording_a_prior_run_left_transcribed() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("r1.mp3");
        std::fs::write(&audio_path, b"fake audio bytes").unwrap();

        let telephony = Arc::new(StubTelephonyClient::new(vec![]));
        let asr = Arc::new(StubAsrClient::new(vec![]));
        let file_store = Arc::new(InMemoryFileStoreClient::new());
        let record_store = Arc::new(InMemoryRecordStore::new());
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::new());
        let rate_limiter = Arc::new(RateLimiter::new());
        let auditor = Arc::new(DeletionAuditor::new(dir.path(), dir.path().join("audit.jsonl")));
        let metrics = Arc::new(MetricsCollector::new());

        progress.upsert(&recording("r1"));
        progress.claim("r1", StageState::Discovered, StageState::Downloaded);
        progress.claim("r1", StageState::Downloaded, StageState::Transcribing);
        progress.claim("r1", StageState::Transcribing, StageState::Transcribed);

        let artifact = archivist_artifact::compose(
            &recording("r1"),
            "job-1",
            succeeding_result(),
            archivist_artifact::ComposeOptions {
                diarization_enabled: false,
                requested_language: "en-US",
            },
            Utc::now(),
            Utc::now(),
            1.0,
        )
        .unwrap();
        let mut row = artifact.to_transcript_result();
        row.file_store_id = Some("file-1".to_string());
        record_store.upsert(&row).unwrap();

        let coordinator = PipelineCoordinator::new(
            telephony,
            asr,
            file_store,
            record_store,
            rate_limiter,
            progress.clone(),
            auditor,
            metrics,
            TranscribeConfig::default(),
            CoordinatorConfig {
                transcribe_workers: 1,
                persist_workers: 1,
                stage_dir: dir.path().to_path_buf(),
            },
        );

        let cancel = CancellationToken::new();
        let summary = coordinator.run(Utc::now(), Utc::now(), &cancel).await;

        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(progress.get("r1").unwrap().stage_state, StageState::Persisted);
        assert!(!audio_path.exists(), "resumed audio must still be deleted");
    }
}
