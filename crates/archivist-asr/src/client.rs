//! The transcription-service client is an external collaborator: job
//! submission, status polling, and result retrieval live outside this
//! repository's core. This trait is the seam the Transcribe Worker
//! consumes; `StubAsrClient` is the in-memory implementation used by tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use archivist_artifact::RawAsrResult;
use archivist_core::model::JobStatus;
use archivist_core::ErrorKind;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsrError {
    #[error("network or transport error: {0}")]
    Transient(String),
    #[error("request rejected: {0}")]
    Validation(String),
}

impl AsrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AsrError::Transient(_) => ErrorKind::TransientUpstream,
            AsrError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Request options honoured by a quality-first transcription submission.
#[derive(Debug, Clone)]
pub struct TranscriptionOptions {
    pub language: String,
    pub engine: String,
    pub word_level_timestamps: bool,
    pub sentence_level_timestamps: bool,
    pub diarization: bool,
    pub summarize_sentences: Option<u32>,
    pub custom_vocabulary: Option<String>,
    pub custom_prompt: Option<String>,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            engine: "full".to_string(),
            word_level_timestamps: true,
            sentence_level_timestamps: true,
            diarization: false,
            summarize_sentences: None,
            custom_vocabulary: None,
            custom_prompt: None,
        }
    }
}

/// Seam for the transcription service. Production implementations live
/// outside this repository's core; only the interface the Transcribe
/// Worker consumes is specified here.
#[async_trait]
pub trait AsrClient: Send + Sync {
    async fn submit(&self, audio: &[u8], options: &TranscriptionOptions) -> Result<String, AsrError>;

    async fn poll(&self, job_id: &str) -> Result<JobStatus, AsrError>;

    /// Must only be called once `poll` has returned `JobStatus::Succeeded`.
    async fn fetch_result(&self, job_id: &str) -> Result<RawAsrResult, AsrError>;

    /// Best-effort remote cancellation; failures here are not propagated.
    async fn cancel(&self, job_id: &str) -> Result<(), AsrError>;
}

/// One scripted job lifecycle for `StubAsrClient`.
pub struct ScriptedJob {
    pub statuses: VecDeque<JobStatus>,
    pub result: RawAsrResult,
}

impl ScriptedJob {
    pub fn new(statuses: Vec<JobStatus>, result: RawAsrResult) -> Self {
        Self {
            statuses: statuses.into(),
            result,
        }
    }
}

struct TrackedJob {
    statuses: VecDeque<JobStatus>,
    last: JobStatus,
    result: RawAsrResult,
}

/// In-memory stand-in used by tests. Each `submit` call consumes the next
/// scripted job from the queue; `poll` walks that job's status sequence.
pub struct StubAsrClient {
    queue: Mutex<VecDeque<ScriptedJob>>,
    jobs: Mutex<HashMap<String, TrackedJob>>,
    next_id: AtomicU32,
    cancelled: Mutex<HashSet<String>>,
}

impl StubAsrClient {
    pub fn new(scripted: Vec<ScriptedJob>) -> Self {
        Self {
            queue: Mutex::new(scripted.into()),
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    pub fn was_cancelled(&self, job_id: &str) -> bool {
        self.cancelled.lock().unwrap().contains(job_id)
    }
}

#[async_trait]
impl AsrClient for StubAsrClient {
    async fn submit(&self, _audio: &[u8], _options: &TranscriptionOptions) -> Result<String, AsrError> {
        let scripted = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AsrError::Validation("no scripted job available".to_string()))?;

        let id = format!("stub-job-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().unwrap().insert(
            id.clone(),
            TrackedJob {
                statuses: scripted.statuses,
                last: JobStatus::Pending,
                result: scripted.result,
            },
        );
        Ok(id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, AsrError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| AsrError::Validation(format!("unknown job {job_id}")))?;
        if let Some(next) = job.statuses.pop_front() {
            job.last = next;
        }
        Ok(job.last)
    }

    async fn fetch_result(&self, job_id: &str) -> Result<RawAsrResult, AsrError> {
        let jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| AsrError::Validation(format!("unknown job {job_id}")))?;
        if job.last != JobStatus::Succeeded {
            return Err(AsrError::Validation(format!("job {job_id} has not succeeded")));
        }
        Ok(job.result.clone())
    }

    async fn cancel(&self, job_id: &str) -> Result<(), AsrError> {
        self.cancelled.lock().unwrap().insert(job_id.to_string());
        Ok(())
    }
}
