//! Transcribe Worker: submit, poll, fetch, and normalize one recording's
//! transcription, retrying whole submit→poll→fetch cycles on transient
//! failures.

use std::sync::Arc;
use std::time::Duration;

use archivist_artifact::{compose, CanonicalArtifact, ComposeError, ComposeOptions, RawAsrResult};
use archivist_core::model::{JobStatus, Recording};
use archivist_core::ErrorKind;
use archivist_ratelimit::{EndpointGroup, RateLimiter};
use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::client::{AsrClient, AsrError, TranscriptionOptions};

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transport error after retries: {0}")]
    Transient(String),
    #[error("request rejected by service: {0}")]
    Validation(String),
    #[error("transcription job reported failure: {0}")]
    JobFailed(String),
    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
    #[error("transcription was cancelled")]
    Cancelled,
    #[error("service returned a malformed result: {0}")]
    Malformed(#[from] ComposeError),
}

impl TranscribeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscribeError::Transient(_) => ErrorKind::TransientUpstream,
            TranscribeError::Validation(_) => ErrorKind::Validation,
            TranscribeError::JobFailed(_) => ErrorKind::ServiceJobFailed,
            TranscribeError::Timeout(_) => ErrorKind::Timeout,
            TranscribeError::Cancelled => ErrorKind::Cancelled,
            TranscribeError::Malformed(_) => ErrorKind::Validation,
        }
    }
}

impl From<AsrError> for TranscribeError {
    fn from(e: AsrError) -> Self {
        match e {
            AsrError::Transient(m) => TranscribeError::Transient(m),
            AsrError::Validation(m) => TranscribeError::Validation(m),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscribeConfig {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub options: TranscriptionOptions,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(3600),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            options: TranscriptionOptions::default(),
        }
    }
}

pub struct TranscribeWorker<C: AsrClient> {
    client: Arc<C>,
    rate_limiter: Arc<RateLimiter>,
    config: TranscribeConfig,
}

impl<C: AsrClient> TranscribeWorker<C> {
    pub fn new(client: Arc<C>, rate_limiter: Arc<RateLimiter>, config: TranscribeConfig) -> Self {
        Self {
            client,
            rate_limiter,
            config,
        }
    }

    #[instrument(skip(self, audio, cancel))]
    pub async fn transcribe(
        &self,
        recording: &Recording,
        audio: &[u8],
        cancel: &CancellationToken,
    ) -> Result<CanonicalArtifact, TranscribeError> {
        let mut last_transient = None;

        for attempt in 1..=self.config.max_retries {
            match self.attempt_once(recording, audio, cancel).await {
                Ok(artifact) => return Ok(artifact),
                Err(TranscribeError::Transient(message)) => {
                    warn!(recording_id = %recording.recording_id, attempt, "transcription cycle failed transiently");
                    last_transient = Some(TranscribeError::Transient(message));
                    if attempt < self.config.max_retries {
                        let backoff = self.config.retry_delay * attempt;
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = cancel.cancelled() => return Err(TranscribeError::Cancelled),
                        }
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_transient.unwrap_or(TranscribeError::Transient("retries exhausted".to_string())))
    }

    async fn attempt_once(
        &self,
        recording: &Recording,
        audio: &[u8],
        cancel: &CancellationToken,
    ) -> Result<CanonicalArtifact, TranscribeError> {
        self.rate_limiter
            .wait("asr-submit", EndpointGroup::Heavy, cancel)
            .await
            .map_err(|_| TranscribeError::Cancelled)?;

        let submitted_at = Utc::now();
        let job_id = self.client.submit(audio, &self.config.options).await?;
        info!(recording_id = %recording.recording_id, job_id, "submitted transcription job");

        let deadline = Instant::now() + self.config.max_wait;

        loop {
            if Instant::now() >= deadline {
                let _ = self.client.cancel(&job_id).await;
                return Err(TranscribeError::Timeout(self.config.max_wait));
            }

            self.rate_limiter
                .wait("asr-poll", EndpointGroup::Medium, cancel)
                .await
                .map_err(|_| TranscribeError::Cancelled)?;

            let status = self.client.poll(&job_id).await?;
            match status {
                JobStatus::Pending | JobStatus::Submitted | JobStatus::Running => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = cancel.cancelled() => {
                            let _ = self.client.cancel(&job_id).await;
                            return Err(TranscribeError::Cancelled);
                        }
                    }
                }
                JobStatus::Succeeded => break,
                JobStatus::Failed => {
                    return Err(TranscribeError::JobFailed(format!(
                        "job {job_id} reported failed status"
                    )))
                }
                JobStatus::Cancelled => return Err(TranscribeError::Cancelled),
                JobStatus::Timeout => return Err(TranscribeError::Timeout(self.config.max_wait)),
            }
        }

        let raw: RawAsrResult = self.client.fetch_result(&job_id).await?;
        let completed_at = Utc::now();
        let processing_seconds = (completed_at - submitted_at).num_milliseconds() as f64 / 1000.0;

        let artifact = compose(
            recording,
            &job_id,
            raw,
            ComposeOptions {
                diarization_enabled: self.config.options.diarization,
                requested_language: &self.config.options.language,
            },
            submitted_at,
            completed_at,
            processing_seconds,
        )?;

        info!(recording_id = %recording.recording_id, job_id, words = artifact.word_count, "transcription complete");
        Ok(artifact)
    }
}
