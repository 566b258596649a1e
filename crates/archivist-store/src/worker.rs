//! Persist Worker: compose, upsert, upload, then delete — in that order, so
//! audio is never removed before the DB row and uploaded artifact exist.

use std::path::Path;
use std::sync::Arc;

use archivist_artifact::CanonicalArtifact;
use archivist_core::model::DeletionRecord;
use archivist_core::ErrorKind;
use archivist_progress::{DeletionAuditor, DeletionError};
use archivist_ratelimit::{EndpointGroup, RateLimiter};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{FileStoreClient, RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Deletion(#[from] DeletionError),
    #[error("persist was cancelled")]
    Cancelled,
    #[error("recording has no uploaded artifact on record; cannot resume without the composed result")]
    Incomplete,
}

impl PersistError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PersistError::Store(e) => e.kind(),
            PersistError::Deletion(_) => ErrorKind::DeletionFailed,
            PersistError::Cancelled => ErrorKind::Cancelled,
            PersistError::Incomplete => ErrorKind::Validation,
        }
    }
}

pub struct PersistWorker<F: FileStoreClient, R: RecordStore> {
    file_store: Arc<F>,
    record_store: Arc<R>,
    deletion_auditor: Arc<DeletionAuditor>,
    rate_limiter: Arc<RateLimiter>,
}

impl<F: FileStoreClient, R: RecordStore> PersistWorker<F, R> {
    pub fn new(
        file_store: Arc<F>,
        record_store: Arc<R>,
        deletion_auditor: Arc<DeletionAuditor>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            file_store,
            record_store,
            deletion_auditor,
            rate_limiter,
        }
    }

    pub async fn persist(
        &self,
        artifact: &CanonicalArtifact,
        audio_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DeletionRecord, PersistError> {
        let mut row = artifact.to_transcript_result();
        self.record_store.upsert(&row)?;

        self.rate_limiter
            .wait("filestore-upload", EndpointGroup::Medium, cancel)
            .await
            .map_err(|_| PersistError::Cancelled)?;

        let path = artifact.file_store_path();
        let file_id = match self.file_store.find_by_path(&path).await? {
            Some(existing) => {
                info!(recording_id = %row.recording_id, path, "artifact already uploaded, reusing file id");
                existing
            }
            None => {
                let bytes = serde_json::to_vec_pretty(artifact).expect("artifact serializes");
                self.file_store.upload(&path, bytes).await?
            }
        };

        row.file_store_id = Some(file_id);
        self.record_store.upsert(&row)?;

        let record = self.deletion_auditor.delete(&row.recording_id, audio_path)?;
        info!(recording_id = %row.recording_id, "recording fully persisted and audio destroyed");
        Ok(record)
    }

    /// Resumes a recording a prior run left at `transcribed` — the DB row
    /// and uploaded artifact already exist, so only audio destruction needs
    /// retrying. Returns `Incomplete` if the prior run never got as far as
    /// uploading, since finishing that requires the composed artifact this
    /// worker was never given.
    pub async fn resume(&self, recording_id: &str, audio_path: &Path) -> Result<DeletionRecord, PersistError> {
        match self.record_store.get(recording_id) {
            Some(row) if row.file_store_id.is_some() => {
                let record = self.deletion_auditor.delete(recording_id, audio_path)?;
                info!(recording_id, "resumed recording's audio destruction");
                Ok(record)
            }
            _ => Err(PersistError::Incomplete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryFileStoreClient, InMemoryRecordStore};
    use archivist_artifact::{compose, ComposeOptions, RawAsrResult, RawSegment};
    use archivist_core::model::{Direction, Recording};
    use chrono::Utc;
    use std::fs;

    fn recording() -> Recording {
        Recording {
            recording_id: "r1".to_string(),
            call_id: "call".to_string(),
            session_id: "session".to_string(),
            start_time: "2025-01-15T10:00:00Z".parse().unwrap(),
            duration_seconds: 30,
            from_number: "111".to_string(),
            to_number: "222".to_string(),
            from_name: String::new(),
            to_name: String::new(),
            direction: Direction::Inbound,
            content_uri: "handle://r1".to_string(),
        }
    }

    fn artifact() -> CanonicalArtifact {
        let raw = RawAsrResult {
            text: "hello world".to_string(),
            segments: vec![RawSegment {
                start: 0.0,
                end: 1.0,
                text: "hello world".to_string(),
                confidence: Some(0.9),
                speaker: None,
            }],
            ..Default::default()
        };
        compose(
            &recording(),
            "job-1",
            raw,
            ComposeOptions {
                diarization_enabled: false,
                requested_language: "en-US",
            },
            Utc::now(),
            Utc::now(),
            1.0,
        )
        .unwrap()
    }

    fn worker(
        dir: &Path,
    ) -> PersistWorker<InMemoryFileStoreClient, InMemoryRecordStore> {
        let auditor = Arc::new(DeletionAuditor::new(dir, dir.join("audit.jsonl")));
        PersistWorker::new(
            Arc::new(InMemoryFileStoreClient::new()),
            Arc::new(InMemoryRecordStore::new()),
            auditor,
            Arc::new(RateLimiter::new()),
        )
    }

    #[tokio::test]
    async fn persists_uploads_and_deletes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("r1.mp3");
        fs::write(&audio_path, b"fake audio").unwrap();

        let worker = worker(dir.path());
        let cancel = CancellationToken::new();

        let record = worker.persist(&artifact(), &audio_path, &cancel).await.unwrap();
        assert!(record.verified);
        assert!(!audio_path.exists());

        let row = worker.record_store.get("r1").unwrap();
        assert!(row.file_store_id.is_some());
    }

    #[tokio::test]
    async fn reuses_existing_upload_by_path_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("r1.mp3");
        fs::write(&audio_path, b"fake audio").unwrap();

        let file_store = Arc::new(InMemoryFileStoreClient::new());
        let record_store = Arc::new(InMemoryRecordStore::new());
        let auditor = Arc::new(DeletionAuditor::new(dir.path(), dir.path().join("audit.jsonl")));
        let worker = PersistWorker::new(
            file_store.clone(),
            record_store,
            auditor,
            Arc::new(RateLimiter::new()),
        );
        let cancel = CancellationToken::new();

        let artifact = artifact();
        let path = artifact.file_store_path();
        file_store.upload(&path, b"already uploaded".to_vec()).await.unwrap();

        worker.persist(&artifact, &audio_path, &cancel).await.unwrap();
        assert_eq!(file_store.upload_count(), 1, "must not upload twice for the same path");
    }

    #[tokio::test]
    async fn resume_retries_deletion_when_upload_already_completed() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("r1.mp3");
        fs::write(&audio_path, b"fake audio").unwrap();

        let worker = worker(dir.path());
        let mut row = artifact().to_transcript_result();
        row.file_store_id = Some("file-1".to_string());
        worker.record_store.upsert(&row).unwrap();

        let record = worker.resume("r1", &audio_path).await.unwrap();
        assert!(record.verified);
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn resume_refuses_to_finish_a_recording_that_was_never_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("r1.mp3");
        fs::write(&audio_path, b"fake audio").unwrap();

        let worker = worker(dir.path());
        let row = artifact().to_transcript_result();
        worker.record_store.upsert(&row).unwrap();

        let err = worker.resume("r1", &audio_path).await.unwrap_err();
        assert!(matches!(err, PersistError::Incomplete));
        assert!(audio_path.exists(), "audio must not be touched when resume cannot complete");
    }
}
