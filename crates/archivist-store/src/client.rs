//! The cloud file store and relational record store are external
//! collaborators: folder resolution, upload, and schema/DDL concerns live
//! outside this repository's core. These traits are the seams the Persist
//! Worker consumes; the in-memory stand-ins are used by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use archivist_core::model::TranscriptResult;
use archivist_core::ErrorKind;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("network or transport error: {0}")]
    Transient(String),
    #[error("request rejected: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Transient(_) => ErrorKind::LocalIO,
            StoreError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Seam for the cloud file store. Upload at `path` must be safe to retry:
/// callers look the path up first and only upload if it is absent.
#[async_trait]
pub trait FileStoreClient: Send + Sync {
    async fn find_by_path(&self, path: &str) -> Result<Option<String>, StoreError>;
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, StoreError>;
}

/// Seam for the relational store. `upsert` is keyed by `recording_id`.
pub trait RecordStore: Send + Sync {
    fn upsert(&self, result: &TranscriptResult) -> Result<(), StoreError>;
    fn get(&self, recording_id: &str) -> Option<TranscriptResult>;
}

/// In-memory file store used by tests: uploads are keyed by path, so a
/// second upload to the same path is a genuine overwrite rather than a
/// duplicate, matching idempotent retry semantics.
#[derive(Default)]
pub struct InMemoryFileStoreClient {
    files: Mutex<HashMap<String, (String, Vec<u8>)>>,
    next_id: Mutex<u32>,
}

impl InMemoryFileStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

#[async_trait]
impl FileStoreClient for InMemoryFileStoreClient {
    async fn find_by_path(&self, path: &str) -> Result<Option<String>, StoreError> {
        Ok(self.files.lock().unwrap().get(path).map(|(id, _)| id.clone()))
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = format!("file-{next_id}");
        self.files.lock().unwrap().insert(path.to_string(), (id.clone(), bytes));
        Ok(id)
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    rows: Mutex<HashMap<String, TranscriptResult>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn upsert(&self, result: &TranscriptResult) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .insert(result.recording_id.clone(), result.clone());
        Ok(())
    }

    fn get(&self, recording_id: &str) -> Option<TranscriptResult> {
        self.rows.lock().unwrap().get(recording_id).cloned()
    }
}
