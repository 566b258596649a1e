//! Shared data model for recordings, transcription jobs, and pipeline progress.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One telephony recording, as enumerated by the Fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub recording_id: String,
    pub call_id: String,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub from_number: String,
    pub to_number: String,
    pub from_name: String,
    pub to_name: String,
    pub direction: Direction,
    /// Opaque provider handle for the audio bytes; not a filesystem path.
    pub content_uri: String,
}

/// Call direction as reported by the telephony provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    Unknown,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
            Direction::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Transcription job status, mirroring the transcribe worker's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

/// One transcription attempt for a `Recording`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptJob {
    pub job_id: Option<String>,
    pub recording_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TranscriptJob {
    pub fn pending(recording_id: impl Into<String>) -> Self {
        Self {
            job_id: None,
            recording_id: recording_id.into(),
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            submitted_at: None,
            completed_at: None,
        }
    }
}

/// Sentence-level timestamp unit within a `TranscriptResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Optional, dynamically-shaped extras a transcription may carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_segments: Option<Vec<WordSegment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordSegment {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

/// Successful transcription output, normalized by the Artifact Composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub recording_id: String,
    pub job_id: String,
    pub text: String,
    pub language: String,
    pub language_probability: f64,
    pub segments: Vec<Segment>,
    pub word_count: u32,
    pub overall_confidence: f64,
    pub audio_duration_seconds: f64,
    pub processing_seconds: f64,
    pub features: Features,
    /// Set once the artifact has been uploaded to the file store.
    pub file_store_id: Option<String>,
}

/// Per-recording durable stage, driven solely by the Coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Discovered,
    Downloaded,
    Transcribing,
    Transcribed,
    Persisted,
    Failed,
}

impl StageState {
    /// The forward order recordings move through. `Failed` is reachable
    /// from any state and is handled separately by `claim`/`mark_failed`.
    fn ordinal(self) -> u8 {
        match self {
            StageState::Discovered => 0,
            StageState::Downloaded => 1,
            StageState::Transcribing => 2,
            StageState::Transcribed => 3,
            StageState::Persisted => 4,
            StageState::Failed => 5,
        }
    }

    /// True if `self -> next` is a legal forward transition (or a
    /// transition into `Failed` from anywhere).
    pub fn can_advance_to(self, next: StageState) -> bool {
        if next == StageState::Failed {
            return true;
        }
        next.ordinal() == self.ordinal() + 1
    }
}

/// Per-recording durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineProgress {
    pub recording_id: String,
    pub stage_state: StageState,
    pub updated_at: DateTime<Utc>,
    pub attempts_per_stage: HashMap<String, u32>,
    pub job_id: Option<String>,
}

impl PipelineProgress {
    pub fn new_discovered(recording_id: impl Into<String>) -> Self {
        Self {
            recording_id: recording_id.into(),
            stage_state: StageState::Discovered,
            updated_at: Utc::now(),
            attempts_per_stage: HashMap::new(),
            job_id: None,
        }
    }
}

/// Destruction method used by the Deletion Auditor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionMethod {
    Unlink,
    Overwrite,
}

/// Append-only audit entry confirming audio destruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRecord {
    pub recording_id: String,
    pub audio_path: String,
    pub bytes: u64,
    pub sha256: String,
    pub method: DeletionMethod,
    pub verified: bool,
    pub deleted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_legal() {
        assert!(StageState::Discovered.can_advance_to(StageState::Downloaded));
        assert!(StageState::Downloaded.can_advance_to(StageState::Transcribing));
        assert!(StageState::Transcribing.can_advance_to(StageState::Transcribed));
        assert!(StageState::Transcribed.can_advance_to(StageState::Persisted));
    }

    #[test]
    fn skipping_a_stage_is_illegal() {
        assert!(!StageState::Discovered.can_advance_to(StageState::Transcribing));
        assert!(!StageState::Transcribed.can_advance_to(StageState::Discovered));
    }

    #[test]
    fn any_state_can_fail() {
        assert!(StageState::Discovered.can_advance_to(StageState::Failed));
        assert!(StageState::Transcribed.can_advance_to(StageState::Failed));
    }
}
