//! The canonical transcript document, written to the file store and derived
//! into a `TranscriptResult` row for the relational store.

use archivist_core::model::{Direction, Features, Segment, TranscriptResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SCHEMA_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub number: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSummary {
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub direction: Direction,
    pub from: Party,
    pub to: Party,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactTimestamps {
    pub submitted: DateTime<Utc>,
    pub completed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalArtifact {
    pub schema_version: String,
    pub recording_id: String,
    pub job_id: String,
    pub language: String,
    pub language_probability: f64,
    pub text: String,
    pub word_count: u32,
    pub overall_confidence: f64,
    pub audio_duration_seconds: f64,
    pub processing_seconds: f64,
    pub segments: Vec<Segment>,
    pub features: Features,
    pub call: CallSummary,
    pub timestamps: ArtifactTimestamps,
}

impl CanonicalArtifact {
    pub(crate) fn new(
        recording_id: String,
        job_id: String,
        language: String,
        language_probability: f64,
        text: String,
        word_count: u32,
        overall_confidence: f64,
        audio_duration_seconds: f64,
        processing_seconds: f64,
        segments: Vec<Segment>,
        features: Features,
        call: CallSummary,
        timestamps: ArtifactTimestamps,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            recording_id,
            job_id,
            language,
            language_probability,
            text,
            word_count,
            overall_confidence,
            audio_duration_seconds,
            processing_seconds,
            segments,
            features,
            call,
            timestamps,
        }
    }

    /// The relational-store projection of this artifact. `file_store_id` is
    /// left unset — the Persist Worker fills it in once the upload succeeds.
    pub fn to_transcript_result(&self) -> TranscriptResult {
        TranscriptResult {
            recording_id: self.recording_id.clone(),
            job_id: self.job_id.clone(),
            text: self.text.clone(),
            language: self.language.clone(),
            language_probability: self.language_probability,
            segments: self.segments.clone(),
            word_count: self.word_count,
            overall_confidence: self.overall_confidence,
            audio_duration_seconds: self.audio_duration_seconds,
            processing_seconds: self.processing_seconds,
            features: self.features.clone(),
            file_store_id: None,
        }
    }

    /// The relative path this artifact is uploaded to:
    /// `<YYYY>/<MM>/<recording_id>.json`, derived from the call's start time.
    pub fn file_store_path(&self) -> String {
        format!(
            "{}/{}.json",
            self.call.start_time.format("%Y/%m"),
            self.recording_id
        )
    }
}
