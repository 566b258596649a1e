//! Collapses a raw ASR result into the canonical artifact shape.

use archivist_core::model::{Features, Recording, Segment, WordSegment};
use archivist_core::ErrorKind;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::raw::RawAsrResult;
use crate::schema::{ArtifactTimestamps, CallSummary, CanonicalArtifact, Party};

const DEFAULT_SEGMENT_CONFIDENCE: f64 = 0.95;
const DEFAULT_LANGUAGE_PROBABILITY: f64 = 0.99;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("service reported success but returned no text and no segments for {recording_id}")]
    MalformedResult { recording_id: String },
}

impl ComposeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ComposeError::MalformedResult { .. } => ErrorKind::Validation,
        }
    }
}

/// Options that influence composition without changing the service result
/// itself: whether diarization was requested, and what language to assume
/// when the service omits one.
#[derive(Debug, Clone)]
pub struct ComposeOptions<'a> {
    pub diarization_enabled: bool,
    pub requested_language: &'a str,
}

pub fn compose(
    recording: &Recording,
    job_id: &str,
    raw: RawAsrResult,
    options: ComposeOptions<'_>,
    submitted_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    processing_seconds: f64,
) -> Result<CanonicalArtifact, ComposeError> {
    let text = normalize_whitespace(&raw.text);

    if text.is_empty() && raw.segments.is_empty() {
        return Err(ComposeError::MalformedResult {
            recording_id: recording.recording_id.clone(),
        });
    }

    let segments: Vec<Segment> = raw
        .segments
        .iter()
        .enumerate()
        .map(|(i, s)| Segment {
            id: i as u32,
            start: s.start,
            end: s.end,
            text: s.text.trim().to_string(),
            confidence: s.confidence.unwrap_or(DEFAULT_SEGMENT_CONFIDENCE),
            speaker: if options.diarization_enabled {
                s.speaker.clone()
            } else {
                None
            },
        })
        .collect();

    let word_count = text.split_whitespace().count() as u32;

    let overall_confidence = if segments.is_empty() {
        DEFAULT_SEGMENT_CONFIDENCE
    } else {
        segments.iter().map(|s| s.confidence).sum::<f64>() / segments.len() as f64
    };

    let audio_duration_seconds = raw
        .duration_seconds
        .or_else(|| segments.last().map(|s| s.end))
        .unwrap_or(0.0);

    let speakers: Vec<String> = if options.diarization_enabled {
        let mut seen = Vec::new();
        for s in &segments {
            if let Some(speaker) = &s.speaker {
                if !seen.contains(speaker) {
                    seen.push(speaker.clone());
                }
            }
        }
        seen
    } else {
        Vec::new()
    };

    let features = Features {
        summary: raw.summary,
        srt: raw.srt,
        word_segments: if raw.word_segments.is_empty() {
            None
        } else {
            Some(
                raw.word_segments
                    .into_iter()
                    .map(|w| WordSegment {
                        word: w.word,
                        start: w.start,
                        end: w.end,
                        confidence: w.confidence.unwrap_or(DEFAULT_SEGMENT_CONFIDENCE),
                    })
                    .collect(),
            )
        },
        speakers: if speakers.is_empty() { None } else { Some(speakers) },
    };

    let language = raw
        .language
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| options.requested_language.to_string());
    let language_probability = raw.language_probability.unwrap_or(DEFAULT_LANGUAGE_PROBABILITY);

    let call = CallSummary {
        start_time: recording.start_time,
        duration_seconds: recording.duration_seconds,
        direction: recording.direction,
        from: Party {
            number: recording.from_number.clone(),
            name: recording.from_name.clone(),
        },
        to: Party {
            number: recording.to_number.clone(),
            name: recording.to_name.clone(),
        },
    };

    Ok(CanonicalArtifact::new(
        recording.recording_id.clone(),
        job_id.to_string(),
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
        ArtifactTimestamps {
            submitted: submitted_at,
            completed: completed_at,
        },
    ))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
