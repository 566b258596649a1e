//! The boundary shape a transcription service hands back: loosely typed,
//! since providers vary in which fields they populate. Everything downstream
//! of `compose` only ever sees the canonical, fully-typed artifact.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: Option<f64>,
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWordSegment {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAsrResult {
    pub text: String,
    pub language: Option<String>,
    pub language_probability: Option<f64>,
    pub segments: Vec<RawSegment>,
    pub word_segments: Vec<RawWordSegment>,
    pub summary: Option<String>,
    pub srt: Option<String>,
    pub duration_seconds: Option<f64>,
}
