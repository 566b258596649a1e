//! Transcription-service client trait and the Transcribe Worker that drives
//! a recording through submit, poll, fetch, and normalization.

mod client;
mod worker;

pub use client::{AsrClient, AsrError, ScriptedJob, StubAsrClient, TranscriptionOptions};
pub use worker::{TranscribeConfig, TranscribeError, TranscribeWorker};
