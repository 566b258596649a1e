//! Shared types for the call archivist pipeline.
//!
//! This crate has no I/O of its own: it defines the data model, the
//! error taxonomy, and environment-driven configuration shared by every
//! other crate in the workspace.

pub mod config;
pub mod error;
pub mod model;

pub use config::{ConfigError, ConfigOverlay, Settings};
pub use error::{ErrorKind, PipelineError};
pub use model::{
    DeletionRecord, Direction, PipelineProgress, Recording, Segment, StageState, TranscriptJob,
    TranscriptResult,
};
