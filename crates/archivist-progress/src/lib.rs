//! Idempotent progress tracking and the audio deletion auditor.

mod deletion;
mod store;

pub use deletion::{DeletionAuditor, DeletionError};
pub use store::{InMemoryProgressStore, ProgressStore};
