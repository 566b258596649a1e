//! The canonical transcript artifact and the composer that builds it from a
//! raw ASR result. This is the single point where service-specific result
//! shapes collapse into one schema; everything downstream only sees that
//! schema.

mod compose;
mod raw;
mod schema;

pub use compose::{compose, ComposeError, ComposeOptions};
pub use raw::{RawAsrResult, RawSegment, RawWordSegment};
pub use schema::{ArtifactTimestamps, CallSummary, CanonicalArtifact, Party};
