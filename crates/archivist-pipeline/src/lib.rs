//! Pipeline Coordinator: owns the bounded Fetch/Transcribe/Persist worker
//! pools, the channels between them, and the per-recording progress claims
//! that drive `StageState` forward.

mod coordinator;

pub use coordinator::{CoordinatorConfig, PipelineCoordinator, RunSummary};
