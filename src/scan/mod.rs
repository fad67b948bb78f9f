//! Scan orchestration: step sequencing, lifecycle, progress and per-step hooks.

pub mod events;
pub mod hooks;
pub mod orchestrator;
pub mod plan;
pub mod progress;

pub use events::{CompletionReason, ScanEvent, ScanState};
pub use hooks::{HookOutcome, HookPipeline, LiveDisplay, TracingDisplay};
pub use orchestrator::ScanOrchestrator;
pub use plan::{plan, StepPlan};
pub use progress::{ProgressSnapshot, ProgressTracker};
