//! The nightly learning pipeline: stages, versioning and orchestration.

pub mod orchestrator;
pub mod seed;
pub mod stages;
pub mod version;

pub use orchestrator::{LearningLoop, RunOutcome, RunReport, Stage};
pub use seed::{seed_baseline, BASELINE_MASTER_PROMPT, BASELINE_VERSION};
pub use stages::{EnrichedEvent, StageOutput};
pub use version::{next_version, PromptVersion};
