//! Baseline Master Prompt seeding.
//!
//! A fresh database has no active Master Prompt and every nightly run
//! would abort. `seed_baseline` installs version Ω_v1.0 once; repeated
//! calls are no-ops.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::{DataStore, MasterPrompt, PromptStatus};

/// Version string of the seeded baseline.
pub const BASELINE_VERSION: &str = "Ω_v1.0";

/// The baseline Master Prompt content.
pub const BASELINE_MASTER_PROMPT: &str = "\
You are an expert builder of AI agents. Given a user's description of \
what they need, you produce a complete, ready-to-use system prompt for \
that agent.

Principles:
- Understand the user's actual goal before writing; infer the missing \
context a domain expert would assume.
- Give the agent a clear role, concrete capabilities and explicit \
boundaries.
- Prefer specific, actionable instructions over generic advice.
- Keep the resulting prompt self-contained; it must work without this \
conversation as context.

Output only the finished agent prompt, with no commentary around it.";

/// Install the baseline prompt as the active version if no document
/// with [`BASELINE_VERSION`] exists yet. Returns whether an insert
/// happened.
pub async fn seed_baseline(store: &dyn DataStore) -> Result<bool, DatabaseError> {
    if store.master_prompt_by_version(BASELINE_VERSION).await?.is_some() {
        info!(version = BASELINE_VERSION, "baseline master prompt already present");
        return Ok(false);
    }

    let prompt = MasterPrompt {
        id: Uuid::new_v4(),
        version: BASELINE_VERSION.to_string(),
        content: BASELINE_MASTER_PROMPT.to_string(),
        status: PromptStatus::Active,
        created_at: Utc::now(),
        approved_at: Some(Utc::now()),
        approved_by: Some("system".to_string()),
        patterns_learned: Vec::new(),
    };
    store.insert_master_prompt(&prompt).await?;
    info!(version = BASELINE_VERSION, "seeded baseline master prompt");
    Ok(true)
}
