//! Persistent store: document types and the `DataStore` seam.

mod postgres;
mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

pub use postgres::PgStore;
pub use types::{
    Agent, ConversationEvent, Feedback, LearningSummary, MasterPrompt, Message, PromptStatus,
    TokenUsage,
};

/// Store operations the learning loop depends on.
///
/// The orchestrator holds this as an injected handle rather than reaching
/// for module-level globals, so tests can substitute an in-memory store.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Agents created at or after `cutoff`, capped at `limit` rows.
    async fn agents_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Agent>, DatabaseError>;

    /// Conversation events created at or after `cutoff`, capped at `limit`.
    async fn events_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ConversationEvent>, DatabaseError>;

    /// Feedback records created at or after `cutoff`, capped at `limit`.
    async fn feedbacks_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Feedback>, DatabaseError>;

    /// The currently active Master Prompt, if any. When convention is
    /// violated and several are active, the first match wins.
    async fn active_master_prompt(&self) -> Result<Option<MasterPrompt>, DatabaseError>;

    /// Look up a Master Prompt by its version string.
    async fn master_prompt_by_version(
        &self,
        version: &str,
    ) -> Result<Option<MasterPrompt>, DatabaseError>;

    /// Pending candidates, newest first.
    async fn pending_master_prompts(&self, limit: i64) -> Result<Vec<MasterPrompt>, DatabaseError>;

    /// Insert a new Master Prompt document. Versions are not unique:
    /// overlapping runs may insert colliding pending versions (accepted
    /// race, see DESIGN.md).
    async fn insert_master_prompt(&self, prompt: &MasterPrompt) -> Result<(), DatabaseError>;

    /// Insert one learning-summary record.
    async fn insert_learning_summary(&self, summary: &LearningSummary)
        -> Result<(), DatabaseError>;

    /// Most recent learning summaries, newest first. Admin tooling only;
    /// the loop itself is write-only here.
    async fn latest_learning_summaries(
        &self,
        limit: i64,
    ) -> Result<Vec<LearningSummary>, DatabaseError>;

    /// Admin approval: promote a pending version to active, demoting the
    /// previously active document to rejected.
    async fn approve_master_prompt(
        &self,
        version: &str,
        approved_by: &str,
    ) -> Result<(), DatabaseError>;

    /// Admin rejection of a pending version.
    async fn reject_master_prompt(&self, version: &str) -> Result<(), DatabaseError>;
}
