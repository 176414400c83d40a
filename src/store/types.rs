//! Store document types.
//!
//! These mirror the collections the wider product writes: agents and
//! conversation data are read-only inputs to the learning loop, while
//! master prompts and learning summaries are its outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An agent created through the product's generation flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One message inside a conversation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// A recorded conversation with an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub id: Uuid,
    pub agent_id: Option<Uuid>,
    pub feedback_rating: Option<i32>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

/// A standalone user feedback record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub user_id: String,
    pub rating: i32,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a Master Prompt version.
///
/// At most one document is `Active` at a time, by convention rather than
/// database constraint; the loop reads the first active match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStatus {
    Active,
    Pending,
    Rejected,
}

impl PromptStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStatus::Active => "active",
            PromptStatus::Pending => "pending",
            PromptStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for PromptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PromptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PromptStatus::Active),
            "pending" => Ok(PromptStatus::Pending),
            "rejected" => Ok(PromptStatus::Rejected),
            other => Err(format!("unknown prompt status '{other}'")),
        }
    }
}

/// A versioned Master Prompt document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterPrompt {
    pub id: Uuid,
    pub version: String,
    pub content: String,
    pub status: PromptStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub patterns_learned: Vec<String>,
}

impl MasterPrompt {
    /// Build a new pending candidate, as the learning loop proposes it.
    pub fn pending(version: String, content: String, patterns_learned: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            version,
            content,
            status: PromptStatus::Pending,
            created_at: Utc::now(),
            approved_at: None,
            approved_by: None,
            patterns_learned,
        }
    }
}

/// Token accounting across the four LLM stages of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub summary: u32,
    pub patterns: u32,
    pub propose: u32,
    pub insight: u32,
    pub total: u32,
}

impl TokenUsage {
    /// Sum the four stage counts into `total`.
    pub fn finalize(mut self) -> Self {
        self.total = self.summary + self.patterns + self.propose + self.insight;
        self
    }
}

/// One learning-loop run's persisted result, never mutated after insert
/// (aside from the external admin approval flag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSummary {
    pub id: Uuid,
    /// Calendar day string (`YYYY-MM-DD`). Multiple runs per day append
    /// multiple records; there is no dedup.
    pub date: String,
    pub summary_text: String,
    pub patterns_extracted: Vec<String>,
    pub proposed_master_prompt_changes: String,
    pub approved: bool,
    pub daily_insight: String,
    pub tokens_used: TokenUsage,
    pub created_at: DateTime<Utc>,
}
