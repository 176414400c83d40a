//! The nightly learning loop.
//!
//! One run collects the last 24 hours of product activity, walks it
//! through the four LLM stages, persists a learning summary plus a
//! pending Master Prompt candidate, and optionally clusters agent
//! descriptions for the logs. The run itself never fails: every stage
//! degrades and the outcome is reported in a [`RunReport`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::embeddings::cluster::{cluster, group_sizes, DEFAULT_SEED};
use crate::embeddings::EmbeddingProvider;
use crate::learning::stages::{
    extract_patterns, generate_daily_insight, propose_master_prompt_update,
    summarize_conversations, EnrichedEvent,
};
use crate::learning::version::next_version;
use crate::llm::LlmProvider;
use crate::store::{DataStore, LearningSummary, MasterPrompt, TokenUsage};

/// Collection window.
pub const LOOKBACK_HOURS: i64 = 24;

/// Row caps for the three collection queries.
pub const MAX_AGENTS: i64 = 1000;
pub const MAX_EVENTS: i64 = 5000;
pub const MAX_FEEDBACKS: i64 = 1000;

/// Clustering only kicks in with at least this many agents in the window.
pub const MIN_AGENTS_FOR_CLUSTERING: usize = 10;

/// At most this many agent descriptions are embedded.
pub const MAX_EMBEDDED_AGENTS: usize = 50;

/// Upper bound on cluster count; clamped to the number of vectors.
pub const MAX_CLUSTERS: usize = 5;

/// Placeholder description for events whose agent is unknown.
const UNKNOWN_AGENT: &str = "Unknown";

/// How one run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All steps ran; persistence flags say what actually landed.
    Completed,
    /// No agents and no events in the window; nothing was done.
    SkippedNoData,
    /// No active Master Prompt exists; stopped after pattern
    /// extraction with nothing persisted.
    AbortedNoActivePrompt,
}

/// A pipeline step that took its fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Summary,
    Patterns,
    Propose,
    Insight,
    Embedding,
}

/// What one run did, for logging and the CLI.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub agents_fetched: usize,
    pub events_fetched: usize,
    pub feedbacks_fetched: usize,
    pub fallbacks: Vec<Stage>,
    pub tokens: TokenUsage,
    pub proposed_version: Option<String>,
    pub summary_persisted: bool,
    pub prompt_persisted: bool,
    pub cluster_group_sizes: Option<Vec<usize>>,
}

impl RunReport {
    fn skipped(agents: usize, events: usize, feedbacks: usize) -> Self {
        Self {
            outcome: RunOutcome::SkippedNoData,
            agents_fetched: agents,
            events_fetched: events,
            feedbacks_fetched: feedbacks,
            fallbacks: Vec::new(),
            tokens: TokenUsage::default(),
            proposed_version: None,
            summary_persisted: false,
            prompt_persisted: false,
            cluster_group_sizes: None,
        }
    }
}

/// The learning loop with its injected dependencies.
pub struct LearningLoop {
    store: Arc<dyn DataStore>,
    llm: Arc<dyn LlmProvider>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl LearningLoop {
    pub fn new(
        store: Arc<dyn DataStore>,
        llm: Arc<dyn LlmProvider>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            llm,
            embeddings,
        }
    }

    /// Execute one full run. Infallible: all failures degrade and are
    /// reflected in the returned report.
    pub async fn run(&self) -> RunReport {
        let cutoff = Utc::now() - Duration::hours(LOOKBACK_HOURS);
        info!(%cutoff, "learning loop starting");

        // Collection. A failed query counts as an empty window for
        // that collection.
        let agents = match self.store.agents_since(cutoff, MAX_AGENTS).await {
            Ok(agents) => agents,
            Err(e) => {
                warn!(error = %e, "agent collection failed, treating as empty");
                Vec::new()
            }
        };
        let events = match self.store.events_since(cutoff, MAX_EVENTS).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "event collection failed, treating as empty");
                Vec::new()
            }
        };
        let feedbacks = match self.store.feedbacks_since(cutoff, MAX_FEEDBACKS).await {
            Ok(feedbacks) => feedbacks,
            Err(e) => {
                warn!(error = %e, "feedback collection failed, treating as empty");
                Vec::new()
            }
        };

        info!(
            agents = agents.len(),
            events = events.len(),
            feedbacks = feedbacks.len(),
            "collected activity window"
        );

        if agents.is_empty() && events.is_empty() {
            info!("no agents and no events in the window, skipping run");
            return RunReport::skipped(agents.len(), events.len(), feedbacks.len());
        }

        let mut fallbacks = Vec::new();

        // Enrichment: join each event with its agent's description.
        let descriptions: HashMap<Uuid, &str> = agents
            .iter()
            .map(|a| (a.id, a.description.as_str()))
            .collect();
        let enriched: Vec<EnrichedEvent> = events
            .iter()
            .map(|event| EnrichedEvent {
                agent_description: event
                    .agent_id
                    .and_then(|id| descriptions.get(&id))
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| UNKNOWN_AGENT.to_string()),
                feedback_rating: event.feedback_rating,
                messages: event.messages.clone(),
            })
            .collect();

        // Stages 1 and 2 run before the active-prompt check, matching
        // the order data dependencies impose.
        let summary = summarize_conversations(self.llm.as_ref(), &enriched).await;
        if summary.fell_back {
            fallbacks.push(Stage::Summary);
        }

        let patterns = extract_patterns(self.llm.as_ref(), &summary.value).await;
        if patterns.fell_back {
            fallbacks.push(Stage::Patterns);
        }

        let active = match self.store.active_master_prompt().await {
            Ok(Some(prompt)) => prompt,
            Ok(None) => {
                error!("no active master prompt, aborting run without persisting");
                return RunReport {
                    outcome: RunOutcome::AbortedNoActivePrompt,
                    agents_fetched: agents.len(),
                    events_fetched: events.len(),
                    feedbacks_fetched: feedbacks.len(),
                    fallbacks,
                    tokens: TokenUsage {
                        summary: summary.tokens,
                        patterns: patterns.tokens,
                        ..TokenUsage::default()
                    }
                    .finalize(),
                    proposed_version: None,
                    summary_persisted: false,
                    prompt_persisted: false,
                    cluster_group_sizes: None,
                };
            }
            Err(e) => {
                error!(error = %e, "active master prompt lookup failed, aborting run");
                return RunReport {
                    outcome: RunOutcome::AbortedNoActivePrompt,
                    agents_fetched: agents.len(),
                    events_fetched: events.len(),
                    feedbacks_fetched: feedbacks.len(),
                    fallbacks,
                    tokens: TokenUsage {
                        summary: summary.tokens,
                        patterns: patterns.tokens,
                        ..TokenUsage::default()
                    }
                    .finalize(),
                    proposed_version: None,
                    summary_persisted: false,
                    prompt_persisted: false,
                    cluster_group_sizes: None,
                };
            }
        };

        let version = next_version(&active.version);
        info!(current = %active.version, proposed = %version, "computed candidate version");

        let proposal = propose_master_prompt_update(
            self.llm.as_ref(),
            &active.content,
            &patterns.value,
            &summary.value,
        )
        .await;
        if proposal.fell_back {
            fallbacks.push(Stage::Propose);
        }

        let insight =
            generate_daily_insight(self.llm.as_ref(), &summary.value, &patterns.value).await;
        if insight.fell_back {
            fallbacks.push(Stage::Insight);
        }

        let tokens = TokenUsage {
            summary: summary.tokens,
            patterns: patterns.tokens,
            propose: proposal.tokens,
            insight: insight.tokens,
            total: 0,
        }
        .finalize();

        // Persistence. Insert failures degrade to a flag, not an abort.
        let record = LearningSummary {
            id: Uuid::new_v4(),
            date: Utc::now().format("%Y-%m-%d").to_string(),
            summary_text: summary.value,
            patterns_extracted: patterns.value.clone(),
            proposed_master_prompt_changes: proposal.value.clone(),
            approved: false,
            daily_insight: insight.value,
            tokens_used: tokens,
            created_at: Utc::now(),
        };
        let summary_persisted = match self.store.insert_learning_summary(&record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "learning summary insert failed");
                false
            }
        };

        let candidate =
            MasterPrompt::pending(version.clone(), proposal.value, patterns.value);
        let prompt_persisted = match self.store.insert_master_prompt(&candidate).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "master prompt candidate insert failed");
                false
            }
        };

        // Observability-only enrichment; nothing downstream reads it.
        let cluster_group_sizes = if agents.len() >= MIN_AGENTS_FOR_CLUSTERING {
            let mut sizes = None;
            let texts: Vec<String> = agents
                .iter()
                .take(MAX_EMBEDDED_AGENTS)
                .map(|a| a.description.clone())
                .collect();

            match self.embeddings.embed_batch(&texts).await {
                Ok(vectors) if !vectors.is_empty() => {
                    let k = MAX_CLUSTERS.min(vectors.len());
                    let labels = cluster(&vectors, k, DEFAULT_SEED);
                    let groups = group_sizes(&labels, k);
                    info!(clusters = k, sizes = ?groups, "clustered agent descriptions");
                    sizes = Some(groups);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "embedding failed, skipping clustering");
                    fallbacks.push(Stage::Embedding);
                }
            }
            sizes
        } else {
            None
        };

        info!(
            version = %version,
            tokens = tokens.total,
            fallbacks = fallbacks.len(),
            summary_persisted,
            prompt_persisted,
            "learning loop finished"
        );

        RunReport {
            outcome: RunOutcome::Completed,
            agents_fetched: agents.len(),
            events_fetched: events.len(),
            feedbacks_fetched: feedbacks.len(),
            fallbacks,
            tokens,
            proposed_version: Some(version),
            summary_persisted,
            prompt_persisted,
            cluster_group_sizes,
        }
    }

    /// Scheduler entry point: run once and log the report. Nothing
    /// propagates; a bad night must not take the daemon down.
    pub async fn run_scheduled(&self) {
        let report = self.run().await;
        match report.outcome {
            RunOutcome::Completed => info!(
                version = ?report.proposed_version,
                tokens = report.tokens.total,
                fallbacks = report.fallbacks.len(),
                "scheduled run completed"
            ),
            RunOutcome::SkippedNoData => info!("scheduled run skipped, no data in window"),
            RunOutcome::AbortedNoActivePrompt => {
                error!("scheduled run aborted, no active master prompt")
            }
        }
    }
}
