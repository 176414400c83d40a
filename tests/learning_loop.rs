//! End-to-end tests for the nightly run against an in-memory store and
//! a scripted LLM provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use promptloop::embeddings::MockEmbeddings;
use promptloop::error::{DatabaseError, LlmError};
use promptloop::learning::stages::{PATTERN_PARSE_FALLBACK, SUMMARY_FALLBACK};
use promptloop::learning::{seed_baseline, LearningLoop, RunOutcome, Stage, BASELINE_VERSION};
use promptloop::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use promptloop::store::{
    Agent, ConversationEvent, DataStore, Feedback, LearningSummary, MasterPrompt, PromptStatus,
};

#[derive(Default)]
struct MemoryStore {
    agents: Mutex<Vec<Agent>>,
    events: Mutex<Vec<ConversationEvent>>,
    feedbacks: Mutex<Vec<Feedback>>,
    prompts: Mutex<Vec<MasterPrompt>>,
    summaries: Mutex<Vec<LearningSummary>>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    fn with_active_prompt(version: &str, content: &str) -> Self {
        let store = Self::default();
        store.prompts.lock().unwrap().push(MasterPrompt {
            id: Uuid::new_v4(),
            version: version.to_string(),
            content: content.to_string(),
            status: PromptStatus::Active,
            created_at: Utc::now(),
            approved_at: Some(Utc::now()),
            approved_by: Some("system".to_string()),
            patterns_learned: Vec::new(),
        });
        store
    }

    fn add_agents(&self, n: usize) {
        let mut agents = self.agents.lock().unwrap();
        for i in 0..n {
            agents.push(Agent {
                id: Uuid::new_v4(),
                description: format!("agent number {i} doing task {}", i % 3),
                created_at: Utc::now(),
            });
        }
    }

    fn add_events(&self, n: usize, agent_id: Option<Uuid>) {
        let mut events = self.events.lock().unwrap();
        for i in 0..n {
            events.push(ConversationEvent {
                id: Uuid::new_v4(),
                agent_id,
                feedback_rating: if i % 2 == 0 { Some(5) } else { None },
                messages: Vec::new(),
                created_at: Utc::now(),
            });
        }
    }

    fn read_error() -> DatabaseError {
        DatabaseError::Query("simulated outage".to_string())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn agents_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Agent>, DatabaseError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::read_error());
        }
        Ok(self
            .agents
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.created_at >= cutoff)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn events_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ConversationEvent>, DatabaseError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::read_error());
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.created_at >= cutoff)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn feedbacks_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Feedback>, DatabaseError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::read_error());
        }
        Ok(self
            .feedbacks
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.created_at >= cutoff)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn active_master_prompt(&self) -> Result<Option<MasterPrompt>, DatabaseError> {
        Ok(self
            .prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.status == PromptStatus::Active)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn master_prompt_by_version(
        &self,
        version: &str,
    ) -> Result<Option<MasterPrompt>, DatabaseError> {
        Ok(self
            .prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.version == version)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn pending_master_prompts(&self, limit: i64) -> Result<Vec<MasterPrompt>, DatabaseError> {
        let mut pending: Vec<MasterPrompt> = self
            .prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.status == PromptStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|p| std::cmp::Reverse(p.created_at));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn insert_master_prompt(&self, prompt: &MasterPrompt) -> Result<(), DatabaseError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok(())
    }

    async fn insert_learning_summary(
        &self,
        summary: &LearningSummary,
    ) -> Result<(), DatabaseError> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }

    async fn latest_learning_summaries(
        &self,
        limit: i64,
    ) -> Result<Vec<LearningSummary>, DatabaseError> {
        let mut summaries: Vec<LearningSummary> = self.summaries.lock().unwrap().clone();
        summaries.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        summaries.truncate(limit as usize);
        Ok(summaries)
    }

    async fn approve_master_prompt(
        &self,
        version: &str,
        approved_by: &str,
    ) -> Result<(), DatabaseError> {
        let mut prompts = self.prompts.lock().unwrap();
        let candidate = prompts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.version == version)
            .max_by_key(|(_, p)| p.created_at)
            .map(|(i, _)| i)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "master_prompt".to_string(),
                id: version.to_string(),
            })?;

        if prompts[candidate].status != PromptStatus::Pending {
            return Err(DatabaseError::Query(format!(
                "master prompt {version} is not pending"
            )));
        }

        for prompt in prompts.iter_mut() {
            if prompt.status == PromptStatus::Active {
                prompt.status = PromptStatus::Rejected;
            }
        }
        prompts[candidate].status = PromptStatus::Active;
        prompts[candidate].approved_at = Some(Utc::now());
        prompts[candidate].approved_by = Some(approved_by.to_string());
        Ok(())
    }

    async fn reject_master_prompt(&self, version: &str) -> Result<(), DatabaseError> {
        let mut prompts = self.prompts.lock().unwrap();
        let found = prompts
            .iter_mut()
            .find(|p| p.version == version && p.status == PromptStatus::Pending);
        match found {
            Some(prompt) => {
                prompt.status = PromptStatus::Rejected;
                Ok(())
            }
            None => Err(DatabaseError::NotFound {
                entity: "pending master_prompt".to_string(),
                id: version.to_string(),
            }),
        }
    }
}

/// Provider answering each stage in order; `None` entries simulate a
/// transport failure for that call.
struct ScriptedLlm {
    responses: Mutex<Vec<Option<(String, u32)>>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<Option<(&str, u32)>>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map(|(content, tokens)| (content.to_string(), tokens)))
                    .collect(),
            ),
        }
    }

    /// A provider where all four stages succeed with fixed outputs.
    fn happy_path() -> Self {
        Self::new(vec![
            Some(("a fine day of agent building", 100)),
            Some((r#"{"patterns": ["users want travel agents", "short prompts rate higher"]}"#, 50)),
            Some(("the revised master prompt", 200)),
            Some(("I watched fifty conversations go by today.", 30)),
        ])
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let next = self.responses.lock().unwrap().remove(0);
        match next {
            Some((content, tokens)) => Ok(CompletionResponse {
                content,
                input_tokens: tokens / 2,
                output_tokens: tokens - tokens / 2,
                finish_reason: FinishReason::Stop,
            }),
            None => Err(LlmError::RequestFailed {
                provider: "scripted".to_string(),
                reason: "simulated failure".to_string(),
            }),
        }
    }
}

fn make_loop(store: Arc<MemoryStore>, llm: ScriptedLlm) -> LearningLoop {
    LearningLoop::new(store, Arc::new(llm), Arc::new(MockEmbeddings::new(64)))
}

#[tokio::test]
async fn empty_window_skips_without_touching_llm_or_store() {
    let store = Arc::new(MemoryStore::with_active_prompt("Ω_v1.0", "base"));
    // No responses scripted: any LLM call would panic on remove(0).
    let lp = make_loop(store.clone(), ScriptedLlm::new(vec![]));

    let report = lp.run().await;

    assert_eq!(report.outcome, RunOutcome::SkippedNoData);
    assert!(!report.summary_persisted);
    assert!(!report.prompt_persisted);
    assert_eq!(report.tokens.total, 0);
    assert!(store.summaries.lock().unwrap().is_empty());
    assert_eq!(store.prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_reads_degrade_to_a_skipped_run() {
    let store = Arc::new(MemoryStore::with_active_prompt("Ω_v1.0", "base"));
    store.add_agents(5);
    store.fail_reads.store(true, Ordering::SeqCst);

    let lp = make_loop(store.clone(), ScriptedLlm::new(vec![]));
    let report = lp.run().await;

    assert_eq!(report.outcome, RunOutcome::SkippedNoData);
    assert_eq!(report.agents_fetched, 0);
    assert_eq!(report.events_fetched, 0);
}

#[tokio::test]
async fn no_active_prompt_aborts_after_patterns_with_nothing_persisted() {
    let store = Arc::new(MemoryStore::default());
    store.add_agents(3);
    store.add_events(4, None);

    // Only the first two stages should ever be called.
    let lp = make_loop(
        store.clone(),
        ScriptedLlm::new(vec![
            Some(("summary", 100)),
            Some((r#"{"patterns": ["p"]}"#, 40)),
        ]),
    );
    let report = lp.run().await;

    assert_eq!(report.outcome, RunOutcome::AbortedNoActivePrompt);
    assert!(report.proposed_version.is_none());
    assert!(!report.summary_persisted);
    assert!(!report.prompt_persisted);
    // Tokens already spent are still accounted.
    assert_eq!(report.tokens.total, 140);
    assert!(store.summaries.lock().unwrap().is_empty());
    assert!(store.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn happy_path_persists_summary_and_pending_candidate() {
    let store = Arc::new(MemoryStore::with_active_prompt("Ω_v1.0", "the base prompt"));
    let agent_id = {
        store.add_agents(3);
        store.agents.lock().unwrap()[0].id
    };
    store.add_events(6, Some(agent_id));

    let lp = make_loop(store.clone(), ScriptedLlm::happy_path());
    let report = lp.run().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.proposed_version.as_deref(), Some("Ω_v1.1"));
    assert!(report.summary_persisted);
    assert!(report.prompt_persisted);
    assert!(report.fallbacks.is_empty());
    assert_eq!(report.tokens.summary, 100);
    assert_eq!(report.tokens.patterns, 50);
    assert_eq!(report.tokens.propose, 200);
    assert_eq!(report.tokens.insight, 30);
    assert_eq!(report.tokens.total, 380);
    // Fewer than ten agents: no clustering.
    assert!(report.cluster_group_sizes.is_none());

    let summaries = store.summaries.lock().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].summary_text, "a fine day of agent building");
    assert_eq!(summaries[0].patterns_extracted.len(), 2);
    assert_eq!(
        summaries[0].proposed_master_prompt_changes,
        "the revised master prompt"
    );
    assert!(!summaries[0].approved);
    assert_eq!(summaries[0].date, Utc::now().format("%Y-%m-%d").to_string());

    let prompts = store.prompts.lock().unwrap();
    let pending: Vec<_> = prompts
        .iter()
        .filter(|p| p.status == PromptStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].version, "Ω_v1.1");
    assert_eq!(pending[0].content, "the revised master prompt");
    assert_eq!(pending[0].patterns_learned.len(), 2);
    assert!(pending[0].approved_at.is_none());
}

#[tokio::test]
async fn stage_failures_degrade_and_are_reported() {
    let store = Arc::new(MemoryStore::with_active_prompt("Ω_v2.3", "keep me"));
    store.add_events(2, None);

    // Summary fails, patterns return bad JSON, propose fails, insight ok.
    let lp = make_loop(
        store.clone(),
        ScriptedLlm::new(vec![
            None,
            Some(("this is not json", 60)),
            None,
            Some(("an insight", 20)),
        ]),
    );
    let report = lp.run().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(
        report.fallbacks,
        vec![Stage::Summary, Stage::Patterns, Stage::Propose]
    );
    // Failed stages bill nothing; the parse failure keeps its tokens.
    assert_eq!(report.tokens.summary, 0);
    assert_eq!(report.tokens.patterns, 60);
    assert_eq!(report.tokens.propose, 0);
    assert_eq!(report.tokens.total, 80);

    let summaries = store.summaries.lock().unwrap();
    assert_eq!(summaries[0].summary_text, SUMMARY_FALLBACK);
    assert_eq!(
        summaries[0].patterns_extracted,
        vec![PATTERN_PARSE_FALLBACK.to_string()]
    );
    // Propose fallback keeps the active prompt verbatim.
    assert_eq!(summaries[0].proposed_master_prompt_changes, "keep me");

    let prompts = store.prompts.lock().unwrap();
    let pending = prompts
        .iter()
        .find(|p| p.status == PromptStatus::Pending)
        .unwrap();
    assert_eq!(pending.version, "Ω_v2.4");
    assert_eq!(pending.content, "keep me");
}

#[tokio::test]
async fn duplicate_runs_produce_colliding_pending_versions() {
    let store = Arc::new(MemoryStore::with_active_prompt("Ω_v1.0", "base"));
    store.add_events(1, None);

    let lp = make_loop(store.clone(), ScriptedLlm::happy_path());
    lp.run().await;
    let lp = make_loop(store.clone(), ScriptedLlm::happy_path());
    lp.run().await;

    // The active prompt never changed, so both runs propose the same
    // version and both documents are kept.
    let prompts = store.prompts.lock().unwrap();
    let pending: Vec<_> = prompts
        .iter()
        .filter(|p| p.status == PromptStatus::Pending && p.version == "Ω_v1.1")
        .collect();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn clustering_runs_with_enough_agents_and_covers_all_of_them() {
    let store = Arc::new(MemoryStore::with_active_prompt("Ω_v1.0", "base"));
    store.add_agents(12);
    store.add_events(30, None);

    let lp = make_loop(store.clone(), ScriptedLlm::happy_path());
    let report = lp.run().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let sizes = report.cluster_group_sizes.expect("clustering should run");
    assert_eq!(sizes.len(), 5);
    assert_eq!(sizes.iter().sum::<usize>(), 12);
    assert!(!report.fallbacks.contains(&Stage::Embedding));
}

#[tokio::test]
async fn seed_then_run_then_approve_round_trip() {
    let store = Arc::new(MemoryStore::default());

    assert!(seed_baseline(store.as_ref()).await.unwrap());
    assert!(!seed_baseline(store.as_ref()).await.unwrap());

    store.add_events(3, None);
    let lp = make_loop(store.clone(), ScriptedLlm::happy_path());
    let report = lp.run().await;
    assert_eq!(report.proposed_version.as_deref(), Some("Ω_v1.1"));

    store.approve_master_prompt("Ω_v1.1", "admin").await.unwrap();

    let active = store.active_master_prompt().await.unwrap().unwrap();
    assert_eq!(active.version, "Ω_v1.1");
    assert_eq!(active.approved_by.as_deref(), Some("admin"));

    // The old baseline is demoted, not deleted.
    let old = store
        .master_prompt_by_version(BASELINE_VERSION)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.status, PromptStatus::Rejected);
}

#[tokio::test]
async fn reject_only_touches_pending_versions() {
    let store = Arc::new(MemoryStore::with_active_prompt("Ω_v1.0", "base"));
    store.add_events(1, None);

    let lp = make_loop(store.clone(), ScriptedLlm::happy_path());
    lp.run().await;

    store.reject_master_prompt("Ω_v1.1").await.unwrap();
    assert!(store.reject_master_prompt("Ω_v1.1").await.is_err());
    assert!(store.reject_master_prompt("Ω_v1.0").await.is_err());

    // The active prompt is untouched.
    let active = store.active_master_prompt().await.unwrap().unwrap();
    assert_eq!(active.version, "Ω_v1.0");
}
