//! PostgreSQL-backed `DataStore` implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, Row};

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;
use crate::store::types::{
    Agent, ConversationEvent, Feedback, LearningSummary, MasterPrompt, PromptStatus, TokenUsage,
};
use crate::store::DataStore;

/// Database store for the service.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create a new store and connect to the database.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    /// Run database migrations (embedded via refinery).
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        use refinery::embed_migrations;
        embed_migrations!("migrations");

        let mut client = self.pool.get().await?;
        migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

fn master_prompt_from_row(row: &Row) -> Result<MasterPrompt, DatabaseError> {
    let status: String = row.get("status");
    let status: PromptStatus = status
        .parse()
        .map_err(|e: String| DatabaseError::Serialization(e))?;

    let patterns: serde_json::Value = row.get("patterns_learned");
    let patterns_learned: Vec<String> =
        serde_json::from_value(patterns).map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    Ok(MasterPrompt {
        id: row.get("id"),
        version: row.get("version"),
        content: row.get("content"),
        status,
        created_at: row.get("created_at"),
        approved_at: row.get("approved_at"),
        approved_by: row.get("approved_by"),
        patterns_learned,
    })
}

#[async_trait]
impl DataStore for PgStore {
    async fn agents_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Agent>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, description, created_at FROM agents
                 WHERE created_at >= $1 LIMIT $2",
                &[&cutoff, &limit],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Agent {
                id: row.get("id"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn events_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ConversationEvent>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, agent_id, feedback_rating, messages, created_at
                 FROM conversation_events WHERE created_at >= $1 LIMIT $2",
                &[&cutoff, &limit],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let messages: serde_json::Value = row.get("messages");
                let messages = serde_json::from_value(messages)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                Ok(ConversationEvent {
                    id: row.get("id"),
                    agent_id: row.get("agent_id"),
                    feedback_rating: row.get("feedback_rating"),
                    messages,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn feedbacks_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Feedback>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, user_id, rating, created_at FROM feedbacks
                 WHERE created_at >= $1 LIMIT $2",
                &[&cutoff, &limit],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Feedback {
                id: row.get("id"),
                user_id: row.get("user_id"),
                rating: row.get("rating"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn active_master_prompt(&self) -> Result<Option<MasterPrompt>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, version, content, status, created_at, approved_at, approved_by,
                        patterns_learned
                 FROM master_prompts WHERE status = 'active'
                 ORDER BY created_at DESC LIMIT 1",
                &[],
            )
            .await?;

        row.as_ref().map(master_prompt_from_row).transpose()
    }

    async fn master_prompt_by_version(
        &self,
        version: &str,
    ) -> Result<Option<MasterPrompt>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, version, content, status, created_at, approved_at, approved_by,
                        patterns_learned
                 FROM master_prompts WHERE version = $1
                 ORDER BY created_at DESC LIMIT 1",
                &[&version],
            )
            .await?;

        row.as_ref().map(master_prompt_from_row).transpose()
    }

    async fn pending_master_prompts(&self, limit: i64) -> Result<Vec<MasterPrompt>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, version, content, status, created_at, approved_at, approved_by,
                        patterns_learned
                 FROM master_prompts WHERE status = 'pending'
                 ORDER BY created_at DESC LIMIT $1",
                &[&limit],
            )
            .await?;

        rows.iter().map(master_prompt_from_row).collect()
    }

    async fn insert_master_prompt(&self, prompt: &MasterPrompt) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let patterns = serde_json::to_value(&prompt.patterns_learned)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO master_prompts
                (id, version, content, status, created_at, approved_at, approved_by,
                 patterns_learned)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &prompt.id,
                &prompt.version,
                &prompt.content,
                &prompt.status.as_str(),
                &prompt.created_at,
                &prompt.approved_at,
                &prompt.approved_by,
                &patterns,
            ],
        )
        .await?;

        Ok(())
    }

    async fn insert_learning_summary(
        &self,
        summary: &LearningSummary,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let patterns = serde_json::to_value(&summary.patterns_extracted)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let usage = &summary.tokens_used;

        conn.execute(
            "INSERT INTO learning_summaries
                (id, date, summary_text, patterns_extracted, proposed_master_prompt_changes,
                 approved, daily_insight, tokens_summary, tokens_patterns, tokens_propose,
                 tokens_insight, tokens_total, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            &[
                &summary.id,
                &summary.date,
                &summary.summary_text,
                &patterns,
                &summary.proposed_master_prompt_changes,
                &summary.approved,
                &summary.daily_insight,
                &(usage.summary as i32),
                &(usage.patterns as i32),
                &(usage.propose as i32),
                &(usage.insight as i32),
                &(usage.total as i32),
                &summary.created_at,
            ],
        )
        .await?;

        Ok(())
    }

    async fn approve_master_prompt(
        &self,
        version: &str,
        approved_by: &str,
    ) -> Result<(), DatabaseError> {
        let mut client = self.conn().await?;
        let tx = client.transaction().await?;

        // With colliding versions, the newest document wins.
        let row = tx
            .query_opt(
                "SELECT id, status FROM master_prompts WHERE version = $1
                 ORDER BY created_at DESC LIMIT 1",
                &[&version],
            )
            .await?;

        let row = row.ok_or_else(|| DatabaseError::NotFound {
            entity: "master_prompt".to_string(),
            id: version.to_string(),
        })?;

        let status: String = row.get("status");
        if status != PromptStatus::Pending.as_str() {
            return Err(DatabaseError::Query(format!(
                "master prompt {version} is {status}, expected pending"
            )));
        }
        let id: uuid::Uuid = row.get("id");

        // Demote the previously active document, then promote the candidate.
        tx.execute(
            "UPDATE master_prompts SET status = 'rejected' WHERE status = 'active'",
            &[],
        )
        .await?;
        tx.execute(
            "UPDATE master_prompts
             SET status = 'active', approved_at = NOW(), approved_by = $2
             WHERE id = $1",
            &[&id, &approved_by],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest_learning_summaries(
        &self,
        limit: i64,
    ) -> Result<Vec<LearningSummary>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, date, summary_text, patterns_extracted,
                        proposed_master_prompt_changes, approved, daily_insight,
                        tokens_summary, tokens_patterns, tokens_propose, tokens_insight,
                        tokens_total, created_at
                 FROM learning_summaries ORDER BY created_at DESC LIMIT $1",
                &[&limit],
            )
            .await?;

        rows.iter().map(learning_summary_from_row).collect()
    }

    async fn reject_master_prompt(&self, version: &str) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE master_prompts SET status = 'rejected'
                 WHERE version = $1 AND status = 'pending'",
                &[&version],
            )
            .await?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "pending master_prompt".to_string(),
                id: version.to_string(),
            });
        }
        Ok(())
    }
}

fn learning_summary_from_row(row: &Row) -> Result<LearningSummary, DatabaseError> {
    let patterns: serde_json::Value = row.get("patterns_extracted");
    let patterns_extracted =
        serde_json::from_value(patterns).map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    let usage = TokenUsage {
        summary: row.get::<_, i32>("tokens_summary") as u32,
        patterns: row.get::<_, i32>("tokens_patterns") as u32,
        propose: row.get::<_, i32>("tokens_propose") as u32,
        insight: row.get::<_, i32>("tokens_insight") as u32,
        total: row.get::<_, i32>("tokens_total") as u32,
    };

    Ok(LearningSummary {
        id: row.get("id"),
        date: row.get("date"),
        summary_text: row.get("summary_text"),
        patterns_extracted,
        proposed_master_prompt_changes: row.get("proposed_master_prompt_changes"),
        approved: row.get("approved"),
        daily_insight: row.get("daily_insight"),
        tokens_used: usage,
        created_at: row.get("created_at"),
    })
}
