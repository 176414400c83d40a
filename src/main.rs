use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use promptloop::config::Config;
use promptloop::embeddings::OpenAiEmbeddings;
use promptloop::learning::{seed_baseline, LearningLoop, RunOutcome};
use promptloop::llm::OpenAiCompatibleProvider;
use promptloop::scheduler;
use promptloop::store::{DataStore, PgStore};

#[derive(Parser)]
#[command(name = "promptloop", about = "Nightly learning loop service", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: migrate, seed and wait for the nightly trigger.
    Run,
    /// Execute one learning run immediately and print the report.
    RunOnce,
    /// Seed the baseline Master Prompt into an empty database.
    Seed,
    /// Approve a pending Master Prompt version, making it active.
    Approve {
        /// Version string, e.g. Ω_v1.3
        #[arg(long)]
        version: String,
        /// Who approved it, recorded on the document.
        #[arg(long, default_value = "admin")]
        by: String,
    },
    /// Reject a pending Master Prompt version.
    Reject {
        #[arg(long)]
        version: String,
    },
    /// Show the active prompt, pending candidates and recent runs.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    let store = PgStore::new(&config.database)
        .await
        .context("connecting to database")?;

    match cli.command {
        Command::Run => {
            store.run_migrations().await.context("running migrations")?;
            let store: Arc<dyn DataStore> = Arc::new(store);
            seed_baseline(store.as_ref())
                .await
                .context("seeding baseline prompt")?;

            let llm = OpenAiCompatibleProvider::new(config.llm).context("building LLM client")?;
            let learning_loop = Arc::new(LearningLoop::new(
                store,
                Arc::new(llm),
                Arc::new(OpenAiEmbeddings::new(config.embeddings)),
            ));

            let handle = scheduler::spawn(config.scheduler, learning_loop)?;
            info!("daemon running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            handle.abort();
            info!("shutting down");
        }
        Command::RunOnce => {
            let store: Arc<dyn DataStore> = Arc::new(store);
            let llm = OpenAiCompatibleProvider::new(config.llm).context("building LLM client")?;
            let learning_loop = LearningLoop::new(
                store,
                Arc::new(llm),
                Arc::new(OpenAiEmbeddings::new(config.embeddings)),
            );

            let report = learning_loop.run().await;
            match report.outcome {
                RunOutcome::Completed => println!("outcome: completed"),
                RunOutcome::SkippedNoData => println!("outcome: skipped (no data in window)"),
                RunOutcome::AbortedNoActivePrompt => {
                    println!("outcome: aborted (no active master prompt)")
                }
            }
            println!(
                "collected: {} agents, {} events, {} feedbacks",
                report.agents_fetched, report.events_fetched, report.feedbacks_fetched
            );
            if let Some(version) = &report.proposed_version {
                println!("proposed version: {version}");
            }
            println!("tokens used: {}", report.tokens.total);
            if !report.fallbacks.is_empty() {
                println!("stage fallbacks: {:?}", report.fallbacks);
            }
            if let Some(sizes) = &report.cluster_group_sizes {
                println!("cluster group sizes: {sizes:?}");
            }
            println!(
                "persisted: summary={} prompt={}",
                report.summary_persisted, report.prompt_persisted
            );
        }
        Command::Seed => {
            store.run_migrations().await.context("running migrations")?;
            let inserted = seed_baseline(&store).await?;
            if inserted {
                println!("baseline master prompt seeded");
            } else {
                println!("baseline master prompt already present");
            }
        }
        Command::Approve { version, by } => {
            store
                .approve_master_prompt(&version, &by)
                .await
                .with_context(|| format!("approving {version}"))?;
            println!("{version} is now active");
        }
        Command::Reject { version } => {
            store
                .reject_master_prompt(&version)
                .await
                .with_context(|| format!("rejecting {version}"))?;
            println!("{version} rejected");
        }
        Command::Status => {
            match store.active_master_prompt().await? {
                Some(prompt) => println!(
                    "active: {} (approved by {}, {} patterns)",
                    prompt.version,
                    prompt.approved_by.as_deref().unwrap_or("-"),
                    prompt.patterns_learned.len()
                ),
                None => println!("active: none"),
            }

            let pending = store.pending_master_prompts(10).await?;
            if pending.is_empty() {
                println!("pending: none");
            } else {
                println!("pending:");
                for prompt in pending {
                    println!(
                        "  {} (created {})",
                        prompt.version,
                        prompt.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }

            let summaries = store.latest_learning_summaries(5).await?;
            if summaries.is_empty() {
                println!("runs: none");
            } else {
                println!("recent runs:");
                for summary in summaries {
                    println!(
                        "  {} tokens={} patterns={}",
                        summary.date,
                        summary.tokens_used.total,
                        summary.patterns_extracted.len()
                    );
                }
            }
        }
    }

    Ok(())
}
