//! promptloop: a nightly learning loop for an AI agent-builder product.
//!
//! Every night the loop collects the previous 24 hours of product
//! activity, digests it through a chain of LLM stages, persists a
//! learning summary and proposes a new Master Prompt version for human
//! review. Candidates never activate themselves; an admin approves or
//! rejects them through the CLI.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod learning;
pub mod llm;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};
