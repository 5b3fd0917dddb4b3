//! Shared types, error model, and configuration for LeadScout.
//!
//! This crate is the foundation depended on by all other LeadScout crates.
//! It provides:
//! - [`EnrichmentError`], the unified error type
//! - Domain types ([`ResearchFieldSet`], [`ProgressEvent`], [`EnrichmentJob`], [`ContextSnippet`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AgentConfig, AgentSection, AppConfig, DatabaseConfig, QueueConfig, QueueSection,
    SearchSection, WorkerConfig, WorkerSection, config_dir, config_file_path, database_path,
    init_config, load_config, load_config_from,
};
pub use error::{EnrichmentError, FieldErrors, Result};
pub use types::{
    COMPANY_ENTITY, Company, ContextSnippet, EnrichmentJob, FieldValue, JobId, JobStatus,
    NewContextSnippet, Person, ProgressEvent, ProgressStep, ResearchField, ResearchFieldSet,
    ResearchResult, SearchLogEntry, SearchResult, SnippetId, Subject,
};
