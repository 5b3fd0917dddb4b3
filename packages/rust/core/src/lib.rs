//! Enrichment pipeline for LeadScout.
//!
//! This crate ties the search provider, field extraction, schema gate and
//! storage together into the research loop, and runs that loop behind a
//! durable retrying job queue with live per-job progress.

pub mod agent;
pub mod extractor;
pub mod progress;
pub mod queue;
pub mod schema;
pub mod seed;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{ResearchAgent, ResearchStore, bare_domain, build_query};
pub use extractor::{ExtractionStrategy, FieldExtractor, ListPatternStrategy, MarkerSnippetStrategy};
pub use progress::{ProgressHub, ProgressSink, SilentProgress, Subscription, TopicPublisher};
pub use queue::{Claim, FailureOutcome, JobQueue, RetryPolicy};
pub use seed::{SeedSummary, seed_demo_data};
pub use worker::{WorkerHandle, WorkerPool};
