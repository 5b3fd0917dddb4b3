//! Search provider contract and built-in backends.
//!
//! The research agent only sees [`SearchProvider`]; concrete backends are
//! picked from config by [`provider_from_config`].

mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leadscout_shared::{AppConfig, EnrichmentError, Result, SearchResult};

pub use mock::{CompanyFacts, MockSearchProvider};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A web search backend.
///
/// Returns a finite, ordered list of hits for `query`. Failures are reported
/// as [`EnrichmentError::Provider`].
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;

    /// Backend name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the backend named by `[search].provider`.
pub fn provider_from_config(config: &AppConfig) -> Result<Arc<dyn SearchProvider>> {
    match config.search.provider.as_str() {
        "mock" => Ok(Arc::new(
            MockSearchProvider::default()
                .with_latency(Duration::from_millis(config.search.mock_latency_ms)),
        )),
        other => Err(EnrichmentError::config(format!(
            "unknown search provider '{other}' (available: mock)"
        ))),
    }
}
