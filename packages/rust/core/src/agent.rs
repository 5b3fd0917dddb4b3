//! Research agent: the bounded search → extract loop for one subject.
//!
//! A run resolves the subject's company, searches for whichever required
//! field is still missing, extracts what it can, and repeats until every
//! field is present or the iteration budget runs out. The cleaned payload
//! must pass the schema gate before a single context snippet is written.
//!
//! Runs are stateless: nothing is persisted until the very end, so the
//! queue can safely re-run a whole job.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use url::Url;

use leadscout_search::SearchProvider;
use leadscout_shared::{
    AgentConfig, COMPANY_ENTITY, EnrichmentError, NewContextSnippet, ProgressEvent, ProgressStep,
    ResearchField, ResearchFieldSet, Result, SearchLogEntry, SnippetId, Subject,
};
use leadscout_storage::Storage;

use crate::extractor::FieldExtractor;
use crate::progress::ProgressSink;
use crate::schema;

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// The storage operations a research run needs.
#[async_trait]
pub trait ResearchStore: Send + Sync {
    /// Load a person with their company.
    async fn resolve_subject(&self, subject_id: &str) -> Result<Option<Subject>>;

    /// Write a snippet with its search logs atomically.
    async fn persist_snippet(&self, snippet: &NewContextSnippet) -> Result<SnippetId>;
}

#[async_trait]
impl ResearchStore for Storage {
    async fn resolve_subject(&self, subject_id: &str) -> Result<Option<Subject>> {
        Storage::resolve_subject(self, subject_id).await
    }

    async fn persist_snippet(&self, snippet: &NewContextSnippet) -> Result<SnippetId> {
        self.insert_context_snippet(snippet)
            .await
            .map_err(|e| EnrichmentError::Persistence(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Researches one subject per [`run`](ResearchAgent::run).
pub struct ResearchAgent {
    provider: Arc<dyn SearchProvider>,
    store: Arc<dyn ResearchStore>,
    extractor: Arc<FieldExtractor>,
    config: AgentConfig,
}

impl ResearchAgent {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        store: Arc<dyn ResearchStore>,
        extractor: Arc<FieldExtractor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            store,
            extractor,
            config,
        }
    }

    /// Research `subject_id` and persist the validated result.
    ///
    /// Every event goes to `progress` as it happens. Every failure emits
    /// exactly one `error` event before the error is returned.
    #[instrument(skip_all, fields(subject_id = %subject_id, provider = self.provider.name()))]
    pub async fn run(&self, subject_id: &str, progress: &dyn ProgressSink) -> Result<SnippetId> {
        progress.emit(ProgressEvent::new(
            ProgressStep::Start,
            "Fetching initial data...",
        ));

        let subject = match self.store.resolve_subject(subject_id).await {
            Ok(subject) => subject,
            Err(e) => return Err(fail(progress, "Failed to load subject.", e)),
        };
        let target = match ResearchTarget::from_subject(subject) {
            Ok(target) => target,
            Err(e) => {
                progress.emit(ProgressEvent::new(ProgressStep::Error, precondition_message(&e)));
                return Err(e);
            }
        };

        let mut fields = ResearchFieldSet::with_domain(&target.domain);
        let mut source_urls: Vec<String> = Vec::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut search_logs: Vec<SearchLogEntry> = Vec::new();

        for i in 0..self.config.max_iterations {
            let iteration = i + 1;
            let missing = fields.missing();
            let Some(&first) = missing.first() else {
                progress.emit(ProgressEvent::new(
                    ProgressStep::Info,
                    "All required fields found.",
                ));
                break;
            };

            let query = build_query(&target.name, &target.domain, first);
            let names: Vec<&str> = missing.iter().map(|f| f.as_str()).collect();
            progress.emit(
                ProgressEvent::new(
                    ProgressStep::Search,
                    format!("Searching for: {}", names.join(", ")),
                )
                .with("query", query.as_str())
                .with("iteration", iteration),
            );

            let results = match self.provider.search(&query).await {
                Ok(results) => results,
                Err(e) => {
                    let e = match e {
                        EnrichmentError::Provider(_) => e,
                        other => EnrichmentError::Provider(other.to_string()),
                    };
                    return Err(fail(progress, "Search provider failed.", e));
                }
            };

            let top_results: Vec<String> = results.iter().map(|r| r.url.clone()).collect();
            for url in &top_results {
                if seen_urls.insert(url.clone()) {
                    source_urls.push(url.clone());
                }
            }
            info!(iteration, %query, hits = results.len(), "search round complete");
            search_logs.push(SearchLogEntry {
                iteration,
                query,
                top_results,
            });

            fields = self.extractor.extract(&results, &fields);
        }

        progress.emit(ProgressEvent::new(
            ProgressStep::Validation,
            "Validating final payload...",
        ));

        let payload = schema::clean(&fields);
        if let Err(errors) = schema::validate(&payload) {
            warn!(%errors, "payload rejected by schema gate");
            progress.emit(
                ProgressEvent::new(
                    ProgressStep::Error,
                    "Payload validation failed after research.",
                )
                .with("errors", serde_json::to_value(&errors)?),
            );
            return Err(EnrichmentError::Validation { errors });
        }

        let snippet = NewContextSnippet {
            entity_type: COMPANY_ENTITY.to_string(),
            entity_id: target.company_id,
            payload,
            source_urls,
            search_logs,
        };
        let snippet_id = match self.store.persist_snippet(&snippet).await {
            Ok(id) => id,
            Err(e) => {
                let e = match e {
                    EnrichmentError::Persistence(_) => e,
                    other => EnrichmentError::Persistence(other.to_string()),
                };
                return Err(fail(progress, "Failed to save research result.", e));
            }
        };

        progress.emit(
            ProgressEvent::new(ProgressStep::Complete, "Enrichment complete!")
                .with("snippetId", snippet_id.to_string()),
        );
        info!(%snippet_id, "agent run completed");
        Ok(snippet_id)
    }
}

/// Emit the `error` event for a fatal failure and hand the error back.
fn fail(progress: &dyn ProgressSink, message: &str, error: EnrichmentError) -> EnrichmentError {
    warn!(error = %error, kind = error.kind(), "{message}");
    progress.emit(
        ProgressEvent::new(ProgressStep::Error, message)
            .with("kind", error.kind())
            .with("detail", error.to_string()),
    );
    error
}

fn precondition_message(error: &EnrichmentError) -> String {
    match error {
        EnrichmentError::Precondition { message } => message.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Preconditions & query building
// ---------------------------------------------------------------------------

/// The company a run researches.
struct ResearchTarget {
    company_id: String,
    name: String,
    domain: String,
}

impl ResearchTarget {
    fn from_subject(subject: Option<Subject>) -> Result<Self> {
        let subject = subject.ok_or_else(|| EnrichmentError::precondition("Person not found."))?;
        let company = subject
            .company
            .ok_or_else(|| EnrichmentError::precondition("Person has no associated company."))?;

        let domain = company.domain.as_deref().map(str::trim).unwrap_or_default();
        if domain.is_empty() {
            return Err(EnrichmentError::precondition(
                "Company domain is required for research.",
            ));
        }
        if !is_web_url(domain) {
            return Err(EnrichmentError::precondition(format!(
                "Company domain '{domain}' is not a valid http(s) URL."
            )));
        }

        let name = match company.name.trim() {
            "" => "Unknown Company".to_string(),
            name => name.to_string(),
        };
        Ok(Self {
            company_id: company.id,
            name,
            domain: domain.to_string(),
        })
    }
}

fn is_web_url(domain: &str) -> bool {
    Url::parse(domain)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// `https://www.acme.com/about` → `acme.com`.
pub fn bare_domain(domain: &str) -> &str {
    let host = domain
        .strip_prefix("https://")
        .or_else(|| domain.strip_prefix("http://"))
        .unwrap_or(domain);
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.split('/').next().unwrap_or(host)
}

/// Query biased towards a single missing field.
pub fn build_query(company_name: &str, domain: &str, field: ResearchField) -> String {
    format!(
        "\"{company_name}\" {} site:{}",
        field.keyword(),
        bare_domain(domain)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use crate::test_support::{EventRecorder, MemoryStore, acme_subject, test_storage};
    use leadscout_search::MockSearchProvider;
    use leadscout_shared::SearchResult;

    struct FailingProvider;

    #[async_trait]
    impl SearchProvider for FailingProvider {
        async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
            Err(EnrichmentError::Provider("connection refused".into()))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    fn agent(provider: Arc<dyn SearchProvider>, store: Arc<dyn ResearchStore>) -> ResearchAgent {
        ResearchAgent::new(
            provider,
            store,
            Arc::new(FieldExtractor::new()),
            AgentConfig::default(),
        )
    }

    #[test]
    fn query_uses_bare_domain_and_first_field() {
        assert_eq!(
            build_query("Acme Corporation", "https://www.acme.com/about", ResearchField::ProductNames),
            "\"Acme Corporation\" product names site:acme.com"
        );
        assert_eq!(bare_domain("http://acme.com"), "acme.com");
        assert_eq!(bare_domain("acme.com/path"), "acme.com");
    }

    #[tokio::test]
    async fn acme_end_to_end() {
        let storage = Arc::new(test_storage().await);
        let (company_id, alice_id) = crate::seed::seed_demo_data(&storage)
            .await
            .map(|s| (s.company_id, s.person_ids[0].clone()))
            .unwrap();

        let recorder = EventRecorder::default();
        let snippet_id = agent(Arc::new(MockSearchProvider::default()), storage.clone())
            .run(&alice_id, &recorder)
            .await
            .expect("run succeeds");

        let steps = recorder.steps();
        assert_eq!(
            steps,
            vec![
                ProgressStep::Start,
                ProgressStep::Search,
                ProgressStep::Search,
                ProgressStep::Search,
                ProgressStep::Search,
                ProgressStep::Info,
                ProgressStep::Validation,
                ProgressStep::Complete,
            ]
        );
        let events = recorder.events();
        let last = events.last().unwrap();
        assert_eq!(last.metadata["snippetId"], snippet_id.to_string());
        assert_eq!(events[1].metadata["iteration"], 1);
        assert_eq!(
            events[1].metadata["query"],
            "\"Acme Corporation\" company value prop site:acme.com"
        );

        let snippet = storage.get_snippet(&snippet_id).await.unwrap().unwrap();
        assert_eq!(snippet.entity_type, COMPANY_ENTITY);
        assert_eq!(snippet.entity_id, company_id);
        assert_eq!(
            snippet.payload.product_names,
            vec!["widgetpro", "widgetlite", "superwidget"]
        );
        assert_eq!(
            snippet.payload.key_competitors,
            vec!["globex inc", "stark industries", "wayne enterprises"]
        );
        assert_eq!(snippet.payload.company_domain, "https://acme.com");
        assert!(snippet.payload.pricing_model.contains("subscription-based"));
        assert_eq!(snippet.search_logs.len(), 4);
        assert_eq!(
            snippet.source_urls,
            vec![
                "https://acme.com/about",
                "https://acme.com/products",
                "https://acme.com/pricing",
                "https://techcrunch.com/acme-analysis",
            ]
        );
    }

    #[tokio::test]
    async fn missing_subject_parent_or_domain_is_precondition() {
        let store = Arc::new(MemoryStore::default());
        store.add(acme_subject("no-company", None));
        store.add(acme_subject("no-domain", Some("")));
        store.add(acme_subject("bad-domain", Some("acme.com")));

        let agent = agent(Arc::new(MockSearchProvider::default()), store.clone());
        for subject_id in ["missing", "no-company", "no-domain", "bad-domain"] {
            let recorder = EventRecorder::default();
            let err = agent.run(subject_id, &recorder).await.unwrap_err();
            assert!(
                matches!(err, EnrichmentError::Precondition { .. }),
                "{subject_id}: {err}"
            );
            let errors = recorder
                .steps()
                .into_iter()
                .filter(|s| *s == ProgressStep::Error)
                .count();
            assert_eq!(errors, 1, "{subject_id}");
            assert_eq!(recorder.steps().last(), Some(&ProgressStep::Error));
        }
        assert!(store.persisted().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_emits_error_first() {
        let store = Arc::new(MemoryStore::default());
        store.add(acme_subject("alice", Some("https://acme.com")));

        let recorder = EventRecorder::default();
        let err = agent(Arc::new(FailingProvider), store.clone())
            .run("alice", &recorder)
            .await
            .unwrap_err();

        assert!(matches!(err, EnrichmentError::Provider(_)));
        assert_eq!(
            recorder.steps(),
            vec![ProgressStep::Start, ProgressStep::Search, ProgressStep::Error]
        );
        assert!(store.persisted().is_empty());
    }

    #[tokio::test]
    async fn unknown_company_fails_validation_without_persisting() {
        let store = Arc::new(MemoryStore::default());
        store.add(acme_subject("alice", Some("https://globex.com")));

        let recorder = EventRecorder::default();
        let err = agent(Arc::new(MockSearchProvider::default()), store.clone())
            .run("alice", &recorder)
            .await
            .unwrap_err();

        let EnrichmentError::Validation { errors } = err else {
            panic!("expected validation error, got {err}");
        };
        assert!(errors.has("product_names"));
        assert!(!errors.has("company_domain"));

        let events = recorder.events();
        let searches = events.iter().filter(|e| e.step == ProgressStep::Search).count();
        assert_eq!(searches, 5);
        let last = events.last().unwrap();
        assert_eq!(last.step, ProgressStep::Error);
        assert!(last.metadata["errors"]["fieldErrors"]["product_names"].is_array());
        assert!(store.persisted().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_is_reported() {
        let store = Arc::new(MemoryStore::failing_writes());
        store.add(acme_subject("alice", Some("https://acme.com")));

        let recorder = EventRecorder::default();
        let err = agent(Arc::new(MockSearchProvider::default()), store)
            .run("alice", &recorder)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Persistence(_)));
        assert_eq!(recorder.steps().last(), Some(&ProgressStep::Error));
    }

    #[tokio::test]
    async fn zero_iterations_goes_straight_to_validation() {
        let store = Arc::new(MemoryStore::default());
        store.add(acme_subject("alice", Some("https://acme.com")));

        let agent = ResearchAgent::new(
            Arc::new(MockSearchProvider::default()),
            store,
            Arc::new(FieldExtractor::new()),
            AgentConfig { max_iterations: 0 },
        );
        let err = agent.run("alice", &SilentProgress).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
