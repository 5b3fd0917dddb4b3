//! Offline search backend with canned company data.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use leadscout_shared::{Result, SearchResult};
use regex::Regex;
use tracing::debug;

use crate::SearchProvider;

static SITE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"site:(\S+)").expect("valid site regex"));

/// Canned facts served for one domain.
#[derive(Debug, Clone)]
pub struct CompanyFacts {
    pub name: String,
    pub value_prop: String,
    pub pricing: String,
    pub products: Vec<String>,
    pub competitors: Vec<String>,
}

impl CompanyFacts {
    fn acme() -> Self {
        Self {
            name: "Acme Corporation".into(),
            value_prop: "Our company value proposition is to deliver excellence and \
                         innovation for enterprise clients."
                .into(),
            pricing: "Our pricing is subscription-based, with tiers for different \
                      business sizes."
                .into(),
            products: vec!["WidgetPro".into(), "WidgetLite".into(), "SuperWidget".into()],
            competitors: vec![
                "Globex Inc".into(),
                "Stark Industries".into(),
                "Wayne Enterprises".into(),
            ],
        }
    }
}

/// Keyword-driven mock search.
///
/// The `site:` operator of the query selects the company. Each keyword found
/// in the query (`value prop`, `pricing`, `product`, `competitors`) adds one
/// hit. Known domains with no keyword get a generic hit; unknown domains get
/// a single "nothing found" hit.
pub struct MockSearchProvider {
    companies: HashMap<String, CompanyFacts>,
    latency: Duration,
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::empty().with_company("acme.com", CompanyFacts::acme())
    }
}

impl MockSearchProvider {
    /// A provider that knows no companies and answers instantly.
    pub fn empty() -> Self {
        Self {
            companies: HashMap::new(),
            latency: Duration::ZERO,
        }
    }

    /// Serve `facts` for queries scoped to `domain` (bare host, e.g. `acme.com`).
    pub fn with_company(mut self, domain: impl Into<String>, facts: CompanyFacts) -> Self {
        self.companies.insert(domain.into(), facts);
        self
    }

    /// Simulated network delay per search.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn results_for(&self, query: &str) -> Vec<SearchResult> {
        let domain = SITE_RE
            .captures(query)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or_default();

        let Some(facts) = self.companies.get(domain) else {
            return vec![SearchResult::new(
                "https://google.com/search",
                "No relevant information found.",
            )];
        };

        let q = query.to_lowercase();
        let mut results = Vec::new();

        if q.contains("value prop") {
            results.push(SearchResult::new(
                format!("https://{domain}/about"),
                facts.value_prop.clone(),
            ));
        }
        if q.contains("pricing") {
            results.push(SearchResult::new(
                format!("https://{domain}/pricing"),
                facts.pricing.clone(),
            ));
        }
        if q.contains("product") {
            results.push(SearchResult::new(
                format!("https://{domain}/products"),
                format!("Our products include {}.", facts.products.join(", ")),
            ));
        }
        if q.contains("competitors") {
            let slug = domain.split('.').next().unwrap_or(domain);
            results.push(SearchResult::new(
                format!("https://techcrunch.com/{slug}-analysis"),
                format!("Key competitors are {}.", facts.competitors.join(", ")),
            ));
        }

        if results.is_empty() {
            results.push(SearchResult::new(
                format!("https://{domain}"),
                format!("{} is a leading provider of widgets.", facts.name),
            ));
        }
        results
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        debug!(query, "mock search");
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.results_for(query))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_selects_result() {
        let provider = MockSearchProvider::default();
        let results = provider
            .search("\"Acme Corporation\" product names site:acme.com")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://acme.com/products");
        assert_eq!(
            results[0].snippet,
            "Our products include WidgetPro, WidgetLite, SuperWidget."
        );
    }

    #[tokio::test]
    async fn competitors_come_from_press() {
        let provider = MockSearchProvider::default();
        let results = provider
            .search("\"Acme Corporation\" key competitors site:acme.com")
            .await
            .unwrap();
        assert_eq!(results[0].url, "https://techcrunch.com/acme-analysis");
        assert!(results[0].snippet.starts_with("Key competitors are Globex Inc"));
    }

    #[tokio::test]
    async fn known_domain_without_keyword_gets_generic_hit() {
        let provider = MockSearchProvider::default();
        let results = provider.search("\"Acme\" site:acme.com").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://acme.com");
        assert_eq!(
            results[0].snippet,
            "Acme Corporation is a leading provider of widgets."
        );
    }

    #[tokio::test]
    async fn unknown_domain_finds_nothing() {
        let provider = MockSearchProvider::default();
        for query in ["\"Globex\" pricing model site:globex.com", "no site operator"] {
            let results = provider.search(query).await.unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].snippet, "No relevant information found.");
        }
    }
}
