//! Field extraction from search result snippets.
//!
//! Each field is filled by an [`ExtractionStrategy`]. The [`FieldExtractor`]
//! runs every strategy whose field is still missing; fields already present
//! are never touched, so running it twice on the same input is a no-op.

use std::sync::LazyLock;

use leadscout_shared::{FieldValue, ResearchField, ResearchFieldSet, SearchResult};
use regex::Regex;
use tracing::debug;

static PRODUCTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"products include (.*?)\.").expect("valid products regex"));
static COMPETITORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"competitors are (.*?)\.").expect("valid competitors regex"));

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Best-effort rule that may derive one field from a batch of results.
pub trait ExtractionStrategy: Send + Sync {
    /// The field this strategy fills.
    fn field(&self) -> ResearchField;

    /// Try to derive a value. `None` means "not found in this batch".
    fn extract(&self, results: &[SearchResult]) -> Option<FieldValue>;

    /// Human-readable strategy name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Built-in strategies
// ---------------------------------------------------------------------------

/// Adopts the first snippet that mentions a marker phrase, verbatim.
pub struct MarkerSnippetStrategy {
    field: ResearchField,
    marker: String,
}

impl MarkerSnippetStrategy {
    /// `marker` is matched case-insensitively.
    pub fn new(field: ResearchField, marker: &str) -> Self {
        Self {
            field,
            marker: marker.to_lowercase(),
        }
    }
}

impl ExtractionStrategy for MarkerSnippetStrategy {
    fn field(&self) -> ResearchField {
        self.field
    }

    fn extract(&self, results: &[SearchResult]) -> Option<FieldValue> {
        results
            .iter()
            .find(|r| r.snippet.to_lowercase().contains(&self.marker))
            .map(|r| FieldValue::Text(r.snippet.clone()))
    }

    fn name(&self) -> &str {
        "marker-snippet"
    }
}

/// Captures a comma-separated list from the case-folded snippet corpus.
///
/// The pattern's first capture group holds the list.
pub struct ListPatternStrategy {
    field: ResearchField,
    pattern: Regex,
}

impl ListPatternStrategy {
    pub fn new(field: ResearchField, pattern: Regex) -> Self {
        Self { field, pattern }
    }
}

impl ExtractionStrategy for ListPatternStrategy {
    fn field(&self) -> ResearchField {
        self.field
    }

    fn extract(&self, results: &[SearchResult]) -> Option<FieldValue> {
        let corpus = results
            .iter()
            .map(|r| r.snippet.to_lowercase())
            .collect::<Vec<_>>()
            .join(" \n ");

        let captured = self.pattern.captures(&corpus)?.get(1)?.as_str();
        let items: Vec<String> = captured
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if items.is_empty() {
            None
        } else {
            Some(FieldValue::List(items))
        }
    }

    fn name(&self) -> &str {
        "list-pattern"
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered set of extraction strategies.
pub struct FieldExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl FieldExtractor {
    /// Built-in rules for value proposition, pricing, products and competitors.
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(MarkerSnippetStrategy::new(
                ResearchField::CompanyValueProp,
                "value proposition",
            )),
            Box::new(MarkerSnippetStrategy::new(
                ResearchField::PricingModel,
                "pricing",
            )),
            Box::new(ListPatternStrategy::new(
                ResearchField::ProductNames,
                PRODUCTS_RE.clone(),
            )),
            Box::new(ListPatternStrategy::new(
                ResearchField::KeyCompetitors,
                COMPETITORS_RE.clone(),
            )),
        ])
    }

    /// A registry with custom strategies, tried in order.
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Derive missing fields from `results`, carrying `current` forward.
    ///
    /// When two strategies target the same field, the first match wins.
    pub fn extract(&self, results: &[SearchResult], current: &ResearchFieldSet) -> ResearchFieldSet {
        let mut fields = current.clone();
        for strategy in &self.strategies {
            let field = strategy.field();
            if fields.is_present(field) {
                continue;
            }
            if let Some(value) = strategy.extract(results) {
                debug!(%field, strategy = strategy.name(), "field extracted");
                fields.set(field, value);
            }
        }
        fields
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}
