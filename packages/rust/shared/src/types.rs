//! Core domain types for LeadScout enrichment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Entity type recorded on snippets produced by the research agent.
pub const COMPANY_ENTITY: &str = "company";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-sortable identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of an enrichment job (UUID v7).
    JobId
);

uuid_id!(
    /// Identifier of a persisted context snippet (UUID v7).
    SnippetId
);

// ---------------------------------------------------------------------------
// Research fields
// ---------------------------------------------------------------------------

/// The fixed set of fields the research agent tries to fill.
///
/// Declaration order is the order in which missing fields are targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchField {
    CompanyValueProp,
    ProductNames,
    PricingModel,
    KeyCompetitors,
    CompanyDomain,
}

impl ResearchField {
    /// Every required field, in targeting order.
    pub const ALL: [ResearchField; 5] = [
        Self::CompanyValueProp,
        Self::ProductNames,
        Self::PricingModel,
        Self::KeyCompetitors,
        Self::CompanyDomain,
    ];

    /// Payload key for this field (case-sensitive).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompanyValueProp => "company_value_prop",
            Self::ProductNames => "product_names",
            Self::PricingModel => "pricing_model",
            Self::KeyCompetitors => "key_competitors",
            Self::CompanyDomain => "company_domain",
        }
    }

    /// Search keyword for this field (`product_names` -> `product names`).
    pub fn keyword(&self) -> String {
        self.as_str().replace('_', " ")
    }

    /// Whether the field holds a sequence rather than a single string.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::ProductNames | Self::KeyCompetitors)
    }
}

impl std::fmt::Display for ResearchField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value produced for a single research field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

/// Partially researched company facts.
///
/// A field is present iff it is a non-empty string or a non-empty sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchFieldSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_value_prop: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_competitors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_domain: Option<String>,
}

impl ResearchFieldSet {
    /// Start a field set seeded with the company's domain.
    pub fn with_domain(domain: impl Into<String>) -> Self {
        Self {
            company_domain: Some(domain.into()),
            ..Default::default()
        }
    }

    /// Whether `field` currently holds a usable value.
    pub fn is_present(&self, field: ResearchField) -> bool {
        match field {
            ResearchField::CompanyValueProp => non_empty(&self.company_value_prop),
            ResearchField::ProductNames => !self.product_names.is_empty(),
            ResearchField::PricingModel => non_empty(&self.pricing_model),
            ResearchField::KeyCompetitors => !self.key_competitors.is_empty(),
            ResearchField::CompanyDomain => non_empty(&self.company_domain),
        }
    }

    /// Required fields not yet present, in targeting order.
    pub fn missing(&self) -> Vec<ResearchField> {
        ResearchField::ALL
            .into_iter()
            .filter(|f| !self.is_present(*f))
            .collect()
    }

    /// Store `value` in `field`. Mismatched shapes are coerced
    /// (a list into a text field is joined with `", "`).
    pub fn set(&mut self, field: ResearchField, value: FieldValue) {
        match field {
            ResearchField::CompanyValueProp => self.company_value_prop = Some(value.into_text()),
            ResearchField::PricingModel => self.pricing_model = Some(value.into_text()),
            ResearchField::CompanyDomain => self.company_domain = Some(value.into_text()),
            ResearchField::ProductNames => self.product_names = value.into_list(),
            ResearchField::KeyCompetitors => self.key_competitors = value.into_list(),
        }
    }
}

impl FieldValue {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::List(items) => items.join(", "),
        }
    }

    fn into_list(self) -> Vec<String> {
        match self {
            Self::Text(s) => vec![s],
            Self::List(items) => items,
        }
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.is_empty())
}

/// The fully populated payload persisted with a context snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub company_value_prop: String,
    pub product_names: Vec<String>,
    pub pricing_model: String,
    pub key_competitors: Vec<String>,
    pub company_domain: String,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// A single hit returned by a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub snippet: String,
}

impl SearchResult {
    pub fn new(url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

/// One search round recorded alongside the persisted snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLogEntry {
    /// 1-based iteration index.
    pub iteration: u32,
    pub query: String,
    /// Result URLs in provider order.
    pub top_results: Vec<String>,
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// Stage reported by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStep {
    Start,
    Search,
    Info,
    Validation,
    Error,
    Complete,
}

impl ProgressStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Search => "search",
            Self::Info => "info",
            Self::Validation => "validation",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }
}

/// Ephemeral progress notification for a single job.
///
/// Serializes flat: `{"step": "search", "message": "...", "query": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: ProgressStep,
    pub message: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ProgressEvent {
    pub fn new(step: ProgressStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// `complete` and `error` end an observation session.
    pub fn is_terminal(&self) -> bool {
        matches!(self.step, ProgressStep::Complete | ProgressStep::Error)
    }
}

// ---------------------------------------------------------------------------
// Subjects
// ---------------------------------------------------------------------------

/// The parent organization of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A contact record being enriched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A subject resolved together with its parent, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub person: Person,
    pub company: Option<Company>,
}

// ---------------------------------------------------------------------------
// Context snippets
// ---------------------------------------------------------------------------

/// A validated research result ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContextSnippet {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: ResearchResult,
    pub source_urls: Vec<String>,
    pub search_logs: Vec<SearchLogEntry>,
}

/// The durable enrichment artifact. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub id: SnippetId,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: ResearchResult,
    pub source_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_logs: Vec<SearchLogEntry>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Lifecycle state of a queued enrichment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed jobs are never picked up again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// A queued request to enrich one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentJob {
    pub id: JobId,
    pub subject_id: String,
    pub status: JobStatus,
    /// Processor attempts started so far (incremented on claim).
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<SnippetId>,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn presence_ignores_empty_values() {
        let mut fields = ResearchFieldSet::with_domain("https://acme.com");
        fields.company_value_prop = Some(String::new());
        assert!(!fields.is_present(ResearchField::CompanyValueProp));
        assert!(fields.is_present(ResearchField::CompanyDomain));
        assert_eq!(
            fields.missing(),
            vec![
                ResearchField::CompanyValueProp,
                ResearchField::ProductNames,
                ResearchField::PricingModel,
                ResearchField::KeyCompetitors,
            ]
        );
    }

    #[test]
    fn field_keyword_replaces_underscores() {
        assert_eq!(ResearchField::CompanyValueProp.keyword(), "company value prop");
        assert_eq!(ResearchField::KeyCompetitors.keyword(), "key competitors");
    }

    #[test]
    fn set_coerces_shapes() {
        let mut fields = ResearchFieldSet::default();
        fields.set(ResearchField::ProductNames, FieldValue::Text("Widget".into()));
        fields.set(
            ResearchField::PricingModel,
            FieldValue::List(vec!["free".into(), "pro".into()]),
        );
        assert_eq!(fields.product_names, vec!["Widget".to_string()]);
        assert_eq!(fields.pricing_model.as_deref(), Some("free, pro"));
    }

    #[test]
    fn progress_event_serializes_flat() {
        let event = ProgressEvent::new(ProgressStep::Search, "Searching")
            .with("query", "\"Acme\" pricing model site:acme.com")
            .with("iteration", 2);
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["step"], "search");
        assert_eq!(json["iteration"], 2);
        assert!(json.get("metadata").is_none());

        let parsed: ProgressEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, event);
    }

    #[test]
    fn terminal_steps() {
        assert!(ProgressEvent::new(ProgressStep::Complete, "done").is_terminal());
        assert!(ProgressEvent::new(ProgressStep::Error, "boom").is_terminal());
        assert!(!ProgressEvent::new(ProgressStep::Validation, "checking").is_terminal());
    }

    #[test]
    fn job_status_parse() {
        assert_eq!("active".parse::<JobStatus>(), Ok(JobStatus::Active));
        assert!("stalled".parse::<JobStatus>().is_err());
        assert!(JobStatus::Failed.is_final());
        assert!(!JobStatus::Waiting.is_final());
    }
}
