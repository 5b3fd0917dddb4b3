//! Error types for LeadScout.
//!
//! Library crates use [`EnrichmentError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all LeadScout operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// Subject, parent, or domain missing before research could start.
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// Search backend failure.
    #[error("search provider error: {0}")]
    Provider(String),

    /// Schema gate rejected the researched payload.
    #[error("validation failed: {errors}")]
    Validation { errors: FieldErrors },

    /// Job queue infrastructure unreachable.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Final write of a context snippet failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON encoding/decoding error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EnrichmentError>;

impl EnrichmentError {
    /// Create a precondition error from any displayable message.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in logs and progress metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Precondition { .. } => "precondition",
            Self::Provider(_) => "provider",
            Self::Validation { .. } => "validation",
            Self::QueueUnavailable(_) => "queue_unavailable",
            Self::Persistence(_) => "persistence",
            Self::Config { .. } => "config",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Io { .. } => "io",
        }
    }

    /// Whether another attempt could plausibly succeed without operator action.
    ///
    /// The queue still retries every failed job; this only feeds logging.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_)
                | Self::QueueUnavailable(_)
                | Self::Persistence(_)
                | Self::Storage(_)
                | Self::Io { .. }
        )
    }
}

impl From<serde_json::Error> for EnrichmentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// FieldErrors
// ---------------------------------------------------------------------------

/// Field-keyed validation diagnostics.
///
/// Serializes as `{"fieldErrors": {"product_names": ["..."]}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors {
    #[serde(rename = "fieldErrors")]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    /// Record a message against `field`.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether any message was recorded for `field`.
    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Messages recorded for `field`.
    pub fn get(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or_default()
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}
