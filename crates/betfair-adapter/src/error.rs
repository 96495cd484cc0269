//! Error taxonomy for the market-data pipeline
//!
//! `PipelineError` is what callers of the service see. It is `Clone` because a
//! single refetch result is fanned out to every caller waiting on the same key.
//!
//! `FieldError` never leaves the canonical model builder: it marks a raw
//! sub-record as malformed so the builder can skip it.

use thiserror::Error;

/// Errors surfaced by the pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Malformed market identifier, rejected before any upstream call
    #[error("Invalid market identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Transport or auth failure talking to the exchange API
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream answered but held no record for the id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Some chunks of a multi-id request failed; the rest were served
    #[error("{failed} of {total} upstream batches failed")]
    PartialBatchFailure { failed: usize, total: usize },

    /// Persisting a fresh payload failed (non-fatal)
    #[error("Cache write failed for {key}: {message}")]
    CacheWriteFailure { key: String, message: String },

    /// A catalogue entry was served without its price overlay
    #[error("Prices unavailable for {market_id}: {reason}")]
    PricesUnavailable { market_id: String, reason: String },

    /// A market-level field was present with the wrong type and rendered as its default
    #[error("Market {market_id}: defaulted {detail}")]
    DefaultedField { market_id: String, detail: String },
}

impl PipelineError {
    /// Wrap any upstream error chain as `UpstreamUnavailable`
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        PipelineError::UpstreamUnavailable(err.to_string())
    }

    /// 4xx-equivalent outcome
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::InvalidIdentifier(_) | PipelineError::NotFound(_))
    }

    /// 5xx-equivalent outcome
    pub fn is_server_error(&self) -> bool {
        matches!(self, PipelineError::UpstreamUnavailable(_))
    }

    /// HTTP status the excluded web layer maps this error to
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::InvalidIdentifier(_) => 400,
            PipelineError::NotFound(_) => 404,
            PipelineError::UpstreamUnavailable(_) => 502,
            // Warnings, not request failures
            PipelineError::PartialBatchFailure { .. }
            | PipelineError::CacheWriteFailure { .. }
            | PipelineError::PricesUnavailable { .. }
            | PipelineError::DefaultedField { .. } => 200,
        }
    }
}

/// A raw field was present but held a value of the wrong type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("field {field} has unexpected value {found}")]
pub struct FieldError {
    pub field: &'static str,
    pub found: String,
}

impl FieldError {
    /// `found` is truncated to keep log lines short
    pub fn new(field: &'static str, found: &serde_json::Value) -> Self {
        let mut found = found.to_string();
        if found.chars().count() > 64 {
            found = format!("{}...", found.chars().take(64).collect::<String>());
        }
        Self { field, found }
    }

    /// A required field was absent
    pub fn missing(field: &'static str) -> Self {
        Self { field, found: "<missing>".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(PipelineError::InvalidIdentifier("abc".into()).is_client_error());
        assert!(PipelineError::NotFound("1.2".into()).is_client_error());
        assert!(PipelineError::upstream("timeout").is_server_error());
        assert!(!PipelineError::upstream("timeout").is_client_error());
        assert_eq!(PipelineError::NotFound("1.2".into()).status_code(), 404);
        assert_eq!(PipelineError::InvalidIdentifier("x".into()).status_code(), 400);
    }

    #[test]
    fn test_field_error_truncates_long_values() {
        let long = serde_json::Value::String("x".repeat(200));
        let err = FieldError::new("runnerName", &long);
        assert!(err.found.len() < 80);
        assert!(err.to_string().contains("runnerName"));
    }
}
