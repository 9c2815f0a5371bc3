//! Error types for the evaluation harness.
//!
//! Only failures that stop work are `Err` values here. A malformed response
//! line is a [`ParseFailure`](crate::ParseFailure), a reconciliation that
//! stops making progress is [`ReconcileStatus::Stalled`](crate::ReconcileStatus),
//! and a metric with a zero denominator is
//! [`MetricValue::Undefined`](crate::MetricValue).

use std::fmt;

/// Top-level error type for the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The model provider failed.
    Provider(ProviderError),
    /// Corpus loading or sampling failed.
    Corpus(CorpusError),
    /// Reading or writing the verdict log failed.
    Store(StoreError),
    /// A configuration value is unusable.
    Config {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl EvalError {
    /// Creates a `Config` error.
    #[must_use]
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(e) => write!(f, "provider error: {e}"),
            Self::Corpus(e) => write!(f, "corpus error: {e}"),
            Self::Store(e) => write!(f, "verdict log error: {e}"),
            Self::Config { field, reason } => {
                write!(f, "invalid configuration for '{field}': {reason}")
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// Failure reported by a model provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider is temporarily unavailable (rate limit, overload,
    /// network trouble). The batch is retried after a backoff.
    Transient {
        /// Model that failed.
        model: String,
        /// Provider message.
        message: String,
    },
    /// The provider rejected the request for good (bad credentials,
    /// unknown model). Aborts the run for this model.
    Permanent {
        /// Model that failed.
        model: String,
        /// Provider message.
        message: String,
    },
}

impl ProviderError {
    /// Creates a `Transient` error.
    #[must_use]
    pub fn transient(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Creates a `Permanent` error.
    #[must_use]
    pub fn permanent(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Returns true if the failure may go away on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the provider message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Permanent { message, .. } => message,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient { model, message } => {
                write!(f, "model '{model}' temporarily unavailable: {message}")
            }
            Self::Permanent { model, message } => {
                write!(f, "model '{model}' rejected the request: {message}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// Error in corpus loading or sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusError {
    /// Directory not found or not a directory.
    InvalidDirectory {
        /// Path that was invalid.
        path: String,
    },
    /// No family files found in directory.
    NoFilesFound {
        /// Directory that was searched.
        directory: String,
    },
    /// Failed to read a file.
    ReadFailed {
        /// Path to the file.
        path: String,
        /// Error message.
        message: String,
    },
    /// JSON deserialization failed.
    JsonDeserialize {
        /// Path to the file.
        path: String,
        /// Error message from `serde_json`.
        message: String,
    },
    /// Not enough unused domains to satisfy a sample request.
    InsufficientDomains {
        /// Family name, or `legitimate`.
        scope: String,
        /// Domains requested.
        requested: usize,
        /// Domains available.
        available: usize,
    },
}

impl fmt::Display for CorpusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDirectory { path } => {
                write!(f, "invalid directory: '{path}' is not a directory or does not exist")
            }
            Self::NoFilesFound { directory } => {
                write!(f, "no family CSV files found in directory '{directory}'")
            }
            Self::ReadFailed { path, message } => {
                write!(f, "failed to read '{path}': {message}")
            }
            Self::JsonDeserialize { path, message } => {
                write!(f, "failed to parse JSON in '{path}': {message}")
            }
            Self::InsufficientDomains {
                scope,
                requested,
                available,
            } => {
                write!(
                    f,
                    "cannot sample {requested} domains from '{scope}': only {available} available"
                )
            }
        }
    }
}

impl std::error::Error for CorpusError {}

/// Error reading or writing the persisted verdict log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Filesystem failure.
    Io {
        /// Path involved.
        path: String,
        /// Error message.
        message: String,
    },
    /// Serialization failure.
    Json {
        /// Path involved.
        path: String,
        /// Error message.
        message: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn json(path: &std::path::Path, err: &serde_json::Error) -> Self {
        Self::Json {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "I/O error on '{path}': {message}"),
            Self::Json { path, message } => write!(f, "JSON error on '{path}': {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ProviderError> for EvalError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

impl From<CorpusError> for EvalError {
    fn from(e: CorpusError) -> Self {
        Self::Corpus(e)
    }
}

impl From<StoreError> for EvalError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_kinds() {
        let t = ProviderError::transient("gpt", "429 Too Many Requests");
        let p = ProviderError::permanent("gpt", "401 Unauthorized");
        assert!(t.is_transient());
        assert!(!p.is_transient());
        assert_eq!(t.message(), "429 Too Many Requests");
        assert!(p.to_string().contains("rejected"));
    }

    #[test]
    fn insufficient_domains_display() {
        let err = CorpusError::InsufficientDomains {
            scope: "conficker".to_string(),
            requested: 10,
            available: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("conficker"));
        assert!(msg.contains("10"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn conversions_wrap() {
        let err: EvalError = ProviderError::permanent("m", "bad key").into();
        assert!(matches!(err, EvalError::Provider(_)));
        assert!(err.to_string().starts_with("provider error"));
    }
}
