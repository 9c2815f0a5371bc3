//! The model capability: submit a prompt and a batch, get raw text back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::BATCH_SEPARATOR;
use crate::domain::Domain;
use crate::error::ProviderError;

/// A language model endpoint.
///
/// One implementation per provider. Calls are blocking; the harness never
/// issues two calls to the same model concurrently.
///
/// # Errors
///
/// `submit` returns `ProviderError::Transient` for failures that may clear
/// on retry and `ProviderError::Permanent` for everything else.
pub trait Model: Send + Sync {
    /// Name used for log files and report rows.
    fn name(&self) -> &str;

    /// Sends the composed prompt followed by the rendered batch.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the provider fails.
    fn submit(&self, prompt: &str, batch: &str) -> Result<String, ProviderError>;
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn submit(&self, prompt: &str, batch: &str) -> Result<String, ProviderError> {
        (**self).submit(prompt, batch)
    }
}

/// Renders a batch as the comma-separated list the prompt asks about.
///
/// ```
/// use agd_eval::{render_batch, Domain};
///
/// let batch = [Domain::legitimate("a.com"), Domain::malicious("b.biz", "x")];
/// assert_eq!(render_batch(&batch), "a.com, b.biz");
/// ```
#[must_use]
pub fn render_batch(domains: &[Domain]) -> String {
    domains
        .iter()
        .map(Domain::name)
        .collect::<Vec<_>>()
        .join(BATCH_SEPARATOR)
}

/// Unparsed text a model returned for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Response body.
    pub text: String,
    /// Attempt that produced it, starting at 1.
    pub attempt: u32,
    /// When the response arrived.
    pub received_at: DateTime<Utc>,
    /// Wall-clock duration of the successful call, in milliseconds.
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl RawResponse {
    /// Stamps a response body with the current time.
    #[must_use]
    pub fn new(text: String, attempt: u32) -> Self {
        Self {
            text,
            attempt,
            received_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    /// Records how long the call took.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_recorded_in_millis() {
        let response = RawResponse::new("a.com|N|90.0".to_string(), 2)
            .with_elapsed(Duration::from_micros(1_500_900));
        assert_eq!(response.elapsed_ms, 1500);
        assert_eq!(response.attempt, 2);
    }

    #[test]
    fn responses_logged_without_elapsed_still_load() {
        let json = r#"{"text":"a.com|N|90.0","attempt":1,"received_at":"2024-05-01T12:00:00Z"}"#;
        let response: RawResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.elapsed_ms, 0);
    }
}
