//! Blocking JSON-over-HTTP shared by every client.

use std::time::Duration;

use agd_eval::ProviderError;
use serde_json::Value;

/// Per-request timeout used when the configuration sets none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest slice of an error body kept in a `ProviderError` message.
const ERROR_BODY_LIMIT: usize = 300;

/// Returns true for HTTP statuses worth retrying after a backoff.
///
/// ```
/// use agd_eval_providers::is_transient_status;
///
/// assert!(is_transient_status(429));
/// assert!(is_transient_status(503));
/// assert!(!is_transient_status(401));
/// ```
#[must_use]
pub const fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500..=599)
}

/// A `ureq` agent bound to one model name for error reporting.
#[derive(Debug, Clone)]
pub(crate) struct JsonClient {
    agent: ureq::Agent,
    model: String,
}

impl JsonClient {
    pub(crate) fn new(model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            model: model.into(),
        }
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    /// POSTs `body` with the given headers and decodes the JSON reply.
    pub(crate) fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let mut request = self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        for (name, value) in headers {
            request = request.set(name, value);
        }

        let response = match request.send_string(&body.to_string()) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(status_error(&self.model, status, &text));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(ProviderError::transient(
                    &self.model,
                    format!("transport: {transport}"),
                ));
            }
        };

        let text = response.into_string().map_err(|e| {
            ProviderError::transient(&self.model, format!("reading response: {e}"))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ProviderError::transient(&self.model, format!("response is not JSON: {e}"))
        })
    }

    /// Error for a reply that parsed but lacks the expected text.
    pub(crate) fn unexpected(&self, body: &Value) -> ProviderError {
        ProviderError::transient(
            &self.model,
            format!("unexpected response body: {}", truncate(&body.to_string())),
        )
    }
}

pub(crate) fn status_error(model: &str, status: u16, body: &str) -> ProviderError {
    let message = format!("HTTP {status}: {}", truncate(body.trim()));
    if is_transient_status(status) {
        ProviderError::transient(model, message)
    } else {
        ProviderError::permanent(model, message)
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(ERROR_BODY_LIMIT).collect()
}

/// Concatenates the `text` fields of an array of content parts.
pub(crate) fn join_text_parts(parts: &Value) -> Option<String> {
    let texts: Vec<&str> = parts
        .as_array()?
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        for status in [408, 425, 429, 500, 502, 503, 529] {
            assert!(status_error("m", status, "").is_transient(), "{status}");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 422] {
            assert!(!status_error("m", status, "").is_transient(), "{status}");
        }
    }

    #[test]
    fn status_error_keeps_a_bounded_body() {
        let body = "x".repeat(1000);
        let error = status_error("gpt", 401, &body);
        assert!(error.message().starts_with("HTTP 401: "));
        assert_eq!(error.message().len(), "HTTP 401: ".len() + ERROR_BODY_LIMIT);
    }

    #[test]
    fn text_parts_are_joined() {
        let parts = json!([{"text": "a.com|N|90.0\n"}, {"type": "other"}, {"text": "b.biz|Y|80.0"}]);
        assert_eq!(
            join_text_parts(&parts).as_deref(),
            Some("a.com|N|90.0\nb.biz|Y|80.0")
        );
        assert_eq!(join_text_parts(&json!([])), None);
        assert_eq!(join_text_parts(&json!("text")), None);
    }
}
