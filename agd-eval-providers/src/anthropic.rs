//! Anthropic messages API client.

use std::time::Duration;

use agd_eval::{Model, PRIMING_REPLY, ProviderError};
use serde_json::{Value, json};

use crate::http::{JsonClient, join_text_parts};

const API_VERSION: &str = "2023-06-01";

/// Output budget for one batch of verdict lines.
const MAX_TOKENS: u32 = 8192;

/// A Claude model behind the messages API.
#[derive(Debug, Clone)]
pub struct AnthropicModel {
    client: JsonClient,
    endpoint: String,
    api_key: String,
}

impl AnthropicModel {
    /// Creates a client for `model` at `endpoint`.
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: JsonClient::new(model, timeout),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn request_body(&self, prompt: &str, batch: &str) -> Value {
        json!({
            "model": self.client.model(),
            "max_tokens": MAX_TOKENS,
            "temperature": 0.0,
            "messages": [
                {"role": "user", "content": prompt},
                {"role": "assistant", "content": PRIMING_REPLY},
                {"role": "user", "content": batch},
            ],
        })
    }
}

impl Model for AnthropicModel {
    fn name(&self) -> &str {
        self.client.model()
    }

    fn submit(&self, prompt: &str, batch: &str) -> Result<String, ProviderError> {
        let body = self.client.post(
            &self.endpoint,
            &[("x-api-key", self.api_key.as_str()), ("anthropic-version", API_VERSION)],
            &self.request_body(prompt, batch),
        )?;
        body.get("content")
            .and_then(join_text_parts)
            .ok_or_else(|| self.client.unexpected(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sets_output_budget() {
        let model = AnthropicModel::new(
            "claude-3-5-haiku-latest",
            "http://localhost/v1/messages",
            "key",
            Duration::from_secs(1),
        );
        let body = model.request_body("Classify.", "a.com");
        assert_eq!(body["max_tokens"], MAX_TOKENS);
        assert_eq!(body["messages"][1]["content"], "yes");
        assert_eq!(body["messages"][2]["role"], "user");
    }

    #[test]
    fn text_blocks_are_concatenated() {
        let body = json!({
            "content": [
                {"type": "text", "text": "a.com|N|90.0\n"},
                {"type": "text", "text": "b.biz|Y|80.0"}
            ],
            "stop_reason": "end_turn"
        });
        assert_eq!(
            body.get("content").and_then(join_text_parts).as_deref(),
            Some("a.com|N|90.0\nb.biz|Y|80.0")
        );
    }
}
