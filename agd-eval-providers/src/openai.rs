//! Chat-completions clients (OpenAI and Mistral share the wire shape).

use std::time::Duration;

use agd_eval::{Model, PRIMING_REPLY, ProviderError};
use serde_json::{Value, json};

use crate::http::JsonClient;

/// A model behind a `/chat/completions` endpoint with bearer auth.
#[derive(Debug, Clone)]
pub struct ChatCompletionsModel {
    client: JsonClient,
    endpoint: String,
    authorization: String,
}

impl ChatCompletionsModel {
    /// Creates a client for `model` at `endpoint`.
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client: JsonClient::new(model, timeout),
            endpoint: endpoint.into(),
            authorization: format!("Bearer {api_key}"),
        }
    }

    fn request_body(&self, prompt: &str, batch: &str) -> Value {
        json!({
            "model": self.client.model(),
            "messages": [
                {"role": "user", "content": prompt},
                {"role": "assistant", "content": PRIMING_REPLY},
                {"role": "user", "content": batch},
            ],
            "temperature": 0.0,
        })
    }
}

fn extract_text(body: &Value) -> Option<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl Model for ChatCompletionsModel {
    fn name(&self) -> &str {
        self.client.model()
    }

    fn submit(&self, prompt: &str, batch: &str) -> Result<String, ProviderError> {
        let body = self.client.post(
            &self.endpoint,
            &[("Authorization", self.authorization.as_str())],
            &self.request_body(prompt, batch),
        )?;
        extract_text(&body).ok_or_else(|| self.client.unexpected(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ChatCompletionsModel {
        ChatCompletionsModel::new(
            "gpt-4o-mini",
            "http://localhost/v1/chat/completions",
            "sk-test",
            Duration::from_secs(1),
        )
    }

    #[test]
    fn request_primes_the_conversation() {
        let body = model().request_body("Classify.", "a.com, b.biz");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.0);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["content"], "Classify.");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "yes");
        assert_eq!(messages[2]["content"], "a.com, b.biz");
    }

    #[test]
    fn extracts_first_choice() {
        let body = json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "a.com|N|90.0"}}]
        });
        assert_eq!(extract_text(&body).as_deref(), Some("a.com|N|90.0"));
        assert_eq!(extract_text(&json!({"choices": []})), None);
    }

    #[test]
    fn bearer_header_carries_the_key() {
        assert_eq!(model().authorization, "Bearer sk-test");
        assert_eq!(model().name(), "gpt-4o-mini");
    }
}
