//! Gemini `generateContent` client.

use std::time::Duration;

use agd_eval::{Model, PRIMING_REPLY, ProviderError};
use serde_json::{Value, json};

use crate::http::{JsonClient, join_text_parts};

/// A Gemini model. The URL is `<base><model>:generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: JsonClient,
    url: String,
    api_key: String,
}

impl GeminiModel {
    /// Creates a client for `model` under the `base` models URL.
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        base: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let model = model.into();
        let url = format!("{base}{model}:generateContent");
        Self {
            client: JsonClient::new(model, timeout),
            url,
            api_key: api_key.into(),
        }
    }

    fn request_body(prompt: &str, batch: &str) -> Value {
        json!({
            "contents": [
                {"role": "user", "parts": [{"text": prompt}]},
                {"role": "model", "parts": [{"text": PRIMING_REPLY}]},
                {"role": "user", "parts": [{"text": batch}]},
            ],
            "generationConfig": {"temperature": 0.0},
        })
    }
}

impl Model for GeminiModel {
    fn name(&self) -> &str {
        self.client.model()
    }

    fn submit(&self, prompt: &str, batch: &str) -> Result<String, ProviderError> {
        let body = self.client.post(
            &self.url,
            &[("x-goog-api-key", self.api_key.as_str())],
            &Self::request_body(prompt, batch),
        )?;
        body.pointer("/candidates/0/content/parts")
            .and_then(join_text_parts)
            .ok_or_else(|| self.client.unexpected(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_names_the_model() {
        let model = GeminiModel::new(
            "gemini-1.5-flash-8b",
            "https://generativelanguage.googleapis.com/v1/models/",
            "key",
            Duration::from_secs(1),
        );
        assert_eq!(
            model.url,
            "https://generativelanguage.googleapis.com/v1/models/gemini-1.5-flash-8b:generateContent"
        );
        assert_eq!(model.name(), "gemini-1.5-flash-8b");
    }

    #[test]
    fn conversation_uses_model_role() {
        let body = GeminiModel::request_body("Classify.", "a.com");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "a.com");
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn candidate_parts_are_extracted() {
        let body = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "a.com|N|99.0"}]}}]
        });
        assert_eq!(
            body.pointer("/candidates/0/content/parts")
                .and_then(join_text_parts)
                .as_deref(),
            Some("a.com|N|99.0")
        );
        assert!(
            json!({"promptFeedback": {"blockReason": "SAFETY"}})
                .pointer("/candidates/0/content/parts")
                .is_none()
        );
    }
}
