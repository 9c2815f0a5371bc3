//! Provider selection and model construction from configuration.

use std::fmt;
use std::time::Duration;

use agd_eval::{EvalError, Model};
use serde::{Deserialize, Serialize};

use crate::anthropic::AnthropicModel;
use crate::credentials::Credentials;
use crate::gemini::GeminiModel;
use crate::openai::ChatCompletionsModel;

/// A model vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions.
    OpenAi,
    /// Anthropic messages.
    Anthropic,
    /// Google Gemini `generateContent`.
    Gemini,
    /// Mistral chat completions.
    Mistral,
}

impl ProviderKind {
    /// Key looked up in [`Credentials`] for this provider.
    #[must_use]
    pub const fn credential_key(self) -> &'static str {
        match self {
            Self::OpenAi => "API_KEY_OPENAI",
            Self::Anthropic => "API_KEY_ANTHROPIC",
            Self::Gemini => "API_KEY_GEMINI",
            Self::Mistral => "API_KEY_MISTRALAI",
        }
    }

    /// Endpoint used when a [`ModelSpec`] names none. For Gemini this is
    /// the models base URL the model name is appended to.
    #[must_use]
    pub const fn default_endpoint(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1/models/",
            Self::Mistral => "https://api.mistral.ai/v1/chat/completions",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Mistral => "mistral",
        };
        f.write_str(name)
    }
}

/// One model to evaluate.
///
/// ```
/// use agd_eval_providers::{ModelSpec, ProviderKind};
///
/// let spec: ModelSpec = serde_json::from_str(
///     r#"{"provider": "gemini", "model": "gemini-1.5-flash-8b"}"#,
/// ).unwrap();
/// assert_eq!(spec.provider, ProviderKind::Gemini);
/// assert_eq!(spec.endpoint(), "https://generativelanguage.googleapis.com/v1/models/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Vendor.
    pub provider: ProviderKind,
    /// Vendor model identifier, also the name used in logs and reports.
    pub model: String,
    /// Overrides the provider's default endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl ModelSpec {
    /// Creates a spec using the provider's default endpoint.
    #[must_use]
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            endpoint: None,
        }
    }

    /// Sets a custom endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The endpoint requests go to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or(self.provider.default_endpoint())
    }
}

/// Builds the client for `spec`, resolving its API key.
///
/// # Errors
///
/// Returns `EvalError::Config` if the model name is blank or the provider's
/// key is not available.
pub fn build_model(
    spec: &ModelSpec,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<Box<dyn Model>, EvalError> {
    if spec.model.trim().is_empty() {
        return Err(EvalError::config("models.model", "model name is empty"));
    }
    let key = credentials.require(spec.provider.credential_key())?;
    log::debug!(
        "Building {} client for {} at {}",
        spec.provider,
        spec.model,
        spec.endpoint()
    );

    let model: Box<dyn Model> = match spec.provider {
        ProviderKind::OpenAi | ProviderKind::Mistral => Box::new(ChatCompletionsModel::new(
            &spec.model,
            spec.endpoint(),
            &key,
            timeout,
        )),
        ProviderKind::Anthropic => {
            Box::new(AnthropicModel::new(&spec.model, spec.endpoint(), key, timeout))
        }
        ProviderKind::Gemini => {
            Box::new(GeminiModel::new(&spec.model, spec.endpoint(), key, timeout))
        }
    };
    Ok(model)
}
