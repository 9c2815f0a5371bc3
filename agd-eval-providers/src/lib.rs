//! Vendor clients implementing [`agd_eval::Model`].
//!
//! Each client sends the same three-turn conversation:
//!
//! ```text
//! user:      <composed prompt>
//! assistant: yes
//! user:      <comma-separated batch>
//! ```
//!
//! at temperature 0, over blocking HTTP. Rate limiting, server errors,
//! transport failures and bodies without the expected text are reported as
//! [`ProviderError::Transient`](agd_eval::ProviderError::Transient) so the
//! dispatcher backs off and retries; any other HTTP status is permanent.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::time::Duration;
//! use agd_eval_providers::{Credentials, ModelSpec, ProviderKind, build_model};
//!
//! let credentials = Credentials::load(Path::new(".secret")).unwrap();
//! let spec = ModelSpec::new(ProviderKind::Mistral, "ministral-3b-latest");
//! let model = build_model(&spec, &credentials, Duration::from_secs(120)).unwrap();
//! let text = model.submit("Classify these domains.", "google.com, xkqzvbt.biz").unwrap();
//! println!("{text}");
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod anthropic;
mod credentials;
mod gemini;
mod http;
mod openai;
mod provider;

pub use anthropic::AnthropicModel;
pub use credentials::Credentials;
pub use gemini::GeminiModel;
pub use http::{DEFAULT_REQUEST_TIMEOUT, is_transient_status};
pub use openai::ChatCompletionsModel;
pub use provider::{ModelSpec, ProviderKind, build_model};
