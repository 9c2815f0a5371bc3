//! JSON run configuration.
//!
//! ```json
//! {
//!   "experiment": {
//!     "id": 1,
//!     "prompt_files": ["prompts/role.txt", "prompts/format.txt"],
//!     "domains_per_family": 1000,
//!     "legitimate_domains": 25000,
//!     "seed": 42,
//!     "batch_size": 125
//!   },
//!   "corpus": { "families_dir": "data/families", "legitimate_file": "data/legitimate.csv" },
//!   "models": [{ "provider": "mistral", "model": "ministral-3b-latest" }],
//!   "paths": { "dataset": "dataset", "output": "output", "metrics": "metrics" },
//!   "dispatch": { "backoff_secs": 15, "transient_retries": 1, "max_retry_passes": 10, "request_timeout_secs": 120 },
//!   "secrets_file": ".secret"
//! }
//! ```
//!
//! Every section is optional and falls back to the defaults above.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agd_eval::{
    DEFAULT_BATCH_SIZE, DEFAULT_DOMAINS_PER_FAMILY, DEFAULT_LEGITIMATE_DOMAINS,
    DEFAULT_MAX_RETRY_PASSES, DEFAULT_SEED, DEFAULT_TRANSIENT_BACKOFF, DEFAULT_TRANSIENT_RETRIES,
    DispatchConfig, EvalError, EvaluationPaths, ExperimentSpec, ReconcileConfig, RunMode,
    SampleSpec,
};
use agd_eval_providers::{DEFAULT_REQUEST_TIMEOUT, ModelSpec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub experiment: ExperimentSection,
    pub corpus: CorpusSection,
    pub models: Vec<ModelSpec>,
    pub paths: PathsSection,
    pub dispatch: DispatchSection,
    pub secrets_file: SecretsFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSection {
    pub id: u32,
    /// Joined in order into the composed prompt.
    pub prompt_files: Vec<PathBuf>,
    pub domains_per_family: usize,
    pub legitimate_domains: usize,
    pub seed: u64,
    pub batch_size: usize,
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            id: 1,
            prompt_files: Vec::new(),
            domains_per_family: DEFAULT_DOMAINS_PER_FAMILY,
            legitimate_domains: DEFAULT_LEGITIMATE_DOMAINS,
            seed: DEFAULT_SEED,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSection {
    pub families_dir: PathBuf,
    pub legitimate_file: PathBuf,
}

impl Default for CorpusSection {
    fn default() -> Self {
        Self {
            families_dir: PathBuf::from("data/families"),
            legitimate_file: PathBuf::from("data/legitimate.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub dataset: PathBuf,
    pub output: PathBuf,
    pub metrics: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("dataset"),
            output: PathBuf::from("output"),
            metrics: PathBuf::from("metrics"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub backoff_secs: u64,
    pub transient_retries: u32,
    pub max_retry_passes: u32,
    pub request_timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            backoff_secs: DEFAULT_TRANSIENT_BACKOFF.as_secs(),
            transient_retries: DEFAULT_TRANSIENT_RETRIES,
            max_retry_passes: DEFAULT_MAX_RETRY_PASSES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretsFile(pub PathBuf);

impl Default for SecretsFile {
    fn default() -> Self {
        Self(PathBuf::from(".secret"))
    }
}

impl RunConfig {
    /// Reads a config file.
    pub fn load(path: &Path) -> Result<Self, EvalError> {
        let text = fs::read_to_string(path)
            .map_err(|e| EvalError::config("config", format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| EvalError::config("config", format!("{}: {e}", path.display())))
    }

    /// Builds the experiment spec, reading the prompt fragment files.
    pub fn experiment_spec(&self, mode: RunMode) -> Result<ExperimentSpec, EvalError> {
        let experiment = &self.experiment;
        let fragments = experiment
            .prompt_files
            .iter()
            .map(|path| {
                fs::read_to_string(path).map_err(|e| {
                    EvalError::config(
                        "experiment.prompt_files",
                        format!("{}: {e}", path.display()),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let spec = ExperimentSpec::new(experiment.id)
            .with_prompt_fragments(fragments)
            .with_sample(SampleSpec {
                domains_per_family: experiment.domains_per_family,
                legitimate_domains: experiment.legitimate_domains,
                seed: experiment.seed,
            })
            .with_batch_size(experiment.batch_size)
            .with_mode(mode);
        spec.validate()?;
        Ok(spec)
    }

    pub fn evaluation_paths(&self) -> EvaluationPaths {
        EvaluationPaths::new(
            &self.paths.dataset,
            &self.paths.output,
            &self.paths.metrics,
        )
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::new()
            .with_transient_backoff(Duration::from_secs(self.dispatch.backoff_secs))
            .with_transient_retries(self.dispatch.transient_retries)
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig::new().with_max_passes(self.dispatch.max_retry_passes)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.request_timeout_secs)
    }

    /// Models to run, optionally restricted to one by name.
    pub fn selected_models(&self, only: Option<&str>) -> Result<Vec<&ModelSpec>, EvalError> {
        let selected: Vec<&ModelSpec> = self
            .models
            .iter()
            .filter(|m| only.is_none_or(|name| m.model == name))
            .collect();
        if selected.is_empty() {
            let reason = only.map_or_else(
                || "no models configured".to_string(),
                |name| format!("no configured model named '{name}'"),
            );
            return Err(EvalError::config("models", reason));
        }
        Ok(selected)
    }
}
