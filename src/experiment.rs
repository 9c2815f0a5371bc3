//! Experiment identification and sampling parameters.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_DOMAINS_PER_FAMILY, DEFAULT_LEGITIMATE_DOMAINS, DEFAULT_SEED,
    PROMPT_FRAGMENT_SEPARATOR,
};
use crate::error::EvalError;

/// Whether a run classifies the whole sample or only what is still missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Dispatch every sampled domain.
    #[default]
    Fresh,
    /// Reconcile against the existing verdict log.
    Retry,
}

/// How many domains to draw from the corpus, and with which seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpec {
    /// Domains drawn from every malware family.
    pub domains_per_family: usize,
    /// Legitimate domains drawn in total.
    pub legitimate_domains: usize,
    /// Seed for the sampling RNG.
    pub seed: u64,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            domains_per_family: DEFAULT_DOMAINS_PER_FAMILY,
            legitimate_domains: DEFAULT_LEGITIMATE_DOMAINS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Identifies one experiment.
///
/// Immutable for the duration of a run.
///
/// # Examples
///
/// ```
/// use agd_eval::{ExperimentSpec, RunMode};
///
/// let spec = ExperimentSpec::new(2)
///     .with_prompt_fragments(vec!["You classify domains.".into(), "Answer DOMAIN|Y|CONF.".into()])
///     .with_batch_size(50)
///     .with_mode(RunMode::Retry);
///
/// assert_eq!(spec.composed_prompt(), "You classify domains.\n\nAnswer DOMAIN|Y|CONF.");
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Experiment number, used in file names.
    pub id: u32,
    /// Prompt fragments, joined in order.
    pub prompt_fragments: Vec<String>,
    /// Sampling parameters.
    pub sample: SampleSpec,
    /// Domains per model call.
    pub batch_size: usize,
    /// Fresh run or retry pass.
    #[serde(default)]
    pub mode: RunMode,
}

impl ExperimentSpec {
    /// Creates a spec with default sampling and batch size and no prompt.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            prompt_fragments: Vec::new(),
            sample: SampleSpec::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            mode: RunMode::Fresh,
        }
    }

    /// Sets the prompt fragments.
    #[must_use]
    pub fn with_prompt_fragments(mut self, fragments: Vec<String>) -> Self {
        self.prompt_fragments = fragments;
        self
    }

    /// Sets the sampling parameters.
    #[must_use]
    pub const fn with_sample(mut self, sample: SampleSpec) -> Self {
        self.sample = sample;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the run mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Joins the prompt fragments into the text sent ahead of every batch.
    #[must_use]
    pub fn composed_prompt(&self) -> String {
        self.prompt_fragments
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>()
            .join(PROMPT_FRAGMENT_SEPARATOR)
    }

    /// Checks the spec can drive a run.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Config` if the batch size is zero, the prompt is
    /// empty, or the sample would be empty.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.batch_size == 0 {
            return Err(EvalError::config("batch_size", "must be at least 1"));
        }
        if self.composed_prompt().is_empty() {
            return Err(EvalError::config(
                "prompt_fragments",
                "composed prompt is empty",
            ));
        }
        if self.sample.domains_per_family == 0 && self.sample.legitimate_domains == 0 {
            return Err(EvalError::config("sample", "requests no domains"));
        }
        Ok(())
    }
}
