//! In-process model for tests and benchmarks.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::constants::{BATCH_SEPARATOR, FIELD_SEPARATOR};
use crate::domain::{Domain, DomainKey, Label};
use crate::error::ProviderError;
use crate::model::Model;
use crate::verdict::Verdict;

/// Confidence the simulated model states for malicious answers.
const MALICIOUS_CONFIDENCE: f64 = 80.0;
/// Confidence the simulated model states for legitimate answers.
const LEGITIMATE_CONFIDENCE: f64 = 90.0;

/// Misbehaviour injected into a [`SimulatedModel`].
#[derive(Debug, Clone, Default)]
pub struct SimulationConfig {
    /// Domains never answered.
    omitted: HashSet<DomainKey>,
    /// Domains left out of the first K responses that mention them.
    delayed: HashMap<DomainKey, u32>,
    /// Domains answered with an unparseable line.
    garbled: HashSet<DomainKey>,
    /// Domains answered with the wrong label.
    flipped: HashSet<DomainKey>,
    /// Extra domains answered in every response although never asked.
    hallucinated: Vec<String>,
    /// Commentary emitted before the verdict lines.
    preamble: Option<String>,
    /// Calls that fail transiently before the model starts answering.
    transient_failures: u32,
    /// Every call fails permanently.
    permanent_failure: bool,
}

impl SimulationConfig {
    /// Creates a configuration with a perfectly behaved model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Never answers `domain`.
    #[must_use]
    pub fn with_omitted(mut self, domain: &str) -> Self {
        self.omitted.insert(DomainKey::new(domain));
        self
    }

    /// Leaves `domain` out of the first `requests` responses that ask for it.
    #[must_use]
    pub fn with_delayed(mut self, domain: &str, requests: u32) -> Self {
        self.delayed.insert(DomainKey::new(domain), requests);
        self
    }

    /// Answers `domain` with a line the parser rejects.
    #[must_use]
    pub fn with_garbled(mut self, domain: &str) -> Self {
        self.garbled.insert(DomainKey::new(domain));
        self
    }

    /// Answers `domain` with the opposite of its true label.
    #[must_use]
    pub fn with_flipped(mut self, domain: &str) -> Self {
        self.flipped.insert(DomainKey::new(domain));
        self
    }

    /// Adds a verdict for `domain` to every response.
    #[must_use]
    pub fn with_hallucinated(mut self, domain: impl Into<String>) -> Self {
        self.hallucinated.push(domain.into());
        self
    }

    /// Emits `text` before the verdict lines.
    #[must_use]
    pub fn with_preamble(mut self, text: impl Into<String>) -> Self {
        self.preamble = Some(text.into());
        self
    }

    /// Fails the first `count` calls with a transient error.
    #[must_use]
    pub const fn with_transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Fails every call with a permanent error.
    #[must_use]
    pub const fn with_permanent_failure(mut self, fail: bool) -> Self {
        self.permanent_failure = fail;
        self
    }
}

#[derive(Debug, Default)]
struct SimulationState {
    calls: u32,
    transient_served: u32,
    requests: HashMap<DomainKey, u32>,
}

/// Model that answers from a ground-truth table.
///
/// # Examples
///
/// ```
/// use agd_eval::{Domain, Model, SimulatedModel, SimulationConfig};
///
/// let corpus = [Domain::legitimate("a.com"), Domain::malicious("b.biz", "x")];
/// let model = SimulatedModel::new("sim", &corpus, SimulationConfig::new().with_omitted("b.biz"));
///
/// let text = model.submit("classify", "a.com, b.biz").unwrap();
/// assert_eq!(text, "a.com|N|90.0");
/// ```
#[derive(Debug)]
pub struct SimulatedModel {
    name: String,
    truth: HashMap<DomainKey, Label>,
    config: SimulationConfig,
    state: Mutex<SimulationState>,
}

impl SimulatedModel {
    /// Creates a model that knows the labels of `domains`.
    #[must_use]
    pub fn new(name: impl Into<String>, domains: &[Domain], config: SimulationConfig) -> Self {
        Self {
            name: name.into(),
            truth: domains.iter().map(|d| (d.key(), d.label())).collect(),
            config,
            state: Mutex::new(SimulationState::default()),
        }
    }

    /// Returns the number of calls received so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
    }
}

impl Model for SimulatedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, _prompt: &str, batch: &str) -> Result<String, ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls += 1;

        if self.config.permanent_failure {
            return Err(ProviderError::permanent(&self.name, "invalid API key"));
        }
        if state.transient_served < self.config.transient_failures {
            state.transient_served += 1;
            return Err(ProviderError::transient(&self.name, "rate limited"));
        }

        let mut lines = Vec::new();
        if let Some(preamble) = &self.config.preamble {
            lines.push(preamble.clone());
        }

        for domain in batch.split(BATCH_SEPARATOR.trim()).map(str::trim) {
            if domain.is_empty() {
                continue;
            }
            let key = DomainKey::new(domain);
            let seen = state.requests.entry(key.clone()).or_insert(0);
            *seen += 1;

            if self.config.omitted.contains(&key) {
                continue;
            }
            if self.config.delayed.get(&key).is_some_and(|k| *seen <= *k) {
                continue;
            }
            if self.config.garbled.contains(&key) {
                lines.push(format!("{domain}{FIELD_SEPARATOR}MAYBE{FIELD_SEPARATOR}abc"));
                continue;
            }

            let mut label = self.truth.get(&key).copied().unwrap_or(Label::Legitimate);
            if self.config.flipped.contains(&key) {
                label = match label {
                    Label::Malicious => Label::Legitimate,
                    Label::Legitimate => Label::Malicious,
                };
            }
            lines.push(answer(domain, label));
        }

        for extra in &self.config.hallucinated {
            lines.push(answer(extra, Label::Malicious));
        }

        Ok(lines.join("\n"))
    }
}

fn answer(domain: &str, label: Label) -> String {
    let confidence = if label.is_malicious() {
        MALICIOUS_CONFIDENCE
    } else {
        LEGITIMATE_CONFIDENCE
    };
    Verdict::new(domain, label, confidence).map_or_else(
        |_| format!("{domain}{FIELD_SEPARATOR}?{FIELD_SEPARATOR}?"),
        |v| v.to_string(),
    )
}
