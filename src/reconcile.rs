//! Retry reconciliation: re-dispatch what is still missing until nothing is,
//! or until a pass stops making progress.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_MAX_RETRY_PASSES;
use crate::corpus::Sample;
use crate::dispatch::Dispatcher;
use crate::domain::{Domain, DomainKey};
use crate::error::EvalError;
use crate::store::VerdictLog;
use crate::verdict::Verdict;

/// Bounds on reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Maximum dispatch passes per reconciliation.
    pub max_passes: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_RETRY_PASSES,
        }
    }
}

impl ReconcileConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pass cap.
    #[must_use]
    pub const fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes;
        self
    }
}

/// Sampled domains without a verdict, in sample order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingSet {
    domains: Vec<Domain>,
}

impl MissingSet {
    /// Computes `sample - verdicted`. Duplicate sample entries appear once.
    #[must_use]
    pub fn compute(sample: &Sample, verdicts: &HashMap<DomainKey, Verdict>) -> Self {
        let mut seen = HashSet::new();
        let domains = sample
            .domains
            .iter()
            .filter(|d| {
                let key = d.key();
                !verdicts.contains_key(&key) && seen.insert(key)
            })
            .cloned()
            .collect();
        Self { domains }
    }

    /// Returns the missing domains.
    #[must_use]
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// Returns the keys of the missing domains.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<DomainKey> {
        self.domains.iter().map(Domain::key).collect()
    }

    /// Returns the number of missing domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true if every sampled domain has a verdict.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Why reconciliation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// Every sampled domain has a verdict.
    Complete,
    /// A full pass did not shrink the missing set. The rest is unclassified.
    Stalled,
    /// The pass cap was reached while the set was still shrinking.
    PassLimit,
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Stalled => write!(f, "stalled"),
            Self::PassLimit => write!(f, "pass limit reached"),
        }
    }
}

/// Result of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Dispatch passes made.
    pub passes: u32,
    /// Why it stopped.
    pub status: ReconcileStatus,
    /// Domains still without a verdict.
    pub missing: MissingSet,
}

/// Drives dispatch passes over the missing set of one model.
pub struct Reconciler<'a> {
    dispatcher: &'a Dispatcher<'a>,
    config: ReconcileConfig,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler over `dispatcher`.
    #[must_use]
    pub const fn new(dispatcher: &'a Dispatcher<'a>, config: ReconcileConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Loops dispatch passes over the missing set.
    ///
    /// Stops when the set is empty, when a pass does not shrink it, or after
    /// `max_passes` passes. The final set is written next to the log. Safe to
    /// call any number of times against a partially complete log.
    ///
    /// On a complete log no model call is made. On a stalled log one more
    /// pass is made over the missing set; the resulting set is the same and
    /// the status is `Stalled` again.
    ///
    /// # Errors
    ///
    /// Propagates permanent provider failures and log I/O failures.
    pub fn reconcile(
        &self,
        sample: &Sample,
        log: &mut VerdictLog,
    ) -> Result<ReconcileOutcome, EvalError> {
        let name = self.dispatcher.model().name();
        let index = sample.index();
        let mut missing = MissingSet::compute(sample, log.verdicts());
        let mut passes = 0;
        let mut status = ReconcileStatus::PassLimit;

        log::info!("{name}: {} of {} domains missing", missing.len(), index.len());

        for _ in 0..self.config.max_passes {
            if missing.is_empty() {
                break;
            }
            let before = missing.len();
            self.dispatcher.dispatch(missing.domains(), &index, log)?;
            passes += 1;

            missing = MissingSet::compute(sample, log.verdicts());
            log::info!("{name}: after pass {passes}, {} domains missing", missing.len());

            if !missing.is_empty() && missing.len() >= before {
                status = ReconcileStatus::Stalled;
                log::warn!(
                    "{name}: reconciliation stalled with {} domains unclassified",
                    missing.len()
                );
                break;
            }
        }

        if missing.is_empty() {
            status = ReconcileStatus::Complete;
        } else if status == ReconcileStatus::PassLimit {
            log::warn!(
                "{name}: stopped after {passes} passes with {} domains unclassified",
                missing.len()
            );
        }

        log.write_missing(missing.domains())?;
        Ok(ReconcileOutcome {
            passes,
            status,
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchConfig;
    use crate::simulation::{SimulatedModel, SimulationConfig};
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample() -> Sample {
        Sample::new(
            1,
            0,
            vec![
                Domain::legitimate("a.com"),
                Domain::malicious("b.biz", "x"),
                Domain::legitimate("c.net"),
                Domain::malicious("d.info", "y"),
            ],
        )
    }

    fn fast() -> DispatchConfig {
        DispatchConfig::new().with_transient_backoff(Duration::ZERO)
    }

    #[test]
    fn missing_set_is_sample_minus_verdicts() {
        let s = sample();
        let mut verdicts = HashMap::new();
        let v = Verdict::parse_line("A.COM.|N|10").unwrap();
        verdicts.insert(v.key(), v);

        let missing = MissingSet::compute(&s, &verdicts);
        assert_eq!(missing.len(), 3);
        assert_eq!(missing.domains()[0].name(), "b.biz");
        assert!(!missing.keys().contains(&DomainKey::new("a.com")));
    }

    #[test]
    fn complete_log_is_a_no_op() {
        let dir = tempdir().unwrap();
        let s = sample();
        let model = SimulatedModel::new("sim", &s.domains, SimulationConfig::new());
        let mut log = VerdictLog::open(dir.path(), "sim", 1).unwrap();
        let dispatcher = Dispatcher::new(&model, "p", 2, fast());
        dispatcher.dispatch(&s.domains, &s.index(), &mut log).unwrap();

        let outcome = Reconciler::new(&dispatcher, ReconcileConfig::new())
            .reconcile(&s, &mut log)
            .unwrap();
        assert_eq!(outcome.status, ReconcileStatus::Complete);
        assert_eq!(outcome.passes, 0);
        assert_eq!(model.calls(), 2);
    }

    #[test]
    fn delayed_domains_resolve_over_passes() {
        let dir = tempdir().unwrap();
        let s = sample();
        let config = SimulationConfig::new()
            .with_delayed("b.biz", 2)
            .with_delayed("d.info", 1);
        let model = SimulatedModel::new("sim", &s.domains, config);
        let mut log = VerdictLog::open(dir.path(), "sim", 1).unwrap();
        let dispatcher = Dispatcher::new(&model, "p", 10, fast());

        let outcome = Reconciler::new(&dispatcher, ReconcileConfig::new())
            .reconcile(&s, &mut log)
            .unwrap();
        assert_eq!(outcome.status, ReconcileStatus::Complete);
        assert_eq!(outcome.passes, 3);
        assert!(!log.missing_path().exists());
    }

    #[test]
    fn never_answered_domain_stalls() {
        let dir = tempdir().unwrap();
        let s = sample();
        let model = SimulatedModel::new("sim", &s.domains, SimulationConfig::new().with_omitted("c.net"));
        let mut log = VerdictLog::open(dir.path(), "sim", 1).unwrap();
        let dispatcher = Dispatcher::new(&model, "p", 10, fast());
        dispatcher.dispatch(&s.domains, &s.index(), &mut log).unwrap();

        let outcome = Reconciler::new(&dispatcher, ReconcileConfig::new())
            .reconcile(&s, &mut log)
            .unwrap();
        assert_eq!(outcome.status, ReconcileStatus::Stalled);
        assert_eq!(outcome.passes, 1);
        assert_eq!(outcome.missing.domains(), &[Domain::legitimate("c.net")]);
        assert_eq!(log.read_missing().unwrap(), vec![Domain::legitimate("c.net")]);
    }

    #[test]
    fn pass_cap_bounds_progressing_reconciliation() {
        let dir = tempdir().unwrap();
        let s = sample();
        let config = SimulationConfig::new()
            .with_delayed("a.com", 1)
            .with_delayed("b.biz", 2)
            .with_delayed("c.net", 3)
            .with_delayed("d.info", 4);
        let model = SimulatedModel::new("sim", &s.domains, config);
        let mut log = VerdictLog::open(dir.path(), "sim", 1).unwrap();
        let dispatcher = Dispatcher::new(&model, "p", 10, fast());

        // The fresh pass answers nothing; each retry then resolves one domain.
        dispatcher.dispatch(&s.domains, &s.index(), &mut log).unwrap();
        let outcome = Reconciler::new(&dispatcher, ReconcileConfig::new().with_max_passes(2))
            .reconcile(&s, &mut log)
            .unwrap();
        assert_eq!(outcome.status, ReconcileStatus::PassLimit);
        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.missing.len(), 2);
    }
}
