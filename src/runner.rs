//! Experiment orchestration across models.
//!
//! An [`Evaluation`] owns the explicit configuration of one experiment and
//! exposes its three entry points:
//!
//! - [`Evaluation::prepare_sample`]: draw (or reload) the sample
//! - [`Evaluation::run_all`]: fresh dispatch or reconciliation, per model
//! - [`Evaluation::analyze`]: metrics from whatever the logs hold
//!
//! Models are processed one after another. A model that fails permanently
//! is reported and skipped; the others still run.

use std::fs;
use std::path::PathBuf;

use crate::corpus::{Corpus, Sample};
use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::error::{EvalError, StoreError};
use crate::experiment::{ExperimentSpec, RunMode};
use crate::metrics::evaluate;
use crate::model::Model;
use crate::reconcile::{MissingSet, ReconcileConfig, ReconcileStatus, Reconciler};
use crate::report::{EvaluationReport, ModelReport};
use crate::store::VerdictLog;

/// Directories an evaluation reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationPaths {
    /// Samples and composed prompts, one subdirectory per experiment.
    pub dataset: PathBuf,
    /// Verdict logs, diagnostics and missing-domain files.
    pub output: PathBuf,
    /// Metrics tables and reports.
    pub metrics: PathBuf,
}

impl EvaluationPaths {
    /// Creates paths from the three directories.
    #[must_use]
    pub fn new(
        dataset: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        metrics: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            output: output.into(),
            metrics: metrics.into(),
        }
    }

    /// `<dataset>/<experiment>/samples.json`
    #[must_use]
    pub fn sample_file(&self, experiment: u32) -> PathBuf {
        self.dataset.join(experiment.to_string()).join("samples.json")
    }

    /// `<dataset>/<experiment>/prompt.txt`
    #[must_use]
    pub fn prompt_file(&self, experiment: u32) -> PathBuf {
        self.dataset.join(experiment.to_string()).join("prompt.txt")
    }

    /// `<metrics>/EXP<experiment>.csv`
    #[must_use]
    pub fn metrics_table(&self, experiment: u32) -> PathBuf {
        self.metrics.join(format!("EXP{experiment}.csv"))
    }

    /// `<metrics>/EXP<experiment>.json`
    #[must_use]
    pub fn metrics_report(&self, experiment: u32) -> PathBuf {
        self.metrics.join(format!("EXP{experiment}.json"))
    }
}

/// What one model's run achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRun {
    /// Model name.
    pub model: String,
    /// Dispatch passes made.
    pub passes: u32,
    /// Why reconciliation stopped; `None` for a fresh run.
    pub status: Option<ReconcileStatus>,
    /// Domains still without a verdict.
    pub missing: MissingSet,
}

/// Per-model result of [`Evaluation::run_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutcome {
    /// The run finished, possibly with domains still missing.
    Finished(ModelRun),
    /// The run aborted for this model.
    Aborted {
        /// Model name.
        model: String,
        /// What stopped it.
        error: EvalError,
    },
}

/// One experiment, configured.
#[derive(Debug, Clone)]
pub struct Evaluation {
    spec: ExperimentSpec,
    prompt: String,
    paths: EvaluationPaths,
    dispatch: DispatchConfig,
    reconcile: ReconcileConfig,
}

impl Evaluation {
    /// Creates an evaluation with default dispatch and reconcile settings.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Config` if `spec` does not validate.
    pub fn new(spec: ExperimentSpec, paths: EvaluationPaths) -> Result<Self, EvalError> {
        spec.validate()?;
        Ok(Self {
            prompt: spec.composed_prompt(),
            spec,
            paths,
            dispatch: DispatchConfig::default(),
            reconcile: ReconcileConfig::default(),
        })
    }

    /// Sets the dispatch configuration.
    #[must_use]
    pub const fn with_dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    /// Sets the reconcile configuration.
    #[must_use]
    pub const fn with_reconcile_config(mut self, config: ReconcileConfig) -> Self {
        self.reconcile = config;
        self
    }

    /// Returns the experiment spec.
    #[must_use]
    pub const fn spec(&self) -> &ExperimentSpec {
        &self.spec
    }

    /// Returns the configured paths.
    #[must_use]
    pub const fn paths(&self) -> &EvaluationPaths {
        &self.paths
    }

    /// Reloads the saved sample, or draws and saves a new one together with
    /// the composed prompt.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Corpus` if sampling fails and `EvalError::Store`
    /// if the files cannot be written.
    pub fn prepare_sample(&self, corpus: &dyn Corpus) -> Result<Sample, EvalError> {
        let path = self.paths.sample_file(self.spec.id);
        if let Some(sample) = Sample::load(&path)? {
            log::info!("Reusing sample of {} domains from {}", sample.len(), path.display());
            return Ok(sample);
        }

        let sample = Sample::draw(corpus, self.spec.id, &self.spec.sample)?;
        sample.save(&path)?;
        let prompt_path = self.paths.prompt_file(self.spec.id);
        fs::write(&prompt_path, &self.prompt).map_err(|e| StoreError::io(&prompt_path, &e))?;
        log::info!("Saved sample of {} domains to {}", sample.len(), path.display());
        Ok(sample)
    }

    /// Loads the sample saved by [`Evaluation::prepare_sample`].
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Config` if no sample was saved for this experiment.
    pub fn load_sample(&self) -> Result<Sample, EvalError> {
        let path = self.paths.sample_file(self.spec.id);
        Sample::load(&path)?.ok_or_else(|| {
            EvalError::config(
                "experiment",
                format!("no sample at {}; run the sample step first", path.display()),
            )
        })
    }

    /// Runs one model in the configured mode.
    ///
    /// A fresh run dispatches the whole sample once. A retry reconciles
    /// against the existing log.
    ///
    /// # Errors
    ///
    /// Returns permanent provider failures and log I/O failures.
    pub fn run_model(&self, model: &dyn Model, sample: &Sample) -> Result<ModelRun, EvalError> {
        let mut log = VerdictLog::open(&self.paths.output, model.name(), self.spec.id)?;
        let dispatcher = Dispatcher::new(model, &self.prompt, self.spec.batch_size, self.dispatch);

        match self.spec.mode {
            RunMode::Fresh => {
                dispatcher.dispatch(&sample.domains, &sample.index(), &mut log)?;
                let missing = MissingSet::compute(sample, log.verdicts());
                log.write_missing(missing.domains())?;
                Ok(ModelRun {
                    model: model.name().to_string(),
                    passes: 1,
                    status: None,
                    missing,
                })
            }
            RunMode::Retry => {
                let outcome =
                    Reconciler::new(&dispatcher, self.reconcile).reconcile(sample, &mut log)?;
                Ok(ModelRun {
                    model: model.name().to_string(),
                    passes: outcome.passes,
                    status: Some(outcome.status),
                    missing: outcome.missing,
                })
            }
        }
    }

    /// Runs every model in turn. A failure aborts only the model it hit.
    pub fn run_all(&self, models: &[Box<dyn Model>], sample: &Sample) -> Vec<ModelOutcome> {
        models
            .iter()
            .map(|model| {
                log::info!(
                    "Running {} on experiment {} ({:?})",
                    model.name(),
                    self.spec.id,
                    self.spec.mode
                );
                match self.run_model(model.as_ref(), sample) {
                    Ok(run) => {
                        log::info!(
                            "{}: {} passes, {} domains missing",
                            run.model,
                            run.passes,
                            run.missing.len()
                        );
                        ModelOutcome::Finished(run)
                    }
                    Err(error) => {
                        log::error!("{}: aborted: {error}", model.name());
                        ModelOutcome::Aborted {
                            model: model.name().to_string(),
                            error,
                        }
                    }
                }
            })
            .collect()
    }

    /// Computes metrics for each named model from its verdict log, appends
    /// them to the experiment's CSV table and rewrites its JSON report.
    ///
    /// Running it again on the same logs yields the same metrics.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Store` if a log cannot be read or the outputs
    /// cannot be written.
    pub fn analyze(
        &self,
        models: &[&str],
        sample: &Sample,
    ) -> Result<EvaluationReport, EvalError> {
        let mut report = EvaluationReport::new(self.spec.id);
        for &name in models {
            let log = VerdictLog::open(&self.paths.output, name, self.spec.id)?;
            let metrics = evaluate(sample, log.verdicts());
            log::info!(
                "{name}: accuracy {} mcc {} kappa {} ({} unclassified)",
                metrics.overall.accuracy,
                metrics.overall.mcc,
                metrics.overall.kappa,
                metrics.overall.unclassified
            );
            report = report.with_model(ModelReport {
                model: name.to_string(),
                sampled: sample.len(),
                metrics,
            });
        }

        write_report(&report, &self.paths, self.spec.id)?;
        Ok(report)
    }
}

fn write_report(
    report: &EvaluationReport,
    paths: &EvaluationPaths,
    experiment: u32,
) -> Result<(), EvalError> {
    let table = paths.metrics_table(experiment);
    report.append_csv(&table)?;
    let json = paths.metrics_report(experiment);
    report.save(&json)?;
    log::info!("Wrote {} and {}", table.display(), json.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::FamilyCorpus;
    use crate::domain::Domain;
    use crate::experiment::SampleSpec;
    use crate::simulation::{SimulatedModel, SimulationConfig};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn corpus() -> FamilyCorpus {
        let mut families = BTreeMap::new();
        families.insert(
            "x".to_string(),
            (0..4).map(|i| format!("dga{i}.biz")).collect(),
        );
        FamilyCorpus::new(families, (0..8).map(|i| format!("site{i}.com")).collect())
    }

    fn evaluation(dir: &TempDir, mode: RunMode) -> Evaluation {
        let spec = ExperimentSpec::new(1)
            .with_prompt_fragments(vec!["classify".to_string()])
            .with_sample(SampleSpec {
                domains_per_family: 4,
                legitimate_domains: 8,
                seed: 7,
            })
            .with_batch_size(5)
            .with_mode(mode);
        let root = dir.path();
        Evaluation::new(
            spec,
            EvaluationPaths::new(root.join("dataset"), root.join("output"), root.join("metrics")),
        )
        .unwrap()
        .with_dispatch_config(DispatchConfig::new().with_transient_backoff(Duration::ZERO))
    }

    #[test]
    fn prepare_sample_is_stable() {
        let dir = tempdir().unwrap();
        let eval = evaluation(&dir, RunMode::Fresh);
        let first = eval.prepare_sample(&corpus()).unwrap();
        assert_eq!(first.len(), 12);
        assert!(eval.paths().prompt_file(1).exists());

        let empty = FamilyCorpus::default();
        let again = eval.prepare_sample(&empty).unwrap();
        assert_eq!(first, again);
        assert_eq!(eval.load_sample().unwrap(), first);
    }

    #[test]
    fn load_sample_requires_prepare() {
        let dir = tempdir().unwrap();
        let eval = evaluation(&dir, RunMode::Retry);
        assert!(matches!(eval.load_sample(), Err(EvalError::Config { .. })));
    }

    #[test]
    fn fresh_then_retry_then_analyze() {
        let dir = tempdir().unwrap();
        let fresh = evaluation(&dir, RunMode::Fresh);
        let sample = fresh.prepare_sample(&corpus()).unwrap();
        let late = sample.domains[0].name().to_string();

        let models: Vec<Box<dyn Model>> = vec![Box::new(SimulatedModel::new(
            "sim",
            &sample.domains,
            SimulationConfig::new().with_delayed(&late, 1),
        ))];

        let outcomes = fresh.run_all(&models, &sample);
        let ModelOutcome::Finished(run) = &outcomes[0] else {
            panic!("fresh run aborted");
        };
        assert_eq!(run.missing.len(), 1);
        assert_eq!(run.status, None);

        let retry = evaluation(&dir, RunMode::Retry);
        let outcomes = retry.run_all(&models, &sample);
        let ModelOutcome::Finished(run) = &outcomes[0] else {
            panic!("retry aborted");
        };
        assert_eq!(run.status, Some(ReconcileStatus::Complete));
        assert!(run.missing.is_empty());

        let report = retry.analyze(&["sim"], &sample).unwrap();
        let overall = &report.models[0].metrics.overall;
        assert_eq!(overall.counts.total(), 12);
        assert_eq!(overall.unclassified, 0);
        assert!(retry.paths().metrics_table(1).exists());
        assert!(retry.paths().metrics_report(1).exists());
    }

    #[test]
    fn permanent_failure_aborts_only_that_model() {
        let dir = tempdir().unwrap();
        let eval = evaluation(&dir, RunMode::Fresh);
        let sample = Sample::new(
            1,
            0,
            vec![Domain::legitimate("a.com"), Domain::malicious("b.biz", "x")],
        );
        let models: Vec<Box<dyn Model>> = vec![
            Box::new(SimulatedModel::new(
                "broken",
                &sample.domains,
                SimulationConfig::new().with_permanent_failure(true),
            )),
            Box::new(SimulatedModel::new("ok", &sample.domains, SimulationConfig::new())),
        ];

        let outcomes = eval.run_all(&models, &sample);
        assert!(matches!(
            &outcomes[0],
            ModelOutcome::Aborted { model, error: EvalError::Provider(_) } if model == "broken"
        ));
        assert!(matches!(&outcomes[1], ModelOutcome::Finished(run) if run.missing.is_empty()));
    }
}
