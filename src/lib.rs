//! Zero-shot evaluation of language models as AGD classifiers.
//!
//! This crate measures how well third-party language models tell
//! algorithmically generated domains (AGDs) from legitimate ones when asked
//! without examples. It covers the whole loop:
//!
//! 1. **Sampling**: a seeded draw from a family-partitioned corpus ([`FamilyCorpus`])
//! 2. **Dispatch**: fixed-size batches sent to a [`Model`], responses parsed
//!    line by line into [`Verdict`]s and [`ParseFailure`]s ([`Dispatcher`])
//! 3. **Reconciliation**: re-dispatch of the [`MissingSet`] until it is empty
//!    or stops shrinking ([`Reconciler`])
//! 4. **Metrics**: accuracy, precision, recall, F1, FPR, TPR, MCC and Cohen's
//!    κ, overall, per class and per family ([`evaluate`])
//!
//! Every model call is appended to a [`VerdictLog`], so an interrupted run
//! resumes from whatever reached disk.
//!
//! # Verdict Grammar
//!
//! ```text
//! DOMAIN|Y|CONFIDENCE     malicious
//! DOMAIN|N|CONFIDENCE     legitimate
//! ```
//!
//! Confidence is a fixed-point decimal in `[0.0, 100.0]`. Any other non-blank
//! line becomes a `ParseFailure`.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use agd_eval::{
//!     evaluate, DispatchConfig, Dispatcher, Domain, ReconcileConfig, ReconcileStatus,
//!     Reconciler, Sample, SimulatedModel, SimulationConfig, VerdictLog,
//! };
//!
//! let sample = Sample::new(1, 42, vec![
//!     Domain::legitimate("a.com"),
//!     Domain::malicious("b.biz", "familyX"),
//! ]);
//!
//! // A model that skips b.biz the first time it is asked.
//! let model = SimulatedModel::new(
//!     "sim",
//!     &sample.domains,
//!     SimulationConfig::new().with_delayed("b.biz", 1),
//! );
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut log = VerdictLog::open(dir.path(), "sim", 1).unwrap();
//! let config = DispatchConfig::new().with_transient_backoff(Duration::ZERO);
//! let dispatcher = Dispatcher::new(&model, "Classify these domains.", 125, config);
//!
//! let outcome = Reconciler::new(&dispatcher, ReconcileConfig::new())
//!     .reconcile(&sample, &mut log)
//!     .unwrap();
//! assert_eq!(outcome.status, ReconcileStatus::Complete);
//!
//! let metrics = evaluate(&sample, log.verdicts());
//! assert_eq!(metrics.overall.mcc.value(), Some(1.0));
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod constants;
mod corpus;
mod dispatch;
mod domain;
mod error;
mod experiment;
mod metrics;
mod model;
mod reconcile;
mod report;
mod runner;
mod simulation;
mod store;
mod verdict;

pub use constants::{
    BATCH_SEPARATOR, DEFAULT_BATCH_SIZE, DEFAULT_DOMAINS_PER_FAMILY, DEFAULT_LEGITIMATE_DOMAINS,
    DEFAULT_MAX_RETRY_PASSES, DEFAULT_SEED, DEFAULT_TRANSIENT_BACKOFF, DEFAULT_TRANSIENT_RETRIES,
    FIELD_SEPARATOR, LEGITIMATE_TOKEN, MALICIOUS_TOKEN, MAX_CONFIDENCE, PRIMING_REPLY,
    PROMPT_FRAGMENT_SEPARATOR,
};
pub use corpus::{Corpus, FamilyCorpus, Sample};
pub use dispatch::{DispatchConfig, DispatchReport, Dispatcher, PassAccounting, partition};
pub use domain::{Domain, DomainKey, Label};
pub use error::{CorpusError, EvalError, ProviderError, StoreError};
pub use experiment::{ExperimentSpec, RunMode, SampleSpec};
pub use metrics::{ConfusionCounts, ExperimentMetrics, MetricValue, MetricsRecord, Scope, evaluate};
pub use model::{Model, RawResponse, render_batch};
pub use reconcile::{MissingSet, ReconcileConfig, ReconcileOutcome, ReconcileStatus, Reconciler};
pub use report::{CSV_HEADER, EvaluationReport, ModelReport, ReportMetadata, csv_row};
pub use runner::{Evaluation, EvaluationPaths, ModelOutcome, ModelRun};
pub use simulation::{SimulatedModel, SimulationConfig};
pub use store::{BatchRecord, VerdictLog, sanitize_model_name};
pub use verdict::{BatchId, FailureReason, ParseFailure, ParsedResponse, Verdict, parse_response};
