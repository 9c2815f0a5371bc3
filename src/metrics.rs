//! Binary classification metrics over finalized verdicts.
//!
//! Malicious is the positive class. Every ratio is a [`MetricValue`]: a zero
//! denominator gives [`MetricValue::Undefined`], never `0.0` or `NaN`.
//!
//! | Metric | Formula |
//! |--------|---------|
//! | accuracy | (TP+TN) / (TP+TN+FP+FN) |
//! | precision | TP / (TP+FP) |
//! | recall, TPR | TP / (TP+FN) |
//! | F1 | 2·P·R / (P+R) |
//! | FPR | FP / (FP+TN) |
//! | MCC | (TP·TN − FP·FN) / √((TP+FP)(TP+FN)(TN+FP)(TN+FN)) |
//! | κ | (p_o − p_e) / (1 − p_e) |
//!
//! For κ, `p_e = ((TP+FP)(TP+FN) + (TN+FN)(TN+FP)) / N²`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::corpus::Sample;
use crate::domain::{DomainKey, Label};
use crate::verdict::Verdict;

/// Converts a count to f64, saturating at `u32::MAX`.
#[inline]
pub(crate) fn count_as_f64(count: usize) -> f64 {
    f64::from(u32::try_from(count).unwrap_or(u32::MAX))
}

/// Converts a product of counts to f64. Exact below 2^53.
#[inline]
#[allow(clippy::cast_precision_loss)]
fn wide_as_f64(value: u128) -> f64 {
    value as f64
}

/// Confusion matrix for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    /// Malicious predicted malicious.
    pub true_positives: usize,
    /// Legitimate predicted legitimate.
    pub true_negatives: usize,
    /// Legitimate predicted malicious.
    pub false_positives: usize,
    /// Malicious predicted legitimate.
    pub false_negatives: usize,
}

impl ConfusionCounts {
    /// Creates counts from explicit values.
    #[must_use]
    pub const fn new(tp: usize, tn: usize, fp: usize, fn_: usize) -> Self {
        Self {
            true_positives: tp,
            true_negatives: tn,
            false_positives: fp,
            false_negatives: fn_,
        }
    }

    /// Records one prediction.
    pub fn record(&mut self, actual: Label, predicted: Label) {
        match (actual, predicted) {
            (Label::Malicious, Label::Malicious) => self.true_positives += 1,
            (Label::Legitimate, Label::Legitimate) => self.true_negatives += 1,
            (Label::Legitimate, Label::Malicious) => self.false_positives += 1,
            (Label::Malicious, Label::Legitimate) => self.false_negatives += 1,
        }
    }

    /// Returns the number of classified domains.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.true_positives + self.true_negatives + self.false_positives + self.false_negatives
    }

    /// Adds another scope's counts.
    #[must_use]
    pub const fn merged(self, other: Self) -> Self {
        Self::new(
            self.true_positives + other.true_positives,
            self.true_negatives + other.true_negatives,
            self.false_positives + other.false_positives,
            self.false_negatives + other.false_negatives,
        )
    }
}

/// A derived metric, or the marker for a zero denominator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum MetricValue {
    /// The metric has a value.
    Defined(f64),
    /// The denominator was zero.
    Undefined,
}

impl MetricValue {
    /// Divides, yielding `Undefined` unless `denominator` is positive.
    #[must_use]
    pub fn ratio(numerator: f64, denominator: f64) -> Self {
        if denominator > 0.0 {
            Self::Defined(numerator / denominator)
        } else {
            Self::Undefined
        }
    }

    /// Returns the value, if defined.
    #[must_use]
    pub const fn value(self) -> Option<f64> {
        match self {
            Self::Defined(v) => Some(v),
            Self::Undefined => None,
        }
    }

    /// Returns true unless the metric is undefined.
    #[must_use]
    pub const fn is_defined(self) -> bool {
        matches!(self, Self::Defined(_))
    }
}

impl From<Option<f64>> for MetricValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Undefined, Self::Defined)
    }
}

impl From<MetricValue> for Option<f64> {
    fn from(value: MetricValue) -> Self {
        value.value()
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(v) => write!(f, "{v:.3}"),
            Self::Undefined => write!(f, "-"),
        }
    }
}

/// Which domains a metrics record covers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Scope {
    /// Every legitimate domain against every malicious family.
    Overall,
    /// Every legitimate domain against one family.
    Family(String),
    /// One class alone, taken as the positive class.
    Class(Label),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overall => write!(f, "overall"),
            Self::Family(name) => write!(f, "family:{name}"),
            Self::Class(label) => write!(f, "class:{label}"),
        }
    }
}

/// Derived statistics for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Domains covered.
    pub scope: Scope,
    /// Confusion matrix over classified domains.
    pub counts: ConfusionCounts,
    /// Domains in scope that never received a verdict.
    pub unclassified: usize,
    /// (TP+TN) / N.
    pub accuracy: MetricValue,
    /// TP / (TP+FP).
    pub precision: MetricValue,
    /// TP / (TP+FN).
    pub recall: MetricValue,
    /// Harmonic mean of precision and recall.
    pub f1_score: MetricValue,
    /// FP / (FP+TN).
    pub fpr: MetricValue,
    /// Same as recall.
    pub tpr: MetricValue,
    /// Matthews correlation coefficient.
    pub mcc: MetricValue,
    /// Cohen's kappa.
    pub kappa: MetricValue,
}

impl MetricsRecord {
    /// Derives every metric from `counts`.
    ///
    /// # Examples
    ///
    /// ```
    /// use agd_eval::{ConfusionCounts, MetricValue, MetricsRecord, Scope};
    ///
    /// let record = MetricsRecord::from_counts(Scope::Overall, ConfusionCounts::new(0, 10, 0, 5), 0);
    /// assert_eq!(record.precision, MetricValue::Undefined);
    /// assert_eq!(record.accuracy.to_string(), "0.667");
    /// ```
    #[must_use]
    #[allow(clippy::similar_names)]
    pub fn from_counts(scope: Scope, counts: ConfusionCounts, unclassified: usize) -> Self {
        let tp = count_as_f64(counts.true_positives);
        let tn = count_as_f64(counts.true_negatives);
        let fp = count_as_f64(counts.false_positives);
        let fn_ = count_as_f64(counts.false_negatives);

        let accuracy = MetricValue::ratio(tp + tn, tp + tn + fp + fn_);
        let precision = MetricValue::ratio(tp, tp + fp);
        let recall = MetricValue::ratio(tp, tp + fn_);
        let fpr = MetricValue::ratio(fp, fp + tn);

        let f1_score = match (precision, recall) {
            (MetricValue::Defined(p), MetricValue::Defined(r)) => {
                MetricValue::ratio(2.0 * p * r, p + r)
            }
            _ => MetricValue::Undefined,
        };

        let mcc_denominator = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        let mcc = MetricValue::ratio(tp * tn - fp * fn_, mcc_denominator);

        Self {
            scope,
            counts,
            unclassified,
            accuracy,
            precision,
            recall,
            f1_score,
            fpr,
            tpr: recall,
            mcc,
            kappa: kappa(counts),
        }
    }
}

/// Cohen's kappa in exact integer arithmetic up to the final division, so
/// `p_e = 1` is detected without rounding.
#[allow(clippy::similar_names)]
fn kappa(counts: ConfusionCounts) -> MetricValue {
    let w = |n: usize| u128::try_from(n).unwrap_or(u128::MAX);
    let tp = w(counts.true_positives);
    let tn = w(counts.true_negatives);
    let fp = w(counts.false_positives);
    let fn_ = w(counts.false_negatives);
    let n = tp + tn + fp + fn_;

    // p_o = agree / n and p_e = chance / n², so
    // kappa = (agree·n − chance) / (n² − chance).
    let agree = tp + tn;
    let chance = (tp + fp) * (tp + fn_) + (tn + fn_) * (tn + fp);
    let denominator = n * n - chance;
    if n == 0 || denominator == 0 {
        return MetricValue::Undefined;
    }
    let numerator = wide_as_f64(agree * n) - wide_as_f64(chance);
    MetricValue::Defined(numerator / wide_as_f64(denominator))
}

/// Every metrics record of one (model, experiment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetrics {
    /// Legitimate against all families.
    pub overall: MetricsRecord,
    /// Malicious alone, then legitimate alone.
    pub classes: Vec<MetricsRecord>,
    /// Legitimate against each family, by family name.
    pub families: Vec<MetricsRecord>,
}

impl ExperimentMetrics {
    /// Iterates over every record: overall, classes, families.
    pub fn records(&self) -> impl Iterator<Item = &MetricsRecord> {
        std::iter::once(&self.overall)
            .chain(&self.classes)
            .chain(&self.families)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    counts: ConfusionCounts,
    unclassified: usize,
}

impl Tally {
    fn add(&mut self, actual: Label, predicted: Option<Label>) {
        match predicted {
            Some(p) => self.counts.record(actual, p),
            None => self.unclassified += 1,
        }
    }

    const fn merged(self, other: Self) -> Self {
        Self {
            counts: self.counts.merged(other.counts),
            unclassified: self.unclassified + other.unclassified,
        }
    }
}

/// Joins verdicts against the sample's ground truth and computes every
/// scope.
///
/// Domains without a verdict are counted as unclassified, never as errors.
/// Duplicate sample entries are counted once.
#[must_use]
pub fn evaluate(sample: &Sample, verdicts: &HashMap<DomainKey, Verdict>) -> ExperimentMetrics {
    let mut seen = HashSet::new();
    let mut legitimate = Tally::default();
    let mut malicious = Tally::default();
    let mut families: BTreeMap<&str, Tally> = BTreeMap::new();

    for domain in &sample.domains {
        let key = domain.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        let predicted = verdicts.get(&key).map(Verdict::label);
        match domain.label() {
            Label::Legitimate => legitimate.add(Label::Legitimate, predicted),
            Label::Malicious => {
                malicious.add(Label::Malicious, predicted);
                families
                    .entry(domain.family().unwrap_or("unknown"))
                    .or_default()
                    .add(Label::Malicious, predicted);
            }
        }
    }

    let overall = legitimate.merged(malicious);
    let record =
        |scope, tally: Tally| MetricsRecord::from_counts(scope, tally.counts, tally.unclassified);

    // Each class alone with itself as the positive class.
    let malicious_alone = ConfusionCounts::new(
        malicious.counts.true_positives,
        0,
        0,
        malicious.counts.false_negatives,
    );
    let legitimate_alone = ConfusionCounts::new(
        legitimate.counts.true_negatives,
        0,
        0,
        legitimate.counts.false_positives,
    );

    ExperimentMetrics {
        overall: record(Scope::Overall, overall),
        classes: vec![
            MetricsRecord::from_counts(
                Scope::Class(Label::Malicious),
                malicious_alone,
                malicious.unclassified,
            ),
            MetricsRecord::from_counts(
                Scope::Class(Label::Legitimate),
                legitimate_alone,
                legitimate.unclassified,
            ),
        ],
        families: families
            .into_iter()
            .map(|(name, tally)| record(Scope::Family(name.to_string()), legitimate.merged(tally)))
            .collect(),
    }
}
