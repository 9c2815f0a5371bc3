//! Metrics output: JSON evaluation report and CSV tables.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::metrics::{ExperimentMetrics, MetricsRecord};

/// Column header of the metrics CSV.
pub const CSV_HEADER: &str = "model,experiment,scope,accuracy,precision,recall,f1_score,fpr,tpr,mcc,kappa,tp,tn,fp,fn,unclassified";

/// Metrics of every model on one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Report metadata.
    pub metadata: ReportMetadata,
    /// Experiment number.
    pub experiment: u32,
    /// One entry per analyzed model, in analysis order.
    pub models: Vec<ModelReport>,
}

/// Report metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp.
    pub generated_at: String,
    /// Version of agd-eval.
    pub eval_version: String,
}

impl Default for ReportMetadata {
    fn default() -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            eval_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Metrics of one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    /// Model name.
    pub model: String,
    /// Domains in the sample.
    pub sampled: usize,
    /// Every scope.
    pub metrics: ExperimentMetrics,
}

impl EvaluationReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(experiment: u32) -> Self {
        Self {
            metadata: ReportMetadata::default(),
            experiment,
            models: Vec::new(),
        }
    }

    /// Adds a model's metrics.
    #[must_use]
    pub fn with_model(mut self, model: ModelReport) -> Self {
        self.models.push(model);
        self
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Writes the report as JSON, replacing any previous report.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, &e))?;
        }
        let json = self.to_json().map_err(|e| StoreError::json(path, &e))?;
        fs::write(path, json).map_err(|e| StoreError::io(path, &e))
    }

    /// Appends every record of every model to a CSV table.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file cannot be written.
    pub fn append_csv(&self, path: &Path) -> Result<(), StoreError> {
        let rows = self.models.iter().flat_map(|m| {
            m.metrics
                .records()
                .map(|r| csv_row(&m.model, self.experiment, r))
        });
        append_csv_rows(path, rows)
    }
}

/// Formats one record as a CSV row matching [`CSV_HEADER`].
///
/// ```
/// use agd_eval::{csv_row, ConfusionCounts, MetricsRecord, Scope};
///
/// let record = MetricsRecord::from_counts(Scope::Overall, ConfusionCounts::new(0, 10, 0, 5), 2);
/// assert_eq!(
///     csv_row("gpt-4o", 1, &record),
///     "gpt-4o,1,overall,0.667,-,0.000,-,0.000,0.000,-,0.000,0,10,0,5,2"
/// );
/// ```
#[must_use]
pub fn csv_row(model: &str, experiment: u32, record: &MetricsRecord) -> String {
    let c = &record.counts;
    format!(
        "{},{experiment},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        csv_field(model),
        csv_field(&record.scope.to_string()),
        record.accuracy,
        record.precision,
        record.recall,
        record.f1_score,
        record.fpr,
        record.tpr,
        record.mcc,
        record.kappa,
        c.true_positives,
        c.true_negatives,
        c.false_positives,
        c.false_negatives,
        record.unclassified,
    )
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Appends rows, writing the header first if the file is new.
fn append_csv_rows(path: &Path, rows: impl Iterator<Item = String>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, &e))?;
    }
    let is_new = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, &e))?;

    let mut buf = String::new();
    if is_new {
        buf.push_str(CSV_HEADER);
        buf.push('\n');
    }
    for row in rows {
        buf.push_str(&row);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())
        .map_err(|e| StoreError::io(path, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Sample;
    use crate::domain::Domain;
    use crate::metrics::evaluate;
    use crate::verdict::Verdict;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn model_report(name: &str) -> ModelReport {
        let sample = Sample::new(
            3,
            0,
            vec![Domain::legitimate("a.com"), Domain::malicious("b.biz", "x")],
        );
        let v = Verdict::parse_line("b.biz|Y|80.0").unwrap();
        let verdicts = HashMap::from([(v.key(), v)]);
        ModelReport {
            model: name.to_string(),
            sampled: sample.len(),
            metrics: evaluate(&sample, &verdicts),
        }
    }

    #[test]
    fn report_to_json() {
        let report = EvaluationReport::new(3).with_model(model_report("m"));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"eval_version\""));
        assert!(json.contains("\"kappa\": null"));
        assert!(json.contains("\"unclassified\": 1"));
    }

    #[test]
    fn csv_header_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics").join("EXP3.csv");
        let report = EvaluationReport::new(3).with_model(model_report("m"));

        report.append_csv(&path).unwrap();
        report.append_csv(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // header + 2 × (overall, 2 classes, 1 family)
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.iter().filter(|l| **l == CSV_HEADER).count(), 1);
        assert!(lines[1].starts_with("m,3,overall,1.000,1.000,1.000,1.000,-,1.000,"));
        assert!(lines[4].starts_with("m,3,family:x,"));
    }

    #[test]
    fn save_writes_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("EXP3.json");
        EvaluationReport::new(3)
            .with_model(model_report("m"))
            .save(&path)
            .unwrap();
        let back: EvaluationReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.models[0].model, "m");
        assert_eq!(back.experiment, 3);
    }

    #[test]
    fn csv_fields_are_quoted() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("plain"), "plain");
    }
}
