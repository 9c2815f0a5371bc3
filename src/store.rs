//! Durable verdict log keyed by (model, experiment).
//!
//! Three files live side by side in the output directory, all named after
//! the model and experiment (`gpt-4o_EXP1.*`):
//!
//! - `.jsonl`: one [`BatchRecord`] per line, appended after every model call.
//!   Replaying it rebuilds the verdict set; later records win.
//! - `.failures.log`: every `ParseFailure` and failed batch as plain text.
//! - `.missing.json`: the domains still unclassified after the last pass.
//!
//! A line that does not deserialize (a torn write from an interrupted run) is
//! skipped with a warning, so a restart always resumes from what survived.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Domain, DomainKey};
use crate::error::StoreError;
use crate::model::RawResponse;
use crate::verdict::{BatchId, ParseFailure, Verdict};

/// Everything known about one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Which call this was.
    pub batch: BatchId,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// Calls made for this batch, including transient retries.
    pub attempts: u32,
    /// Domains sent, in batch order.
    pub domains: Vec<String>,
    /// The response, if the provider answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RawResponse>,
    /// Provider failure that left the batch without a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Verdicts accepted for sampled domains.
    #[serde(default)]
    pub verdicts: Vec<Verdict>,
    /// Lines that did not parse.
    #[serde(default)]
    pub parse_failures: Vec<ParseFailure>,
    /// Verdicts for domains outside the sample.
    #[serde(default)]
    pub discarded: Vec<Verdict>,
}

impl BatchRecord {
    /// Creates an empty record for `batch`.
    #[must_use]
    pub fn new(batch: BatchId, domains: &[Domain]) -> Self {
        Self {
            batch,
            timestamp: Utc::now(),
            attempts: 0,
            domains: domains.iter().map(|d| d.name().to_string()).collect(),
            response: None,
            failure: None,
            verdicts: Vec::new(),
            parse_failures: Vec::new(),
            discarded: Vec::new(),
        }
    }

    /// Returns true if the provider never answered.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Replaces every character that does not belong in a file name.
///
/// ```
/// use agd_eval::sanitize_model_name;
///
/// assert_eq!(sanitize_model_name("models/gemini-1.5-pro"), "models_gemini-1.5-pro");
/// ```
#[must_use]
pub fn sanitize_model_name(model: &str) -> String {
    model
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The persisted verdicts of one model on one experiment.
#[derive(Debug)]
pub struct VerdictLog {
    log_path: PathBuf,
    failures_path: PathBuf,
    missing_path: PathBuf,
    verdicts: HashMap<DomainKey, Verdict>,
    last_pass: Option<u32>,
    records: usize,
}

impl VerdictLog {
    /// Opens the log for `model` on `experiment` in `dir`, replaying any
    /// records already on disk. The directory is created if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory or log cannot be read.
    pub fn open(dir: &Path, model: &str, experiment: u32) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, &e))?;

        let stem = format!("{}_EXP{experiment}", sanitize_model_name(model));
        let mut log = Self {
            log_path: dir.join(format!("{stem}.jsonl")),
            failures_path: dir.join(format!("{stem}.failures.log")),
            missing_path: dir.join(format!("{stem}.missing.json")),
            verdicts: HashMap::new(),
            last_pass: None,
            records: 0,
        };
        log.replay()?;
        Ok(log)
    }

    fn replay(&mut self) -> Result<(), StoreError> {
        if !self.log_path.exists() {
            return Ok(());
        }
        let contents =
            fs::read_to_string(&self.log_path).map_err(|e| StoreError::io(&self.log_path, &e))?;

        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BatchRecord>(line) {
                Ok(record) => self.apply(&record),
                Err(e) => log::warn!(
                    "Skipping corrupt record at {}:{}: {e}",
                    self.log_path.display(),
                    number + 1
                ),
            }
        }

        if !contents.is_empty() && !contents.ends_with('\n') {
            self.truncate_torn_tail(&contents)?;
        }

        log::info!(
            "Replayed {} records with {} verdicts from {}",
            self.records,
            self.verdicts.len(),
            self.log_path.display()
        );
        Ok(())
    }

    /// Cuts an unterminated final line so the next append starts on a line
    /// of its own.
    fn truncate_torn_tail(&self, contents: &str) -> Result<(), StoreError> {
        let keep = contents.rfind('\n').map_or(0, |i| i + 1);
        log::warn!(
            "Truncating {} bytes of unterminated record from {}",
            contents.len() - keep,
            self.log_path.display()
        );
        OpenOptions::new()
            .write(true)
            .open(&self.log_path)
            .and_then(|file| file.set_len(keep as u64))
            .map_err(|e| StoreError::io(&self.log_path, &e))
    }

    fn apply(&mut self, record: &BatchRecord) {
        for verdict in &record.verdicts {
            self.verdicts.insert(verdict.key(), verdict.clone());
        }
        self.last_pass = Some(
            self.last_pass
                .map_or(record.batch.pass, |p| p.max(record.batch.pass)),
        );
        self.records += 1;
    }

    /// Appends a record, then folds its verdicts into the in-memory set.
    ///
    /// Parse failures and provider failures are also written to the
    /// diagnostics file.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if either file cannot be written.
    pub fn append(&mut self, record: &BatchRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record).map_err(|e| StoreError::json(&self.log_path, &e))?;
        append_lines(&self.log_path, std::iter::once(line))?;

        let mut diagnostics: Vec<String> =
            record.parse_failures.iter().map(ToString::to_string).collect();
        if let Some(failure) = &record.failure {
            diagnostics.push(format!("{}: provider failure: {failure}", record.batch));
        }
        if !diagnostics.is_empty() {
            append_lines(&self.failures_path, diagnostics)?;
        }

        self.apply(record);
        Ok(())
    }

    /// Returns the accumulated verdicts by reconciliation key.
    #[must_use]
    pub const fn verdicts(&self) -> &HashMap<DomainKey, Verdict> {
        &self.verdicts
    }

    /// Returns the pass number the next dispatch should use.
    #[must_use]
    pub fn next_pass(&self) -> u32 {
        self.last_pass.map_or(0, |p| p.saturating_add(1))
    }

    /// Returns the number of records replayed or appended.
    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    /// Returns the JSONL log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Returns the diagnostics file path.
    #[must_use]
    pub fn failures_path(&self) -> &Path {
        &self.failures_path
    }

    /// Returns the missing-domain file path.
    #[must_use]
    pub fn missing_path(&self) -> &Path {
        &self.missing_path
    }

    /// Writes the still-missing domains, or removes the file when none are
    /// left.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file cannot be written or removed.
    pub fn write_missing(&self, missing: &[Domain]) -> Result<(), StoreError> {
        if missing.is_empty() {
            if self.missing_path.exists() {
                fs::remove_file(&self.missing_path)
                    .map_err(|e| StoreError::io(&self.missing_path, &e))?;
            }
            return Ok(());
        }
        let json = serde_json::to_string_pretty(missing)
            .map_err(|e| StoreError::json(&self.missing_path, &e))?;
        fs::write(&self.missing_path, json).map_err(|e| StoreError::io(&self.missing_path, &e))
    }

    /// Reads the missing-domain file; empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file exists but cannot be read.
    pub fn read_missing(&self) -> Result<Vec<Domain>, StoreError> {
        if !self.missing_path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.missing_path)
            .map_err(|e| StoreError::io(&self.missing_path, &e))?;
        serde_json::from_str(&contents).map_err(|e| StoreError::json(&self.missing_path, &e))
    }
}

fn append_lines(path: &Path, lines: impl IntoIterator<Item = String>) -> Result<(), StoreError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, &e))?;
    let mut buf = String::new();
    for line in lines {
        buf.push_str(&line);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())
        .map_err(|e| StoreError::io(path, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Label;
    use crate::verdict::{parse_response, FailureReason};
    use tempfile::tempdir;

    fn record(pass: u32, text: &str) -> BatchRecord {
        let id = BatchId::new(pass, 0);
        let parsed = parse_response(text, id);
        let mut record = BatchRecord::new(id, &[Domain::legitimate("a.com")]);
        record.attempts = 1;
        record.response = Some(RawResponse::new(text.to_string(), 1));
        record.verdicts = parsed.verdicts;
        record.parse_failures = parsed.failures;
        record
    }

    #[test]
    fn append_then_reopen_replays() {
        let dir = tempdir().unwrap();
        {
            let mut log = VerdictLog::open(dir.path(), "gpt-4o", 1).unwrap();
            assert_eq!(log.next_pass(), 0);
            log.append(&record(0, "a.com|N|90.0\nb.biz|Y|80.0")).unwrap();
        }

        let log = VerdictLog::open(dir.path(), "gpt-4o", 1).unwrap();
        assert_eq!(log.verdicts().len(), 2);
        assert_eq!(log.next_pass(), 1);
        assert_eq!(log.records(), 1);
        assert!(log.path().ends_with("gpt-4o_EXP1.jsonl"));
    }

    #[test]
    fn later_verdict_wins() {
        let dir = tempdir().unwrap();
        let mut log = VerdictLog::open(dir.path(), "m", 1).unwrap();
        log.append(&record(0, "a.com|N|90.0")).unwrap();
        log.append(&record(1, "A.COM|Y|55.5")).unwrap();

        let v = &log.verdicts()[&DomainKey::new("a.com")];
        assert_eq!(v.label(), Label::Malicious);
        assert_eq!(v.domain(), "A.COM");

        let reopened = VerdictLog::open(dir.path(), "m", 1).unwrap();
        assert_eq!(reopened.verdicts()[&DomainKey::new("a.com")], *v);
    }

    #[test]
    fn corrupt_line_is_skipped() {
        let dir = tempdir().unwrap();
        let mut log = VerdictLog::open(dir.path(), "m", 2).unwrap();
        log.append(&record(0, "a.com|N|90.0")).unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(b"{\"batch\":{\"pass\":3,\"ind").unwrap();

        let reopened = VerdictLog::open(dir.path(), "m", 2).unwrap();
        assert_eq!(reopened.verdicts().len(), 1);
        assert_eq!(reopened.next_pass(), 1);
    }

    #[test]
    fn append_after_torn_write_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let mut log = VerdictLog::open(dir.path(), "m", 3).unwrap();
            log.append(&record(0, "a.com|N|90.0")).unwrap();
            let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
            file.write_all(b"{\"batch\":{\"pass\":1,\"ind").unwrap();
        }
        {
            let mut log = VerdictLog::open(dir.path(), "m", 3).unwrap();
            assert_eq!(log.verdicts().len(), 1);
            log.append(&record(1, "b.biz|Y|80.0")).unwrap();
        }

        let log = VerdictLog::open(dir.path(), "m", 3).unwrap();
        assert_eq!(log.records(), 2);
        assert_eq!(
            log.verdicts()[&DomainKey::new("b.biz")].label(),
            Label::Malicious
        );
        assert!(fs::read_to_string(log.path()).unwrap().ends_with('\n'));
    }

    #[test]
    fn failures_are_written_to_diagnostics() {
        let dir = tempdir().unwrap();
        let mut log = VerdictLog::open(dir.path(), "m", 1).unwrap();
        log.append(&record(2, "foo.com|MAYBE|abc")).unwrap();

        let mut failed = BatchRecord::new(BatchId::new(2, 1), &[Domain::legitimate("x.com")]);
        failed.failure = Some("rate limited".to_string());
        log.append(&failed).unwrap();

        let text = fs::read_to_string(log.failures_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("pass 2 batch 0: decision 'MAYBE'"));
        assert!(lines[0].ends_with("foo.com|MAYBE|abc"));
        assert_eq!(lines[1], "pass 2 batch 1: provider failure: rate limited");
        assert!(failed.is_failed());
    }

    #[test]
    fn missing_file_written_and_removed() {
        let dir = tempdir().unwrap();
        let log = VerdictLog::open(dir.path(), "m", 1).unwrap();
        let missing = vec![Domain::malicious("c.net", "x")];

        log.write_missing(&missing).unwrap();
        assert_eq!(log.read_missing().unwrap(), missing);

        log.write_missing(&[]).unwrap();
        assert!(!log.missing_path().exists());
        assert!(log.read_missing().unwrap().is_empty());
    }

    #[test]
    fn record_json_keeps_failure_reason() {
        let rec = record(0, "a.com|N|101");
        let json = serde_json::to_string(&rec).unwrap();
        let back: BatchRecord = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back.parse_failures[0].reason,
            FailureReason::ConfidenceOutOfRange { .. }
        ));
    }

    #[test]
    fn model_names_are_sanitized() {
        assert_eq!(sanitize_model_name("claude 3/opus"), "claude_3_opus");
    }
}
