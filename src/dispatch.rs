//! Batch dispatch: partition, submit, parse, persist.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::{DEFAULT_TRANSIENT_BACKOFF, DEFAULT_TRANSIENT_RETRIES};
use crate::domain::{Domain, DomainKey};
use crate::error::{EvalError, ProviderError};
use crate::model::{Model, RawResponse, render_batch};
use crate::store::{BatchRecord, VerdictLog};
use crate::verdict::{BatchId, parse_response};

/// Transient-failure handling for model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Wait before retrying a batch after a transient failure.
    pub transient_backoff: Duration,
    /// Retries per batch before it is recorded as failed.
    pub transient_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            transient_backoff: DEFAULT_TRANSIENT_BACKOFF,
            transient_retries: DEFAULT_TRANSIENT_RETRIES,
        }
    }
}

impl DispatchConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backoff.
    #[must_use]
    pub const fn with_transient_backoff(mut self, backoff: Duration) -> Self {
        self.transient_backoff = backoff;
        self
    }

    /// Sets the number of retries.
    #[must_use]
    pub const fn with_transient_retries(mut self, retries: u32) -> Self {
        self.transient_retries = retries;
        self
    }
}

/// Splits `domains` into consecutive batches of at most `batch_size`.
///
/// A batch size of zero is treated as one.
///
/// ```
/// use agd_eval::{partition, Domain};
///
/// let domains: Vec<_> = (0..5).map(|i| Domain::legitimate(format!("d{i}.com"))).collect();
/// let batches = partition(&domains, 2);
/// assert_eq!(batches.len(), 3);
/// assert_eq!(batches[2].len(), 1);
/// ```
#[must_use]
pub fn partition(domains: &[Domain], batch_size: usize) -> Vec<&[Domain]> {
    domains.chunks(batch_size.max(1)).collect()
}

/// Where each dispatched domain ended up after one pass.
///
/// The three sets are disjoint and together hold every dispatched domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassAccounting {
    /// Domains that received a verdict.
    pub verdicted: BTreeSet<DomainKey>,
    /// Domains only mentioned in lines that failed to parse.
    pub parse_failed: BTreeSet<DomainKey>,
    /// Domains the model never mentioned, including those of failed batches.
    pub absent: BTreeSet<DomainKey>,
}

/// Summary of one dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Pass number written to the log.
    pub pass: u32,
    /// Batches sent.
    pub batches: usize,
    /// Batches recorded as failed after exhausting transient retries.
    pub failed_batches: usize,
    /// Verdicts accepted.
    pub verdicts: usize,
    /// Response lines that did not parse.
    pub parse_failures: usize,
    /// Verdicts dropped because their domain is not in the sample.
    pub discarded: usize,
    /// Per-domain outcome.
    pub accounting: PassAccounting,
}

impl DispatchReport {
    fn new(pass: u32) -> Self {
        Self {
            pass,
            batches: 0,
            failed_batches: 0,
            verdicts: 0,
            parse_failures: 0,
            discarded: 0,
            accounting: PassAccounting::default(),
        }
    }

    /// Returns the dispatched domains left without a verdict in this pass.
    pub fn unresolved(&self) -> impl Iterator<Item = &DomainKey> {
        self.accounting
            .parse_failed
            .iter()
            .chain(&self.accounting.absent)
    }
}

/// Sends batches of domains to one model, sequentially.
pub struct Dispatcher<'a> {
    model: &'a dyn Model,
    prompt: &'a str,
    batch_size: usize,
    config: DispatchConfig,
}

impl<'a> Dispatcher<'a> {
    /// Creates a dispatcher for `model` using the composed `prompt`.
    #[must_use]
    pub fn new(
        model: &'a dyn Model,
        prompt: &'a str,
        batch_size: usize,
        config: DispatchConfig,
    ) -> Self {
        Self {
            model,
            prompt,
            batch_size,
            config,
        }
    }

    /// Returns the model being dispatched to.
    #[must_use]
    pub fn model(&self) -> &dyn Model {
        self.model
    }

    /// Dispatches `domains` as one pass, appending a record per batch to
    /// `log`.
    ///
    /// Verdicts whose domain is not in `sample` are discarded with a warning.
    /// A batch whose transient failures outlast the retries is recorded as
    /// failed and the pass continues.
    ///
    /// # Errors
    ///
    /// - `EvalError::Provider` on a permanent provider failure; the failed
    ///   batch is logged first
    /// - `EvalError::Store` if the log cannot be written
    pub fn dispatch(
        &self,
        domains: &[Domain],
        sample: &HashMap<DomainKey, &Domain>,
        log: &mut VerdictLog,
    ) -> Result<DispatchReport, EvalError> {
        let pass = log.next_pass();
        let name = self.model.name();
        let batches = partition(domains, self.batch_size);
        let total = batches.len();

        let mut report = DispatchReport::new(pass);
        let mut answered: HashSet<DomainKey> = HashSet::new();
        let mut mentioned: HashSet<DomainKey> = HashSet::new();

        for (index, batch) in batches.into_iter().enumerate() {
            let id = BatchId::new(pass, index);
            log::info!(
                "{name}: pass {pass} batch {}/{total} with {} domains",
                index + 1,
                batch.len()
            );

            let mut record = BatchRecord::new(id, batch);
            let (attempts, outcome) = self.submit(id, &render_batch(batch));
            record.attempts = attempts;
            report.batches += 1;

            match outcome {
                Ok(response) => {
                    let parsed = parse_response(&response.text, id);
                    for failure in &parsed.failures {
                        log::warn!("{name}: unparseable line in {failure}");
                        mentioned.extend(failure.domain_hint());
                    }
                    for verdict in parsed.verdicts {
                        let key = verdict.key();
                        if sample.contains_key(&key) {
                            answered.insert(key);
                            record.verdicts.push(verdict);
                        } else {
                            log::warn!(
                                "{name}: {id}: discarding verdict for unknown domain '{}'",
                                verdict.domain()
                            );
                            record.discarded.push(verdict);
                        }
                    }
                    record.parse_failures = parsed.failures;
                    record.response = Some(response);
                }
                Err(e) if e.is_transient() => {
                    log::warn!("{name}: {id}: giving up after {attempts} attempts: {e}");
                    record.failure = Some(e.message().to_string());
                    report.failed_batches += 1;
                }
                Err(e) => {
                    log::error!("{name}: {id}: {e}");
                    record.failure = Some(e.message().to_string());
                    log.append(&record)?;
                    return Err(e.into());
                }
            }

            report.verdicts += record.verdicts.len();
            report.parse_failures += record.parse_failures.len();
            report.discarded += record.discarded.len();
            log.append(&record)?;
        }

        for domain in domains {
            let key = domain.key();
            let slot = if answered.contains(&key) {
                &mut report.accounting.verdicted
            } else if mentioned.contains(&key) {
                &mut report.accounting.parse_failed
            } else {
                &mut report.accounting.absent
            };
            slot.insert(key);
        }

        log::info!(
            "{name}: pass {pass} done: {} verdicts, {} parse failures, {} failed batches",
            report.verdicts,
            report.parse_failures,
            report.failed_batches
        );
        Ok(report)
    }

    /// Calls the model, retrying transient failures after the backoff.
    ///
    /// Returns the number of calls made with the final outcome.
    fn submit(&self, id: BatchId, batch: &str) -> (u32, Result<RawResponse, ProviderError>) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            match self.model.submit(self.prompt, batch) {
                Ok(text) => {
                    let response = RawResponse::new(text, attempt).with_elapsed(started.elapsed());
                    log::debug!("{}: {id}: answered in {} ms", self.model.name(), response.elapsed_ms);
                    return (attempt, Ok(response));
                }
                Err(e) if e.is_transient() && attempt <= self.config.transient_retries => {
                    log::warn!(
                        "{}: {id}: {e}; retrying in {}s",
                        self.model.name(),
                        self.config.transient_backoff.as_secs()
                    );
                    if !self.config.transient_backoff.is_zero() {
                        thread::sleep(self.config.transient_backoff);
                    }
                }
                Err(e) => return (attempt, Err(e)),
            }
        }
    }
}
