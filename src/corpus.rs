//! Labeled domain corpus and reproducible sampling.
//!
//! The corpus is laid out as one CSV file per malware family plus one file
//! of legitimate domains, each holding one domain per line:
//!
//! ```text
//! families/
//!   conficker.csv
//!   cryptolocker.csv
//! legitimate/domains.csv
//! ```
//!
//! The file stem is the family name. Sampling draws a fixed number of
//! domains from every family and a fixed number of legitimate domains with
//! a seeded RNG, so the same [`SampleSpec`] always yields the same
//! [`Sample`].
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use agd_eval::{Corpus, FamilyCorpus, SampleSpec};
//!
//! let mut families = BTreeMap::new();
//! families.insert("conficker".to_string(), vec!["xkq.biz".to_string(), "pzt.info".to_string()]);
//! let corpus = FamilyCorpus::new(families, vec!["a.com".to_string(), "b.org".to_string()]);
//!
//! let spec = SampleSpec { domains_per_family: 1, legitimate_domains: 2, seed: 42 };
//! let domains = corpus.sample(&spec).unwrap();
//! assert_eq!(domains.len(), 3);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::domain::{Domain, DomainKey};
use crate::error::{CorpusError, StoreError};
use crate::experiment::SampleSpec;

/// Source of labeled domains for an experiment.
///
/// Implementations must be deterministic: the same `SampleSpec` yields the
/// same sequence.
pub trait Corpus {
    /// Returns the sampled domains, in dispatch order.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError` if the corpus cannot satisfy the request.
    fn sample(&self, spec: &SampleSpec) -> Result<Vec<Domain>, CorpusError>;
}

/// Corpus of malware families and legitimate domains.
#[derive(Debug, Clone, Default)]
pub struct FamilyCorpus {
    /// Family name -> domains, ordered by name.
    families: BTreeMap<String, Vec<String>>,
    legitimate: Vec<String>,
}

impl FamilyCorpus {
    /// Creates a corpus from in-memory lists.
    #[must_use]
    pub fn new(families: BTreeMap<String, Vec<String>>, legitimate: Vec<String>) -> Self {
        Self {
            families,
            legitimate,
        }
    }

    /// Loads every `*.csv` file in `families_dir` as a family and
    /// `legitimate_file` as the legitimate list.
    ///
    /// # Errors
    ///
    /// - `CorpusError::InvalidDirectory` if `families_dir` is not a directory
    /// - `CorpusError::NoFilesFound` if it holds no CSV files
    /// - `CorpusError::ReadFailed` if a file cannot be read
    pub fn load(families_dir: &Path, legitimate_file: &Path) -> Result<Self, CorpusError> {
        let dir_str = families_dir.display().to_string();
        if !families_dir.is_dir() {
            return Err(CorpusError::InvalidDirectory { path: dir_str });
        }

        let entries = fs::read_dir(families_dir).map_err(|e| CorpusError::ReadFailed {
            path: dir_str.clone(),
            message: e.to_string(),
        })?;

        let mut families = BTreeMap::new();
        for path in entries.filter_map(Result::ok).map(|e| e.path()) {
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_csv {
                families.insert(stem.to_string(), read_domain_lines(&path)?);
            }
        }

        if families.is_empty() {
            return Err(CorpusError::NoFilesFound { directory: dir_str });
        }

        let legitimate = read_domain_lines(legitimate_file)?;
        log::info!(
            "Loaded {} families and {} legitimate domains",
            families.len(),
            legitimate.len()
        );

        Ok(Self::new(families, legitimate))
    }

    /// Returns the family names, in sampling order.
    pub fn family_names(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    /// Returns the number of legitimate domains available.
    #[must_use]
    pub fn legitimate_count(&self) -> usize {
        self.legitimate.len()
    }
}

impl Corpus for FamilyCorpus {
    /// Draws `domains_per_family` domains from each family and
    /// `legitimate_domains` legitimate ones, never reusing a domain, then
    /// interleaves them: at each step one domain of every family followed by
    /// an even share of the legitimate domains, with any remainder spread one
    /// per step from the start.
    fn sample(&self, spec: &SampleSpec) -> Result<Vec<Domain>, CorpusError> {
        let mut rng = ChaCha8Rng::seed_from_u64(spec.seed);
        let mut used: HashSet<DomainKey> = HashSet::new();

        let mut family_draws = Vec::with_capacity(self.families.len());
        for (family, domains) in &self.families {
            let picked = draw(&mut rng, domains, spec.domains_per_family, &mut used, family)?;
            family_draws.push((family.as_str(), picked));
        }
        let mut legitimate = draw(
            &mut rng,
            &self.legitimate,
            spec.legitimate_domains,
            &mut used,
            "legitimate",
        )?
        .into_iter();

        let total = spec.domains_per_family * self.families.len() + spec.legitimate_domains;
        let mut interleaved = Vec::with_capacity(total);

        if spec.domains_per_family == 0 {
            interleaved.extend(legitimate.map(Domain::legitimate));
            return Ok(interleaved);
        }

        let per_step = spec.legitimate_domains / spec.domains_per_family;
        let mut leftover = spec.legitimate_domains % spec.domains_per_family;

        for step in 0..spec.domains_per_family {
            for (family, picked) in &family_draws {
                interleaved.push(Domain::malicious(picked[step].clone(), *family));
            }
            interleaved.extend(legitimate.by_ref().take(per_step).map(Domain::legitimate));
            if leftover > 0 {
                if let Some(name) = legitimate.next() {
                    interleaved.push(Domain::legitimate(name));
                }
                leftover -= 1;
            }
        }

        Ok(interleaved)
    }
}

/// Samples `count` unused domains from `pool`.
fn draw(
    rng: &mut ChaCha8Rng,
    pool: &[String],
    count: usize,
    used: &mut HashSet<DomainKey>,
    scope: &str,
) -> Result<Vec<String>, CorpusError> {
    let mut seen = HashSet::new();
    let available: Vec<&String> = pool
        .iter()
        .filter(|d| {
            let key = DomainKey::new(d);
            !used.contains(&key) && seen.insert(key)
        })
        .collect();

    if available.len() < count {
        return Err(CorpusError::InsufficientDomains {
            scope: scope.to_string(),
            requested: count,
            available: available.len(),
        });
    }

    let picked: Vec<String> = available
        .choose_multiple(rng, count)
        .map(|d| (*d).clone())
        .collect();
    used.extend(picked.iter().map(|d| DomainKey::new(d)));
    Ok(picked)
}

fn read_domain_lines(path: &Path) -> Result<Vec<String>, CorpusError> {
    let contents = fs::read_to_string(path).map_err(|e| CorpusError::ReadFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// The materialized domain sequence of one experiment.
///
/// Saved next to the experiment so fresh runs, retries and analysis all see
/// the identical sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Experiment the sample belongs to.
    pub experiment: u32,
    /// Seed it was drawn with.
    pub seed: u64,
    /// Domains in dispatch order.
    pub domains: Vec<Domain>,
}

impl Sample {
    /// Wraps an already drawn domain sequence.
    #[must_use]
    pub fn new(experiment: u32, seed: u64, domains: Vec<Domain>) -> Self {
        Self {
            experiment,
            seed,
            domains,
        }
    }

    /// Draws a sample from a corpus.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError` if the corpus cannot satisfy `spec`.
    pub fn draw(
        corpus: &dyn Corpus,
        experiment: u32,
        spec: &SampleSpec,
    ) -> Result<Self, CorpusError> {
        Ok(Self::new(experiment, spec.seed, corpus.sample(spec)?))
    }

    /// Returns the number of domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true if the sample holds no domains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Indexes the sample by reconciliation key. When a domain appears more
    /// than once, the first occurrence wins.
    #[must_use]
    pub fn index(&self) -> HashMap<DomainKey, &Domain> {
        let mut index = HashMap::with_capacity(self.domains.len());
        for domain in &self.domains {
            index.entry(domain.key()).or_insert(domain);
        }
        index
    }

    /// Loads a sample saved with [`Sample::save`].
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError::ReadFailed` or `CorpusError::JsonDeserialize`.
    pub fn load(path: &Path) -> Result<Option<Self>, CorpusError> {
        if !path.exists() {
            return Ok(None);
        }
        let path_str = path.display().to_string();
        let contents = fs::read_to_string(path).map_err(|e| CorpusError::ReadFailed {
            path: path_str.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| CorpusError::JsonDeserialize {
                path: path_str,
                message: e.to_string(),
            })
    }

    /// Writes the sample as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, &e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| StoreError::json(path, &e))?;
        fs::write(path, json).map_err(|e| StoreError::io(path, &e))
    }
}
