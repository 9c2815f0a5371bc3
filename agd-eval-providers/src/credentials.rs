//! API keys from a `KEY=VALUE` secrets file, falling back to the environment.

use std::collections::HashMap;
use std::path::Path;

use agd_eval::EvalError;

/// API keys for the configured providers.
///
/// The secrets file is read without touching the process environment, so
/// two evaluations with different files do not interfere.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    values: HashMap<String, String>,
}

impl Credentials {
    /// Creates credentials from explicit pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Reads a secrets file. A missing file yields empty credentials.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Config` if the file exists but cannot be parsed.
    pub fn load(path: &Path) -> Result<Self, EvalError> {
        let iter = match dotenvy::from_filename_iter(path) {
            Ok(iter) => iter,
            Err(e) if e.not_found() => {
                log::debug!("No secrets file at {}, using environment", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(EvalError::config("secrets_file", e.to_string())),
        };

        let mut values = HashMap::new();
        for item in iter {
            let (key, value) =
                item.map_err(|e| EvalError::config("secrets_file", e.to_string()))?;
            values.insert(key, value);
        }
        log::debug!("Loaded {} secrets from {}", values.len(), path.display());
        Ok(Self { values })
    }

    /// Looks a key up in the file, then in the process environment.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|v| !v.is_empty())
    }

    /// Like [`get`](Self::get), but a missing key is an error.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Config` naming the key.
    pub fn require(&self, key: &str) -> Result<String, EvalError> {
        self.get(key)
            .ok_or_else(|| EvalError::config(key, "not set in secrets file or environment"))
    }
}
