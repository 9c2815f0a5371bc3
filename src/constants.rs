//! Constants shared by the parser, dispatcher and reports.

use std::time::Duration;

/// Field separator in a verdict line (`DOMAIN|Y|CONFIDENCE`).
pub const FIELD_SEPARATOR: char = '|';

/// Decision token for a domain classified as malicious.
pub const MALICIOUS_TOKEN: &str = "Y";

/// Decision token for a domain classified as legitimate.
pub const LEGITIMATE_TOKEN: &str = "N";

/// Upper bound of the confidence scale.
pub const MAX_CONFIDENCE: f64 = 100.0;

/// Separator used when rendering a batch for the model.
pub const BATCH_SEPARATOR: &str = ", ";

/// Separator placed between prompt fragments.
pub const PROMPT_FRAGMENT_SEPARATOR: &str = "\n\n";

/// Assistant acknowledgement used to prime every conversation.
pub const PRIMING_REPLY: &str = "yes";

/// Default number of domains per model call.
pub const DEFAULT_BATCH_SIZE: usize = 125;

/// Default number of sampled domains per malware family.
pub const DEFAULT_DOMAINS_PER_FAMILY: usize = 1000;

/// Default number of sampled legitimate domains.
pub const DEFAULT_LEGITIMATE_DOMAINS: usize = 25_000;

/// Default sampling seed.
pub const DEFAULT_SEED: u64 = 42;

/// Default wait before retrying a batch after a transient provider error.
pub const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_secs(15);

/// Default number of retries of a batch after a transient provider error.
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 1;

/// Default cap on reconcile passes.
pub const DEFAULT_MAX_RETRY_PASSES: u32 = 10;
