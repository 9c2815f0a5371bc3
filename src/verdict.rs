//! Verdict parsing for raw model output.
//!
//! Each expected line has the form `DOMAIN|Y|CONFIDENCE` or
//! `DOMAIN|N|CONFIDENCE`, where the confidence is a fixed-point decimal in
//! `[0.0, 100.0]`. Parsing is line-oriented: blank lines are ignored, every
//! other line either becomes a [`Verdict`] or a [`ParseFailure`]. Nothing
//! past this module sees a parse error as `Err`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{FIELD_SEPARATOR, LEGITIMATE_TOKEN, MALICIOUS_TOKEN, MAX_CONFIDENCE};
use crate::domain::{DomainKey, Label};

/// Identifies one model call: the pass it belongs to and its position in
/// that pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId {
    /// Dispatch pass (0 for the first fresh run of an empty log).
    pub pass: u32,
    /// Zero-based batch index within the pass.
    pub index: usize,
}

impl BatchId {
    /// Creates a batch id.
    #[must_use]
    pub const fn new(pass: u32, index: usize) -> Self {
        Self { pass, index }
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass {} batch {}", self.pass, self.index)
    }
}

/// Parsed outcome for one domain.
///
/// The domain keeps the text the model returned; use [`Verdict::key`] to
/// match it against the corpus.
///
/// # Examples
///
/// ```
/// use agd_eval::{Label, Verdict};
///
/// let v = Verdict::parse_line("b.biz|Y|80.0").unwrap();
/// assert_eq!(v.domain(), "b.biz");
/// assert_eq!(v.label(), Label::Malicious);
/// assert_eq!(v.to_string(), "b.biz|Y|80.0");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    domain: String,
    label: Label,
    confidence: f64,
}

impl Verdict {
    /// Creates a verdict.
    ///
    /// # Errors
    ///
    /// Returns `FailureReason` if the domain is not a single token or the
    /// confidence lies outside `[0.0, 100.0]`.
    pub fn new(
        domain: impl Into<String>,
        label: Label,
        confidence: f64,
    ) -> Result<Self, FailureReason> {
        let domain = domain.into();
        validate_domain(&domain)?;
        if !(0.0..=MAX_CONFIDENCE).contains(&confidence) {
            return Err(FailureReason::ConfidenceOutOfRange { value: confidence });
        }
        Ok(Self {
            domain,
            label,
            confidence,
        })
    }

    /// Parses a single verdict line.
    ///
    /// Surrounding whitespace, on the line and on each field, is ignored.
    ///
    /// # Errors
    ///
    /// Returns the `FailureReason` describing the first structural deviation.
    pub fn parse_line(line: &str) -> Result<Self, FailureReason> {
        let fields: Vec<&str> = line.trim().split(FIELD_SEPARATOR).map(str::trim).collect();
        let [domain, decision, confidence] = fields.as_slice() else {
            return Err(FailureReason::WrongFieldCount {
                found: fields.len(),
            });
        };

        validate_domain(domain)?;

        let label = match *decision {
            MALICIOUS_TOKEN => Label::Malicious,
            LEGITIMATE_TOKEN => Label::Legitimate,
            other => {
                return Err(FailureReason::InvalidDecision {
                    token: other.to_string(),
                });
            }
        };

        let confidence = parse_confidence(confidence)?;

        Ok(Self {
            domain: (*domain).to_string(),
            label,
            confidence,
        })
    }

    /// Returns the domain as written by the model.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the predicted label.
    #[must_use]
    pub const fn label(&self) -> Label {
        self.label
    }

    /// Returns the model's stated confidence.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Returns the reconciliation key of the domain.
    #[must_use]
    pub fn key(&self) -> DomainKey {
        DomainKey::new(&self.domain)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self.label {
            Label::Malicious => MALICIOUS_TOKEN,
            Label::Legitimate => LEGITIMATE_TOKEN,
        };
        write!(
            f,
            "{}{FIELD_SEPARATOR}{token}{FIELD_SEPARATOR}{}",
            self.domain,
            format_confidence(self.confidence)
        )
    }
}

/// Why a response line could not become a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The line does not have exactly three `|`-separated fields.
    WrongFieldCount {
        /// Number of fields found.
        found: usize,
    },
    /// The domain field is empty or contains characters no domain has.
    InvalidDomain {
        /// The offending field.
        domain: String,
    },
    /// The decision token is neither `Y` nor `N`.
    InvalidDecision {
        /// The offending token.
        token: String,
    },
    /// The confidence is not a fixed-point decimal.
    InvalidConfidence {
        /// The offending token.
        token: String,
    },
    /// The confidence lies outside `[0.0, 100.0]`.
    ConfidenceOutOfRange {
        /// The parsed value.
        value: f64,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongFieldCount { found } => {
                write!(f, "expected 3 '{FIELD_SEPARATOR}'-separated fields, found {found}")
            }
            Self::InvalidDomain { domain } => write!(f, "invalid domain field '{domain}'"),
            Self::InvalidDecision { token } => {
                write!(
                    f,
                    "decision '{token}' is not '{MALICIOUS_TOKEN}' or '{LEGITIMATE_TOKEN}'"
                )
            }
            Self::InvalidConfidence { token } => {
                write!(f, "confidence '{token}' is not a decimal number")
            }
            Self::ConfidenceOutOfRange { value } => {
                write!(f, "confidence {value} outside [0, {MAX_CONFIDENCE}]")
            }
        }
    }
}

/// A response line that did not parse, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    /// The offending line, trimmed.
    pub line: String,
    /// The batch whose response contained it.
    pub batch: BatchId,
    /// What was wrong with it.
    pub reason: FailureReason,
}

impl ParseFailure {
    /// Returns the key of the domain the line seems to be about, if the line
    /// is delimited at all.
    ///
    /// Used to tell a domain the model answered badly apart from one it
    /// never mentioned.
    #[must_use]
    pub fn domain_hint(&self) -> Option<DomainKey> {
        let (first, _) = self.line.split_once(FIELD_SEPARATOR)?;
        let key = DomainKey::new(first);
        (!key.as_str().is_empty()).then_some(key)
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.batch, self.reason, self.line)
    }
}

/// Verdicts and failures extracted from one raw response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    /// Successfully parsed lines, in response order.
    pub verdicts: Vec<Verdict>,
    /// Non-blank lines that did not parse, in response order.
    pub failures: Vec<ParseFailure>,
}

/// Parses every line of a raw model response.
///
/// Blank lines are skipped. Commentary, code fences and any other line that
/// does not follow the grammar become `ParseFailure`s; the rest of the
/// response is still parsed.
///
/// # Examples
///
/// ```
/// use agd_eval::{parse_response, BatchId};
///
/// let text = "Here are my answers:\na.com|N|90.0\n\nfoo.com|MAYBE|abc\nb.biz|Y|80.0\n";
/// let parsed = parse_response(text, BatchId::new(0, 0));
/// assert_eq!(parsed.verdicts.len(), 2);
/// assert_eq!(parsed.failures.len(), 2);
/// ```
#[must_use]
pub fn parse_response(text: &str, batch: BatchId) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match Verdict::parse_line(line) {
            Ok(verdict) => parsed.verdicts.push(verdict),
            Err(reason) => parsed.failures.push(ParseFailure {
                line: line.to_string(),
                batch,
                reason,
            }),
        }
    }
    parsed
}

fn validate_domain(domain: &str) -> Result<(), FailureReason> {
    let valid = !domain.is_empty()
        && domain
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_'));
    if valid {
        Ok(())
    } else {
        Err(FailureReason::InvalidDomain {
            domain: domain.to_string(),
        })
    }
}

fn parse_confidence(token: &str) -> Result<f64, FailureReason> {
    let invalid = || FailureReason::InvalidConfidence {
        token: token.to_string(),
    };

    let (whole, fraction) = match token.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (token, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !fraction.is_none_or(all_digits) {
        return Err(invalid());
    }

    let value: f64 = token.parse().map_err(|_| invalid())?;
    if value > MAX_CONFIDENCE {
        return Err(FailureReason::ConfidenceOutOfRange { value });
    }
    Ok(value)
}

/// Formats a confidence as a fixed-point decimal that parses back to the
/// same value.
#[allow(clippy::float_cmp)]
fn format_confidence(confidence: f64) -> String {
    // Adding +0.0 turns -0.0 into 0.0.
    let confidence = confidence + 0.0;
    if confidence.fract() == 0.0 {
        format!("{confidence:.1}")
    } else {
        format!("{confidence}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH: BatchId = BatchId::new(0, 3);

    #[test]
    fn parses_well_formed_lines() {
        let v = Verdict::parse_line("a.com|N|90.0").unwrap();
        assert_eq!(v.domain(), "a.com");
        assert_eq!(v.label(), Label::Legitimate);
        assert!((v.confidence() - 90.0).abs() < f64::EPSILON);

        let v = Verdict::parse_line("  xjq3k.biz | Y | 77.25  ").unwrap();
        assert_eq!(v.domain(), "xjq3k.biz");
        assert_eq!(v.label(), Label::Malicious);
        assert!((v.confidence() - 77.25).abs() < f64::EPSILON);
    }

    #[test]
    fn integer_confidence_is_accepted() {
        let v = Verdict::parse_line("a.com|N|100").unwrap();
        assert!((v.confidence() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            Verdict::parse_line("a.com|N"),
            Err(FailureReason::WrongFieldCount { found: 2 })
        );
        assert_eq!(
            Verdict::parse_line("a.com|N|90.0|extra"),
            Err(FailureReason::WrongFieldCount { found: 4 })
        );
        assert_eq!(
            Verdict::parse_line("Sure, here are the results"),
            Err(FailureReason::WrongFieldCount { found: 1 })
        );
    }

    #[test]
    fn rejects_bad_decision_token() {
        assert_eq!(
            Verdict::parse_line("foo.com|MAYBE|50.0"),
            Err(FailureReason::InvalidDecision {
                token: "MAYBE".to_string()
            })
        );
        assert!(Verdict::parse_line("foo.com|y|50.0").is_err());
    }

    #[test]
    fn rejects_bad_confidence() {
        for token in ["abc", "", "-1.0", "1e2", "50.", ".5", "NaN", "inf", "5 0"] {
            let line = format!("foo.com|Y|{token}");
            assert!(
                matches!(
                    Verdict::parse_line(&line),
                    Err(FailureReason::InvalidConfidence { .. })
                ),
                "accepted confidence {token:?}"
            );
        }
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        assert!(matches!(
            Verdict::parse_line("foo.com|Y|100.5"),
            Err(FailureReason::ConfidenceOutOfRange { .. })
        ));
        assert!(Verdict::new("foo.com", Label::Malicious, -0.5).is_err());
    }

    #[test]
    fn rejects_bad_domain_field() {
        assert!(matches!(
            Verdict::parse_line("|Y|50.0"),
            Err(FailureReason::InvalidDomain { .. })
        ));
        assert!(matches!(
            Verdict::parse_line("`foo.com`|Y|50.0"),
            Err(FailureReason::InvalidDomain { .. })
        ));
        assert!(matches!(
            Verdict::parse_line("foo bar.com|Y|50.0"),
            Err(FailureReason::InvalidDomain { .. })
        ));
    }

    #[test]
    fn malformed_line_among_good_ones() {
        let text = "a.com|N|90.0\nfoo.com|MAYBE|abc\nb.biz|Y|80.0";
        let parsed = parse_response(text, BATCH);

        assert_eq!(parsed.verdicts.len(), 2);
        assert_eq!(parsed.failures.len(), 1);
        assert_eq!(parsed.failures[0].line, "foo.com|MAYBE|abc");
        assert_eq!(parsed.failures[0].batch, BATCH);
    }

    #[test]
    fn blank_lines_and_crlf_are_ignored() {
        let text = "\r\n  \r\na.com|N|90.0\r\n\r\n";
        let parsed = parse_response(text, BATCH);
        assert_eq!(parsed.verdicts.len(), 1);
        assert!(parsed.failures.is_empty());
    }

    #[test]
    fn render_round_trip() {
        let v = Verdict::new("b.biz", Label::Malicious, 80.0).unwrap();
        assert_eq!(v.to_string(), "b.biz|Y|80.0");
        assert_eq!(Verdict::parse_line(&v.to_string()).unwrap(), v);

        let v = Verdict::new("a.com", Label::Legitimate, 33.333).unwrap();
        assert_eq!(v.to_string(), "a.com|N|33.333");
        assert_eq!(Verdict::parse_line(&v.to_string()).unwrap(), v);

        let v = Verdict::new("z.org", Label::Legitimate, -0.0).unwrap();
        assert_eq!(v.to_string(), "z.org|N|0.0");
    }

    #[test]
    fn domain_hint_only_for_delimited_lines() {
        let parsed = parse_response("Foo.COM.|MAYBE|abc\nno delimiter here", BATCH);
        assert_eq!(
            parsed.failures[0].domain_hint(),
            Some(DomainKey::new("foo.com"))
        );
        assert_eq!(parsed.failures[1].domain_hint(), None);
    }

    #[test]
    fn failure_display_names_batch() {
        let parsed = parse_response("foo.com|MAYBE|abc", BATCH);
        let text = parsed.failures[0].to_string();
        assert!(text.starts_with("pass 0 batch 3"));
        assert!(text.ends_with("foo.com|MAYBE|abc"));
    }
}
