//! Labeled domains and the normalized key used to match them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ground-truth or predicted class of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// A legitimate, human-registered domain.
    Legitimate,
    /// An algorithmically generated domain.
    Malicious,
}

impl Label {
    /// Returns true for [`Label::Malicious`], the positive class.
    #[must_use]
    pub const fn is_malicious(self) -> bool {
        matches!(self, Self::Malicious)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legitimate => write!(f, "legitimate"),
            Self::Malicious => write!(f, "malicious"),
        }
    }
}

/// Normalized domain used for reconciliation.
///
/// Comparison is case-insensitive and ignores surrounding whitespace and
/// trailing dots, so `Example.COM.` and `example.com` share a key.
///
/// # Examples
///
/// ```
/// use agd_eval::DomainKey;
///
/// assert_eq!(DomainKey::new(" Example.COM. "), DomainKey::new("example.com"));
/// assert_eq!(DomainKey::new("Example.COM.").as_str(), "example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainKey(String);

impl DomainKey {
    /// Normalizes a domain string into a key.
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self(domain.trim().trim_end_matches('.').to_ascii_lowercase())
    }

    /// Returns the normalized string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A corpus domain with its ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    name: String,
    label: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    family: Option<String>,
}

impl Domain {
    /// Creates a legitimate domain.
    #[must_use]
    pub fn legitimate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: Label::Legitimate,
            family: None,
        }
    }

    /// Creates a malicious domain belonging to a malware family.
    #[must_use]
    pub fn malicious(name: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: Label::Malicious,
            family: Some(family.into()),
        }
    }

    /// Returns the domain as loaded from the corpus.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the ground-truth label.
    #[must_use]
    pub const fn label(&self) -> Label {
        self.label
    }

    /// Returns the malware family, if malicious.
    #[must_use]
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    /// Returns the reconciliation key.
    #[must_use]
    pub fn key(&self) -> DomainKey {
        DomainKey::new(&self.name)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_case_insensitive_and_drops_trailing_dots() {
        assert_eq!(DomainKey::new("B.BIZ"), DomainKey::new("b.biz"));
        assert_eq!(DomainKey::new("b.biz.."), DomainKey::new("b.biz"));
        assert_eq!(DomainKey::new("\tb.biz \n").as_str(), "b.biz");
    }

    #[test]
    fn constructors_set_label_and_family() {
        let legit = Domain::legitimate("a.com");
        assert_eq!(legit.label(), Label::Legitimate);
        assert!(legit.family().is_none());

        let dga = Domain::malicious("xkqz.biz", "conficker");
        assert!(dga.label().is_malicious());
        assert_eq!(dga.family(), Some("conficker"));
    }

    #[test]
    fn domain_serializes_without_empty_family() {
        let json = serde_json::to_string(&Domain::legitimate("a.com")).unwrap();
        assert_eq!(json, r#"{"name":"a.com","label":"legitimate"}"#);

        let back: Domain =
            serde_json::from_str(r#"{"name":"b.biz","label":"malicious","family":"x"}"#).unwrap();
        assert_eq!(back, Domain::malicious("b.biz", "x"));
    }
}
