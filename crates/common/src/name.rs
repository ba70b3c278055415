// Domain name label arithmetic used by the tunnel analyzer.

use thiserror::Error;

pub const MAX_LABEL_BYTES: usize = 63;
pub const MAX_NAME_BYTES: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("empty label in domain name")]
    EmptyLabel,
    #[error("label exceeds {MAX_LABEL_BYTES} bytes")]
    LabelTooLong,
    #[error("name exceeds {MAX_NAME_BYTES} bytes")]
    NameTooLong,
}

/// An ordered sequence of domain labels, root omitted.
///
/// `www.example.com.` parses to `["www", "example", "com"]`; the root
/// name `.` parses to no labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainName {
    labels: Vec<String>,
}

impl DomainName {
    pub fn parse(s: &str) -> Result<Self, NameError> {
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Ok(Self { labels: Vec::new() });
        }

        let mut labels = Vec::new();
        let mut total = 0usize;
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(NameError::EmptyLabel);
            }
            if label.len() > MAX_LABEL_BYTES {
                return Err(NameError::LabelTooLong);
            }
            total += label.len() + 1;
            if total > MAX_NAME_BYTES {
                return Err(NameError::NameTooLong);
            }
            labels.push(label.to_string());
        }
        Ok(Self { labels })
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The suffix made of the last `n` labels.
    pub fn suffix(&self, n: usize) -> Self {
        let start = self.labels.len().saturating_sub(n);
        Self { labels: self.labels[start..].to_vec() }
    }

    /// The prefix remaining once the last `n` labels are removed.
    pub fn prefix(&self, suffix_len: usize) -> Self {
        let end = self.labels.len().saturating_sub(suffix_len);
        Self { labels: self.labels[..end].to_vec() }
    }

    /// Absolute form with trailing dot; the root renders as `.`.
    pub fn to_fqdn(&self) -> String {
        if self.labels.is_empty() {
            return ".".to_string();
        }
        let mut s = self.labels.join(".");
        s.push('.');
        s
    }

    /// Relative form: labels joined by dots, no trailing dot.
    pub fn to_relative(&self) -> String {
        self.labels.join(".")
    }

    /// Wire length of these labels: one length octet plus the label
    /// bytes, per label (no terminating root octet).
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| 1 + l.len()).sum()
    }
}

/// Normalize a domain string to FQDN form (ensure a trailing dot).
pub fn fqdn(s: &str) -> String {
    if s.ends_with('.') {
        s.to_string()
    } else {
        format!("{s}.")
    }
}
