use std::time::Duration;

use serde::Deserialize;

use crate::fetch::RetryPolicy;

/// Knobs shared by all source scrapers.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeConfig {
    /// Admission-gate ceiling: simultaneous in-flight requests per source.
    pub max_in_flight: usize,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 30,
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Failures while extracting listings from a page body. Never retried: the
/// offending row or page is skipped and the failure recorded.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("embedded data block not found")]
    MissingDataBlock,
    #[error("malformed data block: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("result count indicator not found")]
    MissingResultCount,
    #[error("{0}")]
    Row(String),
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MissingDataBlock => "data block missing",
            ParseError::Malformed(_) => "data block malformed",
            ParseError::MissingResultCount => "result count missing",
            ParseError::Row(_) => "listing row rejected",
        }
    }
}

/// Listing identifiers arrive as integers from some sources and strings from
/// others; normalized to a string in the canonical record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Num(i64),
    Text(String),
}

impl RawId {
    pub fn into_string(self) -> String {
        match self {
            RawId::Num(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

/// Numeric amount of a raw price text: everything except digits and periods
/// stripped, the rest read as a decimal. `None` for price-on-application
/// style text with no digits.
pub fn decimal_amount(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_strips_currency_and_separators() {
        assert_eq!(decimal_amount("£1,250,000"), Some(1_250_000.0));
        assert_eq!(decimal_amount("£1,950 pcm"), Some(1950.0));
        assert_eq!(decimal_amount("£449.95"), Some(449.95));
    }

    #[test]
    fn amount_without_digits_is_none() {
        assert_eq!(decimal_amount("POA"), None);
        assert_eq!(decimal_amount(""), None);
    }

    #[test]
    fn raw_ids_normalize_to_strings() {
        let num: RawId = serde_json::from_str("12345").unwrap();
        let text: RawId = serde_json::from_str("\"abc-9\"").unwrap();
        assert_eq!(num.into_string(), "12345");
        assert_eq!(text.into_string(), "abc-9");
    }
}
