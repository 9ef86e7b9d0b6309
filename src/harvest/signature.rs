//! Parsing of the results-range indicator ("page signature").

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

// Numbers may carry `.` or `,` thousands grouping ("1.370", "1,370").
static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d{1,3}(?:[.,]\d{3})+|\d+)\s*[-–—]\s*(\d{1,3}(?:[.,]\d{3})+|\d+)\s*(?:of|de)\s*(\d{1,3}(?:[.,]\d{3})+|\d+)",
    )
    .unwrap()
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed results-range signature: '{0}'")]
    Malformed(String),
}

/// `start–end of total`, 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsRange {
    pub start: u32,
    pub end: u32,
    pub total: u32,
}

impl ResultsRange {
    /// The authoritative termination signal.
    pub fn is_last(&self) -> bool {
        self.end >= self.total
    }

    pub fn page_size(&self) -> u32 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn current_page(&self) -> u32 {
        (self.start.saturating_sub(1)) / self.page_size() + 1
    }
}

/// Parses indicators such as `"1 - 10 de 137 Registros"` or `"11–20 of 137"`.
pub fn parse_signature(signature: &str) -> Result<ResultsRange, SignatureError> {
    let malformed = || SignatureError::Malformed(signature.to_string());
    let caps = RANGE_RE.captures(signature).ok_or_else(malformed)?;
    let number = |i: usize| {
        caps[i]
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse::<u32>()
            .map_err(|_| malformed())
    };
    let range = ResultsRange {
        start: number(1)?,
        end: number(2)?,
        total: number(3)?,
    };
    // An end past the total cannot be shown by a real listing.
    if range.start == 0 || range.start > range.end || range.end > range.total {
        return Err(malformed());
    }
    Ok(range)
}
