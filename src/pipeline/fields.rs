//! Field extraction: pull the identifier and score out of recognised text.
//!
//! Extraction never fails. Text that does not contain a field yields `None`,
//! and a page without an identifier simply produces no candidate record.
//!
//! The default patterns match the shore-section assessment sheets the tool
//! was built for, printed in German and French:
//!
//! ```text
//! Uferabschnitt Nr. 42        de segment: 42       → identifier 42
//! GESAMTNOTE = 67             TOTALE = 67          → score 67
//! ```

use crate::error::ExtractError;
use crate::record::CandidateRecord;
use once_cell::sync::Lazy;
use regex::Regex;

/// Identifier label followed by the number. The single wildcard before the
/// space absorbs the punctuation OCR tends to invent after the label.
pub const DEFAULT_IDENTIFIER_PATTERN: &str = r"(?:Uferabschnitt Nr\.|de segment).? (\d+)";

/// Total-score label followed by the number.
pub const DEFAULT_SCORE_PATTERN: &str = r"(?:NOTE|TOTALE) = (\d+)";

static RE_DEFAULT_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_IDENTIFIER_PATTERN).unwrap());

static RE_DEFAULT_SCORE: Lazy<Regex> = Lazy::new(|| Regex::new(DEFAULT_SCORE_PATTERN).unwrap());

/// Extracts the two record fields from a page's text.
pub trait FieldExtractor: Send + Sync {
    /// The record identifier, or `None` when the text names none (or is ambiguous).
    fn extract_identifier(&self, text: &str) -> Option<i64>;

    /// The score, or `None` when absent.
    fn extract_score(&self, text: &str) -> Option<i64>;

    /// Build a candidate for `page_index`, or `None` if no identifier matched.
    fn extract_candidate(&self, text: &str, page_index: usize) -> Option<CandidateRecord> {
        let identifier = self.extract_identifier(text)?;
        Some(CandidateRecord::new(
            identifier,
            self.extract_score(text),
            page_index,
        ))
    }
}

/// [`FieldExtractor`] driven by two regular expressions.
///
/// Each pattern's first capture group must hold the number.
#[derive(Debug, Clone)]
pub struct RegexFieldExtractor {
    identifier: Regex,
    score: Regex,
}

impl Default for RegexFieldExtractor {
    fn default() -> Self {
        Self {
            identifier: RE_DEFAULT_IDENTIFIER.clone(),
            score: RE_DEFAULT_SCORE.clone(),
        }
    }
}

impl RegexFieldExtractor {
    /// Compile custom patterns. Each must contain at least one capture group.
    pub fn new(identifier_pattern: &str, score_pattern: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            identifier: compile("identifier", identifier_pattern)?,
            score: compile("score", score_pattern)?,
        })
    }

    /// Default score pattern with a custom identifier pattern, or vice versa.
    pub fn with_patterns(
        identifier_pattern: Option<&str>,
        score_pattern: Option<&str>,
    ) -> Result<Self, ExtractError> {
        Self::new(
            identifier_pattern.unwrap_or(DEFAULT_IDENTIFIER_PATTERN),
            score_pattern.unwrap_or(DEFAULT_SCORE_PATTERN),
        )
    }
}

fn compile(field: &str, pattern: &str) -> Result<Regex, ExtractError> {
    let re = Regex::new(pattern).map_err(|e| {
        ExtractError::InvalidConfig(format!("invalid {field} pattern '{pattern}': {e}"))
    })?;
    if re.captures_len() < 2 {
        return Err(ExtractError::InvalidConfig(format!(
            "{field} pattern '{pattern}' needs a capture group around the number"
        )));
    }
    Ok(re)
}

impl FieldExtractor for RegexFieldExtractor {
    /// Every match on the page must agree. A page that mentions two different
    /// identifiers (e.g. an overview table) is ambiguous and yields `None`.
    fn extract_identifier(&self, text: &str) -> Option<i64> {
        let mut found: Option<i64> = None;
        for caps in self.identifier.captures_iter(text) {
            let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) else {
                continue;
            };
            match found {
                None => found = Some(value),
                Some(prev) if prev == value => {}
                Some(_) => return None,
            }
        }
        found
    }

    /// The first match wins.
    fn extract_score(&self, text: &str) -> Option<i64> {
        self.score
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}
