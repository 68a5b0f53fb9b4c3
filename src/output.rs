//! Output types returned by the extraction API.

use crate::pipeline::reconcile::ReconcileStats;
use crate::record::RecordSet;
use serde::{Deserialize, Serialize};

/// Everything a successful extraction produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The reconciled, ordered records; gap-free unless a gap exceeded the
    /// configured limit (see [`ExtractionStats::gaps_skipped`]).
    pub records: RecordSet,
    pub stats: ExtractionStats,
}

/// Counters describing one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the document.
    pub total_pages: usize,
    /// Batches processed.
    pub batches: usize,
    /// Candidate records produced by field extraction.
    pub candidates: usize,
    /// Pages whose text named no identifier.
    pub pages_without_match: usize,
    /// Identifiers seen on more than one page.
    pub duplicates_collapsed: usize,
    /// Placeholders synthesized by gap-fill.
    pub gaps_filled: usize,
    /// Gaps left open because they exceeded the gap limit.
    #[serde(default)]
    pub gaps_skipped: usize,
    /// Rows in the final record set.
    pub records: usize,
    /// Rows passing [`crate::record::Record::is_valid`].
    pub valid_records: usize,
    /// Wall-clock time, including input resolution and engine start-up.
    pub total_duration_ms: u64,
}

impl ExtractionStats {
    pub(crate) fn absorb(&mut self, reconcile: &ReconcileStats) {
        self.duplicates_collapsed = reconcile.duplicates_collapsed;
        self.gaps_filled = reconcile.gaps_filled;
        self.gaps_skipped = reconcile.gaps_skipped;
    }

    pub fn invalid_records(&self) -> usize {
        self.records - self.valid_records
    }
}

impl ExtractionOutput {
    /// `true` when every record carries a usable score.
    pub fn is_complete(&self) -> bool {
        self.stats.valid_records == self.stats.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_serialize_as_flat_json() {
        let stats = ExtractionStats {
            total_pages: 12,
            records: 5,
            valid_records: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_pages"], 12);
        assert_eq!(json["valid_records"], 3);
        assert_eq!(stats.invalid_records(), 2);
    }
}
