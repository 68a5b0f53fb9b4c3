//! Reconciliation: turn noisy per-page candidates into one canonical sequence.
//!
//! Candidates arrive unordered, sometimes duplicated (a section spanning two
//! pages, or OCR misreading a digit into another section's number) and with
//! holes (a page whose identifier could not be read). Three steps repair that:
//!
//! 1. **Collapse duplicates.** An identifier seen on more than one page
//!    becomes a single placeholder with no score. Picking one of the
//!    conflicting scores would silently publish a value that may be wrong.
//! 2. **Order** ascending by identifier.
//! 3. **Gap-fill.** Every missing integer between consecutive identifiers
//!    gets a placeholder, as does every integer between the sequence ends
//!    and any configured [`IdentifierBounds`]. A gap between two observed
//!    identifiers wider than the gap limit ([`DEFAULT_MAX_GAP`] unless
//!    configured) is left open and counted instead: one misread digit in an
//!    identifier would otherwise synthesize billions of rows.
//!
//! The function is pure: the same candidates always give the same records,
//! and reconciling an already reconciled set changes nothing.

use crate::config::IdentifierBounds;
use crate::record::{CandidateRecord, Record, RecordSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Widest gap between two observed identifiers that is filled by default.
pub const DEFAULT_MAX_GAP: u64 = 10_000;

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub records: RecordSet,
    pub stats: ReconcileStats,
}

/// What the reconciler had to repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Candidates received.
    pub candidates: usize,
    /// Distinct identifiers that occurred more than once.
    pub duplicates_collapsed: usize,
    /// Placeholders synthesized for identifiers never observed.
    pub gaps_filled: usize,
    /// Gaps left open because they exceeded the gap limit.
    #[serde(default)]
    pub gaps_skipped: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    bounds: IdentifierBounds,
    max_gap: Option<u64>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(IdentifierBounds::default())
    }
}

impl Reconciler {
    pub fn new(bounds: IdentifierBounds) -> Self {
        Self {
            bounds,
            max_gap: Some(DEFAULT_MAX_GAP),
        }
    }

    /// Limit how many placeholders a single interior gap may produce.
    /// `None` fills every gap.
    pub fn with_max_gap(mut self, max_gap: Option<u64>) -> Self {
        self.max_gap = max_gap;
        self
    }

    pub fn reconcile(&self, candidates: &[CandidateRecord]) -> Reconciliation {
        let mut groups: BTreeMap<i64, Group> = BTreeMap::new();
        for candidate in candidates {
            groups
                .entry(candidate.identifier)
                .and_modify(|g| g.count += 1)
                .or_insert(Group {
                    count: 1,
                    score: candidate.score,
                });
        }

        let duplicates_collapsed = groups.values().filter(|g| g.count > 1).count();
        for (identifier, group) in groups.iter().filter(|(_, g)| g.count > 1) {
            debug!(
                "Identifier {} seen on {} pages; score cleared",
                identifier, group.count
            );
        }

        // BTreeMap iteration is already ascending by identifier.
        let observed: Vec<Record> = groups
            .into_iter()
            .map(|(identifier, group)| {
                if group.count > 1 {
                    Record::placeholder(identifier)
                } else {
                    Record::new(identifier, group.score)
                }
            })
            .collect();

        let (records, gaps_filled, gaps_skipped) = self.fill_gaps(observed);
        let stats = ReconcileStats {
            candidates: candidates.len(),
            duplicates_collapsed,
            gaps_filled,
            gaps_skipped,
        };
        info!(
            "Reconciled {} candidates → {} records ({} duplicates collapsed, {} gaps filled)",
            stats.candidates,
            records.len(),
            stats.duplicates_collapsed,
            stats.gaps_filled
        );

        Reconciliation {
            records: RecordSet::from_sorted(records),
            stats,
        }
    }

    /// Insert placeholders for every identifier in the resolved range that is
    /// not present in `observed` (ascending, unique). Returns the records,
    /// the placeholders added and the interior gaps skipped.
    fn fill_gaps(&self, observed: Vec<Record>) -> (Vec<Record>, usize, usize) {
        let range = observed
            .first()
            .zip(observed.last())
            .map(|(first, last)| (first.identifier, last.identifier));
        let Some((lower, upper)) = self.bounds.resolve(range) else {
            return (observed, 0, 0);
        };

        // Widened so `identifier + 1` cannot overflow at i64::MAX.
        let mut expected = i128::from(lower);
        let mut out = Vec::with_capacity(observed.len());
        let mut filled = 0;
        let mut pad = |out: &mut Vec<Record>, expected: &mut i128, until: i128| {
            while *expected < until {
                out.push(Record::placeholder(*expected as i64));
                filled += 1;
                *expected += 1;
            }
        };

        let mut skipped = 0;
        let mut previous: Option<i64> = None;
        for record in observed {
            let identifier = i128::from(record.identifier);
            if let Some(previous) = previous {
                let missing = identifier - expected;
                if self.max_gap.is_some_and(|max| missing > i128::from(max)) {
                    warn!(
                        "{} identifiers missing between {} and {}; gap left open",
                        missing, previous, record.identifier
                    );
                    skipped += 1;
                    expected = identifier;
                }
            }
            pad(&mut out, &mut expected, identifier);
            expected = identifier + 1;
            previous = Some(record.identifier);
            out.push(record);
        }
        pad(&mut out, &mut expected, i128::from(upper) + 1);
        (out, filled, skipped)
    }
}

struct Group {
    count: usize,
    score: Option<i64>,
}

/// Reconcile `candidates` within the observed identifier range.
pub fn reconcile(candidates: &[CandidateRecord]) -> RecordSet {
    Reconciler::default().reconcile(candidates).records
}
