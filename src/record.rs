//! Domain records: per-page candidates and the final reconciled sequence.

use serde::{Deserialize, Deserializer, Serialize};

/// Lowest score a valid record may carry.
pub const MIN_SCORE: i64 = 0;
/// Highest score a valid record may carry.
pub const MAX_SCORE: i64 = 100;

/// A tentative record extracted from a single page's text.
///
/// Several pages may produce the same `identifier` (the section spans pages,
/// or OCR misread a digit); the [`crate::pipeline::reconcile`] step resolves that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Domain key read from the page text. Unrelated to the page index.
    pub identifier: i64,
    /// Second field; `None` when the page text did not contain it.
    pub score: Option<i64>,
    /// 0-indexed page the candidate came from. Diagnostics only.
    pub page_index: usize,
}

impl CandidateRecord {
    pub fn new(identifier: i64, score: Option<i64>, page_index: usize) -> Self {
        Self {
            identifier,
            score,
            page_index,
        }
    }
}

/// One row of the final [`RecordSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub identifier: i64,
    pub score: Option<i64>,
}

impl Record {
    pub fn new(identifier: i64, score: Option<i64>) -> Self {
        Self { identifier, score }
    }

    /// A placeholder for an identifier that is known to exist but has no
    /// trustworthy score (duplicate or never observed).
    pub fn placeholder(identifier: i64) -> Self {
        Self {
            identifier,
            score: None,
        }
    }

    /// `true` iff the identifier is positive and the score is present and
    /// within `MIN_SCORE..=MAX_SCORE`.
    pub fn is_valid(&self) -> bool {
        self.identifier > 0
            && matches!(self.score, Some(s) if (MIN_SCORE..=MAX_SCORE).contains(&s))
    }
}

/// The reconciled, ordered, gap-free sequence of records.
///
/// Built by [`crate::pipeline::reconcile::Reconciler`]; identifiers are
/// unique and strictly ascending. Deserialisation rejects any other order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RecordSet {
    records: Vec<Record>,
}

impl<'de> Deserialize<'de> for RecordSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<Record>::deserialize(deserializer)?;
        if let Some(pair) = records
            .windows(2)
            .find(|w| w[0].identifier >= w[1].identifier)
        {
            return Err(serde::de::Error::custom(format!(
                "record identifiers must be strictly ascending, found {} followed by {}",
                pair[0].identifier, pair[1].identifier
            )));
        }
        Ok(Self { records })
    }
}

impl RecordSet {
    pub(crate) fn from_sorted(records: Vec<Record>) -> Self {
        debug_assert!(records
            .windows(2)
            .all(|w| w[0].identifier < w[1].identifier));
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.records
    }

    /// Look up a record by identifier (binary search on the ordered sequence).
    pub fn get(&self, identifier: i64) -> Option<&Record> {
        self.records
            .binary_search_by_key(&identifier, |r| r.identifier)
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn valid_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_valid()).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.len() - self.valid_count()
    }

    /// First and last identifier, if any.
    pub fn identifier_range(&self) -> Option<(i64, i64)> {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Some((first.identifier, last.identifier)),
            _ => None,
        }
    }

    pub fn into_vec(self) -> Vec<Record> {
        self.records
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_boundaries() {
        assert!(Record::new(1, Some(0)).is_valid());
        assert!(Record::new(1, Some(100)).is_valid());
        assert!(!Record::new(1, Some(-1)).is_valid());
        assert!(!Record::new(1, Some(101)).is_valid());
        assert!(!Record::new(1, None).is_valid());
    }

    #[test]
    fn non_positive_identifier_is_invalid() {
        assert!(!Record::new(0, Some(50)).is_valid());
        assert!(!Record::new(-4, Some(50)).is_valid());
    }

    #[test]
    fn placeholder_has_no_score() {
        let r = Record::placeholder(9);
        assert_eq!(r.identifier, 9);
        assert_eq!(r.score, None);
        assert!(!r.is_valid());
    }

    #[test]
    fn record_set_lookup_and_counts() {
        let set = RecordSet::from_sorted(vec![
            Record::new(3, Some(70)),
            Record::placeholder(4),
            Record::new(5, Some(101)),
            Record::new(6, Some(12)),
        ]);
        assert_eq!(set.len(), 4);
        assert_eq!(set.valid_count(), 2);
        assert_eq!(set.invalid_count(), 2);
        assert_eq!(set.get(6), Some(&Record::new(6, Some(12))));
        assert_eq!(set.get(7), None);
        assert_eq!(set.identifier_range(), Some((3, 6)));
    }

    #[test]
    fn record_set_serialises_as_array() {
        let set = RecordSet::from_sorted(vec![Record::new(1, Some(90)), Record::placeholder(2)]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(
            json,
            r#"[{"identifier":1,"score":90},{"identifier":2,"score":null}]"#
        );
    }

    #[test]
    fn record_set_deserialises_a_canonical_sequence() {
        let set: RecordSet =
            serde_json::from_str(r#"[{"identifier":1,"score":90},{"identifier":2,"score":null}]"#)
                .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.valid_count(), 1);
        let empty: RecordSet = serde_json::from_str("[]").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn record_set_rejects_unordered_or_duplicated_input() {
        for json in [
            r#"[{"identifier":2,"score":1},{"identifier":1,"score":1}]"#,
            r#"[{"identifier":1,"score":1},{"identifier":1,"score":2}]"#,
        ] {
            let err = serde_json::from_str::<RecordSet>(json).unwrap_err();
            assert!(err.to_string().contains("strictly ascending"), "got: {err}");
        }
    }
}
