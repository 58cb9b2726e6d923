// 🔀 Canonical Merger - fold freshly assembled records into the ledger
// Keyed by (date, session); computed fully in memory, the caller decides append vs rewrite

use crate::record::{DrawKey, DrawRecord, SourceRole, SourcedRecord};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub added: usize,
    pub replaced: usize,
    pub dropped_stale: usize,
    pub unchanged: usize,
}

impl MergeCounts {
    pub fn changed(&self) -> bool {
        self.added + self.replaced > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Full ledger content after the merge, ascending
    pub records: Vec<DrawRecord>,

    /// Records new to the ledger, ascending
    pub new_records: Vec<DrawRecord>,

    pub counts: MergeCounts,

    /// Every new record sorts after the old ledger and nothing was replaced
    pub append_only: bool,
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        MergeEngine
    }

    /// Collapse a batch to one candidate per key.
    ///
    /// More optional fields wins; on equal completeness a primary record beats a
    /// fallback one, otherwise the first seen is kept.
    pub fn dedup<'a>(
        &self,
        incoming: impl IntoIterator<Item = &'a SourcedRecord>,
    ) -> BTreeMap<DrawKey, SourcedRecord> {
        let mut best: BTreeMap<DrawKey, SourcedRecord> = BTreeMap::new();
        for candidate in incoming {
            let key = candidate.record.key();
            match best.get(&key) {
                Some(current) if !Self::beats(candidate, current) => {
                    if current.record.digits != candidate.record.digits {
                        debug!(
                            date = %key.0,
                            session = %key.1,
                            kept = %current.source,
                            ignored = %candidate.source,
                            "conflicting digits within batch"
                        );
                    }
                }
                _ => {
                    best.insert(key, candidate.clone());
                }
            }
        }
        best
    }

    fn beats(candidate: &SourcedRecord, current: &SourcedRecord) -> bool {
        let (c, k) = (candidate.record.completeness(), current.record.completeness());
        c > k || (c == k && candidate.role == SourceRole::Primary && current.role == SourceRole::Fallback)
    }

    pub fn merge(&self, existing: &[DrawRecord], incoming: &[SourcedRecord]) -> MergeOutcome {
        let latest: Option<NaiveDate> = existing.iter().map(|r| r.date).max();
        let last_key: Option<DrawKey> = existing.iter().map(|r| r.key()).max();

        let mut ledger: BTreeMap<DrawKey, DrawRecord> =
            existing.iter().map(|r| (r.key(), r.clone())).collect();
        let mut counts = MergeCounts::default();
        let mut new_records = Vec::new();

        // Stale fallback candidates leave before dedup; they must not shadow a fresh record
        let (stale, fresh): (Vec<&SourcedRecord>, Vec<&SourcedRecord>) =
            incoming.iter().partition(|c| {
                c.role == SourceRole::Fallback && latest.map_or(false, |latest| c.record.date <= latest)
            });

        let mut stale_keys: BTreeSet<DrawKey> = BTreeSet::new();
        for candidate in stale {
            let key = candidate.record.key();
            if let Some(current) = ledger.get(&key) {
                if current.digits != candidate.record.digits {
                    warn!(
                        date = %key.0,
                        session = %key.1,
                        source = %candidate.source,
                        "fallback disagrees with ledger, keeping ledger"
                    );
                }
            }
            stale_keys.insert(key);
        }
        counts.dropped_stale = stale_keys.len();

        for (key, candidate) in self.dedup(fresh) {
            match ledger.get(&key) {
                None => {
                    counts.added += 1;
                    new_records.push(candidate.record.clone());
                    ledger.insert(key, candidate.record);
                }
                Some(current) if candidate.record.completeness() > current.completeness() => {
                    if current.digits != candidate.record.digits {
                        warn!(date = %key.0, session = %key.1, "replacing record with different digits");
                    }
                    counts.replaced += 1;
                    ledger.insert(key, candidate.record);
                }
                Some(current) => {
                    if current.digits != candidate.record.digits {
                        warn!(
                            date = %key.0,
                            session = %key.1,
                            source = %candidate.source,
                            "source disagrees with ledger, keeping ledger"
                        );
                    }
                    counts.unchanged += 1;
                }
            }
        }

        let append_only = counts.replaced == 0
            && new_records
                .iter()
                .all(|r| last_key.map_or(true, |last| r.key() > last));

        debug!(
            added = counts.added,
            replaced = counts.replaced,
            dropped_stale = counts.dropped_stale,
            unchanged = counts.unchanged,
            "merge computed"
        );

        MergeOutcome {
            records: ledger.into_values().collect(),
            new_records,
            counts,
            append_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Session;

    fn rec(day: u32, session: Session, digits: [u8; 3], bonus: Option<u8>) -> DrawRecord {
        let r = DrawRecord::new(
            NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            session,
            digits.to_vec(),
        );
        match bonus {
            Some(b) => r.with_bonus(b),
            None => r,
        }
    }

    fn primary(r: DrawRecord) -> SourcedRecord {
        SourcedRecord::new(r, SourceRole::Primary, "pdf")
    }

    fn fallback(r: DrawRecord) -> SourcedRecord {
        SourcedRecord::new(r, SourceRole::Fallback, "archive")
    }

    #[test]
    fn test_merge_into_empty_sorts_ascending() {
        let incoming = vec![
            primary(rec(3, Session::Evening, [1, 1, 1], None)),
            primary(rec(1, Session::Evening, [2, 2, 2], None)),
            primary(rec(1, Session::Midday, [3, 3, 3], None)),
        ];
        let out = MergeEngine::new().merge(&[], &incoming);
        let keys: Vec<_> = out.records.iter().map(|r| (r.date.to_string(), r.session)).collect();
        assert_eq!(
            keys,
            vec![
                ("2024-06-01".to_string(), Session::Midday),
                ("2024-06-01".to_string(), Session::Evening),
                ("2024-06-03".to_string(), Session::Evening),
            ]
        );
        assert_eq!(out.counts.added, 3);
        assert!(out.append_only);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let engine = MergeEngine::new();
        let incoming = vec![
            primary(rec(1, Session::Midday, [1, 2, 3], Some(4))),
            primary(rec(2, Session::Midday, [5, 6, 7], None)),
        ];
        let first = engine.merge(&[], &incoming);
        let second = engine.merge(&first.records, &incoming);
        assert_eq!(second.records, first.records);
        assert!(!second.counts.changed());
        assert_eq!(second.counts.unchanged, 2);
    }

    #[test]
    fn test_more_complete_record_replaces_existing() {
        let existing = vec![rec(1, Session::Midday, [1, 2, 3], None)];
        let out = MergeEngine::new().merge(&existing, &[primary(rec(1, Session::Midday, [1, 2, 3], Some(9)))]);
        assert_eq!(out.counts.replaced, 1);
        assert_eq!(out.records[0].bonus, Some(9));
        assert!(!out.append_only);
    }

    #[test]
    fn test_less_complete_record_never_downgrades() {
        let existing = vec![rec(1, Session::Midday, [1, 2, 3], Some(9))];
        let out = MergeEngine::new().merge(&existing, &[primary(rec(1, Session::Midday, [1, 2, 3], None))]);
        assert_eq!(out.records, existing);
        assert_eq!(out.counts.unchanged, 1);
    }

    #[test]
    fn test_fallback_not_newer_than_ledger_is_dropped() {
        let existing = vec![rec(5, Session::Evening, [1, 2, 3], None)];
        let incoming = vec![
            fallback(rec(4, Session::Midday, [7, 7, 7], Some(1))),
            fallback(rec(5, Session::Midday, [8, 8, 8], None)),
            fallback(rec(6, Session::Midday, [9, 9, 9], None)),
        ];
        let out = MergeEngine::new().merge(&existing, &incoming);
        assert_eq!(out.counts.dropped_stale, 2);
        assert_eq!(out.counts.added, 1);
        assert_eq!(out.new_records, vec![rec(6, Session::Midday, [9, 9, 9], None)]);
        assert!(out.append_only);
    }

    #[test]
    fn test_fallback_seeds_empty_ledger() {
        let out = MergeEngine::new().merge(&[], &[fallback(rec(1, Session::Midday, [1, 2, 3], None))]);
        assert_eq!(out.counts.added, 1);
    }

    #[test]
    fn test_backfilled_key_requires_rewrite() {
        let existing = vec![rec(5, Session::Evening, [1, 2, 3], None)];
        let out = MergeEngine::new().merge(&existing, &[primary(rec(4, Session::Midday, [4, 4, 4], None))]);
        assert_eq!(out.counts.added, 1);
        assert!(!out.append_only);
        assert_eq!(out.records[0].date, NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
    }

    #[test]
    fn test_dedup_prefers_primary_on_tie_and_completeness_first() {
        let engine = MergeEngine::new();
        let batch = vec![
            fallback(rec(1, Session::Midday, [1, 1, 1], None)),
            primary(rec(1, Session::Midday, [2, 2, 2], None)),
            fallback(rec(2, Session::Midday, [3, 3, 3], Some(5))),
            primary(rec(2, Session::Midday, [3, 3, 3], None)),
            primary(rec(3, Session::Midday, [4, 4, 4], None)),
            primary(rec(3, Session::Midday, [6, 6, 6], None)),
        ];
        let best = engine.dedup(&batch);
        let digits: Vec<_> = best.values().map(|s| s.record.digits.clone()).collect();
        assert_eq!(digits, vec![vec![2, 2, 2], vec![3, 3, 3], vec![4, 4, 4]]);
        assert_eq!(best.values().nth(1).unwrap().role, SourceRole::Fallback);
    }

    #[test]
    fn test_stale_fallback_cannot_shadow_fresh_primary() {
        let existing = vec![rec(5, Session::Evening, [1, 2, 3], None)];
        let incoming = vec![
            primary(rec(3, Session::Midday, [4, 5, 6], None)),
            fallback(rec(3, Session::Midday, [4, 5, 6], Some(7))),
            fallback(rec(3, Session::Midday, [4, 5, 6], Some(7))),
        ];
        let out = MergeEngine::new().merge(&existing, &incoming);
        assert_eq!(out.counts.added, 1);
        assert_eq!(out.counts.dropped_stale, 1);
        assert_eq!(out.new_records, vec![rec(3, Session::Midday, [4, 5, 6], None)]);
        assert_eq!(out.records.len(), 2);
        assert!(!out.append_only);
    }

    #[test]
    fn test_fresh_fallback_still_beats_primary_on_completeness() {
        let existing = vec![rec(5, Session::Evening, [1, 2, 3], None)];
        let incoming = vec![
            primary(rec(6, Session::Midday, [4, 5, 6], None)),
            fallback(rec(6, Session::Midday, [4, 5, 6], Some(7))),
        ];
        let out = MergeEngine::new().merge(&existing, &incoming);
        assert_eq!(out.counts.dropped_stale, 0);
        assert_eq!(out.new_records[0].bonus, Some(7));
        assert!(out.append_only);
    }
}
