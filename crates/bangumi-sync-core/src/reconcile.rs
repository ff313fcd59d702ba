use bangumi_sync_models::{
    AnalyticsRecord, ChangeSet, CollectionRecord, ContentHash, RecordIdentity, StagedRecord, SubjectSnapshot,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Content hash of every stored record in a scope, keyed by identity
pub type ExistingIndex = HashMap<RecordIdentity, ContentHash>;

/// Bumped whenever the hashed field set changes, so old digests stop matching
const HASH_VERSION: &[u8] = b"collection-record/v1\n";

/// Every content field except `updated_at`
#[derive(Serialize)]
struct HashedFields<'a> {
    identity: &'a RecordIdentity,
    created_at: &'a Option<NaiveDateTime>,
    ep_status: u32,
    vol_status: u32,
    rate: u8,
    comment: &'a Option<String>,
    user_tags: &'a [String],
    private: bool,
    subject: &'a SubjectSnapshot,
}

/// Deterministic digest of a record. Two records that differ only in
/// `updated_at` hash equal.
pub fn content_hash(record: &CollectionRecord) -> ContentHash {
    let fields = HashedFields {
        identity: &record.identity,
        created_at: &record.created_at,
        ep_status: record.ep_status,
        vol_status: record.vol_status,
        rate: record.rate,
        comment: &record.comment,
        user_tags: &record.user_tags,
        private: record.private,
        subject: &record.subject,
    };

    let mut hasher = blake3::Hasher::new();
    hasher.update(HASH_VERSION);
    let encoded = serde_json::to_writer(&mut hasher, &fields);
    // serde_json only fails on non-string map keys, which these types never contain
    debug_assert!(encoded.is_ok(), "hashed fields failed to serialize");
    ContentHash(hasher.finalize().to_hex().to_string())
}

/// Partition an incoming batch against the stored hashes.
///
/// Repeated identities collapse into their first occurrence. Records present in
/// `existing` but absent from the batch are left alone.
pub fn reconcile<I>(incoming: I, existing: &ExistingIndex) -> ChangeSet
where
    I: IntoIterator<Item = (CollectionRecord, AnalyticsRecord)>,
{
    let mut changes = ChangeSet::default();
    let mut seen = HashSet::new();

    for (raw, analytics) in incoming {
        if !seen.insert(raw.identity.clone()) {
            changes.duplicates += 1;
            continue;
        }
        let hash = content_hash(&raw);
        match existing.get(&raw.identity) {
            Some(stored) if *stored == hash => changes.skipped.push(raw.identity),
            Some(_) => changes.updates.push(StagedRecord { raw, analytics, content_hash: hash }),
            None => changes.inserts.push(StagedRecord { raw, analytics, content_hash: hash }),
        }
    }
    changes
}

/// Fold a committed change set into the in-memory index
pub fn apply_to_index(index: &mut ExistingIndex, changes: &ChangeSet) {
    for staged in changes.writes() {
        index.insert(staged.identity().clone(), staged.content_hash.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;
    use bangumi_sync_models::{CollectionType, SubjectType};
    use chrono::NaiveDate;

    fn record(subject_id: u64, score: f64) -> CollectionRecord {
        CollectionRecord {
            identity: RecordIdentity {
                user_id: "sai".into(),
                subject_id,
                subject_type: SubjectType::Book,
                collection_type: CollectionType::Wish,
            },
            created_at: None,
            updated_at: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0),
            ep_status: 0,
            vol_status: 2,
            rate: 0,
            comment: None,
            user_tags: Vec::new(),
            private: false,
            subject: SubjectSnapshot {
                name: format!("book {}", subject_id),
                name_cn: None,
                score: Some(score),
                rank: None,
                collection_total: None,
                eps: None,
                volumes: Some(3),
                date: None,
                short_summary: String::new(),
                tags: Vec::new(),
                infobox: Vec::new(),
            },
        }
    }

    fn staged(record: CollectionRecord) -> (CollectionRecord, AnalyticsRecord) {
        let analytics = flatten(&record);
        (record, analytics)
    }

    #[test]
    fn test_hash_ignores_updated_at() {
        let a = record(1, 7.0);
        let mut b = a.clone();
        b.updated_at = None;
        assert_eq!(content_hash(&a), content_hash(&b));

        b.subject.score = Some(7.1);
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_hash_is_hex_blake3() {
        let hash = content_hash(&record(1, 7.0));
        assert_eq!(hash.0.len(), 64);
        assert!(hash.0.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_partitions_into_insert_update_skip() {
        let mut existing = ExistingIndex::new();
        let unchanged = record(1, 7.0);
        existing.insert(unchanged.identity.clone(), content_hash(&unchanged));
        let changed_before = record(2, 6.0);
        existing.insert(changed_before.identity.clone(), content_hash(&changed_before));
        // stored but absent from the batch; never deleted
        existing.insert(record(9, 1.0).identity.clone(), content_hash(&record(9, 1.0)));

        let batch = vec![staged(unchanged.clone()), staged(record(2, 6.5)), staged(record(3, 5.0))];
        let changes = reconcile(batch, &existing);

        assert_eq!(changes.skipped, vec![unchanged.identity]);
        assert_eq!(changes.updates.len(), 1);
        assert_eq!(changes.updates[0].identity().subject_id, 2);
        assert_eq!(changes.inserts.len(), 1);
        assert_eq!(changes.inserts[0].identity().subject_id, 3);
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_duplicates_collapse_to_first_occurrence() {
        let batch = vec![staged(record(4, 1.0)), staged(record(4, 9.0)), staged(record(5, 2.0))];
        let changes = reconcile(batch, &ExistingIndex::new());
        assert_eq!(changes.inserts.len(), 2);
        assert_eq!(changes.duplicates, 1);
        assert_eq!(changes.inserts[0].raw.subject.score, Some(1.0));
    }

    #[test]
    fn test_second_pass_over_applied_index_is_all_skips() {
        let batch = || vec![staged(record(1, 1.0)), staged(record(2, 2.0))];
        let mut index = ExistingIndex::new();
        let first = reconcile(batch(), &index);
        apply_to_index(&mut index, &first);

        let second = reconcile(batch(), &index);
        assert!(!second.has_writes());
        assert_eq!(second.skipped.len(), 2);
    }

    #[test]
    fn test_empty_batch() {
        let changes = reconcile(Vec::new(), &ExistingIndex::new());
        assert!(changes.is_empty());
        assert_eq!(changes.duplicates, 0);
    }
}
