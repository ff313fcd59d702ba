use serde::{Deserialize, Serialize};
use std::fmt;
use crate::analytics::AnalyticsRecord;
use crate::collection::{CollectionRecord, RecordIdentity};

/// Hex digest of a record's content, excluding `updated_at`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record ready to be written to both sinks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagedRecord {
    pub raw: CollectionRecord,
    pub analytics: AnalyticsRecord,
    pub content_hash: ContentHash,
}

impl StagedRecord {
    pub fn identity(&self) -> &RecordIdentity {
        &self.raw.identity
    }
}

/// Partition of one incoming batch against stored state.
///
/// Identities are disjoint across `inserts`, `updates` and `skipped`.
/// Nothing is ever scheduled for deletion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    pub inserts: Vec<StagedRecord>,
    pub updates: Vec<StagedRecord>,
    pub skipped: Vec<RecordIdentity>,
    /// Repeated identities within the batch that were collapsed into their first occurrence
    pub duplicates: usize,
}

impl ChangeSet {
    pub fn has_writes(&self) -> bool {
        !self.inserts.is_empty() || !self.updates.is_empty()
    }

    /// Number of distinct identities in the batch
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserted and updated records, in that order
    pub fn writes(&self) -> impl Iterator<Item = &StagedRecord> {
        self.inserts.iter().chain(self.updates.iter())
    }
}
