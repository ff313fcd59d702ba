use async_trait::async_trait;
use bangumi_sync_models::{AnalyticsRecord, ChangeSet, CollectionRecord, ContentHash, Scope, SyncCursor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use thiserror::Error;
use crate::reconcile::ExistingIndex;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for {scope}: {source}")]
    Io {
        scope: Scope,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode stored document for {scope}: {source}")]
    Encode {
        scope: Scope,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage unavailable for {scope}: {reason}")]
    Unavailable { scope: Scope, reason: String },
}

/// Progress persisted in the same write as a page's change set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCommit {
    pub cursor: SyncCursor,
    /// Collection size the API reported for the scope
    pub total: Option<u32>,
}

/// Both sinks for one identity, plus the hash they were written under
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRow {
    pub raw: CollectionRecord,
    pub analytics: AnalyticsRecord,
    pub content_hash: ContentHash,
}

/// Everything stored for one scope
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopeDocument {
    #[serde(default)]
    pub cursor: Option<SyncCursor>,
    #[serde(default)]
    pub total: Option<u32>,
    /// Keyed by [`RecordIdentity::key`](bangumi_sync_models::RecordIdentity::key)
    #[serde(default)]
    pub rows: BTreeMap<String, StoredRow>,
}

impl ScopeDocument {
    pub fn existing_index(&self) -> ExistingIndex {
        self.rows
            .values()
            .map(|row| (row.raw.identity.clone(), row.content_hash.clone()))
            .collect()
    }

    /// Upsert every write and move the cursor. Re-applying the same commit is a no-op.
    pub fn apply(&mut self, changes: &ChangeSet, commit: &PageCommit) {
        for staged in changes.writes() {
            self.rows.insert(
                staged.identity().key(),
                StoredRow {
                    raw: staged.raw.clone(),
                    analytics: staged.analytics.clone(),
                    content_hash: staged.content_hash.clone(),
                },
            );
        }
        self.cursor = Some(commit.cursor.clone());
        if commit.total.is_some() {
            self.total = commit.total;
        }
    }
}

/// Persistence for collection rows and sync cursors.
///
/// `apply_changeset` must be all-or-nothing: either the rows and the cursor
/// are both durable afterwards, or neither is.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn load_existing_index(&self, scope: Scope) -> Result<ExistingIndex, StorageError>;

    async fn load_cursor(&self, scope: Scope) -> Result<Option<SyncCursor>, StorageError>;

    async fn apply_changeset(&self, scope: Scope, changes: &ChangeSet, commit: &PageCommit) -> Result<(), StorageError>;
}

/// Process-local store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<Scope, ScopeDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, scope: Scope) -> ScopeDocument {
        self.documents
            .lock()
            .map(|docs| docs.get(&scope).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.documents
            .lock()
            .map(|docs| docs.values().map(|d| d.rows.len()).sum())
            .unwrap_or(0)
    }

    fn poisoned(scope: Scope) -> StorageError {
        StorageError::Unavailable {
            scope,
            reason: "memory store lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn load_existing_index(&self, scope: Scope) -> Result<ExistingIndex, StorageError> {
        let docs = self.documents.lock().map_err(|_| Self::poisoned(scope))?;
        Ok(docs.get(&scope).map(ScopeDocument::existing_index).unwrap_or_default())
    }

    async fn load_cursor(&self, scope: Scope) -> Result<Option<SyncCursor>, StorageError> {
        let docs = self.documents.lock().map_err(|_| Self::poisoned(scope))?;
        Ok(docs.get(&scope).and_then(|doc| doc.cursor.clone()))
    }

    async fn apply_changeset(&self, scope: Scope, changes: &ChangeSet, commit: &PageCommit) -> Result<(), StorageError> {
        let mut docs = self.documents.lock().map_err(|_| Self::poisoned(scope))?;
        docs.entry(scope).or_default().apply(changes, commit);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::flatten::flatten;
    use crate::reconcile::content_hash;
    use bangumi_sync_models::{CollectionType, RecordIdentity, StagedRecord, SubjectSnapshot, SubjectType};

    pub fn scope() -> Scope {
        Scope::new(SubjectType::Game, CollectionType::Doing)
    }

    pub fn staged(subject_id: u64, name: &str) -> StagedRecord {
        let raw = CollectionRecord {
            identity: RecordIdentity {
                user_id: "sai".into(),
                subject_id,
                subject_type: SubjectType::Game,
                collection_type: CollectionType::Doing,
            },
            created_at: None,
            updated_at: None,
            ep_status: 0,
            vol_status: 0,
            rate: 6,
            comment: None,
            user_tags: Vec::new(),
            private: false,
            subject: SubjectSnapshot {
                name: name.to_string(),
                name_cn: None,
                score: None,
                rank: None,
                collection_total: None,
                eps: None,
                volumes: None,
                date: None,
                short_summary: String::new(),
                tags: Vec::new(),
                infobox: Vec::new(),
            },
        };
        StagedRecord {
            analytics: flatten(&raw),
            content_hash: content_hash(&raw),
            raw,
        }
    }

    pub fn commit(offset: u32, complete: bool) -> PageCommit {
        PageCommit {
            cursor: SyncCursor::start(scope(), chrono::Utc::now()).advanced(offset, complete, chrono::Utc::now()),
            total: Some(offset),
        }
    }
}
