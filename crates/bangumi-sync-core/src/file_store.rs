use async_trait::async_trait;
use bangumi_sync_models::{ChangeSet, CollectionType, Scope, SubjectType, SyncCursor};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use crate::reconcile::ExistingIndex;
use crate::store::{CollectionStore, PageCommit, ScopeDocument, StorageError};

/// One pretty-printed JSON document per scope under `dir`.
///
/// Every commit rewrites the scope's document through a temp file and a
/// rename, so a crash leaves either the previous or the new version on disk.
pub struct JsonFileStore {
    dir: PathBuf,
    // serializes read-modify-write cycles across workers
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, write_lock: Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, scope: Scope) -> PathBuf {
        self.dir.join(format!("{}.json", scope.key()))
    }

    /// Read a scope's document. Missing files yield an empty document; an
    /// unreadable one is moved aside to `.json.bak` and treated as empty.
    pub async fn load_document(&self, scope: Scope) -> Result<ScopeDocument, StorageError> {
        let path = self.document_path(scope);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(scope = %scope, "No stored document, starting empty");
                return Ok(ScopeDocument::default());
            }
            Err(source) => return Err(StorageError::Io { scope, source }),
        };

        match serde_json::from_str::<ScopeDocument>(&content) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                let backup_path = path.with_extension("json.bak");
                if let Err(backup_err) = tokio::fs::rename(&path, &backup_path).await {
                    warn!(
                        scope = %scope,
                        "Stored document is unreadable ({}) and could not be moved aside: {}",
                        e,
                        backup_err
                    );
                    return Err(StorageError::Io { scope, source: backup_err });
                }
                warn!(
                    scope = %scope,
                    backup = %backup_path.display(),
                    "Stored document is unreadable ({}). Backed it up and starting empty.",
                    e
                );
                Ok(ScopeDocument::default())
            }
        }
    }

    /// Documents for every scope that has been written at least once, in scope order
    pub async fn load_all(&self) -> Result<Vec<(Scope, ScopeDocument)>, StorageError> {
        let mut documents = Vec::new();
        for subject_type in SubjectType::ALL {
            for collection_type in CollectionType::ALL {
                let scope = Scope::new(subject_type, collection_type);
                if tokio::fs::try_exists(self.document_path(scope)).await.unwrap_or(false) {
                    documents.push((scope, self.load_document(scope).await?));
                }
            }
        }
        Ok(documents)
    }

    async fn write_document(&self, scope: Scope, doc: &ScopeDocument) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec_pretty(doc).map_err(|source| StorageError::Encode { scope, source })?;
        let path = self.document_path(scope);
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, encoded)
            .await
            .map_err(|source| StorageError::Io { scope, source })?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|source| StorageError::Io { scope, source })?;
        Ok(())
    }

    /// Delete every stored document; returns how many were removed
    pub async fn clear(&self) -> Result<usize, std::io::Error> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        info!(dir = %self.dir.display(), removed, "Cleared stored collections");
        Ok(removed)
    }

    /// Reset every cursor so the next run starts each scope from offset 0, keeping rows
    pub async fn reset_cursors(&self) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut reset = 0;
        for (scope, mut doc) in self.load_all().await? {
            if doc.cursor.take().is_some() {
                self.write_document(scope, &doc).await?;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[async_trait]
impl CollectionStore for JsonFileStore {
    async fn load_existing_index(&self, scope: Scope) -> Result<ExistingIndex, StorageError> {
        Ok(self.load_document(scope).await?.existing_index())
    }

    async fn load_cursor(&self, scope: Scope) -> Result<Option<SyncCursor>, StorageError> {
        Ok(self.load_document(scope).await?.cursor)
    }

    async fn apply_changeset(&self, scope: Scope, changes: &ChangeSet, commit: &PageCommit) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load_document(scope).await?;
        doc.apply(changes, commit);
        self.write_document(scope, &doc).await?;
        debug!(
            scope = %scope,
            inserted = changes.inserts.len(),
            updated = changes.updates.len(),
            offset = commit.cursor.offset,
            "Committed page"
        );
        Ok(())
    }
}
