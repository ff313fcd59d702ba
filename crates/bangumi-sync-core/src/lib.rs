pub mod export;
pub mod file_store;
pub mod flatten;
pub mod normalize;
pub mod publish;
pub mod reconcile;
pub mod store;
pub mod summary;
pub mod sync;

pub use export::{export_csv, ExportReport};
pub use file_store::JsonFileStore;
pub use flatten::flatten;
pub use normalize::{Normalized, Normalizer, ValidationError, ValidationWarning};
pub use publish::{AnalyticsPublisher, JsonlOutbox, PublishError};
pub use reconcile::{apply_to_index, content_hash, reconcile, ExistingIndex};
pub use store::{CollectionStore, MemoryStore, PageCommit, ScopeDocument, StorageError, StoredRow};
pub use summary::{PairStatus, PairSummary, RunOutcome, RunSummary};
pub use sync::{SyncOptions, SyncOrchestrator};
