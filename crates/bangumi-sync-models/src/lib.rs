pub mod analytics;
pub mod changeset;
pub mod collection;
pub mod cursor;
pub mod subject;

pub use analytics::{AnalyticsRecord, TagSlot, TOP_TAG_SLOTS};
pub use changeset::{ChangeSet, ContentHash, StagedRecord};
pub use collection::{CollectionRecord, RecordIdentity};
pub use cursor::{Scope, SyncCursor};
pub use subject::{CollectionType, InfoboxEntry, InfoboxListItem, InfoboxValue, SubjectSnapshot, SubjectType, TagEntry, UnknownTypeCode};
