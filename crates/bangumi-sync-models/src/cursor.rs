use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::subject::{CollectionType, SubjectType};

/// One (category, status) stream of the user's collection.
///
/// Ordering is by subject type, then collection type, which is the order the
/// orchestrator walks pairs in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
    pub subject_type: SubjectType,
    pub collection_type: CollectionType,
}

impl Scope {
    pub fn new(subject_type: SubjectType, collection_type: CollectionType) -> Self {
        Self { subject_type, collection_type }
    }

    /// File-name friendly key, e.g. `2-3`
    pub fn key(&self) -> String {
        format!("{}-{}", self.subject_type.code(), self.collection_type.code())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject_type, self.collection_type)
    }
}

/// Persisted pagination progress for one scope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCursor {
    pub scope: Scope,
    /// Offset of the next page to fetch
    pub offset: u32,
    /// True once the stream was read to its end; the next cycle starts over at 0
    pub complete: bool,
    pub last_synced_at: DateTime<Utc>,
}

impl SyncCursor {
    pub fn start(scope: Scope, now: DateTime<Utc>) -> Self {
        Self { scope, offset: 0, complete: false, last_synced_at: now }
    }

    /// Offset a new cycle should begin at. Only an unfinished previous cycle is resumed.
    pub fn resume_offset(&self, full_resync: bool) -> u32 {
        if full_resync || self.complete {
            0
        } else {
            self.offset
        }
    }

    /// Cursor after a page was persisted. `last_synced_at` never moves backwards.
    pub fn advanced(&self, next_offset: u32, complete: bool, now: DateTime<Utc>) -> Self {
        Self {
            scope: self.scope,
            offset: next_offset,
            complete,
            last_synced_at: self.last_synced_at.max(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scope() -> Scope {
        Scope::new(SubjectType::Anime, CollectionType::Done)
    }

    #[test]
    fn test_resume_offset() {
        let now = Utc::now();
        let cursor = SyncCursor::start(scope(), now).advanced(200, false, now);
        assert_eq!(cursor.resume_offset(false), 200);
        assert_eq!(cursor.resume_offset(true), 0);
        let done = cursor.advanced(250, true, now);
        assert_eq!(done.resume_offset(false), 0);
    }

    #[test]
    fn test_last_synced_at_is_monotonic() {
        let now = Utc::now();
        let cursor = SyncCursor::start(scope(), now);
        let earlier = now - Duration::hours(1);
        assert_eq!(cursor.advanced(100, false, earlier).last_synced_at, now);
        let later = now + Duration::seconds(5);
        assert_eq!(cursor.advanced(100, false, later).last_synced_at, later);
    }

    #[test]
    fn test_scope_ordering() {
        let mut scopes = vec![
            Scope::new(SubjectType::Music, CollectionType::Wish),
            Scope::new(SubjectType::Book, CollectionType::Dropped),
            Scope::new(SubjectType::Book, CollectionType::Wish),
        ];
        scopes.sort();
        assert_eq!(scopes[0], Scope::new(SubjectType::Book, CollectionType::Wish));
        assert_eq!(scopes[1], Scope::new(SubjectType::Book, CollectionType::Dropped));
        assert_eq!(scopes[2].key(), "3-1");
    }
}
