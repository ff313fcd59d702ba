use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::cursor::Scope;
use crate::subject::{CollectionType, SubjectSnapshot, SubjectType};

/// Stable identity of a collection entry across sync cycles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordIdentity {
    pub user_id: String,
    pub subject_id: u64,
    pub subject_type: SubjectType,
    pub collection_type: CollectionType,
}

impl RecordIdentity {
    pub fn scope(&self) -> Scope {
        Scope::new(self.subject_type, self.collection_type)
    }

    /// String form used as a map key by storage backends
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.user_id,
            self.subject_id,
            self.subject_type.code(),
            self.collection_type.code()
        )
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A collection entry as fetched, after type coercion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionRecord {
    pub identity: RecordIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDateTime>,
    pub ep_status: u32,
    pub vol_status: u32,
    /// The user's own rating (0 = unrated)
    pub rate: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub user_tags: Vec<String>,
    #[serde(default)]
    pub private: bool,
    pub subject: SubjectSnapshot,
}

impl CollectionRecord {
    pub fn scope(&self) -> Scope {
        self.identity.scope()
    }
}
