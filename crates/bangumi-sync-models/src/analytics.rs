use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use crate::collection::RecordIdentity;

/// Number of fixed tag columns in the analytics projection
pub const TOP_TAG_SLOTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagSlot {
    pub name: String,
    pub count: u32,
}

/// Flattened, query-friendly projection of a CollectionRecord
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsRecord {
    pub identity: RecordIdentity,
    pub display_name: String,
    pub score: Option<f64>,
    pub rank: Option<u32>,
    pub collection_total: Option<u32>,
    pub eps: Option<u32>,
    pub air_date: Option<NaiveDate>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub director: Option<String>,
    pub studio: Option<String>,
    pub country: Option<String>,
    pub publisher: Option<String>,
    pub author: Option<String>,
    /// Highest-count tags, empty slots are None
    pub top_tags: [Option<TagSlot>; TOP_TAG_SLOTS],
    /// Every tag name in original order, joined with ", "
    pub all_tags: Option<String>,
}
