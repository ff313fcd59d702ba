//! CSV export of the stored collection: raw rows, analytics rows and a
//! per-category summary.

use anyhow::{Context, Result};
use bangumi_sync_models::{CollectionRecord, Scope};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use crate::file_store::JsonFileStore;
use crate::flatten::LIST_SEPARATOR;
use crate::store::ScopeDocument;

pub const RAW_FILE: &str = "raw_collections.csv";
pub const ANALYTICS_FILE: &str = "analytics_collections.csv";
pub const SUMMARY_FILE: &str = "category_summary.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub dir: PathBuf,
    pub rows: usize,
    pub scopes: usize,
}

#[derive(Serialize)]
struct RawRow<'a> {
    user_id: &'a str,
    subject_id: u64,
    subject_type: u8,
    collection_type: u8,
    created_at: Option<NaiveDateTime>,
    updated_at: Option<NaiveDateTime>,
    ep_status: u32,
    vol_status: u32,
    rate: u8,
    comment: Option<&'a str>,
    user_tags: String,
    private: bool,
    name: &'a str,
    name_cn: Option<&'a str>,
    score: Option<f64>,
    rank: Option<u32>,
    collection_total: Option<u32>,
    eps: Option<u32>,
    volumes: Option<u32>,
    date: Option<NaiveDate>,
    short_summary: &'a str,
    tags: String,
    infobox: String,
}

impl<'a> RawRow<'a> {
    fn new(record: &'a CollectionRecord) -> Result<Self> {
        let subject = &record.subject;
        Ok(Self {
            user_id: &record.identity.user_id,
            subject_id: record.identity.subject_id,
            subject_type: record.identity.subject_type.code(),
            collection_type: record.identity.collection_type.code(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            ep_status: record.ep_status,
            vol_status: record.vol_status,
            rate: record.rate,
            comment: record.comment.as_deref(),
            user_tags: record.user_tags.join(LIST_SEPARATOR),
            private: record.private,
            name: &subject.name,
            name_cn: subject.name_cn.as_deref(),
            score: subject.score,
            rank: subject.rank,
            collection_total: subject.collection_total,
            eps: subject.eps,
            volumes: subject.volumes,
            date: subject.date,
            short_summary: &subject.short_summary,
            tags: serde_json::to_string(&subject.tags)?,
            infobox: serde_json::to_string(&subject.infobox)?,
        })
    }
}

#[derive(Serialize)]
struct AnalyticsRow<'a> {
    user_id: &'a str,
    subject_id: u64,
    subject_type: &'static str,
    collection_type: &'static str,
    display_name: &'a str,
    score: Option<f64>,
    rank: Option<u32>,
    collection_total: Option<u32>,
    eps: Option<u32>,
    air_date: Option<NaiveDate>,
    created_at: Option<NaiveDateTime>,
    updated_at: Option<NaiveDateTime>,
    director: Option<&'a str>,
    studio: Option<&'a str>,
    country: Option<&'a str>,
    publisher: Option<&'a str>,
    author: Option<&'a str>,
    tag_1: Option<&'a str>,
    tag_1_count: Option<u32>,
    tag_2: Option<&'a str>,
    tag_2_count: Option<u32>,
    tag_3: Option<&'a str>,
    tag_3_count: Option<u32>,
    tag_4: Option<&'a str>,
    tag_4_count: Option<u32>,
    tag_5: Option<&'a str>,
    tag_5_count: Option<u32>,
    all_tags: Option<&'a str>,
}

#[derive(Serialize)]
struct SummaryRow {
    subject_type: &'static str,
    collection_type: &'static str,
    reported_total: Option<u32>,
    stored: usize,
    cursor_offset: Option<u32>,
    complete: bool,
    completion_percent: Option<String>,
}

impl SummaryRow {
    fn new(scope: Scope, doc: &ScopeDocument) -> Self {
        let offset = doc.cursor.as_ref().map(|c| c.offset);
        let completion_percent = match (doc.total, offset) {
            (Some(0), _) => Some("100.0".to_string()),
            (Some(total), Some(offset)) => Some(format!("{:.1}", offset.min(total) as f64 / total as f64 * 100.0)),
            _ => None,
        };
        Self {
            subject_type: scope.subject_type.native_label(),
            collection_type: scope.collection_type.native_label(),
            reported_total: doc.total,
            stored: doc.rows.len(),
            cursor_offset: offset,
            complete: doc.cursor.as_ref().is_some_and(|c| c.complete),
            completion_percent,
        }
    }
}

/// Write the three CSV files into `dir`, replacing any previous export
pub async fn export_csv(store: &JsonFileStore, dir: &Path) -> Result<ExportReport> {
    let documents = store.load_all().await?;
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create export directory {:?}", dir))?;

    let mut raw = csv::Writer::from_path(dir.join(RAW_FILE))?;
    let mut analytics = csv::Writer::from_path(dir.join(ANALYTICS_FILE))?;
    let mut summary = csv::Writer::from_path(dir.join(SUMMARY_FILE))?;
    let mut rows = 0;

    for (scope, doc) in &documents {
        for row in doc.rows.values() {
            raw.serialize(RawRow::new(&row.raw)?)?;
            let a = &row.analytics;
            let tag = |i: usize| a.top_tags[i].as_ref();
            analytics.serialize(AnalyticsRow {
                user_id: &a.identity.user_id,
                subject_id: a.identity.subject_id,
                subject_type: a.identity.subject_type.native_label(),
                collection_type: a.identity.collection_type.native_label(),
                display_name: &a.display_name,
                score: a.score,
                rank: a.rank,
                collection_total: a.collection_total,
                eps: a.eps,
                air_date: a.air_date,
                created_at: a.created_at,
                updated_at: a.updated_at,
                director: a.director.as_deref(),
                studio: a.studio.as_deref(),
                country: a.country.as_deref(),
                publisher: a.publisher.as_deref(),
                author: a.author.as_deref(),
                tag_1: tag(0).map(|t| t.name.as_str()),
                tag_1_count: tag(0).map(|t| t.count),
                tag_2: tag(1).map(|t| t.name.as_str()),
                tag_2_count: tag(1).map(|t| t.count),
                tag_3: tag(2).map(|t| t.name.as_str()),
                tag_3_count: tag(2).map(|t| t.count),
                tag_4: tag(3).map(|t| t.name.as_str()),
                tag_4_count: tag(3).map(|t| t.count),
                tag_5: tag(4).map(|t| t.name.as_str()),
                tag_5_count: tag(4).map(|t| t.count),
                all_tags: a.all_tags.as_deref(),
            })?;
            rows += 1;
        }
        summary.serialize(SummaryRow::new(*scope, doc))?;
    }

    raw.flush()?;
    analytics.flush()?;
    summary.flush()?;

    info!(operation = "export", dir = %dir.display(), rows, scopes = documents.len(), "Exported collections to CSV");
    Ok(ExportReport {
        dir: dir.to_path_buf(),
        rows,
        scopes: documents.len(),
    })
}
