//! Turns raw collection JSON into typed [`CollectionRecord`]s.
//!
//! The API is loose about types: numbers sometimes arrive as strings, counters
//! can be missing, and timestamps carry offsets. Normalization coerces what it
//! can, clamps out-of-range values and records a [`ValidationWarning`] for
//! every adjustment. Only a missing identity or subject is fatal for a record.

use bangumi_sync_models::{
    CollectionRecord, CollectionType, InfoboxEntry, InfoboxListItem, InfoboxValue, RecordIdentity, SubjectSnapshot,
    SubjectType, TagEntry,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use thiserror::Error;

/// Longest short summary kept on a snapshot, in characters
pub const SHORT_SUMMARY_CHARS: usize = 500;

pub const MAX_SCORE: f64 = 10.0;
pub const MAX_RATE: i64 = 10;

/// A record that cannot be normalized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}` {problem}")]
pub struct ValidationError {
    pub field: &'static str,
    pub problem: String,
}

impl ValidationError {
    fn missing(field: &'static str) -> Self {
        Self { field, problem: "is missing".to_string() }
    }

    fn invalid(field: &'static str, value: &Value) -> Self {
        Self { field, problem: format!("has invalid value {}", value) }
    }
}

/// A coercion or clamp applied while normalizing an accepted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: CollectionRecord,
    pub warnings: Vec<ValidationWarning>,
}

/// Normalizes records for one user
#[derive(Debug, Clone)]
pub struct Normalizer {
    user_id: String,
}

impl Normalizer {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn normalize(&self, raw: &Value) -> Result<Normalized, ValidationError> {
        let item = raw.as_object().ok_or_else(|| ValidationError::invalid("record", raw))?;
        let mut warnings = Warnings::default();

        let identity = self.identity(item)?;
        let subject_value = item.get("subject").ok_or_else(|| ValidationError::missing("subject"))?;
        let subject_map = subject_value
            .as_object()
            .ok_or_else(|| ValidationError::invalid("subject", subject_value))?;
        let subject = normalize_subject(subject_map, &mut warnings);

        let created_at = timestamp(item.get("created_at"), "created_at", &mut warnings);
        let updated_at = timestamp(item.get("updated_at"), "updated_at", &mut warnings);
        let ep_status = counter(item.get("ep_status"), "ep_status", &mut warnings).unwrap_or(0);
        let vol_status = counter(item.get("vol_status"), "vol_status", &mut warnings).unwrap_or(0);
        let rate = user_rate(item.get("rate"), &mut warnings);
        let comment = text(item.get("comment")).filter(|c| !c.trim().is_empty());
        let user_tags = item
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| text(Some(t)))
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let private = item.get("private").and_then(Value::as_bool).unwrap_or(false);

        Ok(Normalized {
            record: CollectionRecord {
                identity,
                created_at,
                updated_at,
                ep_status,
                vol_status,
                rate,
                comment,
                user_tags,
                private,
                subject,
            },
            warnings: warnings.0,
        })
    }

    fn identity(&self, item: &Map<String, Value>) -> Result<RecordIdentity, ValidationError> {
        let subject_id_value = present(item, "subject_id").ok_or_else(|| ValidationError::missing("subject_id"))?;
        let subject_id = integer(subject_id_value)
            .filter(|id| *id > 0)
            .ok_or_else(|| ValidationError::invalid("subject_id", subject_id_value))? as u64;
        // a nested id, when present, must name the same subject
        if let Some(nested) = item.get("subject").and_then(|s| s.get("id")).filter(|v| !v.is_null()) {
            if integer(nested) != Some(subject_id as i64) {
                return Err(ValidationError {
                    field: "subject_id",
                    problem: format!("{} disagrees with subject.id {}", subject_id, nested),
                });
            }
        }

        let subject_type_value = present(item, "subject_type")
            .or_else(|| item.get("subject").and_then(|s| s.get("type")).filter(|v| !v.is_null()))
            .ok_or_else(|| ValidationError::missing("subject_type"))?;
        let subject_type = integer(subject_type_value)
            .and_then(|code| SubjectType::from_code(code).ok())
            .ok_or_else(|| ValidationError::invalid("subject_type", subject_type_value))?;

        let collection_type_value = present(item, "type").ok_or_else(|| ValidationError::missing("type"))?;
        let collection_type = integer(collection_type_value)
            .and_then(|code| CollectionType::from_code(code).ok())
            .ok_or_else(|| ValidationError::invalid("type", collection_type_value))?;

        Ok(RecordIdentity {
            user_id: self.user_id.clone(),
            subject_id,
            subject_type,
            collection_type,
        })
    }
}

#[derive(Default)]
struct Warnings(Vec<ValidationWarning>);

impl Warnings {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(ValidationWarning { field, message: message.into() });
    }
}

fn normalize_subject(subject: &Map<String, Value>, warnings: &mut Warnings) -> SubjectSnapshot {
    let name = text(subject.get("name")).unwrap_or_else(|| {
        warnings.push("subject.name", "missing, stored as empty");
        String::new()
    });
    let name_cn = text(subject.get("name_cn")).filter(|n| !n.trim().is_empty());

    let score = match subject.get("score").filter(|v| !v.is_null()) {
        None => None,
        Some(value) => match float(value) {
            Some(s) if s.is_finite() => {
                let clamped = s.clamp(0.0, MAX_SCORE);
                if clamped != s {
                    warnings.push("subject.score", format!("{} clamped to {}", s, clamped));
                }
                Some(clamped)
            }
            _ => {
                warnings.push("subject.score", format!("unparseable value {}", value));
                None
            }
        },
    };

    let rank = counter(subject.get("rank"), "subject.rank", warnings);
    let collection_total = counter(subject.get("collection_total"), "subject.collection_total", warnings);
    let eps = counter(subject.get("eps"), "subject.eps", warnings);
    let volumes = counter(subject.get("volumes"), "subject.volumes", warnings);

    let date = match text(subject.get("date")).map(|d| d.trim().to_string()) {
        None => None,
        Some(d) if d.is_empty() => None,
        Some(d) => match NaiveDate::parse_from_str(&d, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                warnings.push("subject.date", format!("unparseable date {:?}", d));
                None
            }
        },
    };

    let summary = text(subject.get("short_summary"))
        .or_else(|| text(subject.get("summary")))
        .unwrap_or_default();
    let short_summary = summary.chars().take(SHORT_SUMMARY_CHARS).collect();

    SubjectSnapshot {
        name,
        name_cn,
        score,
        rank,
        collection_total,
        eps,
        volumes,
        date,
        short_summary,
        tags: tags(subject.get("tags"), warnings),
        infobox: infobox(subject.get("infobox"), warnings),
    }
}

fn tags(value: Option<&Value>, warnings: &mut Warnings) -> Vec<TagEntry> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut tags = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.get("name").and_then(|n| text(Some(n))).map(|n| n.trim().to_string());
        match name {
            Some(name) if !name.is_empty() => {
                let count = counter(entry.get("count"), "subject.tags.count", warnings).unwrap_or(0);
                tags.push(TagEntry { name, count });
            }
            _ => warnings.push("subject.tags", format!("dropped tag without a name: {}", entry)),
        }
    }
    tags
}

fn infobox(value: Option<&Value>, warnings: &mut Warnings) -> Vec<InfoboxEntry> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut infobox = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = entry.get("key").and_then(|k| text(Some(k))).map(|k| k.trim().to_string());
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            warnings.push("subject.infobox", format!("dropped entry without a key: {}", entry));
            continue;
        };
        match entry.get("value").and_then(infobox_value) {
            Some(value) => infobox.push(InfoboxEntry { key, value }),
            None => warnings.push("subject.infobox", format!("dropped entry {:?} with an unusable value", key)),
        }
    }
    infobox
}

fn infobox_value(value: &Value) -> Option<InfoboxValue> {
    match value {
        Value::Array(items) => {
            let items = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(map) => text(map.get("v")).map(|v| InfoboxListItem {
                        k: text(map.get("k")),
                        v,
                    }),
                    other => text(Some(other)).map(|v| InfoboxListItem { k: None, v }),
                })
                .collect();
            Some(InfoboxValue::List(items))
        }
        Value::Object(map) => text(map.get("v")).map(InfoboxValue::Scalar),
        other => text(Some(other)).map(InfoboxValue::Scalar),
    }
}

fn present<'a>(item: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    item.get(key).filter(|v| !v.is_null())
}

/// Strings as-is, numbers and booleans in their JSON spelling
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite() && f.fract() == 0.0).map(|f| f as i64))
        }
        _ => None,
    }
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Non-negative count; negatives clamp to zero, nulls stay absent
fn counter(value: Option<&Value>, field: &'static str, warnings: &mut Warnings) -> Option<u32> {
    let value = value.filter(|v| !v.is_null())?;
    match integer(value) {
        Some(n) if n < 0 => {
            warnings.push(field, format!("{} clamped to 0", n));
            Some(0)
        }
        Some(n) if n > u32::MAX as i64 => {
            warnings.push(field, format!("{} clamped to {}", n, u32::MAX));
            Some(u32::MAX)
        }
        Some(n) => Some(n as u32),
        None => {
            warnings.push(field, format!("unparseable value {}", value));
            None
        }
    }
}

fn user_rate(value: Option<&Value>, warnings: &mut Warnings) -> u8 {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return 0;
    };
    match integer(value) {
        Some(n) => {
            let clamped = n.clamp(0, MAX_RATE);
            if clamped != n {
                warnings.push("rate", format!("{} clamped to {}", n, clamped));
            }
            clamped as u8
        }
        None => {
            warnings.push("rate", format!("unparseable value {}", value));
            0
        }
    }
}

/// Offset-qualified timestamps are converted to UTC and stored without zone
fn timestamp(value: Option<&Value>, field: &'static str, warnings: &mut Warnings) -> Option<NaiveDateTime> {
    let raw = value.and_then(Value::as_str)?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"));
    match parsed {
        Ok(ts) => Some(ts),
        Err(_) => {
            warnings.push(field, format!("unparseable timestamp {:?}", raw));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "subject_id": 253,
            "subject_type": 2,
            "type": 2,
            "rate": 9,
            "ep_status": 26,
            "vol_status": 0,
            "comment": "classic",
            "tags": ["sf", " noir "],
            "private": false,
            "updated_at": "2024-03-01T12:30:00+08:00",
            "subject": {
                "id": 253,
                "name": "カウボーイビバップ",
                "name_cn": "星际牛仔",
                "score": 9.1,
                "rank": 7,
                "collection_total": 40000,
                "eps": 26,
                "date": "1998-10-23",
                "short_summary": "Space bounty hunters.",
                "tags": [{"name": "SF", "count": 900}, {"name": "", "count": 3}],
                "infobox": [
                    {"key": "导演", "value": "渡辺信一郎"},
                    {"key": "别名", "value": [{"v": "Cowboy Bebop"}, {"k": "jp", "v": "ビバップ"}]}
                ]
            }
        })
    }

    fn normalizer() -> Normalizer {
        Normalizer::new("sai")
    }

    #[test]
    fn test_normalize_complete_record() {
        let normalized = normalizer().normalize(&sample()).unwrap();
        let record = normalized.record;
        assert_eq!(record.identity.subject_id, 253);
        assert_eq!(record.identity.subject_type, SubjectType::Anime);
        assert_eq!(record.identity.collection_type, CollectionType::Done);
        assert_eq!(record.identity.user_id, "sai");
        assert_eq!(record.rate, 9);
        assert_eq!(record.user_tags, vec!["sf", "noir"]);
        assert_eq!(record.subject.score, Some(9.1));
        assert_eq!(record.subject.date, NaiveDate::from_ymd_opt(1998, 10, 23));
        assert_eq!(record.subject.infobox.len(), 2);
        // the nameless tag is dropped with a warning
        assert_eq!(record.subject.tags, vec![TagEntry { name: "SF".into(), count: 900 }]);
        assert_eq!(normalized.warnings.len(), 1);
        assert_eq!(normalized.warnings[0].field, "subject.tags");
    }

    #[test]
    fn test_timestamp_offset_is_converted_to_utc() {
        let record = normalizer().normalize(&sample()).unwrap().record;
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(4, 30, 0).unwrap();
        assert_eq!(record.updated_at, Some(expected));
        assert_eq!(record.created_at, None);
    }

    #[test]
    fn test_naive_and_garbage_timestamps() {
        let mut raw = sample();
        raw["created_at"] = json!("2023-01-02T03:04:05");
        raw["updated_at"] = json!("yesterday");
        let normalized = normalizer().normalize(&raw).unwrap();
        assert_eq!(
            normalized.record.created_at,
            NaiveDate::from_ymd_opt(2023, 1, 2).unwrap().and_hms_opt(3, 4, 5)
        );
        assert_eq!(normalized.record.updated_at, None);
        assert!(normalized.warnings.iter().any(|w| w.field == "updated_at"));
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let mut raw = sample();
        raw["subject_id"] = json!("253");
        raw["type"] = json!("3");
        raw["subject"]["score"] = json!("7.5");
        raw["subject"]["rank"] = json!("120");
        let record = normalizer().normalize(&raw).unwrap().record;
        assert_eq!(record.identity.subject_id, 253);
        assert_eq!(record.identity.collection_type, CollectionType::Doing);
        assert_eq!(record.subject.score, Some(7.5));
        assert_eq!(record.subject.rank, Some(120));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let mut raw = sample();
        raw["rate"] = json!(15);
        raw["ep_status"] = json!(-3);
        raw["subject"]["score"] = json!(11.2);
        raw["subject"]["rank"] = json!(-1);
        let normalized = normalizer().normalize(&raw).unwrap();
        assert_eq!(normalized.record.rate, 10);
        assert_eq!(normalized.record.ep_status, 0);
        assert_eq!(normalized.record.subject.score, Some(10.0));
        assert_eq!(normalized.record.subject.rank, Some(0));
        let fields: Vec<_> = normalized.warnings.iter().map(|w| w.field).collect();
        for field in ["rate", "ep_status", "subject.score", "subject.rank"] {
            assert!(fields.contains(&field), "missing warning for {}", field);
        }
    }

    #[test]
    fn test_missing_subject_id_is_rejected() {
        // the nested subject.id does not stand in for the top-level field
        let mut raw = sample();
        raw.as_object_mut().unwrap().remove("subject_id");
        let err = normalizer().normalize(&raw).unwrap_err();
        assert_eq!(err, ValidationError::missing("subject_id"));
        assert_eq!(err.to_string(), "field `subject_id` is missing");

        let raw = json!({"subject_type": 2, "type": 2, "subject": {"id": 7, "name": "x"}});
        assert_eq!(normalizer().normalize(&raw).unwrap_err(), ValidationError::missing("subject_id"));
    }

    #[test]
    fn test_subject_id_must_match_nested_id() {
        let mut raw = sample();
        raw["subject"]["id"] = json!(254);
        let err = normalizer().normalize(&raw).unwrap_err();
        assert_eq!(err.field, "subject_id");

        let mut raw = sample();
        raw["subject"].as_object_mut().unwrap().remove("id");
        let record = normalizer().normalize(&raw).unwrap().record;
        assert_eq!(record.identity.subject_id, 253);
    }

    #[test]
    fn test_invalid_identity_values_are_rejected() {
        let mut raw = sample();
        raw["type"] = json!(9);
        assert_eq!(normalizer().normalize(&raw).unwrap_err().field, "type");

        let mut raw = sample();
        raw["subject_id"] = json!("abc");
        assert_eq!(normalizer().normalize(&raw).unwrap_err().field, "subject_id");

        let mut raw = sample();
        raw["subject"] = json!("not an object");
        assert_eq!(normalizer().normalize(&raw).unwrap_err().field, "subject");

        assert_eq!(normalizer().normalize(&json!([1, 2])).unwrap_err().field, "record");
    }

    #[test]
    fn test_short_summary_is_truncated_by_chars() {
        let mut raw = sample();
        raw["subject"]["short_summary"] = json!("番".repeat(SHORT_SUMMARY_CHARS + 20));
        let record = normalizer().normalize(&raw).unwrap().record;
        assert_eq!(record.subject.short_summary.chars().count(), SHORT_SUMMARY_CHARS);
    }

    #[test]
    fn test_infobox_shapes() {
        let mut raw = sample();
        raw["subject"]["infobox"] = json!([
            {"key": " 话数 ", "value": 26},
            {"key": "官方网站", "value": {"v": "https://example.org"}},
            {"key": "", "value": "orphan"},
            {"key": "空", "value": null}
        ]);
        let normalized = normalizer().normalize(&raw).unwrap();
        let infobox = &normalized.record.subject.infobox;
        assert_eq!(infobox.len(), 2);
        assert_eq!(infobox[0].key, "话数");
        assert_eq!(infobox[0].value, InfoboxValue::Scalar("26".into()));
        assert_eq!(infobox[1].value, InfoboxValue::Scalar("https://example.org".into()));
        assert_eq!(normalized.warnings.iter().filter(|w| w.field == "subject.infobox").count(), 2);
    }
}
