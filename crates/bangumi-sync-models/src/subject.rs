use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a subject on Bangumi (`subject_type` query parameter)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum SubjectType {
    Book = 1,
    Anime = 2,
    Music = 3,
    Game = 4,
    Real = 6,
}

/// A user's relationship to a subject (`type` query parameter)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum CollectionType {
    Wish = 1,
    Done = 2,
    Doing = 3,
    OnHold = 4,
    Dropped = 5,
}

/// Raised when an API type code has no known mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTypeCode {
    pub kind: &'static str,
    pub code: i64,
}

impl fmt::Display for UnknownTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} code: {}", self.kind, self.code)
    }
}

impl std::error::Error for UnknownTypeCode {}

impl SubjectType {
    pub const ALL: [SubjectType; 5] = [
        SubjectType::Book,
        SubjectType::Anime,
        SubjectType::Music,
        SubjectType::Game,
        SubjectType::Real,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: i64) -> Result<Self, UnknownTypeCode> {
        match code {
            1 => Ok(SubjectType::Book),
            2 => Ok(SubjectType::Anime),
            3 => Ok(SubjectType::Music),
            4 => Ok(SubjectType::Game),
            6 => Ok(SubjectType::Real),
            _ => Err(UnknownTypeCode { kind: "subject_type", code }),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SubjectType::Book => "book",
            SubjectType::Anime => "anime",
            SubjectType::Music => "music",
            SubjectType::Game => "game",
            SubjectType::Real => "real",
        }
    }

    /// Label used by the Bangumi web UI
    pub fn native_label(self) -> &'static str {
        match self {
            SubjectType::Book => "书籍",
            SubjectType::Anime => "动画",
            SubjectType::Music => "音乐",
            SubjectType::Game => "游戏",
            SubjectType::Real => "三次元",
        }
    }
}

impl CollectionType {
    pub const ALL: [CollectionType; 5] = [
        CollectionType::Wish,
        CollectionType::Done,
        CollectionType::Doing,
        CollectionType::OnHold,
        CollectionType::Dropped,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: i64) -> Result<Self, UnknownTypeCode> {
        match code {
            1 => Ok(CollectionType::Wish),
            2 => Ok(CollectionType::Done),
            3 => Ok(CollectionType::Doing),
            4 => Ok(CollectionType::OnHold),
            5 => Ok(CollectionType::Dropped),
            _ => Err(UnknownTypeCode { kind: "collection_type", code }),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CollectionType::Wish => "wish",
            CollectionType::Done => "done",
            CollectionType::Doing => "doing",
            CollectionType::OnHold => "on_hold",
            CollectionType::Dropped => "dropped",
        }
    }

    pub fn native_label(self) -> &'static str {
        match self {
            CollectionType::Wish => "想看",
            CollectionType::Done => "看过",
            CollectionType::Doing => "在看",
            CollectionType::OnHold => "搁置",
            CollectionType::Dropped => "抛弃",
        }
    }
}

impl TryFrom<u8> for SubjectType {
    type Error = UnknownTypeCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code as i64)
    }
}

impl From<SubjectType> for u8 {
    fn from(value: SubjectType) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for CollectionType {
    type Error = UnknownTypeCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code as i64)
    }
}

impl From<CollectionType> for u8 {
    fn from(value: CollectionType) -> Self {
        value.code()
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of a subject's community tag list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagEntry {
    pub name: String,
    pub count: u32,
}

/// Infobox values are either a single string or a list of (optionally keyed) strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum InfoboxValue {
    Scalar(String),
    List(Vec<InfoboxListItem>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfoboxListItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    pub v: String,
}

impl InfoboxValue {
    /// Flatten into display text; list items are joined with `separator`.
    /// Returns None when nothing non-blank remains.
    pub fn joined(&self, separator: &str) -> Option<String> {
        let text = match self {
            InfoboxValue::Scalar(s) => s.trim().to_string(),
            InfoboxValue::List(items) => items
                .iter()
                .map(|item| item.v.trim())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
                .join(separator),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfoboxEntry {
    pub key: String,
    pub value: InfoboxValue,
}

/// Subject metadata as it looked when the collection page was fetched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectSnapshot {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_cn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub short_summary: String,
    #[serde(default)]
    pub tags: Vec<TagEntry>,
    #[serde(default)]
    pub infobox: Vec<InfoboxEntry>,
}

impl SubjectSnapshot {
    /// Localized name when present, otherwise the original name
    pub fn display_name(&self) -> &str {
        match self.name_cn.as_deref().map(str::trim) {
            Some(cn) if !cn.is_empty() => cn,
            _ => &self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes_round_trip() {
        for st in SubjectType::ALL {
            assert_eq!(SubjectType::from_code(st.code() as i64).unwrap(), st);
        }
        for ct in CollectionType::ALL {
            assert_eq!(CollectionType::from_code(ct.code() as i64).unwrap(), ct);
        }
        assert!(SubjectType::from_code(5).is_err());
        assert!(CollectionType::from_code(0).is_err());
    }

    #[test]
    fn test_type_ordering_follows_codes() {
        let mut types = vec![SubjectType::Real, SubjectType::Book, SubjectType::Game];
        types.sort();
        assert_eq!(types, vec![SubjectType::Book, SubjectType::Game, SubjectType::Real]);
    }

    #[test]
    fn test_types_serialize_as_codes() {
        assert_eq!(serde_json::to_string(&SubjectType::Real).unwrap(), "6");
        let ct: CollectionType = serde_json::from_str("4").unwrap();
        assert_eq!(ct, CollectionType::OnHold);
        assert!(serde_json::from_str::<SubjectType>("5").is_err());
    }

    #[test]
    fn test_infobox_value_joined() {
        let list: InfoboxValue = serde_json::from_str(r#"[{"v":"A"},{"k":"x","v":" B "},{"v":""}]"#).unwrap();
        assert_eq!(list.joined(", ").as_deref(), Some("A, B"));
        assert_eq!(InfoboxValue::Scalar("  ".into()).joined(", "), None);
    }

    #[test]
    fn test_display_name_falls_back_to_name() {
        let mut snapshot = SubjectSnapshot {
            name: "Cowboy Bebop".into(),
            name_cn: Some("星际牛仔".into()),
            score: None,
            rank: None,
            collection_total: None,
            eps: None,
            volumes: None,
            date: None,
            short_summary: String::new(),
            tags: Vec::new(),
            infobox: Vec::new(),
        };
        assert_eq!(snapshot.display_name(), "星际牛仔");
        snapshot.name_cn = Some(String::new());
        assert_eq!(snapshot.display_name(), "Cowboy Bebop");
    }
}
