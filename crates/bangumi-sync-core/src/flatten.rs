//! Projection of a normalized record into its flat analytics row.

use bangumi_sync_models::{AnalyticsRecord, CollectionRecord, InfoboxEntry, TagEntry, TagSlot, TOP_TAG_SLOTS};
use std::collections::HashSet;

/// Separator for list-valued infobox attributes and the tag list
pub const LIST_SEPARATOR: &str = ", ";

/// Infobox keys that feed each analytics attribute
pub const DIRECTOR_KEYS: &[&str] = &["导演", "監督"];
pub const STUDIO_KEYS: &[&str] = &["动画制作", "アニメーション制作"];
pub const COUNTRY_KEYS: &[&str] = &["国家/地区", "国"];
pub const PUBLISHER_KEYS: &[&str] = &["出版社", "発売元"];
pub const AUTHOR_KEYS: &[&str] = &["作者", "著者"];

pub fn flatten(record: &CollectionRecord) -> AnalyticsRecord {
    let subject = &record.subject;
    AnalyticsRecord {
        identity: record.identity.clone(),
        display_name: subject.display_name().to_string(),
        score: subject.score,
        rank: subject.rank,
        collection_total: subject.collection_total,
        eps: subject.eps,
        air_date: subject.date,
        created_at: record.created_at,
        updated_at: record.updated_at,
        director: infobox_attribute(&subject.infobox, DIRECTOR_KEYS),
        studio: infobox_attribute(&subject.infobox, STUDIO_KEYS),
        country: infobox_attribute(&subject.infobox, COUNTRY_KEYS),
        publisher: infobox_attribute(&subject.infobox, PUBLISHER_KEYS),
        author: infobox_attribute(&subject.infobox, AUTHOR_KEYS),
        top_tags: top_tags(&subject.tags),
        all_tags: all_tags(&subject.tags),
    }
}

/// Value of the first infobox entry, in infobox order, whose key is one of
/// `aliases` and whose value is not blank.
pub fn infobox_attribute(infobox: &[InfoboxEntry], aliases: &[&str]) -> Option<String> {
    infobox
        .iter()
        .filter(|entry| aliases.contains(&entry.key.trim()))
        .find_map(|entry| entry.value.joined(LIST_SEPARATOR))
}

/// The highest-count tags; ties keep their original order
pub fn top_tags(tags: &[TagEntry]) -> [Option<TagSlot>; TOP_TAG_SLOTS] {
    let mut ranked: Vec<&TagEntry> = tags.iter().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    std::array::from_fn(|i| {
        ranked.get(i).map(|tag| TagSlot {
            name: tag.name.clone(),
            count: tag.count,
        })
    })
}

/// Every distinct tag name in original order
pub fn all_tags(tags: &[TagEntry]) -> Option<String> {
    let mut seen = HashSet::new();
    let names: Vec<&str> = tags
        .iter()
        .map(|tag| tag.name.as_str())
        .filter(|name| !name.is_empty() && seen.insert(*name))
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(LIST_SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bangumi_sync_models::{CollectionType, InfoboxListItem, InfoboxValue, RecordIdentity, SubjectSnapshot, SubjectType};

    fn tag(name: &str, count: u32) -> TagEntry {
        TagEntry { name: name.to_string(), count }
    }

    fn entry(key: &str, value: InfoboxValue) -> InfoboxEntry {
        InfoboxEntry { key: key.to_string(), value }
    }

    fn record(tags: Vec<TagEntry>, infobox: Vec<InfoboxEntry>) -> CollectionRecord {
        CollectionRecord {
            identity: RecordIdentity {
                user_id: "sai".into(),
                subject_id: 1,
                subject_type: SubjectType::Anime,
                collection_type: CollectionType::Doing,
            },
            created_at: None,
            updated_at: None,
            ep_status: 3,
            vol_status: 0,
            rate: 0,
            comment: None,
            user_tags: Vec::new(),
            private: false,
            subject: SubjectSnapshot {
                name: "Original".into(),
                name_cn: None,
                score: Some(8.0),
                rank: Some(42),
                collection_total: Some(1000),
                eps: Some(12),
                volumes: None,
                date: None,
                short_summary: String::new(),
                tags,
                infobox,
            },
        }
    }

    #[test]
    fn test_top_tags_sorted_by_count_with_stable_ties() {
        let tags = vec![tag("a", 5), tag("b", 9), tag("c", 5), tag("d", 1), tag("e", 9), tag("f", 0), tag("g", 2)];
        let slots = top_tags(&tags);
        let names: Vec<_> = slots.iter().map(|s| s.as_ref().unwrap().name.as_str()).collect();
        assert_eq!(names, vec!["b", "e", "a", "c", "g"]);
    }

    #[test]
    fn test_top_tags_pads_with_none() {
        let slots = top_tags(&[tag("only", 3)]);
        assert_eq!(slots[0], Some(TagSlot { name: "only".into(), count: 3 }));
        assert!(slots[1..].iter().all(Option::is_none));
        assert!(top_tags(&[]).iter().all(Option::is_none));
    }

    #[test]
    fn test_top_tags_counts_never_increase() {
        // a spread of deterministic inputs, including heavy ties
        for seed in 0..50u32 {
            let tags: Vec<TagEntry> = (0..(seed % 9)).map(|i| tag(&format!("t{}", i), (i * 7 + seed) % 4)).collect();
            let slots = top_tags(&tags);
            let counts: Vec<u32> = slots.iter().flatten().map(|s| s.count).collect();
            assert_eq!(counts.len(), tags.len().min(TOP_TAG_SLOTS));
            assert!(counts.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn test_all_tags_joins_every_distinct_name() {
        let tags = vec![tag("SF", 3), tag("原创", 1), tag("SF", 1), tag("", 9)];
        assert_eq!(all_tags(&tags).as_deref(), Some("SF, 原创"));
        assert_eq!(all_tags(&[]), None);
    }

    #[test]
    fn test_infobox_aliases_and_list_values() {
        let infobox = vec![
            entry("監督", InfoboxValue::Scalar("Japanese Key".into())),
            entry("导演", InfoboxValue::Scalar("Chinese Key".into())),
            entry(
                "动画制作",
                InfoboxValue::List(vec![
                    InfoboxListItem { k: None, v: "Sunrise".into() },
                    InfoboxListItem { k: None, v: "  ".into() },
                    InfoboxListItem { k: Some("co".into()), v: "Bones".into() },
                ]),
            ),
            entry("国", InfoboxValue::Scalar("日本".into())),
        ];
        assert_eq!(infobox_attribute(&infobox, DIRECTOR_KEYS).as_deref(), Some("Japanese Key"));
        assert_eq!(infobox_attribute(&infobox, STUDIO_KEYS).as_deref(), Some("Sunrise, Bones"));
        assert_eq!(infobox_attribute(&infobox, COUNTRY_KEYS).as_deref(), Some("日本"));
        assert_eq!(infobox_attribute(&infobox, AUTHOR_KEYS), None);
    }

    #[test]
    fn test_infobox_order_decides_between_aliases() {
        let jp_first = vec![
            entry("監督", InfoboxValue::Scalar("first-in-list".into())),
            entry("导演", InfoboxValue::Scalar("second-in-list".into())),
        ];
        assert_eq!(infobox_attribute(&jp_first, DIRECTOR_KEYS).as_deref(), Some("first-in-list"));

        let cn_first = vec![
            entry("导演", InfoboxValue::Scalar("first-in-list".into())),
            entry("監督", InfoboxValue::Scalar("second-in-list".into())),
        ];
        assert_eq!(infobox_attribute(&cn_first, DIRECTOR_KEYS).as_deref(), Some("first-in-list"));
    }

    #[test]
    fn test_blank_alias_value_falls_through() {
        let infobox = vec![
            entry("作者", InfoboxValue::Scalar("".into())),
            entry("著者", InfoboxValue::Scalar("村上春樹".into())),
        ];
        assert_eq!(infobox_attribute(&infobox, AUTHOR_KEYS).as_deref(), Some("村上春樹"));
    }

    #[test]
    fn test_flatten_copies_metrics_and_names() {
        let mut raw = record(vec![tag("x", 1)], vec![entry("出版社", InfoboxValue::Scalar("講談社".into()))]);
        let flat = flatten(&raw);
        assert_eq!(flat.display_name, "Original");
        assert_eq!(flat.score, Some(8.0));
        assert_eq!(flat.rank, Some(42));
        assert_eq!(flat.eps, Some(12));
        assert_eq!(flat.publisher.as_deref(), Some("講談社"));
        assert_eq!(flat.all_tags.as_deref(), Some("x"));

        raw.subject.name_cn = Some("中文名".into());
        assert_eq!(flatten(&raw).display_name, "中文名");
    }

    #[test]
    fn test_flatten_is_pure() {
        let raw = record(vec![tag("a", 2), tag("b", 2)], Vec::new());
        assert_eq!(flatten(&raw), flatten(&raw));
    }
}
