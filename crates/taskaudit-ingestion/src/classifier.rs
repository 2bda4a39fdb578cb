//! Content Classifier
//!
//! Maps a raw row (a JSON object or a bare string) to the text that gets
//! stored and embedded, plus an optional quality category. Classification
//! never fails: a non-empty row always yields some content.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use taskaudit_meta_data::QualityCategory;

/// Content fields, highest priority first
pub const CONTENT_FIELDS: &[&str] = &[
    "feedback",
    "feedback_text",
    "prompt",
    "content",
    "body",
    "text",
    "message",
    "description",
    "comment",
];

/// Rating-like fields consulted for the quality category
pub const CATEGORY_FIELDS: &[&str] = &[
    "rating",
    "category",
    "quality",
    "label",
    "score",
    "grade",
    "selection",
    "status",
];

/// Id-like fields used for duplicate suppression, first match wins
pub const EXTERNAL_ID_FIELDS: &[&str] = &[
    "id",
    "task_id",
    "taskId",
    "external_id",
    "externalId",
    "uuid",
    "_id",
    "record_id",
];

const TOP_TOKENS: &[&str] = &[
    "top_10", "top10", "top", "selected", "accepted", "approved", "best", "good",
];
const BOTTOM_TOKENS: &[&str] = &[
    "bottom_10", "bottom10", "bottom", "rejected", "worst", "bad",
];

const SOURCE_FIELDS: &[&str] = &["source"];
const CREATOR_ID_FIELDS: &[&str] = &["creator_id", "creatorId", "user_id", "author_id"];
const CREATOR_NAME_FIELDS: &[&str] = &["creator_name", "creatorName", "author", "user_name"];
const CREATOR_EMAIL_FIELDS: &[&str] = &["creator_email", "creatorEmail", "email", "author_email"];
const CREATED_AT_FIELDS: &[&str] = &["created_at", "createdAt", "created", "timestamp", "date"];
const UPDATED_AT_FIELDS: &[&str] = &["updated_at", "updatedAt", "updated"];

/// What the classifier extracted from one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub content: String,
    pub category: Option<QualityCategory>,
}

/// Optional provenance carried by a row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub source: Option<String>,
    pub creator_id: Option<String>,
    pub creator_name: Option<String>,
    pub creator_email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Row classifier with a configurable minimum content length
#[derive(Debug, Clone, Copy)]
pub struct ContentClassifier {
    min_content_length: usize,
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ContentClassifier {
    pub const fn new(min_content_length: usize) -> Self {
        Self { min_content_length }
    }

    /// Extract content and category from a row
    pub fn classify(&self, row: &Value) -> Classification {
        match row {
            Value::Object(map) => Classification {
                content: self.extract_content(map, row),
                category: extract_category(map),
            },
            Value::String(text) => Classification {
                content: text.clone(),
                category: None,
            },
            other => Classification {
                content: other.to_string(),
                category: None,
            },
        }
    }

    fn extract_content(&self, map: &Map<String, Value>, row: &Value) -> String {
        let preferred = CONTENT_FIELDS.iter().find_map(|field| {
            field_value(map, field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| text.chars().count() >= self.min_content_length)
        });
        if let Some(text) = preferred {
            return text.to_string();
        }

        let longest = map
            .values()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .max_by_key(|text| text.chars().count());
        if let Some(text) = longest {
            return text.to_string();
        }

        row.to_string()
    }
}

/// First usable category among the priority fields, then any
/// `*rating*`/`*score*` field
pub fn extract_category(map: &Map<String, Value>) -> Option<QualityCategory> {
    let prioritized = CATEGORY_FIELDS
        .iter()
        .filter_map(|field| field_value(map, field))
        .find_map(categorize_value);
    if prioritized.is_some() {
        return prioritized;
    }

    map.iter()
        .filter(|(key, _)| {
            let key = key.to_ascii_lowercase();
            (key.contains("rating") || key.contains("score"))
                && !CATEGORY_FIELDS.contains(&key.as_str())
        })
        .find_map(|(_, value)| categorize_value(value))
}

/// Apply the textual, token and numeric rules to one value
pub fn categorize_value(value: &Value) -> Option<QualityCategory> {
    let text = match value {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }

    if text.contains("top") && text.contains("10") {
        return Some(QualityCategory::Top10);
    }
    if text.contains("bottom") && text.contains("10") {
        return Some(QualityCategory::Bottom10);
    }

    if TOP_TOKENS.contains(&text.as_str()) {
        return Some(QualityCategory::Top10);
    }
    if BOTTOM_TOKENS.contains(&text.as_str()) {
        return Some(QualityCategory::Bottom10);
    }

    text.parse::<f64>().ok().and_then(categorize_number)
}

fn categorize_number(number: f64) -> Option<QualityCategory> {
    if !number.is_finite() {
        return None;
    }
    // From 1 up the value is a 1-5 rating; below 1 it is a 0-1 score
    if number >= 1.0 {
        if number >= 4.0 {
            Some(QualityCategory::Top10)
        } else if number <= 2.0 {
            Some(QualityCategory::Bottom10)
        } else {
            None
        }
    } else if number > 0.8 {
        Some(QualityCategory::Top10)
    } else if number < 0.2 {
        Some(QualityCategory::Bottom10)
    } else {
        None
    }
}

/// External identifier of a row, if it carries one
pub fn extract_external_id(row: &Value) -> Option<String> {
    let map = row.as_object()?;
    EXTERNAL_ID_FIELDS.iter().find_map(|field| {
        let id = match map.get(*field)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!id.is_empty()).then_some(id)
    })
}

/// Provenance fields of a row; unparseable timestamps are dropped
pub fn extract_provenance(row: &Value) -> Provenance {
    let Some(map) = row.as_object() else {
        return Provenance::default();
    };
    Provenance {
        source: first_string(map, SOURCE_FIELDS),
        creator_id: first_string(map, CREATOR_ID_FIELDS),
        creator_name: first_string(map, CREATOR_NAME_FIELDS),
        creator_email: first_string(map, CREATOR_EMAIL_FIELDS),
        created_at: first_timestamp(map, CREATED_AT_FIELDS),
        updated_at: first_timestamp(map, UPDATED_AT_FIELDS),
    }
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` as UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Case-insensitive field lookup
fn field_value<'a>(map: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    map.get(field).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    })
}

fn first_string(map: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        let value = match map.get(*field)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!value.is_empty()).then_some(value)
    })
}

fn first_timestamp(map: &Map<String, Value>, fields: &[&str]) -> Option<DateTime<Utc>> {
    fields
        .iter()
        .filter_map(|field| map.get(*field).and_then(Value::as_str))
        .find_map(parse_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn classify(row: &Value) -> Classification {
        ContentClassifier::default().classify(row)
    }

    #[test]
    fn test_priority_field_wins_over_longer_fields() {
        let row = json!({
            "notes": "a very long free-form note that should be ignored",
            "content": "alpha",
            "prompt": "write a poem",
        });
        assert_eq!(classify(&row).content, "write a poem");
    }

    #[test]
    fn test_too_short_priority_field_is_passed_over() {
        let row = json!({ "feedback": "ok", "text": "useful text" });
        assert_eq!(classify(&row).content, "useful text");
    }

    #[test]
    fn test_unrecognized_key_falls_back_to_longest_string() {
        let row = json!({
            "id": "t-1",
            "notes": "this note is comfortably longer than ten characters",
        });
        assert_eq!(
            classify(&row).content,
            "this note is comfortably longer than ten characters"
        );
    }

    #[test]
    fn test_row_without_strings_serializes_whole_row() {
        let row = json!({ "score": 5, "flag": true });
        let content = classify(&row).content;
        assert!(content.contains("\"score\":5"));
        assert!(!content.is_empty());
    }

    #[test]
    fn test_bare_string_row_is_its_own_content() {
        let result = classify(&json!("just some text"));
        assert_eq!(result.content, "just some text");
        assert_eq!(result.category, None);
    }

    #[test]
    fn test_textual_top_and_bottom_ten() {
        assert_eq!(
            categorize_value(&json!("Top 10")),
            Some(QualityCategory::Top10)
        );
        assert_eq!(
            categorize_value(&json!("bottom-10 pick")),
            Some(QualityCategory::Bottom10)
        );
    }

    #[test]
    fn test_token_sets() {
        assert_eq!(
            categorize_value(&json!("Selected")),
            Some(QualityCategory::Top10)
        );
        assert_eq!(
            categorize_value(&json!("rejected")),
            Some(QualityCategory::Bottom10)
        );
        assert_eq!(categorize_value(&json!("maybe")), None);
    }

    #[test]
    fn test_numeric_scales() {
        assert_eq!(categorize_value(&json!(5)), Some(QualityCategory::Top10));
        assert_eq!(categorize_value(&json!("4")), Some(QualityCategory::Top10));
        assert_eq!(categorize_value(&json!(3)), None);
        assert_eq!(categorize_value(&json!("2")), Some(QualityCategory::Bottom10));
        assert_eq!(categorize_value(&json!(0.95)), Some(QualityCategory::Top10));
        assert_eq!(categorize_value(&json!(0.5)), None);
        assert_eq!(categorize_value(&json!(0.1)), Some(QualityCategory::Bottom10));
    }

    #[test]
    fn test_fractional_ratings_use_five_point_scale() {
        assert_eq!(categorize_value(&json!(1.5)), Some(QualityCategory::Bottom10));
        assert_eq!(categorize_value(&json!(2.5)), None);
        assert_eq!(categorize_value(&json!("3.5")), None);
        assert_eq!(categorize_value(&json!(4.5)), Some(QualityCategory::Top10));
        assert_eq!(categorize_value(&json!(1)), Some(QualityCategory::Bottom10));
        assert_eq!(categorize_value(&json!(0.99)), Some(QualityCategory::Top10));
    }

    #[test]
    fn test_category_field_names_are_case_insensitive() {
        let row = json!({ "content": "alpha", "Rating": "top 10" });
        assert_eq!(classify(&row).category, Some(QualityCategory::Top10));
    }

    #[test]
    fn test_later_priority_field_used_when_earlier_is_unusable() {
        let row = json!({ "content": "alpha", "rating": "n/a", "label": "bad" });
        assert_eq!(classify(&row).category, Some(QualityCategory::Bottom10));
    }

    #[test]
    fn test_last_resort_scans_rating_and_score_keys() {
        let row = json!({ "content": "alpha", "reviewer_score": 0.9 });
        assert_eq!(classify(&row).category, Some(QualityCategory::Top10));

        let row = json!({ "content": "alpha", "overallRating": "1" });
        assert_eq!(classify(&row).category, Some(QualityCategory::Bottom10));
    }

    #[test]
    fn test_no_category_is_not_an_error() {
        let row = json!({ "content": "alpha" });
        assert_eq!(classify(&row).category, None);
    }

    #[test]
    fn test_external_id_first_present_key() {
        assert_eq!(
            extract_external_id(&json!({ "task_id": "t-9", "uuid": "u-1" })),
            Some("t-9".to_string())
        );
        assert_eq!(
            extract_external_id(&json!({ "id": 42 })),
            Some("42".to_string())
        );
        assert_eq!(extract_external_id(&json!({ "id": "  " })), None);
        assert_eq!(extract_external_id(&json!({ "content": "x" })), None);
        assert_eq!(extract_external_id(&json!("bare")), None);
    }

    #[test]
    fn test_timestamp_formats() {
        let rfc = parse_timestamp("2024-03-01T12:30:00+02:00");
        assert_eq!(rfc.map(|t| t.hour()), Some(10));

        let spaced = parse_timestamp("2024-03-01 08:15:00");
        assert_eq!(spaced.map(|t| t.minute()), Some(15));

        let date = parse_timestamp("2024-03-01");
        assert_eq!(date.map(|t| t.day()), Some(1));

        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_provenance_extraction() {
        let row = json!({
            "source": "vendor-a",
            "creatorName": "Sam",
            "email": "sam@example.com",
            "created_at": "2024-01-02",
            "updated_at": "garbage",
        });
        let provenance = extract_provenance(&row);
        assert_eq!(provenance.source.as_deref(), Some("vendor-a"));
        assert_eq!(provenance.creator_name.as_deref(), Some("Sam"));
        assert_eq!(provenance.creator_email.as_deref(), Some("sam@example.com"));
        assert_eq!(provenance.creator_id, None);
        assert!(provenance.created_at.is_some());
        assert_eq!(provenance.updated_at, None);
    }
}
