//! Column mapping: assigns canonical target-table fields to user-authored
//! spreadsheet headers with a confidence score.
//!
//! Headers are inconsistent across languages and spellings, so the accept
//! bar is deliberately low (30) to maximize auto-mapping coverage; the
//! confidence score lets a UI flag weak matches for human review.

use serde::Serialize;
use strsim::levenshtein;
use tracing::debug;

use crate::schema::{is_name_variant, schema_for, TargetTable, TransformKind};

/// Exact keyword match.
const SCORE_EXACT: u8 = 100;
/// Substring match in either direction.
const SCORE_SUBSTRING: u8 = 60;
/// Edit distance ≤ 2 (both strings longer than 2 chars).
const SCORE_FUZZY: u8 = 40;
/// Minimum score for a mapping to be accepted at all.
const SCORE_ACCEPT: u8 = 30;

/// One spreadsheet column's mapping onto a canonical field.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnMapping {
    /// Source column header as it appeared in the sheet.
    pub source: String,
    /// Resolved canonical field; `None` means unmapped/ignored.
    pub field: Option<&'static str>,
    /// 0–100; 0 when unmapped.
    pub confidence: u8,
    pub transform: TransformKind,
}

/// Map every header onto the target table's fields.
///
/// Each non-name field is claimed by at most one column per pass; the
/// multilingual name variants (name_ar/name_he/name_en) may each be
/// claimed independently.
pub fn map_columns(headers: &[String], table: TargetTable) -> Vec<ColumnMapping> {
    let schema = schema_for(table);
    let mut claimed: Vec<&'static str> = Vec::new();
    let mut mappings = Vec::with_capacity(headers.len());

    for header in headers {
        let mut best: Option<(&'static str, u8, TransformKind)> = None;

        for field in &schema.fields {
            if !is_name_variant(field.name) && claimed.contains(&field.name) {
                continue;
            }

            let score = field
                .keywords
                .iter()
                .map(|kw| score_header(header, kw))
                .max()
                .unwrap_or(0);

            // Strictly greater: the first field to reach a score keeps it.
            if score > best.map(|(_, s, _)| s).unwrap_or(0) {
                best = Some((field.name, score, field.transform));
            }
        }

        let mapping = match best {
            Some((field, score, transform)) if score >= SCORE_ACCEPT => {
                claimed.push(field);
                debug!("Header '{}' → {} (confidence {})", header, field, score);
                ColumnMapping {
                    source: header.clone(),
                    field: Some(field),
                    confidence: score,
                    transform,
                }
            }
            _ => ColumnMapping {
                source: header.clone(),
                field: None,
                confidence: 0,
                transform: TransformKind::Plain,
            },
        };
        mappings.push(mapping);
    }

    mappings
}

/// Score one header against one keyword, case-insensitive and trimmed.
fn score_header(header: &str, keyword: &str) -> u8 {
    let h = header.trim().to_lowercase();
    let k = keyword.trim().to_lowercase();

    if h.is_empty() || k.is_empty() {
        return 0;
    }
    if h == k {
        return SCORE_EXACT;
    }
    if h.contains(&k) || k.contains(&h) {
        return SCORE_SUBSTRING;
    }
    // Fuzzy only when both sides are long enough to make a distance of 2
    // meaningful; "id" vs "is" should not match.
    if h.chars().count() > 2 && k.chars().count() > 2 && levenshtein(&h, &k) <= 2 {
        return SCORE_FUZZY;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn mapping_for<'a>(mappings: &'a [ColumnMapping], source: &str) -> &'a ColumnMapping {
        mappings.iter().find(|m| m.source == source).unwrap()
    }

    #[test]
    fn test_exact_match_scores_100() {
        let mappings = map_columns(&headers(&["phone"]), TargetTable::Trainees);
        assert_eq!(mappings[0].field, Some("phone"));
        assert_eq!(mappings[0].confidence, 100);
        assert_eq!(mappings[0].transform, TransformKind::Phone);
    }

    #[test]
    fn test_hebrew_headers_map() {
        let mappings = map_columns(&headers(&["שם", "טלפון", "קבוצה"]), TargetTable::Trainees);
        assert_eq!(mapping_for(&mappings, "שם").field, Some("name_ar"));
        assert_eq!(mapping_for(&mappings, "טלפון").field, Some("phone"));
        let team = mapping_for(&mappings, "קבוצה");
        assert_eq!(team.field, Some("class_id"));
        assert_eq!(team.transform, TransformKind::FkClass);
    }

    #[test]
    fn test_substring_match_scores_60() {
        let mappings = map_columns(&headers(&["main coach"]), TargetTable::Classes);
        let m = &mappings[0];
        assert_eq!(m.field, Some("trainer_id"));
        assert_eq!(m.confidence, 60);
    }

    #[test]
    fn test_fuzzy_match_scores_40() {
        // "fone" is distance 2 from "phone" and not a substring of it.
        let mappings = map_columns(&headers(&["fone"]), TargetTable::Trainers);
        let m = &mappings[0];
        assert_eq!(m.field, Some("phone"));
        assert_eq!(m.confidence, 40);
    }

    #[test]
    fn test_fuzzy_requires_length() {
        // Both sides must exceed 2 chars before edit distance is tried.
        assert_eq!(score_header("id", "is"), 0);
    }

    #[test]
    fn test_unmapped_header_is_null_with_zero_confidence() {
        let mappings = map_columns(&headers(&["favorite color"]), TargetTable::Trainees);
        assert_eq!(mappings[0].field, None);
        assert_eq!(mappings[0].confidence, 0);
    }

    #[test]
    fn test_non_name_field_claimed_once() {
        // Two phone-like columns: only the first claims `phone`, the
        // second stays unmapped.
        let mappings = map_columns(&headers(&["phone", "mobile"]), TargetTable::Trainers);
        assert_eq!(mappings[0].field, Some("phone"));
        assert_eq!(mappings[1].field, None);
    }

    #[test]
    fn test_name_variants_claimed_independently() {
        let mappings = map_columns(
            &headers(&["name", "hebrew name", "english name"]),
            TargetTable::Trainees,
        );
        assert_eq!(mappings[0].field, Some("name_ar"));
        assert_eq!(mappings[1].field, Some("name_he"));
        assert_eq!(mappings[2].field, Some("name_en"));
    }

    #[test]
    fn test_case_insensitive_trimmed() {
        let mappings = map_columns(&headers(&["  PHONE  "]), TargetTable::Trainers);
        assert_eq!(mappings[0].field, Some("phone"));
        assert_eq!(mappings[0].confidence, 100);
    }
}
