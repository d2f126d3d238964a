//! Foreign-key resolution: matching free-text names from spreadsheet cells
//! against existing trainers, halls and classes.
//!
//! Pure functions, no async. The reference snapshot is supplied once per
//! analysis by the backing store and treated as read-only.

use serde::{Deserialize, Serialize};
use strsim::levenshtein;

/// Which entity type a free-text reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FkKind {
    Trainer,
    Hall,
    Class,
}

/// One existing record with its multilingual names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefRecord {
    pub id: String,
    pub name_ar: Option<String>,
    pub name_he: Option<String>,
    pub name_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl RefRecord {
    fn names(&self) -> impl Iterator<Item = &str> {
        [&self.name_ar, &self.name_he, &self.name_en]
            .into_iter()
            .filter_map(|n| n.as_deref())
    }
}

/// Reference snapshot of existing records, fetched once per analysis.
/// May go stale between analysis and import; the import phases tolerate
/// that by reporting per-row sink errors instead of failing outright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefData {
    pub trainers: Vec<RefRecord>,
    pub halls: Vec<RefRecord>,
    pub classes: Vec<RefRecord>,
}

impl RefData {
    pub fn records_for(&self, kind: FkKind) -> &[RefRecord] {
        match kind {
            FkKind::Trainer => &self.trainers,
            FkKind::Hall => &self.halls,
            FkKind::Class => &self.classes,
        }
    }

    /// Case-insensitive name lookup across all three languages.
    pub fn contains_name(&self, kind: FkKind, name: &str) -> bool {
        let needle = name.trim().to_lowercase();
        self.records_for(kind)
            .iter()
            .any(|r| r.names().any(|n| n.trim().to_lowercase() == needle))
    }
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FkMatch {
    pub id: String,
    /// The display name that matched, as stored in the reference record.
    pub label: String,
    pub confidence: u8,
}

/// Resolve a free-text name against the reference records of one kind.
///
/// Exact equality (case-insensitive, trimmed) returns confidence 100
/// immediately — an exact match wins outright regardless of any fuzzy
/// candidate scanned earlier or later. Otherwise the single best of
/// substring (70) and edit-distance ≤ 3 (`max(30, 60 − 10×distance)`)
/// is kept; ties go to the first candidate seen. The edit-distance floor
/// of 30 still surfaces low-confidence guesses to the caller, since
/// partial name entry is common in hand-maintained rosters.
pub fn resolve_reference(input: &str, refdata: &RefData, kind: FkKind) -> Option<FkMatch> {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let mut best: Option<FkMatch> = None;

    for record in refdata.records_for(kind) {
        for name in record.names() {
            let candidate = name.trim().to_lowercase();
            if candidate.is_empty() {
                continue;
            }

            if candidate == needle {
                return Some(FkMatch {
                    id: record.id.clone(),
                    label: name.trim().to_string(),
                    confidence: 100,
                });
            }

            let score = if candidate.contains(&needle) || needle.contains(&candidate) {
                70
            } else {
                let distance = levenshtein(&needle, &candidate);
                if distance <= 3 {
                    (60u8.saturating_sub(10 * distance as u8)).max(30)
                } else {
                    0
                }
            };

            // Strictly greater: first-seen candidate wins ties.
            if score > 0 && score > best.as_ref().map(|b| b.confidence).unwrap_or(0) {
                best = Some(FkMatch {
                    id: record.id.clone(),
                    label: name.trim().to_string(),
                    confidence: score,
                });
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trainer(id: &str, name: &str) -> RefRecord {
        RefRecord {
            id: id.to_string(),
            name_ar: None,
            name_he: None,
            name_en: Some(name.to_string()),
            phone: None,
        }
    }

    fn refdata(trainers: Vec<RefRecord>) -> RefData {
        RefData {
            trainers,
            halls: Vec::new(),
            classes: Vec::new(),
        }
    }

    #[test]
    fn test_exact_match_case_insensitive() {
        let data = refdata(vec![trainer("t1", "Ahmad Ali")]);
        let m = resolve_reference("ahmad ali", &data, FkKind::Trainer).unwrap();
        assert_eq!(m.id, "t1");
        assert_eq!(m.label, "Ahmad Ali");
        assert_eq!(m.confidence, 100);
    }

    #[test]
    fn test_exact_match_beats_earlier_fuzzy_candidate() {
        // "ahmad alx" is distance 1 from the first candidate, but the second
        // candidate matches exactly; exact must win outright.
        let data = refdata(vec![trainer("t1", "Ahmad Alx"), trainer("t2", "Ahmad Ali")]);
        let m = resolve_reference("Ahmad Ali", &data, FkKind::Trainer).unwrap();
        assert_eq!(m.id, "t2");
        assert_eq!(m.confidence, 100);
    }

    #[test]
    fn test_substring_match() {
        let data = refdata(vec![trainer("t1", "Ahmad Ali")]);
        let m = resolve_reference("Ahmad", &data, FkKind::Trainer).unwrap();
        assert_eq!(m.id, "t1");
        assert_eq!(m.confidence, 70);
    }

    #[test]
    fn test_edit_distance_scoring() {
        let data = refdata(vec![trainer("t1", "Samir")]);
        // distance 1 → 50
        assert_eq!(
            resolve_reference("Samif", &data, FkKind::Trainer)
                .unwrap()
                .confidence,
            50
        );
        // distance 3 → max(30, 60 − 30) = 30
        assert_eq!(
            resolve_reference("Sawez", &data, FkKind::Trainer)
                .unwrap()
                .confidence,
            30
        );
    }

    #[test]
    fn test_no_match_beyond_distance_three() {
        let data = refdata(vec![trainer("t1", "Samir")]);
        assert!(resolve_reference("completely different", &data, FkKind::Trainer).is_none());
    }

    #[test]
    fn test_tie_break_first_seen() {
        // Both candidates are distance 1 from the input; the first declared
        // record must win.
        let data = refdata(vec![trainer("t1", "Sami"), trainer("t2", "Samu")]);
        let m = resolve_reference("Samo", &data, FkKind::Trainer).unwrap();
        assert_eq!(m.id, "t1");
        assert_eq!(m.confidence, 50);
    }

    #[test]
    fn test_empty_input_resolves_nothing() {
        let data = refdata(vec![trainer("t1", "Samir")]);
        assert!(resolve_reference("   ", &data, FkKind::Trainer).is_none());
    }

    #[test]
    fn test_contains_name_across_languages() {
        let mut record = trainer("t1", "Lions");
        record.name_ar = Some("الأسود".to_string());
        let data = RefData {
            trainers: Vec::new(),
            halls: Vec::new(),
            classes: vec![record],
        };
        assert!(data.contains_name(FkKind::Class, "lions"));
        assert!(data.contains_name(FkKind::Class, "الأسود"));
        assert!(!data.contains_name(FkKind::Class, "Tigers"));
    }
}
