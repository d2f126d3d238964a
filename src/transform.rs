//! Row transformation: one raw sheet row + its column mappings →
//! a validated `PreviewRow`.
//!
//! Per-field transforms (phone, number, boolean, FK resolution, plain
//! text) run first, then cross-field rules (multilingual name back-fill,
//! the classes category concatenation), then required-field validation.
//! Row-level problems never halt anything — they are carried as statuses
//! and messages so the caller can present the full picture before import.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::mapper::ColumnMapping;
use crate::phone::normalize_phone;
use crate::resolver::{resolve_reference, FkKind, RefData};
use crate::schema::{schema_for, TargetTable, TransformKind};
use crate::workbook::display_value;

/// FK matches below this confidence still set the field but carry a
/// partial-match warning for human review.
const FK_CONFIDENT: u8 = 70;

const NAME_VARIANTS: [&str; 3] = ["name_ar", "name_he", "name_en"];

/// Truthy vocabulary for boolean coercion, spanning the three languages.
/// Anything else coerces to false.
const TRUTHY: [&str; 5] = ["true", "yes", "1", "כן", "نعم"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Valid,
    Warning,
    Error,
}

/// Resolution state of one FK field, kept beside the record instead of
/// inside it so the sink payload never needs a strip step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FieldResolution {
    /// Matched an existing record.
    Resolved {
        id: String,
        label: String,
        confidence: u8,
    },
    /// No match; the original text is kept so the orchestrator can patch
    /// in a freshly created id, and so the UI can display it.
    Unresolved { text: String },
}

/// One transformed, validated spreadsheet row, pre-import.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewRow {
    /// Row position within the sheet's data rows.
    pub index: usize,
    /// Original raw data, header-keyed.
    pub raw: Map<String, Value>,
    /// Canonical field map — exactly what the sink will receive
    /// (modulo FK patching during import).
    pub record: Map<String, Value>,
    /// Per-FK-field resolution metadata, keyed by canonical field name.
    pub resolutions: BTreeMap<String, FieldResolution>,
    pub status: RowStatus,
    pub messages: Vec<String>,
}

/// Apply all transforms and validation to a single raw row.
pub fn transform_row(
    index: usize,
    raw: &Map<String, Value>,
    mappings: &[ColumnMapping],
    table: TargetTable,
    refdata: &RefData,
) -> PreviewRow {
    let schema = schema_for(table);
    let mut record = Map::new();
    let mut resolutions = BTreeMap::new();
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for mapping in mappings {
        let Some(field) = mapping.field else { continue };
        let Some(value) = raw.get(&mapping.source) else {
            continue;
        };
        let text = display_value(value);
        if text.is_empty() {
            continue;
        }

        match mapping.transform {
            TransformKind::Phone => {
                record.insert(field.to_string(), Value::String(normalize_phone(&text)));
            }
            TransformKind::Number => {
                if value.is_number() {
                    record.insert(field.to_string(), value.clone());
                } else if let Some(n) = text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                    record.insert(field.to_string(), Value::Number(n));
                } else {
                    warnings.push(format!("'{}' is not a number for {}", text, field));
                }
            }
            TransformKind::Boolean => {
                record.insert(field.to_string(), Value::Bool(is_truthy(&text)));
            }
            TransformKind::FkTrainer | TransformKind::FkHall | TransformKind::FkClass => {
                let kind = match mapping.transform {
                    TransformKind::FkTrainer => FkKind::Trainer,
                    TransformKind::FkHall => FkKind::Hall,
                    _ => FkKind::Class,
                };
                match resolve_reference(&text, refdata, kind) {
                    Some(m) => {
                        record.insert(field.to_string(), Value::String(m.id.clone()));
                        if m.confidence < FK_CONFIDENT {
                            warnings.push(format!(
                                "Partial match for {}: '{}' → '{}' ({}%)",
                                field, text, m.label, m.confidence
                            ));
                        }
                        resolutions.insert(
                            field.to_string(),
                            FieldResolution::Resolved {
                                id: m.id,
                                label: m.label,
                                confidence: m.confidence,
                            },
                        );
                    }
                    None => {
                        // Recoverable: the orchestrator may create the
                        // entity and patch the id in before import.
                        resolutions.insert(
                            field.to_string(),
                            FieldResolution::Unresolved { text: text.clone() },
                        );
                        warnings.push(format!("Unresolved reference for {}: '{}'", field, text));
                    }
                }
            }
            TransformKind::Plain => {
                record.insert(field.to_string(), Value::String(text));
            }
        }
    }

    if table == TargetTable::Classes {
        apply_category_rule(&mut record);
    }
    // Internal pseudo-fields never reach the sink payload.
    for field in schema.fields.iter().filter(|f| f.internal) {
        record.remove(field.name);
    }

    backfill_names(&mut record);

    for field in schema.required_fields() {
        let present = record
            .get(field.name)
            .map(|v| !display_value(v).is_empty())
            .unwrap_or(false);
        if !present {
            errors.push(format!("Missing required field: {}", field.name));
        }
    }

    let status = if !errors.is_empty() {
        RowStatus::Error
    } else if !warnings.is_empty() {
        RowStatus::Warning
    } else {
        RowStatus::Valid
    };

    let mut messages = errors;
    messages.extend(warnings);

    PreviewRow {
        index,
        raw: raw.clone(),
        record,
        resolutions,
        status,
        messages,
    }
}

/// Spreadsheets that group team rows under forward-filled category headers:
/// a populated `category` pseudo-field prefixes the team name as
/// "{category} - {name}"; with no separate name column the category *is*
/// the team name.
fn apply_category_rule(record: &mut Map<String, Value>) {
    let Some(category) = record.get("category").map(display_value) else {
        return;
    };
    if category.is_empty() {
        return;
    }

    let populated: Vec<&str> = NAME_VARIANTS
        .iter()
        .copied()
        .filter(|f| {
            record
                .get(*f)
                .map(|v| !display_value(v).is_empty())
                .unwrap_or(false)
        })
        .collect();

    if populated.is_empty() {
        record.insert("name_ar".to_string(), Value::String(category));
    } else {
        for field in populated {
            let name = display_value(&record[field]);
            record.insert(
                field.to_string(),
                Value::String(format!("{} - {}", category, name)),
            );
        }
    }
}

/// A single-language sheet should not produce incomplete multilingual
/// records: when exactly one name variant is populated, copy it into the
/// other two.
fn backfill_names(record: &mut Map<String, Value>) {
    let populated: Vec<&str> = NAME_VARIANTS
        .iter()
        .copied()
        .filter(|f| {
            record
                .get(*f)
                .map(|v| !display_value(v).is_empty())
                .unwrap_or(false)
        })
        .collect();

    if let [only] = populated[..] {
        let value = record[only].clone();
        for field in NAME_VARIANTS {
            if field != only {
                record.insert(field.to_string(), value.clone());
            }
        }
    }
}

fn is_truthy(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    TRUTHY.iter().any(|v| *v == t)
}

/// The rows an import will actually attempt: `valid` always, `warning`
/// when `include_warnings` is set, `error` never. Original order is
/// preserved; each row's `record` is already the clean sink payload.
pub fn importable_rows(rows: &[PreviewRow], include_warnings: bool) -> Vec<&PreviewRow> {
    rows.iter()
        .filter(|r| match r.status {
            RowStatus::Valid => true,
            RowStatus::Warning => include_warnings,
            RowStatus::Error => false,
        })
        .collect()
}
