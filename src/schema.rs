//! Target-table registry: the four club tables a spreadsheet can represent,
//! with per-field multilingual keyword hints for column mapping.
//!
//! This is static configuration, built once at startup and read-only
//! afterward. Keyword lists span Arabic, Hebrew and English since the
//! source spreadsheets are hand-maintained in any of the three.

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::ImportError;

/// The domain tables an imported sheet can target, in scoring preference
/// order: ties between table scores go to the earlier entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTable {
    Classes,
    Trainers,
    Trainees,
    Halls,
}

impl TargetTable {
    pub const ALL: [TargetTable; 4] = [
        TargetTable::Classes,
        TargetTable::Trainers,
        TargetTable::Trainees,
        TargetTable::Halls,
    ];

    /// Backing-store table name.
    pub fn table_name(self) -> &'static str {
        match self {
            TargetTable::Classes => "classes",
            TargetTable::Trainers => "trainers",
            TargetTable::Trainees => "trainees",
            TargetTable::Halls => "halls",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ImportError> {
        match name {
            "classes" => Ok(TargetTable::Classes),
            "trainers" => Ok(TargetTable::Trainers),
            "trainees" => Ok(TargetTable::Trainees),
            "halls" => Ok(TargetTable::Halls),
            other => Err(ImportError::UnknownTable(other.to_string())),
        }
    }
}

/// How a mapped column's raw values are converted into record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Plain,
    Phone,
    Number,
    Boolean,
    FkTrainer,
    FkHall,
    FkClass,
}

/// One canonical field of a target table.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Case-insensitive header keywords across the three languages.
    pub keywords: &'static [&'static str],
    pub required: bool,
    pub transform: TransformKind,
    /// Internal fields feed cross-field rules (e.g. the classes `category`
    /// pseudo-field) and are never part of the sink payload.
    pub internal: bool,
}

/// Schema of one target table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub table: TargetTable,
    pub fields: Vec<FieldSpec>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }
}

/// The three multilingual name variants. Unlike every other field, each
/// may be claimed by its own column within one mapping pass, so a sheet
/// with separate Arabic/Hebrew/English name columns maps correctly.
pub fn is_name_variant(field: &str) -> bool {
    matches!(field, "name_ar" | "name_he" | "name_en")
}

/// Transform kind inferred from the canonical field name alone.
fn transform_for(name: &str) -> TransformKind {
    match name {
        "trainer_id" => TransformKind::FkTrainer,
        "hall_id" => TransformKind::FkHall,
        "class_id" => TransformKind::FkClass,
        "phone" | "parent_phone" => TransformKind::Phone,
        "monthly_fee" | "capacity" | "birth_year" => TransformKind::Number,
        "active" => TransformKind::Boolean,
        _ => TransformKind::Plain,
    }
}

fn field(name: &'static str, keywords: &'static [&'static str], required: bool) -> FieldSpec {
    FieldSpec {
        name,
        keywords,
        required,
        transform: transform_for(name),
        internal: name == "category",
    }
}

// Keyword hints. The generic "name" spellings sit on name_ar (the required
// variant) so a single-language sheet satisfies the required name field;
// back-fill copies it to the other two after transform.
const NAME_AR: &[&str] = &["name_ar", "name", "שם", "اسم", "الاسم", "שם מלא", "full name"];
const NAME_HE: &[&str] = &["name_he", "hebrew name", "שם בעברית", "الاسم بالعبرية"];
const NAME_EN: &[&str] = &["name_en", "english name", "שם באנגלית", "الاسم بالانجليزية"];
const PHONE: &[&str] = &["phone", "tel", "mobile", "טלפון", "נייד", "هاتف", "جوال"];
const PARENT_PHONE: &[&str] = &[
    "parent phone",
    "guardian phone",
    "טלפון הורה",
    "هاتف ولي الامر",
];
const TRAINER: &[&str] = &["trainer", "coach", "מאמן", "מאמנת", "مدرب", "المدرب"];
const HALL: &[&str] = &["hall", "gym", "venue", "אולם", "قاعة", "الصالة"];
const CLASS: &[&str] = &["team", "class", "group", "קבוצה", "חוג", "فريق", "مجموعة", "الفريق"];
const CATEGORY: &[&str] = &["category", "קטגוריה", "فئة", "تصنيف"];
const AGE_GROUP: &[&str] = &["age group", "ages", "גילאים", "קבוצת גיל", "الفئة العمرية"];
const MONTHLY_FEE: &[&str] = &["fee", "price", "monthly fee", "מחיר", "תשלום", "السعر", "الاشتراك"];
const SPECIALTY: &[&str] = &["specialty", "התמחות", "تخصص"];
const BIRTH_YEAR: &[&str] = &["birth year", "year of birth", "שנת לידה", "سنة الميلاد"];
const ACTIVE: &[&str] = &["active", "פעיל", "فعال", "نشط"];
const ADDRESS: &[&str] = &["address", "כתובת", "عنوان"];
const CAPACITY: &[&str] = &["capacity", "seats", "קיבולת", "سعة"];

/// Read-only schema registry, in declaration (preference) order.
pub static REGISTRY: Lazy<Vec<TableSchema>> = Lazy::new(|| {
    vec![
        TableSchema {
            table: TargetTable::Classes,
            fields: vec![
                field("name_ar", NAME_AR, true),
                field("name_he", NAME_HE, false),
                field("name_en", NAME_EN, false),
                field("trainer_id", TRAINER, false),
                field("hall_id", HALL, false),
                field("category", CATEGORY, false),
                field("age_group", AGE_GROUP, false),
                field("monthly_fee", MONTHLY_FEE, false),
            ],
        },
        TableSchema {
            table: TargetTable::Trainers,
            fields: vec![
                field("name_ar", NAME_AR, true),
                field("name_he", NAME_HE, false),
                field("name_en", NAME_EN, false),
                field("phone", PHONE, false),
                field("specialty", SPECIALTY, false),
            ],
        },
        TableSchema {
            table: TargetTable::Trainees,
            fields: vec![
                field("name_ar", NAME_AR, true),
                field("name_he", NAME_HE, false),
                field("name_en", NAME_EN, false),
                field("phone", PHONE, false),
                field("parent_phone", PARENT_PHONE, false),
                field("class_id", CLASS, false),
                field("birth_year", BIRTH_YEAR, false),
                field("active", ACTIVE, false),
            ],
        },
        TableSchema {
            table: TargetTable::Halls,
            fields: vec![
                field("name_ar", NAME_AR, true),
                field("name_he", NAME_HE, false),
                field("name_en", NAME_EN, false),
                field("address", ADDRESS, false),
                field("capacity", CAPACITY, false),
            ],
        },
    ]
});

/// Look up the schema for a target table.
pub fn schema_for(table: TargetTable) -> &'static TableSchema {
    REGISTRY
        .iter()
        .find(|s| s.table == table)
        .expect("registry covers every TargetTable")
}
