//! Error taxonomy for the import pipeline.
//!
//! Parse errors are terminal — the pipeline never starts. Row-level
//! validation problems are *not* errors at this level; they travel inside
//! `PreviewRow` as statuses and messages so the caller sees the full
//! picture before committing to an import.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported file type: .{0}. Supported: .csv, .xlsx, .xlsm")]
    UnsupportedFormat(String),

    #[error("failed to decode workbook: {0}")]
    Decode(String),

    #[error("workbook contains no sheets")]
    EmptyWorkbook,

    #[error("sheet index {0} out of range ({1} sheets)")]
    SheetOutOfRange(usize, usize),

    #[error("unknown target table: {0}")]
    UnknownTable(String),
}
