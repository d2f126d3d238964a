//! Workbook parsing for CSV and Excel (.xlsx/.xlsm) uploads.
//!
//! Produces a uniform `ParsedWorkbook` regardless of source format:
//! merged cells are expanded, the header row is detected (title rows and
//! blank leading rows are tolerated), blank headers get positional
//! placeholders, sparse "category" columns are forward-filled, and fully
//! blank rows are dropped before keying.

use std::io::Cursor;

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ImportError;

/// How many leading rows are scanned when detecting the header row.
const HEADER_SCAN_ROWS: usize = 5;

/// An immutable parsed workbook: file name + ordered sheets.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedWorkbook {
    pub file_name: String,
    pub sheets: Vec<ParsedSheet>,
}

/// One parsed sheet. Created once per parse call, never mutated afterward.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedSheet {
    pub name: String,
    /// Unique display labels; blanks are synthesized as "Column N".
    pub headers: Vec<String>,
    /// Header-keyed data rows. Fully blank rows are dropped.
    pub rows: Vec<Map<String, Value>>,
    /// Raw 2D array post merged-cell expansion and forward-fill.
    pub grid: Vec<Vec<Value>>,
    pub row_count: usize,
}

/// Dispatch file parsing by extension.
pub fn parse_workbook(filename: &str, data: &[u8]) -> Result<ParsedWorkbook, ImportError> {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();

    let sheets = match ext.as_str() {
        "csv" => parse_csv(filename, data)?,
        "xlsx" | "xlsm" => parse_xlsx(data)?,
        _ => return Err(ImportError::UnsupportedFormat(ext)),
    };

    if sheets.is_empty() {
        return Err(ImportError::EmptyWorkbook);
    }

    Ok(ParsedWorkbook {
        file_name: filename.to_string(),
        sheets,
    })
}

/// Parse a CSV file into a single sheet. The header row is detected the
/// same way as for Excel rather than assumed to be row 0, so CSV exports
/// with a title line behave like their spreadsheet counterparts.
fn parse_csv(filename: &str, data: &[u8]) -> Result<Vec<ParsedSheet>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(data);

    let mut grid: Vec<Vec<Value>> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ImportError::Decode(e.to_string()))?;
        let row: Vec<Value> = record
            .iter()
            .map(|f| {
                let t = f.trim();
                if t.is_empty() {
                    Value::Null
                } else {
                    Value::String(f.to_string())
                }
            })
            .collect();
        grid.push(row);
    }

    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim_end_matches(".csv")
        .to_string();

    Ok(vec![build_sheet(&name, grid)])
}

/// Parse an xlsx/xlsm file. All worksheets become separate sheets.
fn parse_xlsx(data: &[u8]) -> Result<Vec<ParsedSheet>, ImportError> {
    let cursor = Cursor::new(data);
    let mut workbook: Xlsx<_> = open_workbook_from_rs(cursor)
        .map_err(|e: calamine::XlsxError| ImportError::Decode(e.to_string()))?;

    // Merge info is an enhancement; the sheet is still usable without it.
    let merges_loaded = match workbook.load_merged_regions() {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to load merged regions: {}", e);
            false
        }
    };

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut sheets = Vec::new();

    for name in &sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping sheet '{}': {}", name, e);
                continue;
            }
        };

        let origin = range.start().unwrap_or((0, 0));
        let (height, width) = range.get_size();
        let mut grid = vec![vec![Value::Null; width]; height];
        for (r, row) in range.rows().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                grid[r][c] = cell_to_value(cell);
            }
        }

        if merges_loaded {
            let merges: Vec<calamine::Dimensions> = workbook
                .merged_regions()
                .iter()
                .filter(|(sheet, _, _)| sheet == name)
                .map(|(_, _, dims)| *dims)
                .collect();
            expand_merges(&mut grid, &merges, origin);
        }

        sheets.push(build_sheet(name, grid));
    }

    Ok(sheets)
}

/// Copy each merged range's top-left value into every cell of the range,
/// so merged headers and category cells do not appear blank downstream.
fn expand_merges(grid: &mut [Vec<Value>], merges: &[calamine::Dimensions], origin: (u32, u32)) {
    for dims in merges {
        let r0 = (dims.start.0.saturating_sub(origin.0)) as usize;
        let c0 = (dims.start.1.saturating_sub(origin.1)) as usize;
        let r1 = (dims.end.0.saturating_sub(origin.0)) as usize;
        let c1 = (dims.end.1.saturating_sub(origin.1)) as usize;

        let top_left = match grid.get(r0).and_then(|row| row.get(c0)) {
            Some(v) if !v.is_null() => v.clone(),
            _ => continue,
        };

        for r in r0..=r1 {
            let Some(row) = grid.get_mut(r) else { break };
            for c in c0..=c1 {
                if let Some(cell) = row.get_mut(c) {
                    *cell = top_left.clone();
                }
            }
        }
    }
}

/// Build a `ParsedSheet` from a raw grid: detect the header row, label
/// columns, forward-fill sparse columns, and key the data rows.
fn build_sheet(name: &str, mut grid: Vec<Vec<Value>>) -> ParsedSheet {
    let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);
    for row in &mut grid {
        row.resize(width, Value::Null);
    }

    if grid.is_empty() || width == 0 {
        return ParsedSheet {
            name: name.to_string(),
            headers: Vec::new(),
            rows: Vec::new(),
            grid,
            row_count: 0,
        };
    }

    let header_row = detect_header_row(&grid);
    let headers = build_headers(&grid[header_row], width);

    forward_fill(&mut grid, header_row);

    let mut rows: Vec<Map<String, Value>> = Vec::new();
    for raw_row in grid.iter().skip(header_row + 1) {
        if raw_row.iter().all(Value::is_null) {
            continue;
        }
        let mut obj = Map::new();
        for (i, header) in headers.iter().enumerate() {
            obj.insert(header.clone(), raw_row.get(i).cloned().unwrap_or(Value::Null));
        }
        rows.push(obj);
    }

    debug!(
        "Sheet '{}': header row {}, {} columns, {} data rows",
        name,
        header_row,
        headers.len(),
        rows.len()
    );

    let row_count = rows.len();
    ParsedSheet {
        name: name.to_string(),
        headers,
        rows,
        grid,
        row_count,
    }
}

/// Pick the header row: of the first 5 rows, the one with the most
/// non-null cells wins; ties go to the earliest. Tolerates title rows
/// and blank leading rows.
fn detect_header_row(grid: &[Vec<Value>]) -> usize {
    let mut best_row = 0;
    let mut best_count = 0;
    for (i, row) in grid.iter().take(HEADER_SCAN_ROWS).enumerate() {
        let count = row.iter().filter(|v| !v.is_null()).count();
        if count > best_count {
            best_count = count;
            best_row = i;
        }
    }
    best_row
}

/// Build unique display labels from the header row. Null cells become
/// positional placeholders; duplicates get a numeric suffix so every
/// column has a usable key.
fn build_headers(header_row: &[Value], width: usize) -> Vec<String> {
    let mut headers = Vec::with_capacity(width);
    for i in 0..width {
        let label = match header_row.get(i) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(v) if !v.is_null() => display_value(v),
            _ => format!("Column {}", i + 1),
        };

        let mut unique = label.clone();
        let mut n = 2;
        while headers.contains(&unique) {
            unique = format!("{} ({})", label, n);
            n += 1;
        }
        headers.push(unique);
    }
    headers
}

/// Forward-fill sparse columns: a column with more empty than filled
/// cells among the data rows (but at least one value) carries its last
/// seen value downward. Supports category headers that appear once and
/// implicitly apply to the rows below. Idempotent: only null cells are
/// ever written.
pub(crate) fn forward_fill(grid: &mut [Vec<Value>], header_row: usize) {
    let data_start = header_row + 1;
    if grid.len() <= data_start {
        return;
    }
    let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);

    for col in 0..width {
        let mut filled = 0;
        let mut empty = 0;
        for row in &grid[data_start..] {
            match row.get(col) {
                Some(v) if !v.is_null() => filled += 1,
                _ => empty += 1,
            }
        }
        if filled == 0 || empty <= filled {
            continue;
        }

        let mut last: Option<Value> = None;
        for row in &mut grid[data_start..] {
            match row.get_mut(col) {
                Some(cell) if !cell.is_null() => last = Some(cell.clone()),
                Some(cell) => {
                    if let Some(ref v) = last {
                        *cell = v.clone();
                    }
                }
                None => {}
            }
        }
    }
}

/// Convert a calamine cell to a JSON value. Dates become ISO strings.
fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => {
            if s.trim().is_empty() {
                Value::Null
            } else {
                Value::String(s.clone())
            }
        }
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(d) => {
                let formatted = if d.time() == chrono::NaiveTime::MIN {
                    d.format("%Y-%m-%d").to_string()
                } else {
                    d.format("%Y-%m-%d %H:%M:%S").to_string()
                };
                Value::String(formatted)
            }
            None => Value::Null,
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(e) => Value::String(format!("#ERR:{:?}", e)),
    }
}

/// Render a cell value for display. Whole floats lose the trailing ".0".
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f == f.trunc() && f.abs() < i64::MAX as f64 {
                    return format!("{}", f as i64);
                }
            }
            n.to_string()
        }
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
