//! Workbook adapter: reads the two source worksheets, coerces cells into
//! typed records, and hands them to the core pipeline.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use dram_report_core::{
    assemble_table, LoadOptions, ReportError, ScoreRecord, TastingTable, WhiskyId, WhiskyRecord,
};
use tracing::debug;

pub const SCORES_SHEET: &str = "Scores";
pub const WHISKIES_SHEET: &str = "Whiskies";

/// Raw bottling value marking a distillery (original) bottling.
const ORIGINAL_BOTTLING_MARKER: &str = "OB";

const COL_WHISKY_ID: &str = "Whisky_ID";
const COL_ATTENDEE: &str = "Attendee";
const COL_MEETING: &str = "Meeting_Number";
const COL_GUEST: &str = "Guest";
const COL_SCORE: &str = "Whisky_Score";
const COL_DISTILLERY: &str = "Whisky_Distillery";
const COL_AGE: &str = "Whisky_Age_Corrected";
const COL_DESCRIPTION: &str = "Whisky_Description";
const COL_REGION: &str = "Whisky_Region";
const COL_ABV: &str = "Whisky_ABV";
const COL_PRICE: &str = "Whisky_Price";
const COL_BOTTLING: &str = "Whisky_Bottling";

/// Loads the workbook, reads both sheets, and runs the cleaning pipeline.
///
/// # Errors
/// Returns [`ReportError::SourceNotFound`] when the workbook file is absent
/// and [`ReportError::LoadFailed`] for unreadable sheets, missing columns,
/// or uncoercible cells.
pub fn load_tasting_table(path: &Path, options: &LoadOptions) -> Result<TastingTable, ReportError> {
    if !path.exists() {
        return Err(ReportError::SourceNotFound {
            path: path.display().to_string(),
        });
    }

    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|err| {
        ReportError::LoadFailed(format!("failed to open workbook {}: {err}", path.display()))
    })?;

    let scores_range = workbook.worksheet_range(SCORES_SHEET).map_err(|err| {
        ReportError::LoadFailed(format!("failed to read sheet {SCORES_SHEET}: {err}"))
    })?;
    let whiskies_range = workbook.worksheet_range(WHISKIES_SHEET).map_err(|err| {
        ReportError::LoadFailed(format!("failed to read sheet {WHISKIES_SHEET}: {err}"))
    })?;

    let scores = read_scores(&scores_range)?;
    let whiskies = read_whiskies(&whiskies_range)?;
    debug!(
        scores = scores.len(),
        whiskies = whiskies.len(),
        "loaded workbook sheets"
    );

    assemble_table(scores, whiskies, options)
}

fn read_scores(range: &Range<Data>) -> Result<Vec<ScoreRecord>, ReportError> {
    let header = header_index(range, SCORES_SHEET)?;
    let id_col = require_column(&header, SCORES_SHEET, COL_WHISKY_ID)?;
    let attendee_col = require_column(&header, SCORES_SHEET, COL_ATTENDEE)?;
    let meeting_col = require_column(&header, SCORES_SHEET, COL_MEETING)?;
    let score_col = require_column(&header, SCORES_SHEET, COL_SCORE)?;
    // The guest column is optional; its absence disables guest handling.
    let guest_col = header.get(COL_GUEST).copied();

    let mut records = Vec::new();
    for (row_number, row) in range.rows().enumerate().skip(1) {
        if is_blank(cell(row, id_col)) {
            continue;
        }
        records.push(ScoreRecord {
            whisky: read_id(row, id_col, SCORES_SHEET, row_number, COL_WHISKY_ID)?,
            attendee: required_string(row, attendee_col, SCORES_SHEET, row_number, COL_ATTENDEE)?,
            meeting: read_integer(row, meeting_col, SCORES_SHEET, row_number, COL_MEETING)?,
            guest: guest_col.and_then(|index| cell_to_bool(cell(row, index))),
            score: required_f64(row, score_col, SCORES_SHEET, row_number, COL_SCORE)?,
        });
    }
    Ok(records)
}

fn read_whiskies(range: &Range<Data>) -> Result<Vec<WhiskyRecord>, ReportError> {
    let header = header_index(range, WHISKIES_SHEET)?;
    let id_col = require_column(&header, WHISKIES_SHEET, COL_WHISKY_ID)?;
    let distillery_col = require_column(&header, WHISKIES_SHEET, COL_DISTILLERY)?;
    let age_col = require_column(&header, WHISKIES_SHEET, COL_AGE)?;
    let description_col = require_column(&header, WHISKIES_SHEET, COL_DESCRIPTION)?;
    let region_col = require_column(&header, WHISKIES_SHEET, COL_REGION)?;
    let abv_col = require_column(&header, WHISKIES_SHEET, COL_ABV)?;
    let price_col = require_column(&header, WHISKIES_SHEET, COL_PRICE)?;
    let meeting_col = require_column(&header, WHISKIES_SHEET, COL_MEETING)?;
    let bottling_col = require_column(&header, WHISKIES_SHEET, COL_BOTTLING)?;

    let mut records = Vec::new();
    for (row_number, row) in range.rows().enumerate().skip(1) {
        if is_blank(cell(row, id_col)) {
            continue;
        }
        let bottling = cell_to_string(cell(row, bottling_col)).unwrap_or_default();
        records.push(WhiskyRecord {
            whisky: read_id(row, id_col, WHISKIES_SHEET, row_number, COL_WHISKY_ID)?,
            distillery: cell_to_string(cell(row, distillery_col)).unwrap_or_default(),
            age_years: optional_f64(row, age_col, WHISKIES_SHEET, row_number, COL_AGE)?,
            description: cell_to_string(cell(row, description_col)).unwrap_or_default(),
            region: cell_to_string(cell(row, region_col)).unwrap_or_default(),
            abv: required_f64(row, abv_col, WHISKIES_SHEET, row_number, COL_ABV)?,
            price: required_f64(row, price_col, WHISKIES_SHEET, row_number, COL_PRICE)?,
            original_bottling: bottling == ORIGINAL_BOTTLING_MARKER,
            meeting: read_integer(row, meeting_col, WHISKIES_SHEET, row_number, COL_MEETING)?,
        });
    }
    Ok(records)
}

/// Maps header names to column positions, resolved once per sheet.
fn header_index(range: &Range<Data>, sheet: &str) -> Result<HashMap<String, usize>, ReportError> {
    let Some(header) = range.rows().next() else {
        return Err(ReportError::LoadFailed(format!("sheet {sheet} is empty")));
    };

    let mut map = HashMap::new();
    for (index, value) in header.iter().enumerate() {
        if let Some(name) = cell_to_string(value) {
            map.entry(name).or_insert(index);
        }
    }
    Ok(map)
}

fn require_column(
    header: &HashMap<String, usize>,
    sheet: &str,
    name: &str,
) -> Result<usize, ReportError> {
    header.get(name).copied().ok_or_else(|| {
        ReportError::LoadFailed(format!("sheet {sheet} is missing required column {name}"))
    })
}

fn cell<'a>(row: &'a [Data], index: usize) -> &'a Data {
    row.get(index).unwrap_or(&Data::Empty)
}

fn is_blank(value: &Data) -> bool {
    match value {
        Data::Empty => true,
        Data::String(raw) => raw.trim().is_empty(),
        _ => false,
    }
}

#[allow(clippy::cast_precision_loss)]
fn cell_to_f64(value: &Data) -> Option<f64> {
    match value {
        Data::Float(number) => Some(*number),
        Data::Int(number) => Some(*number as f64),
        Data::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

fn cell_to_string(value: &Data) -> Option<String> {
    match value {
        Data::String(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Data::Float(number) => Some(number.to_string()),
        Data::Int(number) => Some(number.to_string()),
        Data::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn cell_to_bool(value: &Data) -> Option<bool> {
    match value {
        Data::Bool(flag) => Some(*flag),
        Data::Float(number) => Some(*number != 0.0),
        Data::Int(number) => Some(*number != 0),
        Data::String(raw) => match raw.trim() {
            "1" | "true" | "TRUE" | "True" => Some(true),
            "0" | "false" | "FALSE" | "False" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn required_f64(
    row: &[Data],
    index: usize,
    sheet: &str,
    row_number: usize,
    column: &str,
) -> Result<f64, ReportError> {
    cell_to_f64(cell(row, index)).ok_or_else(|| coercion_error(sheet, row_number, column, "number"))
}

fn optional_f64(
    row: &[Data],
    index: usize,
    sheet: &str,
    row_number: usize,
    column: &str,
) -> Result<Option<f64>, ReportError> {
    let value = cell(row, index);
    if is_blank(value) {
        return Ok(None);
    }
    cell_to_f64(value)
        .map(Some)
        .ok_or_else(|| coercion_error(sheet, row_number, column, "number"))
}

fn required_string(
    row: &[Data],
    index: usize,
    sheet: &str,
    row_number: usize,
    column: &str,
) -> Result<String, ReportError> {
    cell_to_string(cell(row, index)).ok_or_else(|| coercion_error(sheet, row_number, column, "text"))
}

#[allow(clippy::cast_possible_truncation)]
fn read_integer(
    row: &[Data],
    index: usize,
    sheet: &str,
    row_number: usize,
    column: &str,
) -> Result<i64, ReportError> {
    let value =
        cell_to_f64(cell(row, index)).ok_or_else(|| coercion_error(sheet, row_number, column, "number"))?;
    if value.fract() != 0.0 {
        return Err(ReportError::LoadFailed(format!(
            "sheet {sheet} row {row_number}: column {column} holds fractional value {value}"
        )));
    }
    Ok(value as i64)
}

fn read_id(
    row: &[Data],
    index: usize,
    sheet: &str,
    row_number: usize,
    column: &str,
) -> Result<WhiskyId, ReportError> {
    read_integer(row, index, sheet, row_number, column).map(WhiskyId)
}

fn coercion_error(sheet: &str, row_number: usize, column: &str, expected: &str) -> ReportError {
    ReportError::LoadFailed(format!(
        "sheet {sheet} row {row_number}: column {column} is not coercible to {expected}"
    ))
}
