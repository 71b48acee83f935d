//! Cell value codec
//!
//! Converts between JSON values and typed cell contents. Writing understands
//! the wrapped form `{data, format, indent}` for cell-level formatting,
//! ISO-8601 date detection and `=`-prefixed formulas. Reading mirrors that in
//! two modes: through the engine's evaluator (cached formula results, with
//! failures degraded to a `#ERROR` sentinel) or straight from the statically
//! cached result type.

use crate::engine::{evaluate_cell, Cell, CellValue, Style};
use crate::error::SheetPortResult;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Sentinel emitted when a cell cannot be resolved through the evaluator.
pub const ERROR_SENTINEL: &str = "#ERROR";

/// Write a JSON value into a cell. Returns `true` when an explicit cell-level
/// number format was applied, which tells table population not to overwrite
/// this cell with the replicated column style.
pub fn write_json_into_cell(value: &Value, cell: &mut Cell) -> SheetPortResult<bool> {
    write_with_format(value, cell, None, None)
}

fn write_with_format(
    value: &Value,
    cell: &mut Cell,
    format: Option<&str>,
    indent: Option<i64>,
) -> SheetPortResult<bool> {
    match value {
        Value::Null => cell.value = CellValue::Blank,
        // The unwrapping step: take "data" as the value, with "format" and
        // "indent" as cell-level formatting side channels
        Value::Object(map) => {
            if let Some(data) = map.get("data") {
                let format = map.get("format").and_then(Value::as_str);
                let indent = map.get("indent").and_then(Value::as_i64);
                return write_with_format(data, cell, format, indent);
            }
            return Ok(false);
        }
        Value::Bool(b) => cell.value = CellValue::Bool(*b),
        Value::Number(n) => {
            cell.value = CellValue::Number(n.as_f64().unwrap_or(f64::NAN));
        }
        Value::String(s) => {
            if let Some(date) = parse_iso_datetime(s) {
                cell.value = CellValue::DateTime(date);
            } else if let Some(formula) = s.strip_prefix('=') {
                cell.value = CellValue::Formula {
                    text: formula.to_string(),
                    cached: None,
                };
            } else {
                cell.value = CellValue::String(s.clone());
            }
        }
        Value::Array(_) => cell.value = CellValue::String(value.to_string()),
    }

    if format.is_some() || indent.is_some() {
        // Clone before mutating so shared styles are not corrupted
        let mut style = Style::clone(&cell.style);
        if let Some(format) = format {
            style.number_format = Some(normalize_number_format(format));
        }
        if let Some(indent) = indent {
            style.indent = Some(indent.clamp(0, u8::MAX as i64) as u8);
            style.align_left = true;
        }
        cell.style = Arc::new(style);
        if format.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Format strings carrying both `.` and `,` come from the alternate decimal
/// locale; swap the two separators before handing the format to the registry.
pub fn normalize_number_format(format: &str) -> String {
    if format.contains('.') && format.contains(',') {
        format
            .replace('.', "\u{0}")
            .replace(',', ".")
            .replace('\u{0}', ",")
    } else {
        format.to_string()
    }
}

/// Read a cell through the evaluator. Returns the JSON value plus whether the
/// cell counts as empty for table-scan termination.
pub fn read_cell_evaluated(cell: Option<&Cell>) -> (Value, bool) {
    let Some(cell) = cell else {
        return (Value::Null, true);
    };
    match evaluate_cell(cell) {
        Ok(resolved) => read_resolved(&resolved, cell),
        Err(e) => {
            warn!("failed to evaluate cell: {e}");
            (Value::String(ERROR_SENTINEL.to_string()), true)
        }
    }
}

/// Read a cell without evaluating, using the statically cached result type for
/// formula cells.
pub fn read_cell_cached(cell: Option<&Cell>) -> (Value, bool) {
    let Some(cell) = cell else {
        return (Value::Null, true);
    };
    match &cell.value {
        CellValue::Formula { cached, .. } => match cached {
            Some(result) => read_resolved(result, cell),
            None => (Value::Null, true),
        },
        other => read_resolved(other, cell),
    }
}

fn read_resolved(value: &CellValue, cell: &Cell) -> (Value, bool) {
    match value {
        CellValue::Blank => (Value::Null, true),
        CellValue::String(s) => (Value::String(s.clone()), s.is_empty()),
        CellValue::Bool(b) => (Value::Bool(*b), false),
        CellValue::Error(code) => (Value::String(code.clone()), true),
        CellValue::DateTime(dt) => (Value::String(iso_string(*dt)), false),
        CellValue::Number(n) => {
            if cell.style.is_date_format() {
                match excel_serial_to_datetime(*n) {
                    Some(dt) => (Value::String(iso_string(dt)), false),
                    None => (Value::from(*n), false),
                }
            } else {
                (Value::from(*n), false)
            }
        }
        CellValue::Formula { cached, .. } => match cached {
            Some(result) => read_resolved(result, cell),
            None => (Value::Null, true),
        },
    }
}

/// Quick shape check before the strict parse: anything shorter than a full
/// ISO timestamp with milliseconds is not treated as a date, so date-only
/// strings stay plain strings.
pub fn is_formatted_as_date(s: &str) -> bool {
    parse_iso_datetime(s).is_some()
}

/// Parse an ISO-8601-like timestamp. Trailing fraction/zone text is accepted
/// and ignored.
pub fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    let bytes = s.as_bytes();
    if bytes.len() < 23 || bytes[4] != b'-' || bytes[7] != b'-' || bytes[10] != b'T' {
        return None;
    }
    NaiveDateTime::parse_and_remainder(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|(dt, _)| dt)
}

/// Render a datetime as an ISO-8601 UTC string.
pub fn iso_string(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Convert an Excel serial number (1900 date system) to a datetime.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(EXCEL_EPOCH.0, EXCEL_EPOCH.1, EXCEL_EPOCH.2)?
        .and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

/// Convert a datetime to an Excel serial number (1900 date system).
pub fn datetime_to_excel_serial(dt: NaiveDateTime) -> f64 {
    let base = NaiveDate::from_ymd_opt(EXCEL_EPOCH.0, EXCEL_EPOCH.1, EXCEL_EPOCH.2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let days = (dt.date() - base.date()).num_days() as f64;
    let seconds = dt.num_seconds_from_midnight() as f64;
    days + seconds / 86_400.0
}

/// Render any cell as display text, the way the header row and marker cells
/// are read during extraction.
pub fn formatted_cell_text(cell: Option<&Cell>) -> String {
    let Some(cell) = cell else {
        return String::new();
    };
    match &cell.value {
        CellValue::Formula { cached, .. } => match cached.as_deref() {
            Some(result) => display_value(result),
            None => String::new(),
        },
        other => display_value(other),
    }
}

fn display_value(value: &CellValue) -> String {
    match value {
        CellValue::Blank => String::new(),
        CellValue::String(s) => s.clone(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Error(code) => code.clone(),
        CellValue::DateTime(dt) => iso_string(*dt),
        CellValue::Number(n) => format_number(*n),
        CellValue::Formula { .. } => String::new(),
    }
}

/// Format a number for display, removing unnecessary decimal places.
fn format_number(n: f64) -> String {
    let rounded = (n * 1e6).round() / 1e6;
    format!("{rounded:.6}")
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_null_reads_back_empty() {
        let mut cell = Cell::default();
        cell.value = CellValue::Number(1.0);
        let formatted = write_json_into_cell(&Value::Null, &mut cell).unwrap();
        assert!(!formatted);
        assert!(cell.value.is_blank());
        let (value, empty) = read_cell_cached(Some(&cell));
        assert_eq!(value, Value::Null);
        assert!(empty);
    }

    #[test]
    fn test_write_number_reads_back() {
        let mut cell = Cell::default();
        write_json_into_cell(&json!(42), &mut cell).unwrap();
        let (value, empty) = read_cell_cached(Some(&cell));
        assert_eq!(value, json!(42.0));
        assert!(!empty);
    }

    #[test]
    fn test_write_formula_strips_prefix() {
        let mut cell = Cell::default();
        write_json_into_cell(&json!("=A1+1"), &mut cell).unwrap();
        match &cell.value {
            CellValue::Formula { text, cached } => {
                assert_eq!(text, "A1+1");
                assert!(cached.is_none());
            }
            other => panic!("expected formula cell, got {other:?}"),
        }
    }

    #[test]
    fn test_full_timestamp_is_date_but_date_only_is_not() {
        assert!(is_formatted_as_date("2021-03-04T10:30:00.000Z"));
        assert!(!is_formatted_as_date("1982-01-25"));
        assert!(!is_formatted_as_date("2021-03-04T10:30:00"));
        assert!(!is_formatted_as_date("not a date at all, honest"));

        let mut cell = Cell::default();
        write_json_into_cell(&json!("2021-03-04T10:30:00.000Z"), &mut cell).unwrap();
        let (value, empty) = read_cell_cached(Some(&cell));
        assert_eq!(value, json!("2021-03-04T10:30:00Z"));
        assert!(!empty);

        let mut cell = Cell::default();
        write_json_into_cell(&json!("1982-01-25"), &mut cell).unwrap();
        assert_eq!(cell.value, CellValue::String("1982-01-25".into()));
    }

    #[test]
    fn test_wrapped_value_applies_cloned_style() {
        let mut cell = Cell::default();
        let shared = cell.style.clone();
        let formatted =
            write_json_into_cell(&json!({"data": 12.5, "format": "0.00", "indent": 2}), &mut cell)
                .unwrap();
        assert!(formatted);
        assert_eq!(cell.value, CellValue::Number(12.5));
        assert_eq!(cell.style.number_format.as_deref(), Some("0.00"));
        assert_eq!(cell.style.indent, Some(2));
        assert!(cell.style.align_left);
        // The original shared style must be untouched
        assert_eq!(*shared, Style::default());
    }

    #[test]
    fn test_wrapped_indent_only_is_not_cell_level_format() {
        let mut cell = Cell::default();
        let formatted =
            write_json_into_cell(&json!({"data": "x", "indent": 1}), &mut cell).unwrap();
        assert!(!formatted);
        assert_eq!(cell.style.indent, Some(1));
    }

    #[test]
    fn test_object_without_data_is_ignored() {
        let mut cell = Cell::default();
        cell.value = CellValue::Number(7.0);
        let formatted = write_json_into_cell(&json!({"foo": 1}), &mut cell).unwrap();
        assert!(!formatted);
        assert_eq!(cell.value, CellValue::Number(7.0));
    }

    #[test]
    fn test_locale_separator_swap() {
        assert_eq!(normalize_number_format("#.##0,00"), "#,##0.00");
        assert_eq!(normalize_number_format("0.00"), "0.00");
        assert_eq!(normalize_number_format("#,##0"), "#,##0");
    }

    #[test]
    fn test_read_evaluated_error_sentinel() {
        let mut cell = Cell::default();
        cell.value = CellValue::Formula {
            text: "BROKEN()".into(),
            cached: None,
        };
        let (value, empty) = read_cell_evaluated(Some(&cell));
        assert_eq!(value, json!(ERROR_SENTINEL));
        assert!(empty);

        // Non-evaluated mode treats the same cell as blank
        let (value, empty) = read_cell_cached(Some(&cell));
        assert_eq!(value, Value::Null);
        assert!(empty);
    }

    #[test]
    fn test_read_error_value_is_empty() {
        let mut cell = Cell::default();
        cell.value = CellValue::Error("#DIV/0!".into());
        let (value, empty) = read_cell_evaluated(Some(&cell));
        assert_eq!(value, json!("#DIV/0!"));
        assert!(empty);
    }

    #[test]
    fn test_date_formatted_number_reads_as_iso() {
        let mut cell = Cell::default();
        cell.style = Arc::new(Style {
            number_format: Some("yyyy-mm-dd".into()),
            ..Default::default()
        });
        let serial = datetime_to_excel_serial(
            NaiveDate::from_ymd_opt(2021, 3, 4)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
        );
        cell.value = CellValue::Number(serial);
        let (value, empty) = read_cell_evaluated(Some(&cell));
        assert_eq!(value, json!("2021-03-04T10:30:00Z"));
        assert!(!empty);
    }

    #[test]
    fn test_serial_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        let back = excel_serial_to_datetime(datetime_to_excel_serial(dt)).unwrap();
        assert_eq!(back, dt);
    }

    #[test]
    fn test_formatted_cell_text() {
        let mut cell = Cell::default();
        cell.value = CellValue::Number(12.50);
        assert_eq!(formatted_cell_text(Some(&cell)), "12.5");
        cell.value = CellValue::String("Qty".into());
        assert_eq!(formatted_cell_text(Some(&cell)), "Qty");
        cell.value = CellValue::Formula {
            text: "1+1".into(),
            cached: Some(Box::new(CellValue::Number(2.0))),
        };
        assert_eq!(formatted_cell_text(Some(&cell)), "2");
        assert_eq!(formatted_cell_text(None), "");
    }
}
