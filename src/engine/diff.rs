//! Workbook comparison
//!
//! Compares two workbooks sheet by sheet and reports the differences as
//! human-readable strings: sheet count and names, row extents, formatted cell
//! values, and table presence/row counts. Used to verify populated output
//! against a reference workbook.

use super::Workbook;
use crate::codec::formatted_cell_text;

/// Diff `actual` against `expected` and return one message per difference;
/// an empty list means the workbooks match.
pub fn diff_workbooks(expected: &Workbook, actual: &Workbook) -> Vec<String> {
    let mut errors = Vec::new();
    if expected.sheet_count() != actual.sheet_count() {
        errors.push(format!(
            "Number of sheets differ, expected [{}] does not match actual [{}]",
            expected.sheet_count(),
            actual.sheet_count()
        ));
    }
    for (index, expected_sheet) in expected.sheets().iter().enumerate() {
        let Some(actual_sheet) = actual.sheet_at(index) else {
            continue;
        };
        if expected_sheet.name() != actual_sheet.name() {
            errors.push(format!(
                "Sheet name expected [{}] does not match actual [{}]",
                expected_sheet.name(),
                actual_sheet.name()
            ));
        }
        let expected_rows = expected_sheet.max_row().map(|r| r + 1).unwrap_or(0);
        let actual_rows = actual_sheet.max_row().map(|r| r + 1).unwrap_or(0);
        if expected_rows > actual_rows {
            errors.push(format!(
                "Number of rows in sheet [{}] differ, expected [{expected_rows}] does not match \
                 actual [{actual_rows}]",
                expected_sheet.name()
            ));
        }
        for (at, expected_cell) in expected_sheet.cells() {
            let expected_value = formatted_cell_text(Some(expected_cell));
            let actual_value = formatted_cell_text(actual_sheet.cell(at.row, at.col));
            if expected_value != actual_value {
                errors.push(format!(
                    "Value in sheet [{}] for cell [{at}] differ, expected [{expected_value}] does \
                     not match actual [{actual_value}]",
                    expected_sheet.name()
                ));
            }
        }
        for expected_table in expected_sheet.tables() {
            match actual_sheet.table(&expected_table.name) {
                Some(actual_table) => {
                    if expected_table.area.row_count() != actual_table.area.row_count() {
                        errors.push(format!(
                            "Sheet [{}] has a table [{}] with row count [{}] but output has row \
                             count [{}]",
                            expected_sheet.name(),
                            expected_table.name,
                            expected_table.area.row_count(),
                            actual_table.area.row_count()
                        ));
                    }
                }
                None => errors.push(format!(
                    "Sheet [{}] has a table [{}] that was not found in the output",
                    expected_sheet.name(),
                    expected_table.name
                )),
            }
        }
    }
    errors
}
