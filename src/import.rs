//! Import (extraction) engine
//!
//! Reconstructs JSON from a populated workbook: requested (or wildcarded)
//! named ranges become properties, tables become arrays of row objects. A
//! table scan stops at the first fully blank row, since declared row counts
//! can be stale. When formulas are being evaluated, cells marked with the
//! input fill color get their neighbour inspected for multi-value markers and
//! a derived `<header>_array` field is synthesized.

use crate::codec::{formatted_cell_text, read_cell_cached, read_cell_evaluated};
use crate::engine::{SheetRef, Workbook};
use crate::error::{SheetPortError, SheetPortResult};
use crate::roles::{classify, CellRole};
use crate::template::expand_name;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::info;

pub const PROPERTIES: &str = "properties";
pub const TABLES: &str = "tables";

/// Import every named range and table, formulas evaluated per `evaluate`.
pub fn import_all_data(workbook: &Workbook, evaluate: bool) -> SheetPortResult<Value> {
    let request = serde_json::json!({
        PROPERTIES: ["*"],
        TABLES: ["*"],
    });
    import_data(&request, workbook, evaluate)
}

/// Import data according to the request specification. Shape problems with
/// the request abort the call; unreadable fields degrade to sentinels instead
/// of failing it.
pub fn import_data(
    request: &Value,
    workbook: &Workbook,
    evaluate: bool,
) -> SheetPortResult<Value> {
    let mut result = Map::new();
    let Some(request_map) = request.as_object() else {
        return Err(SheetPortError::Import(
            "Request should be a JSON object".to_string(),
        ));
    };

    if let Some(properties_request) = request_map.get(PROPERTIES) {
        let names = requested_property_names(properties_request, workbook)?;
        result.insert(
            PROPERTIES.to_string(),
            read_properties(&names, workbook, evaluate),
        );
    }

    if let Some(tables_request) = request_map.get(TABLES) {
        let tables = requested_tables(tables_request, workbook)?;
        let mut tables_result = Map::new();
        for (table_name, headers) in &tables {
            let rows = table_rows(table_name, headers.as_deref(), workbook, evaluate);
            // A collapsed table name nests the result under its sheet
            match expand_name(table_name) {
                Some((sheet_name, item_name)) => {
                    insert_nested(&mut tables_result, Some(&sheet_name), &item_name, rows)
                }
                None => insert_nested(&mut tables_result, None, table_name, rows),
            }
        }
        result.insert(TABLES.to_string(), Value::Object(tables_result));
    }

    Ok(Value::Object(result))
}

fn requested_property_names(
    request: &Value,
    workbook: &Workbook,
) -> SheetPortResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    match request {
        Value::Array(entries) => {
            for entry in entries {
                match entry.as_str() {
                    Some(name) => {
                        names.insert(name.to_string());
                    }
                    None => info!("properties array contained a non-string entry [{entry}]"),
                }
            }
        }
        Value::String(name) => {
            names.insert(name.clone());
        }
        _ => {
            return Err(SheetPortError::Import(
                "Properties is specified incorrectly. It should either be a JSON array or a \
                 single name"
                    .to_string(),
            ))
        }
    }
    if names.len() == 1 && names.contains("*") {
        names.clear();
        for name in workbook.names() {
            names.insert(name.name.clone());
        }
    }
    Ok(names)
}

type TableRequest = (String, Option<Vec<String>>);

fn requested_tables(request: &Value, workbook: &Workbook) -> SheetPortResult<Vec<TableRequest>> {
    let entries: Vec<Value> = match request {
        Value::Array(entries) => entries.clone(),
        Value::Object(_) => vec![request.clone()],
        _ => {
            return Err(SheetPortError::Import(
                "Tables is specified incorrectly. It should either be a JSON array or a single \
                 JSON object"
                    .to_string(),
            ))
        }
    };

    // Wildcard expands to every table's display name across all sheets
    if entries.len() == 1 && entries[0].as_str() == Some("*") {
        return Ok(workbook
            .all_tables()
            .into_iter()
            .map(|(_, table)| (table.name.clone(), None))
            .collect());
    }

    let mut tables = Vec::new();
    for entry in &entries {
        match entry {
            Value::String(name) => tables.push((name.clone(), None)),
            Value::Object(spec) => {
                // The first key is the table name, its value the header subset
                if let Some((name, headers)) = spec.iter().next() {
                    let headers = headers
                        .as_array()
                        .map(|h| {
                            h.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    tables.push((name.clone(), Some(headers)));
                }
            }
            other => info!("tables array contained an unusable entry [{other}]"),
        }
    }
    Ok(tables)
}

fn read_properties(names: &BTreeSet<String>, workbook: &Workbook, evaluate: bool) -> Value {
    let mut properties = Map::new();
    for key in names {
        // The same name may be defined once per sheet scope
        for name in workbook.names_matching(key) {
            let parsed = match SheetRef::parse(&name.formula) {
                Ok(parsed) => parsed,
                Err(_) => {
                    info!(
                        "Ranges not supported yet. Try using a table instead for [{key}] -> [{}]",
                        name.formula
                    );
                    continue;
                }
            };
            let (Some(ref_sheet), true) = (&parsed.sheet, parsed.area.is_single_cell()) else {
                info!(
                    "Ranges not supported yet. Try using a table instead for [{key}] -> [{}]",
                    name.formula
                );
                continue;
            };
            let cell = workbook.cell(ref_sheet, parsed.area.start.row, parsed.area.start.col);
            let (value, _) = if evaluate {
                read_cell_evaluated(cell)
            } else {
                read_cell_cached(cell)
            };
            insert_nested(&mut properties, name.sheet_scope.as_deref(), key, value);
        }
    }
    Value::Object(properties)
}

/// Read one table as an array of row objects, scanning from just below the
/// header row and stopping at (and excluding) the first fully blank row.
fn table_rows(
    table_name: &str,
    header_subset: Option<&[String]>,
    workbook: &Workbook,
    evaluate: bool,
) -> Value {
    let mut rows = Vec::new();
    let Some((sheet, table)) = workbook.table(table_name) else {
        return Value::Array(rows);
    };

    let header_row = table.header_row();
    let mut header_columns: Vec<(String, u16)> = Vec::new();
    for col in table.start_col()..=table.end_col() {
        let header = formatted_cell_text(sheet.cell(header_row, col));
        let wanted = match header_subset {
            Some(subset) => subset.is_empty() || subset.iter().any(|h| h == &header),
            None => true,
        };
        if wanted {
            header_columns.push((header, col));
        }
    }

    for row in header_row + 1..=table.end_row() {
        let mut row_empty = true;
        let mut row_data = Map::new();
        for (header, col) in &header_columns {
            let cell = sheet.cell(row, *col);
            let (value, empty) = if evaluate {
                read_cell_evaluated(cell)
            } else {
                read_cell_cached(cell)
            };
            if !empty {
                row_empty = false;
            }

            // Multi-value inputs: an input-colored cell with a marker cell to
            // its right decodes into a parallel array field
            if evaluate {
                if let Some(cell) = cell {
                    if classify(cell) == CellRole::Input {
                        let marker =
                            formatted_cell_text(sheet.cell(row, col + 1)).to_lowercase();
                        if marker.contains("fileupload") {
                            row_data.insert(format!("{header}_array"), file_upload_array(&value));
                        } else if marker.contains("multiple") {
                            row_data.insert(format!("{header}_array"), split_array(&value, ';'));
                        }
                    }
                }
            }
            row_data.insert(header.clone(), value);
        }
        if row_empty {
            info!(
                "table scan finished at row {}/{} for [{table_name}]",
                row,
                table.end_row()
            );
            break;
        }
        rows.push(Value::Object(row_data));
    }
    Value::Array(rows)
}

/// Split a comma-separated upload list into `{url, url_full}` objects, the
/// full-size variant inserting `__full_` ahead of the extension.
fn file_upload_array(value: &Value) -> Value {
    let Some(text) = value.as_str() else {
        return Value::Null;
    };
    let items: Vec<Value> = text
        .split(',')
        .map(str::trim)
        .map(|url| {
            serde_json::json!({
                "url": url,
                "url_full": full_size_url(url),
            })
        })
        .collect();
    Value::Array(items)
}

fn full_size_url(url: &str) -> String {
    match url.rfind('.') {
        Some(dot) if url.rfind('/').map_or(true, |slash| dot > slash) => {
            format!("{}__full_{}", &url[..dot], &url[dot..])
        }
        _ => format!("{url}__full_"),
    }
}

fn split_array(value: &Value, separator: char) -> Value {
    let Some(text) = value.as_str() else {
        return Value::Null;
    };
    Value::Array(
        text.split(separator)
            .map(str::trim)
            .map(|part| Value::String(part.to_string()))
            .collect(),
    )
}

fn insert_nested(map: &mut Map<String, Value>, group: Option<&str>, key: &str, value: Value) {
    match group {
        None => {
            map.insert(key.to_string(), value);
        }
        Some(group) => {
            let entry = map
                .entry(group.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = entry {
                inner.insert(key.to_string(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CellArea, CellValue, NamedRange, Rgb, Style, TableDef, Workbook};
    use serde_json::json;
    use std::sync::Arc;

    fn populated_workbook() -> Workbook {
        let mut wb = Workbook::new();
        let sheet = wb.add_sheet("Data");
        sheet.set_value(0, 0, CellValue::String("Name".into()));
        sheet.set_value(0, 1, CellValue::String("Amount".into()));
        for (i, (name, amount)) in [("a", 1.0), ("b", 2.0), ("c", 3.0)].iter().enumerate() {
            sheet.set_value(i as u32 + 1, 0, CellValue::String(name.to_string()));
            sheet.set_value(i as u32 + 1, 1, CellValue::Number(*amount));
        }
        sheet.add_table(TableDef::new("Entries", CellArea::parse("A1:B11").unwrap()));
        sheet.set_value(12, 5, CellValue::String("hello".into()));
        wb.create_name(NamedRange {
            name: "Greeting".into(),
            formula: "Data!$F$13".into(),
            sheet_scope: None,
        });
        wb
    }

    #[test]
    fn test_table_scan_stops_at_first_blank_row() {
        let wb = populated_workbook();
        let result = import_all_data(&wb, true).unwrap();
        let rows = &result["tables"]["Entries"];
        assert_eq!(
            rows,
            &json!([
                {"Name": "a", "Amount": 1.0},
                {"Name": "b", "Amount": 2.0},
                {"Name": "c", "Amount": 3.0},
            ])
        );
    }

    #[test]
    fn test_gap_row_excludes_everything_after() {
        let mut wb = populated_workbook();
        {
            let sheet = wb.sheet_mut("Data").unwrap();
            sheet.set_value(6, 0, CellValue::String("late".into()));
        }
        let result = import_all_data(&wb, true).unwrap();
        let rows = result["tables"]["Entries"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_property_extraction_and_wildcards() {
        let wb = populated_workbook();
        let request = json!({"properties": ["Greeting"]});
        let result = import_data(&request, &wb, false).unwrap();
        assert_eq!(result["properties"]["Greeting"], json!("hello"));
        assert!(result.get("tables").is_none());
    }

    #[test]
    fn test_sheet_scoped_property_nests_under_sheet() {
        let mut wb = populated_workbook();
        wb.create_name(NamedRange {
            name: "Greeting".into(),
            formula: "'My Data'!$A$1".into(),
            sheet_scope: Some("My Data".into()),
        });
        wb.add_sheet("My Data")
            .set_value(0, 0, CellValue::String("hej".into()));
        let result = import_data(&json!({"properties": ["Greeting"]}), &wb, true).unwrap();
        assert_eq!(result["properties"]["Greeting"], json!("hello"));
        assert_eq!(result["properties"]["My Data"]["Greeting"], json!("hej"));
    }

    #[test]
    fn test_multi_cell_named_range_is_skipped() {
        let mut wb = populated_workbook();
        wb.create_name(NamedRange {
            name: "Block".into(),
            formula: "Data!$A$1:$B$2".into(),
            sheet_scope: None,
        });
        let result = import_data(&json!({"properties": ["Block"]}), &wb, true).unwrap();
        assert!(result["properties"].get("Block").is_none());
    }

    #[test]
    fn test_header_subset() {
        let wb = populated_workbook();
        let request = json!({"tables": [{"Entries": ["Name"]}]});
        let result = import_data(&request, &wb, true).unwrap();
        assert_eq!(
            result["tables"]["Entries"],
            json!([{"Name": "a"}, {"Name": "b"}, {"Name": "c"}])
        );
    }

    #[test]
    fn test_collapsed_table_name_nests_under_sheet() {
        let mut wb = Workbook::new();
        let sheet = wb.add_sheet("Jan 2024");
        sheet.set_value(0, 0, CellValue::String("SKU".into()));
        sheet.set_value(1, 0, CellValue::String("x".into()));
        sheet.add_table(TableDef::new(
            crate::template::collapse_name("Jan 2024", "Items"),
            CellArea::parse("A1:A2").unwrap(),
        ));
        let result = import_all_data(&wb, true).unwrap();
        assert_eq!(
            result["tables"]["Jan 2024"]["Items"],
            json!([{"SKU": "x"}])
        );
    }

    fn input_style() -> Arc<Style> {
        Arc::new(Style {
            fill: Some(Rgb::new(0, 176, 80)),
            ..Default::default()
        })
    }

    #[test]
    fn test_fileupload_marker_builds_url_objects() {
        let mut wb = Workbook::new();
        let sheet = wb.add_sheet("S");
        sheet.set_value(0, 0, CellValue::String("Files".into()));
        {
            let cell = sheet.cell_mut(1, 0);
            cell.value = CellValue::String("a/pic.jpg, doc".into());
            cell.style = input_style();
        }
        sheet.set_value(1, 1, CellValue::String("FileUpload target".into()));
        sheet.add_table(TableDef::new("Uploads", CellArea::parse("A1:A2").unwrap()));

        let result = import_all_data(&wb, true).unwrap();
        let row = &result["tables"]["Uploads"][0];
        assert_eq!(row["Files"], json!("a/pic.jpg, doc"));
        assert_eq!(
            row["Files_array"],
            json!([
                {"url": "a/pic.jpg", "url_full": "a/pic__full_.jpg"},
                {"url": "doc", "url_full": "doc__full_"},
            ])
        );
    }

    #[test]
    fn test_multiple_marker_splits_on_semicolon() {
        let mut wb = Workbook::new();
        let sheet = wb.add_sheet("S");
        sheet.set_value(0, 0, CellValue::String("Tags".into()));
        {
            let cell = sheet.cell_mut(1, 0);
            cell.value = CellValue::String("red; green ;blue".into());
            cell.style = input_style();
        }
        sheet.set_value(1, 1, CellValue::String("multiple values".into()));
        sheet.add_table(TableDef::new("T", CellArea::parse("A1:A2").unwrap()));

        let result = import_all_data(&wb, true).unwrap();
        assert_eq!(
            result["tables"]["T"][0]["Tags_array"],
            json!(["red", "green", "blue"])
        );
    }

    #[test]
    fn test_marker_with_numeric_source_yields_null_array() {
        let mut wb = Workbook::new();
        let sheet = wb.add_sheet("S");
        sheet.set_value(0, 0, CellValue::String("N".into()));
        {
            let cell = sheet.cell_mut(1, 0);
            cell.value = CellValue::Number(7.0);
            cell.style = input_style();
        }
        sheet.set_value(1, 1, CellValue::String("multiple".into()));
        sheet.add_table(TableDef::new("T", CellArea::parse("A1:A2").unwrap()));

        let result = import_all_data(&wb, true).unwrap();
        assert_eq!(result["tables"]["T"][0]["N_array"], Value::Null);
    }

    #[test]
    fn test_markers_ignored_without_evaluation() {
        let mut wb = Workbook::new();
        let sheet = wb.add_sheet("S");
        sheet.set_value(0, 0, CellValue::String("Tags".into()));
        {
            let cell = sheet.cell_mut(1, 0);
            cell.value = CellValue::String("a;b".into());
            cell.style = input_style();
        }
        sheet.set_value(1, 1, CellValue::String("multiple".into()));
        sheet.add_table(TableDef::new("T", CellArea::parse("A1:A2").unwrap()));

        let result = import_all_data(&wb, false).unwrap();
        assert!(result["tables"]["T"][0].get("Tags_array").is_none());
    }

    #[test]
    fn test_malformed_request_shapes_abort() {
        let wb = populated_workbook();
        assert!(import_data(&json!({"properties": 5}), &wb, true).is_err());
        assert!(import_data(&json!({"tables": 5}), &wb, true).is_err());
        assert!(import_data(&json!([1, 2]), &wb, true).is_err());
    }
}
