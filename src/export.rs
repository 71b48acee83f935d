//! Export (population) engine
//!
//! Walks a JSON payload, resolves each key to a template item and writes the
//! value into the workbook: scalars into single cells, arrays into tables.
//! Table population replicates the style, data validation and conditional
//! formatting captured from the first data row down every later row, and
//! tables whose template rows carry formulas are populated last so the data
//! those formulas reference is already in place.
//!
//! Failures never escape: every problem lands in the returned error
//! accumulator and the workbook stays safely discardable.

use crate::codec::write_json_into_cell;
use crate::engine::{addr, CellArea, CellRef, CellValue, SheetRef, Style, Workbook};
use crate::error::{SheetPortError, SheetPortResult};
use crate::sheets::{
    self, DetachedTable, SHEETS_KEY, SHEET_METADATA_KEY, SHEET_METADATA_VALUE,
};
use crate::template::{Template, TemplateItem};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Populate the template workbook from the JSON payload. The template is
/// mutated in place; the returned accumulator is empty on full success, and a
/// non-empty accumulator means "completed with problems", not a failed call.
pub fn export_to_excel(
    data: &mut Map<String, Value>,
    template: &mut Template,
    overwrite_formatting: bool,
) -> Vec<String> {
    let mut errors = Vec::new();
    if let Err(e) = run_export(data, template, overwrite_formatting, &mut errors) {
        warn!("export failed: {e}");
        push_failure(&mut errors, &e);
    }
    errors
}

fn push_failure(errors: &mut Vec<String>, e: &SheetPortError) {
    let message = e.to_string();
    if message.to_lowercase().contains("not implemented") {
        errors.push(format!(
            "Not implemented yet in sheetport: {}",
            message.replace("_xlfn.", "")
        ));
    } else {
        errors.push(message);
    }
}

fn run_export(
    data: &mut Map<String, Value>,
    template: &mut Template,
    overwrite_formatting: bool,
    errors: &mut Vec<String>,
) -> SheetPortResult<()> {
    if data.contains_key(SHEETS_KEY) {
        sheets::process_sheet_templates(data, template, errors)?;
    }

    for key in &ordered_keys(data, template) {
        let sheet_scoped = matches!(
            data.get(key),
            Some(Value::Object(map))
                if map.get(SHEET_METADATA_KEY).and_then(Value::as_str) == Some(SHEET_METADATA_VALUE)
        );
        if sheet_scoped {
            let Some(Value::Object(scoped)) = data.get(key) else {
                continue;
            };
            let scoped = scoped.clone();
            for sub_key in scoped.keys() {
                if sub_key == SHEET_METADATA_KEY {
                    continue;
                }
                process_key(&scoped, template, errors, overwrite_formatting, sub_key, Some(key))?;
            }
        } else {
            process_key(data, template, errors, overwrite_formatting, key, None)?;
        }
    }

    template.workbook.evaluate_all();
    // Ask the spreadsheet application to recalculate when the file is opened
    template.workbook.set_force_recalculation(true);
    Ok(())
}

/// Keys resolving to formula-bearing tables go last, so the data their
/// formulas look at is populated first; everything else keeps its original
/// order ahead of them.
fn ordered_keys(data: &Map<String, Value>, template: &Template) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    let mut deferred: Vec<String> = Vec::new();
    for key in data.keys() {
        match template.items.get(key) {
            Some(item) if item.is_table_with_formulas() => deferred.push(key.clone()),
            _ => ordered.push(key.clone()),
        }
    }
    ordered.extend(deferred);
    ordered
}

/// Pick up the value at `key` (from the root payload, or from a sheet-scoped
/// object when `sheet` is set) and push it into the workbook.
fn process_key(
    data: &Map<String, Value>,
    template: &mut Template,
    errors: &mut Vec<String>,
    overwrite_formatting: bool,
    key: &str,
    sheet: Option<&str>,
) -> SheetPortResult<()> {
    let Some(item) = template.item(key, sheet).cloned() else {
        debug!("could not find item [{key}] in template");
        return Ok(());
    };
    let Some((sheet_part, cell_part)) = addr::split_sheet_reference(&item.reference) else {
        errors.push(format!(
            "Template name [{key}] does not appear to match a cell (range), as the reference to it is [{}]",
            item.reference
        ));
        return Ok(());
    };
    // References carry escaped sheet names; everything else wants them plain
    let sheet_name = addr::unquote_sheet_name(sheet_part).to_string();
    let value = data.get(key).cloned().unwrap_or(Value::Null);

    if !cell_part.contains(':') {
        let cell_ref = CellRef::parse(cell_part)?;
        let cell = match template.workbook.cell_mut(&sheet_name, cell_ref.row, cell_ref.col) {
            Ok(cell) => cell,
            Err(e) => {
                errors.push(e.to_string());
                return Ok(());
            }
        };
        if let Err(e) = write_json_into_cell(&value, cell) {
            info!("failed to insert [{value}] into cell [{cell_ref}]");
            errors.push(e.to_string());
        }
        return Ok(());
    }

    info!("populating table [{key}] with ref [{cell_part}] in sheet [{sheet_name}]");
    if !item.is_table() {
        return Err(SheetPortError::Export(format!(
            "[{key}] should be a table but is not"
        )));
    }
    // Idempotence: a previous export into the same template must not leave
    // stale rows behind
    clear_table(&mut template.workbook, &item.reference)?;

    let mut item = item;
    let rows: Vec<Value> = match &value {
        // The table comes with both data and a column spec: fix the columns
        // first, then re-register the table item with its new header set
        Value::Object(wrapped)
            if wrapped.contains_key("data") && wrapped.contains_key("columns") =>
        {
            let source = {
                let worksheet = template.workbook.sheet_mut(&sheet_name).ok_or_else(|| {
                    SheetPortError::Export(format!("Sheet [{sheet_name}] was not found"))
                })?;
                let def = worksheet.detach_table(&item.name).ok_or_else(|| {
                    SheetPortError::Export(format!("table [{}] was not found", item.name))
                })?;
                DetachedTable {
                    name: def.name,
                    sheet: sheet_name.clone(),
                    area: def.area,
                }
            };
            let table = sheets::rebuild_table_from_spec(
                data,
                &mut template.workbook,
                &sheet_name,
                &source,
                false,
                errors,
            )?;
            let new_item = TemplateItem::from_table(&template.workbook, &sheet_name, &table);
            template.add_item(new_item.clone());
            item = new_item;
            wrapped
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| {
                    SheetPortError::Export(format!("[{key}].data is not a JSON array"))
                })?
        }
        _ => value.as_array().cloned().ok_or_else(|| {
            SheetPortError::Export(format!("[{key}] does not contain a JSON array"))
        })?,
    };

    if rows.is_empty() {
        return Ok(());
    }
    template
        .workbook
        .table_mut(&item.name)
        .ok_or_else(|| SheetPortError::Export(format!("table [{}] was not found", item.name)))?
        .set_data_row_count(rows.len() as u32);

    let slots = item.header_count() + 1;
    let mut styles: Vec<Option<Arc<Style>>> = vec![None; slots];
    let mut cond_formats: Vec<Option<usize>> = vec![None; slots];
    debug!("set up {slots} placeholders for formatting");
    let starting_column = item.starting_column().unwrap_or(0);

    for (i, row_value) in rows.iter().enumerate() {
        let Some(row_object) = row_value.as_object() else {
            errors.push(format!(
                "array [{key}] does not contain a JSON object at position [{i}]. Skipping."
            ));
            continue;
        };
        for header in item.headers() {
            let Some((header_row, col)) = item.header_cell(header) else {
                debug!("could not find [{key}.{header}] in template");
                continue;
            };
            let row = header_row + i as u32 + 1;
            // An explicit field wins; otherwise the header's captured template
            // formula is re-applied on every row
            let cell_value = match row_object.get(header) {
                Some(v) => v.clone(),
                None => item
                    .formula_for_header(header)
                    .map(|f| Value::String(f.to_string()))
                    .unwrap_or(Value::Null),
            };
            let cell = match template.workbook.cell_mut(&sheet_name, row, col) {
                Ok(cell) => cell,
                Err(e) => {
                    errors.push(e.to_string());
                    continue;
                }
            };
            let formatted_at_cell_level = match write_json_into_cell(&cell_value, cell) {
                Ok(flag) => flag,
                Err(e) => {
                    info!("failed to insert [{cell_value}] into cell [{}]", CellRef::new(row, col));
                    errors.push(e.to_string());
                    false
                }
            };

            if !overwrite_formatting {
                continue;
            }
            let rel_col = (col - starting_column) as usize;
            if rel_col >= slots {
                warn!("bug: relative column [{rel_col}] outside [{slots}] placeholders");
                continue;
            }
            if i == 0 {
                replicate_first_row_formatting(
                    template,
                    &sheet_name,
                    header_row,
                    row,
                    col,
                    rows.len() as u32,
                    rel_col,
                    &mut styles,
                    &mut cond_formats,
                );
            } else {
                if formatted_at_cell_level {
                    continue;
                }
                if let Some(style) = &styles[rel_col] {
                    if let Ok(cell) = template.workbook.cell_mut(&sheet_name, row, col) {
                        cell.style = style.clone();
                    }
                }
                if let Some(cf_index) = cond_formats[rel_col] {
                    if let Some(worksheet) = template.workbook.sheet_mut(&sheet_name) {
                        if let Some(cf) = worksheet.conditional_formats.get_mut(cf_index) {
                            cf.regions.push(CellArea::single(CellRef::new(row, col)));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Snapshot the first data row's style, widen any data validation covering it
/// to the full new row range, and remember which conditional formatting it
/// sits in so later rows can extend its region list.
#[allow(clippy::too_many_arguments)]
fn replicate_first_row_formatting(
    template: &mut Template,
    sheet_name: &str,
    header_row: u32,
    row: u32,
    col: u16,
    row_count: u32,
    rel_col: usize,
    styles: &mut [Option<Arc<Style>>],
    cond_formats: &mut [Option<usize>],
) {
    styles[rel_col] = template
        .workbook
        .cell(sheet_name, row, col)
        .map(|cell| cell.style.clone());
    let Some(worksheet) = template.workbook.sheet_mut(sheet_name) else {
        return;
    };
    if row_count > 1 {
        let extension = CellArea::new(
            CellRef::new(header_row + 2, col),
            CellRef::new(header_row + row_count, col),
        );
        for validation in &mut worksheet.validations {
            if validation.regions.iter().any(|r| r.contains(row, col)) {
                validation.regions.push(extension);
            }
        }
    }
    for (index, cf) in worksheet.conditional_formats.iter().enumerate() {
        if cf.regions.iter().any(|r| r.contains(row, col)) {
            cond_formats[rel_col] = Some(index);
        }
    }
}

/// Blank out a table's current area, header row and formula cells excluded.
fn clear_table(workbook: &mut Workbook, reference: &str) -> SheetPortResult<()> {
    let parsed = SheetRef::parse(reference)?;
    let sheet_name = parsed.sheet.ok_or_else(|| {
        SheetPortError::Export(format!(
            "Cell reference should include sheet name [{reference}]"
        ))
    })?;
    if parsed.area.is_single_cell() {
        return Err(SheetPortError::Export(format!(
            "Cell reference should be two cells [{reference}]"
        )));
    }
    let worksheet = workbook
        .sheet_mut(&sheet_name)
        .ok_or_else(|| SheetPortError::Export(format!("Sheet [{sheet_name}] was not found")))?;
    let area = parsed.area;
    for row in area.start.row + 1..=area.end.row {
        for col in area.start.col..=area.end.col {
            if let Some(cell) = worksheet.existing_cell_mut(row, col) {
                if !cell.value.is_formula() && !cell.value.is_blank() {
                    cell.value = CellValue::Blank;
                }
            }
        }
    }
    Ok(())
}
