//! Sheet templating
//!
//! A JSON sheet-spec list turns designated "template sheets" into one or more
//! concrete sheets. Template sheets are cloned, never mutated in place, since
//! one template may be instantiated many times; their tables are detached
//! first and re-created in each clone (table metadata does not survive sheet
//! duplication), their named ranges re-scoped to each clone, and the per-sheet
//! data promoted into the top-level payload under collapsed names before the
//! population pass runs. The consumed template sheets are deleted at the very
//! end.

use crate::codec::formatted_cell_text;
use crate::engine::{
    addr, Cell, CellArea, CellRef, CellValue, NamedRange, Rgb, Style, TableDef, Workbook,
};
use crate::error::{SheetPortError, SheetPortResult};
use crate::template::{collapse_name, Template, TemplateItem};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Top-level payload key holding the sheet-spec array.
pub const SHEETS_KEY: &str = "sheets";
/// Marker key tagging a promoted top-level object as sheet-scoped data.
pub const SHEET_METADATA_KEY: &str = "_sheetport_metadata";
pub const SHEET_METADATA_VALUE: &str = "sheet";

/// A table definition lifted out of a template sheet, remembered outside the
/// workbook so it can be re-created in each clone.
#[derive(Debug, Clone)]
pub(crate) struct DetachedTable {
    pub name: String,
    pub sheet: String,
    pub area: CellArea,
}

/// Run the full sheet-templating pass: instantiate every sheet spec, then
/// clean up the consumed template sheets, their named ranges and the
/// `sheets` key itself.
pub fn process_sheet_templates(
    data: &mut Map<String, Value>,
    template: &mut Template,
    errors: &mut Vec<String>,
) -> SheetPortResult<()> {
    let Some(specs_value) = data.get(SHEETS_KEY) else {
        return Ok(());
    };
    let specs = match specs_value {
        Value::Array(specs) => specs.clone(),
        _ => {
            return Err(SheetPortError::Export(format!(
                "[{SHEETS_KEY}] must be a JSON array of sheet specs"
            )))
        }
    };

    // Which sheets are templates, and hence consumed at the end
    let mut template_sheets: BTreeSet<String> = BTreeSet::new();
    for spec in &specs {
        if let Some(from) = spec.get("fromTemplateSheet").and_then(Value::as_str) {
            template_sheets.insert(from.to_string());
        }
    }

    // Detach every table on a template sheet, remembering its definition
    let mut detached: HashMap<String, Vec<DetachedTable>> = HashMap::new();
    for sheet_name in &template_sheets {
        info!("checking sheet [{sheet_name}] for tables");
        let entry = detached.entry(sheet_name.clone()).or_default();
        if let Some(sheet) = template.workbook.sheet_mut(sheet_name) {
            for table in sheet.detach_all_tables() {
                info!(
                    "detached table [{}] from template sheet [{sheet_name}]",
                    table.name
                );
                entry.push(DetachedTable {
                    name: table.name,
                    sheet: sheet_name.clone(),
                    area: table.area,
                });
            }
        }
    }

    // Named ranges defined against a template sheet are saved as
    // (originalSheet, localName) -> localFormula and marked for removal;
    // global names with no sheet-qualified reference are removed outright.
    let mut saved_names: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let mut names_to_remove: Vec<(String, Option<String>)> = Vec::new();
    for name in template.workbook.names().to_vec() {
        if name.formula.is_empty() {
            continue;
        }
        let origin = match addr::split_sheet_reference(&name.formula) {
            Some((sheet_part, _)) => Some(addr::unquote_sheet_name(sheet_part).to_string()),
            None => name.sheet_scope.clone(),
        };
        match origin {
            Some(origin) if template_sheets.contains(&origin) => {
                let local = match addr::split_sheet_reference(&name.formula) {
                    Some((_, rest)) => rest.to_string(),
                    None => name.formula.clone(),
                };
                saved_names
                    .entry(origin)
                    .or_default()
                    .push((name.name.clone(), local));
                names_to_remove.push((name.name.clone(), name.sheet_scope.clone()));
            }
            Some(_) => {}
            None => {
                info!("broken reference for [{}], removing it", name.name);
                names_to_remove.push((name.name.clone(), name.sheet_scope.clone()));
            }
        }
    }

    for spec_value in &specs {
        if let Err(e) = instantiate_sheet_spec(spec_value, data, template, &detached, &saved_names, errors)
        {
            // Structural problem with this one spec; keep going
            errors.push(e.to_string());
        }
    }

    template.workbook.remove_names(&names_to_remove);
    for sheet_name in &template_sheets {
        if template.workbook.remove_sheet(sheet_name).is_err() {
            warn!("template sheet [{sheet_name}] was already gone");
        }
    }
    data.remove(SHEETS_KEY);
    Ok(())
}

fn instantiate_sheet_spec(
    spec_value: &Value,
    data: &mut Map<String, Value>,
    template: &mut Template,
    detached: &HashMap<String, Vec<DetachedTable>>,
    saved_names: &HashMap<String, Vec<(String, String)>>,
    errors: &mut Vec<String>,
) -> SheetPortResult<()> {
    let Some(spec) = spec_value.as_object() else {
        errors.push("sheet spec is not a JSON object".to_string());
        return Ok(());
    };
    let (Some(to_name), Some(from_name)) = (
        spec.get("name").and_then(Value::as_str),
        spec.get("fromTemplateSheet").and_then(Value::as_str),
    ) else {
        errors.push("sheet spec needs string [name] and [fromTemplateSheet] fields".to_string());
        return Ok(());
    };
    let Some(from_index) = template.workbook.sheet_index(from_name) else {
        errors.push(format!(
            "template does not contain sheet [{from_name}] so can't create [{to_name}]"
        ));
        return Ok(());
    };

    // Clone the template sheet and keep repeated instantiations in spec order,
    // immediately ahead of the template sheet itself
    if let Err(e) = template.workbook.clone_sheet(from_index, to_name) {
        errors.push(e.to_string());
        return Ok(());
    }
    template.workbook.set_sheet_order(to_name, from_index)?;

    // Re-create the saved named ranges, scoped to the new sheet
    if let Some(names) = saved_names.get(from_name) {
        for (name, local_formula) in names {
            let reference = format!("{}!{local_formula}", addr::quote_sheet_name(to_name));
            template.workbook.create_name(NamedRange {
                name: name.clone(),
                formula: reference.clone(),
                sheet_scope: Some(to_name.to_string()),
            });
            template.add_item_scoped(
                TemplateItem::property(name.clone(), reference, Some(to_name.to_string())),
                to_name,
            );
        }
    }

    if let Some(tab_color) = spec.get("tabColor").and_then(Value::as_str) {
        match Rgb::parse_hex(tab_color) {
            Some(rgb) => {
                if let Some(sheet) = template.workbook.sheet_mut(to_name) {
                    sheet.tab_color = Some(rgb);
                }
            }
            None => warn!("ignoring malformed tab color [{tab_color}] for [{to_name}]"),
        }
    }

    let empty = Map::new();
    let spec_data = spec.get("data").and_then(Value::as_object).unwrap_or(&empty);

    // Re-create each detached table in the clone, applying any column spec,
    // under a name collapsed against the new sheet
    if let Some(tables) = detached.get(from_name) {
        for source in tables {
            info!(
                "re-creating table [{}] from sheet [{from_name}] in [{to_name}]",
                source.name
            );
            let table = rebuild_table_from_spec(
                spec_data,
                &mut template.workbook,
                to_name,
                source,
                true,
                errors,
            )?;
            let item = TemplateItem::from_table(&template.workbook, to_name, &table);
            template.add_item(item);
        }
    }

    translate_sheet_spec_to_root(to_name, spec_data, data);
    Ok(())
}

/// Promote one sheet spec's `data` object into the top-level payload:
/// table arrays (plain, or wrapped with a column spec) land under collapsed
/// names, everything else becomes a sheet-scoped property object tagged with
/// the metadata marker.
fn translate_sheet_spec_to_root(
    sheet_name: &str,
    spec_data: &Map<String, Value>,
    root: &mut Map<String, Value>,
) {
    let mut scoped = match root.get(sheet_name) {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    scoped.insert(
        SHEET_METADATA_KEY.to_string(),
        Value::String(SHEET_METADATA_VALUE.to_string()),
    );
    for (key, value) in spec_data {
        match value {
            Value::Array(_) => {
                root.insert(collapse_name(sheet_name, key), value.clone());
            }
            Value::Object(wrapped) if wrapped.get("data").map(Value::is_array) == Some(true) => {
                root.insert(
                    collapse_name(sheet_name, key),
                    wrapped.get("data").cloned().unwrap_or(Value::Null),
                );
            }
            other => {
                scoped.insert(key.clone(), other.clone());
            }
        }
    }
    root.insert(sheet_name.to_string(), Value::Object(scoped));
}

/// Re-create a table from a remembered definition, rewriting its columns
/// first when the spec's data carries a `columns` array for it. Also used at
/// export time for ordinary column edits, with `collapse` disabled.
pub(crate) fn rebuild_table_from_spec(
    data: &Map<String, Value>,
    workbook: &mut Workbook,
    target_sheet: &str,
    source: &DetachedTable,
    collapse: bool,
    errors: &mut Vec<String>,
) -> SheetPortResult<TableDef> {
    let source_columns = source.area.column_count();
    let mut new_column_count = source_columns;

    let columns_spec = data
        .get(&source.name)
        .and_then(Value::as_object)
        .and_then(|o| o.get("columns"))
        .and_then(Value::as_array);

    if let Some(columns) = columns_spec {
        // Snapshot the source columns (full sheet columns, headers included)
        // before anything is removed; the source sheet may be the target sheet
        let snapshots = snapshot_columns(workbook, source)?;

        // Remove every existing column first; renumbering columns while
        // mutating them in place is unsafe
        {
            let sheet = workbook.sheet_mut(target_sheet).ok_or_else(|| {
                SheetPortError::Engine(format!("Sheet [{target_sheet}] was not found"))
            })?;
            for _ in 0..source_columns {
                sheet.remove_column(source.area.start.col);
            }
        }

        new_column_count = columns.len() as u16;
        let start = source.area.start;
        // Reverse declaration order keeps the insertion position stable
        for column in columns.iter().rev() {
            let Some(column_spec) = column.as_object() else {
                errors.push(format!(
                    "column spec for table [{}] is not a JSON object",
                    source.name
                ));
                continue;
            };
            let Some(column_name) = column_spec.get("name").and_then(Value::as_str) else {
                errors.push(format!(
                    "column spec for table [{}] is missing [name]",
                    source.name
                ));
                continue;
            };
            let from_column = column_spec
                .get("fromTemplateColumn")
                .and_then(Value::as_str)
                .unwrap_or(column_name);
            info!("copying from column [{from_column}] into column [{column_name}]");
            let Some(snapshot) = snapshots.iter().find(|s| s.header == from_column) else {
                errors.push(format!(
                    "table [{}] has no template column [{from_column}]",
                    source.name
                ));
                continue;
            };

            let sheet = workbook.sheet_mut(target_sheet).ok_or_else(|| {
                SheetPortError::Engine(format!("Sheet [{target_sheet}] was not found"))
            })?;
            sheet.insert_column(start.col);
            for (row, cell) in &snapshot.cells {
                *sheet.cell_mut(*row, start.col) = cell.clone();
            }
            sheet.cell_mut(start.row, start.col).value = CellValue::String(column_name.to_string());

            // A column-level format seeds the first data row; later rows
            // inherit it through the replication pass
            if let Some(format) = column_spec.get("format").and_then(Value::as_str) {
                let seed = sheet.cell_mut(start.row + 1, start.col);
                let mut style = Style::clone(&seed.style);
                style.number_format = Some(format.to_string());
                seed.style = Arc::new(style);
                info!(
                    "applying format [{format}] to cell [{}]",
                    CellRef::new(start.row + 1, start.col)
                );
            }
        }
    }

    let end_col =
        (source.area.end.col as i32 + new_column_count as i32 - source_columns as i32) as u16;
    let area = CellArea::new(source.area.start, CellRef::new(source.area.end.row, end_col));
    let name = if collapse {
        collapse_name(target_sheet, &source.name)
    } else {
        source.name.clone()
    };
    info!("adding table [{name}] with reference [{area}]");
    let table = TableDef::new(name, area);
    workbook
        .sheet_mut(target_sheet)
        .ok_or_else(|| SheetPortError::Engine(format!("Sheet [{target_sheet}] was not found")))?
        .add_table(table.clone());
    Ok(table)
}

struct ColumnSnapshot {
    header: String,
    cells: Vec<(u32, Cell)>,
}

fn snapshot_columns(
    workbook: &Workbook,
    source: &DetachedTable,
) -> SheetPortResult<Vec<ColumnSnapshot>> {
    let sheet = workbook
        .sheet(&source.sheet)
        .ok_or_else(|| SheetPortError::Engine(format!("Sheet [{}] was not found", source.sheet)))?;
    let mut snapshots = Vec::new();
    for col in source.area.start.col..=source.area.end.col {
        let header = formatted_cell_text(sheet.cell(source.area.start.row, col));
        let cells = sheet
            .cells()
            .filter(|(at, _)| at.col == col)
            .map(|(at, cell)| (at.row, cell.clone()))
            .collect();
        snapshots.push(ColumnSnapshot { header, cells });
    }
    Ok(snapshots)
}
