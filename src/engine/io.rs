//! xlsx boundary
//!
//! Loads workbooks into the in-memory model with calamine and writes them
//! back out with rust_xlsxwriter. The readable side of the format carries
//! values, formulas (with cached results), defined names and tables; cell
//! fills and number formats are write-only at this boundary, so role
//! classification applies to workbooks built or mutated in memory.

use super::{
    addr, Cell, CellArea, CellRef, CellValue, NamedRange, Style, TableDef, Workbook,
};
use crate::codec::{excel_serial_to_datetime, formatted_cell_text};
use crate::error::{SheetPortError, SheetPortResult};
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::{Datelike, NaiveDateTime, Timelike};
use rust_xlsxwriter::{
    Color, ConditionalFormatFormula, DataValidation, ExcelDateTime, Format, FormatAlign, Formula,
    Table, TableColumn, Workbook as XlsxWorkbook, Worksheet,
};
use std::io::Cursor;
use std::path::Path;
use tracing::warn;

/// Load an xlsx file into the in-memory model.
pub fn load_workbook_from_path(path: &Path) -> SheetPortResult<Workbook> {
    let mut xlsx: Xlsx<_> = open_workbook(path)
        .map_err(|e| SheetPortError::Engine(format!("failed to open workbook: {e}")))?;
    load_from_reader(&mut xlsx)
}

/// Load an xlsx document from a byte buffer.
pub fn load_workbook_from_bytes(bytes: &[u8]) -> SheetPortResult<Workbook> {
    let mut xlsx = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| SheetPortError::Engine(format!("failed to open workbook: {e}")))?;
    load_from_reader(&mut xlsx)
}

fn load_from_reader<RS: std::io::Read + std::io::Seek>(
    xlsx: &mut Xlsx<RS>,
) -> SheetPortResult<Workbook> {
    xlsx.load_tables()
        .map_err(|e| SheetPortError::Engine(format!("failed to load tables: {e}")))?;

    let mut workbook = Workbook::new();
    let sheet_names = xlsx.sheet_names().to_vec();
    for sheet_name in &sheet_names {
        let range = xlsx
            .worksheet_range(sheet_name)
            .map_err(|e| SheetPortError::Engine(format!("failed to read [{sheet_name}]: {e}")))?;
        let formulas = xlsx.worksheet_formula(sheet_name).ok();

        let sheet = workbook.add_sheet(sheet_name);
        let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
        for (row, col, data) in range.cells() {
            let value = convert_data(data);
            if !value.is_blank() {
                let at_row = row_offset + row as u32;
                let at_col = (col_offset + col as u32) as u16;
                sheet.set_value(at_row, at_col, value);
            }
        }
        if let Some(formulas) = formulas {
            let (row_offset, col_offset) = formulas.start().unwrap_or((0, 0));
            for (row, col, text) in formulas.cells() {
                if text.is_empty() {
                    continue;
                }
                let at_row = row_offset + row as u32;
                let at_col = (col_offset + col as u32) as u16;
                let cell = sheet.cell_mut(at_row, at_col);
                let cached = match &cell.value {
                    CellValue::Blank => None,
                    other => Some(Box::new(other.clone())),
                };
                cell.value = CellValue::Formula {
                    text: text.clone(),
                    cached,
                };
            }
        }
    }

    for (name, formula) in xlsx.defined_names().to_vec() {
        // Sheet-local names round-trip as `Sheet!name`; plain names are global
        let (name, sheet_scope) = match addr::split_sheet_reference(&name) {
            Some((sheet, local)) => (
                local.to_string(),
                Some(addr::unquote_sheet_name(sheet).to_string()),
            ),
            None => (name, None),
        };
        workbook.create_name(NamedRange {
            name,
            formula,
            sheet_scope,
        });
    }

    let table_names: Vec<String> = xlsx.table_names().into_iter().cloned().collect();
    for table_name in table_names {
        let table = xlsx
            .table_by_name(&table_name)
            .map_err(|e| SheetPortError::Engine(format!("failed to read table: {e}")))?;
        let Some((data_start_row, start_col)) = table.data().start() else {
            warn!("table [{table_name}] has no data range, skipping");
            continue;
        };
        let Some((end_row, end_col)) = table.data().end() else {
            continue;
        };
        let header_row = data_start_row.saturating_sub(1);
        let area = CellArea::new(
            CellRef::new(header_row, start_col as u16),
            CellRef::new(end_row, end_col as u16),
        );
        if let Some(sheet) = workbook.sheet_mut(table.sheet_name()) {
            sheet.add_table(TableDef::new(table.name().to_string(), area));
        }
    }
    Ok(workbook)
}

fn convert_data(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Blank,
        Data::String(s) => CellValue::String(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Error(e) => CellValue::Error(e.to_string()),
        Data::DateTime(dt) => match excel_serial_to_datetime(dt.as_f64()) {
            Some(parsed) => CellValue::DateTime(parsed),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            Ok(parsed) => CellValue::DateTime(parsed),
            Err(_) => CellValue::String(s.clone()),
        },
        Data::DurationIso(s) => CellValue::String(s.clone()),
    }
}

/// Write the in-memory model out as an xlsx file.
pub fn save_workbook_to_path(workbook: &Workbook, path: &Path) -> SheetPortResult<()> {
    let mut output = build_output(workbook)?;
    output
        .save(path)
        .map_err(|e| SheetPortError::Engine(format!("failed to save workbook: {e}")))
}

/// Write the in-memory model to an xlsx byte buffer.
pub fn save_workbook_to_bytes(workbook: &Workbook) -> SheetPortResult<Vec<u8>> {
    let mut output = build_output(workbook)?;
    output
        .save_to_buffer()
        .map_err(|e| SheetPortError::Engine(format!("failed to save workbook: {e}")))
}

fn build_output(workbook: &Workbook) -> SheetPortResult<XlsxWorkbook> {
    let mut output = XlsxWorkbook::new();
    for sheet in workbook.sheets() {
        let worksheet = output.add_worksheet();
        worksheet
            .set_name(sheet.name())
            .map_err(engine_error("failed to set worksheet name"))?;

        if let Some(color) = sheet.tab_color {
            let rgb = ((color.r as u32) << 16) | ((color.g as u32) << 8) | color.b as u32;
            worksheet.set_tab_color(Color::RGB(rgb));
        }

        for (at, cell) in sheet.cells() {
            write_cell(worksheet, at, cell)?;
        }

        for table in sheet.tables() {
            let mut columns = Vec::new();
            for col in table.start_col()..=table.end_col() {
                let header = formatted_cell_text(sheet.cell(table.header_row(), col));
                columns.push(TableColumn::new().set_header(header));
            }
            let spec = Table::new()
                .set_columns(&columns)
                .set_name(table.name.as_str());
            worksheet
                .add_table(
                    table.header_row(),
                    table.start_col(),
                    table.end_row(),
                    table.end_col(),
                    &spec,
                )
                .map_err(engine_error("failed to add table"))?;
        }

        for validation in &sheet.validations {
            let rule = DataValidation::new().allow_custom(Formula::new(validation.rule.as_str()));
            for region in &validation.regions {
                worksheet
                    .add_data_validation(
                        region.start.row,
                        region.start.col,
                        region.end.row,
                        region.end.col,
                        &rule,
                    )
                    .map_err(engine_error("failed to add data validation"))?;
            }
        }

        for conditional in &sheet.conditional_formats {
            let rule =
                ConditionalFormatFormula::new().set_rule(Formula::new(conditional.rule.as_str()));
            for region in &conditional.regions {
                worksheet
                    .add_conditional_format(
                        region.start.row,
                        region.start.col,
                        region.end.row,
                        region.end.col,
                        &rule,
                    )
                    .map_err(engine_error("failed to add conditional format"))?;
            }
        }

        if let Some(protection) = &sheet.protection {
            match &protection.password {
                Some(password) => {
                    worksheet.protect_with_password(password);
                }
                None => {
                    worksheet.protect();
                }
            }
        }
    }

    for name in workbook.names() {
        let qualified = match &name.sheet_scope {
            Some(sheet) => format!("{}!{}", addr::quote_sheet_name(sheet), name.name),
            None => name.name.clone(),
        };
        output
            .define_name(qualified.as_str(), format!("={}", name.formula).as_str())
            .map_err(engine_error("failed to define name"))?;
    }
    Ok(output)
}

fn write_cell(worksheet: &mut Worksheet, at: CellRef, cell: &Cell) -> SheetPortResult<()> {
    let format = convert_style(&cell.style);
    match &cell.value {
        CellValue::Blank => {
            if let Some(format) = &format {
                worksheet
                    .write_blank(at.row, at.col, format)
                    .map_err(engine_error("failed to write blank"))?;
            }
        }
        CellValue::String(s) => {
            match &format {
                Some(f) => worksheet.write_string_with_format(at.row, at.col, s.as_str(), f),
                None => worksheet.write_string(at.row, at.col, s.as_str()),
            }
            .map_err(engine_error("failed to write string"))?;
        }
        CellValue::Number(n) => {
            match &format {
                Some(f) => worksheet.write_number_with_format(at.row, at.col, *n, f),
                None => worksheet.write_number(at.row, at.col, *n),
            }
            .map_err(engine_error("failed to write number"))?;
        }
        CellValue::Bool(b) => {
            match &format {
                Some(f) => worksheet.write_boolean_with_format(at.row, at.col, *b, f),
                None => worksheet.write_boolean(at.row, at.col, *b),
            }
            .map_err(engine_error("failed to write boolean"))?;
        }
        CellValue::DateTime(dt) => {
            let excel_dt = convert_datetime(*dt)?;
            let date_format = format
                .unwrap_or_else(|| Format::new().set_num_format("yyyy-mm-dd hh:mm:ss"));
            worksheet
                .write_datetime_with_format(at.row, at.col, &excel_dt, &date_format)
                .map_err(engine_error("failed to write datetime"))?;
        }
        CellValue::Error(code) => {
            // No native error write; the code string keeps the cell readable
            worksheet
                .write_string(at.row, at.col, code.as_str())
                .map_err(engine_error("failed to write error"))?;
        }
        CellValue::Formula { text, cached } => {
            let mut formula = Formula::new(text.as_str());
            if let Some(cached) = cached {
                formula = formula.set_result(formatted_cell_text(Some(&Cell {
                    value: (**cached).clone(),
                    style: cell.style.clone(),
                })));
            }
            match &format {
                Some(f) => worksheet
                    .write_formula_with_format(at.row, at.col, formula, f)
                    .map_err(engine_error("failed to write formula"))?,
                None => worksheet
                    .write_formula(at.row, at.col, formula)
                    .map_err(engine_error("failed to write formula"))?,
            };
        }
    }
    Ok(())
}

fn convert_style(style: &Style) -> Option<Format> {
    if style.number_format.is_none() && style.indent.is_none() && !style.align_left
        && style.fill.is_none()
    {
        return None;
    }
    let mut format = Format::new();
    if let Some(number_format) = &style.number_format {
        format = format.set_num_format(number_format.as_str());
    }
    if let Some(indent) = style.indent {
        format = format.set_indent(indent);
    }
    if style.align_left {
        format = format.set_align(FormatAlign::Left);
    }
    if let Some(fill) = style.fill {
        let rgb = ((fill.r as u32) << 16) | ((fill.g as u32) << 8) | fill.b as u32;
        format = format.set_background_color(Color::RGB(rgb));
    }
    Some(format)
}

fn convert_datetime(dt: NaiveDateTime) -> SheetPortResult<ExcelDateTime> {
    ExcelDateTime::from_ymd(dt.year() as u16, dt.month() as u8, dt.day() as u8)
        .and_then(|d| d.and_hms(dt.hour() as u16, dt.minute() as u8, dt.second() as f64))
        .map_err(engine_error("failed to convert datetime"))
}

fn engine_error<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> SheetPortError + '_ {
    move |e| SheetPortError::Engine(format!("{context}: {e}"))
}
