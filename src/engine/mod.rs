//! In-memory spreadsheet engine
//!
//! This module is the workbook collaborator the mapping engines run against:
//! sheets with sparse cells, shared cell styles, named ranges, tables,
//! data validations and conditional formatting. File I/O lives in [`io`];
//! A1 reference handling lives in [`addr`].
//!
//! Formula evaluation is out of scope: formula cells carry their text plus an
//! optionally cached result, and [`evaluate_cell`] only ever resolves cached
//! results. Cloning a sheet copies cells, styles, validations and formatting
//! but never tables; table definitions do not survive duplication and must be
//! re-created explicitly by the caller.

pub mod addr;
pub mod diff;
pub mod io;

use crate::error::{SheetPortError, SheetPortResult};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub use addr::{CellArea, CellRef, SheetRef};

/// An RGB fill or tab color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a 6-hex-digit color, with or without a leading `#`.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        Some(Self {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        })
    }
}

/// Cell-level style. Styles are shared between cells through an `Arc`;
/// mutating one requires cloning it first so sharing cells keep their look.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Style {
    pub number_format: Option<String>,
    pub indent: Option<u8>,
    pub align_left: bool,
    pub fill: Option<Rgb>,
}

impl Style {
    /// Whether the number format renders numeric values as dates. Quoted
    /// literals are ignored; any remaining y/d/h token (or a bare m) counts.
    pub fn is_date_format(&self) -> bool {
        let Some(format) = &self.number_format else {
            return false;
        };
        let mut in_quotes = false;
        let mut has_date_token = false;
        let mut has_digit_token = false;
        for ch in format.chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                _ if in_quotes => {}
                'y' | 'Y' | 'd' | 'D' | 'h' | 'H' | 'm' | 'M' | 's' => has_date_token = true,
                '0' | '#' | '?' => has_digit_token = true,
                _ => {}
            }
        }
        has_date_token && !has_digit_token
    }
}

/// The typed content of one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Blank,
    String(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    Error(String),
    Formula {
        text: String,
        cached: Option<Box<CellValue>>,
    },
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Blank)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Formula { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub value: CellValue,
    pub style: Arc<Style>,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            value: CellValue::Blank,
            style: Arc::new(Style::default()),
        }
    }
}

/// Resolve a cell through the engine's "evaluator". Non-formula cells resolve
/// to their own value; formula cells resolve to their cached result, and a
/// formula with no cached result is an evaluation failure.
pub fn evaluate_cell(cell: &Cell) -> SheetPortResult<CellValue> {
    match &cell.value {
        CellValue::Formula { text, cached } => match cached {
            Some(result) => Ok((**result).clone()),
            None => Err(SheetPortError::Engine(format!(
                "no cached result for formula [{text}]"
            ))),
        },
        other => Ok(other.clone()),
    }
}

/// A named range definition: a name plus a refers-to formula such as
/// `Sheet1!$B$3`, optionally scoped to one sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRange {
    pub name: String,
    pub formula: String,
    pub sheet_scope: Option<String>,
}

/// A table definition: display name plus the area it covers, header row
/// included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub area: CellArea,
}

impl TableDef {
    pub fn new(name: impl Into<String>, area: CellArea) -> Self {
        Self {
            name: name.into(),
            area,
        }
    }

    pub fn header_row(&self) -> u32 {
        self.area.start.row
    }

    pub fn start_col(&self) -> u16 {
        self.area.start.col
    }

    pub fn end_col(&self) -> u16 {
        self.area.end.col
    }

    pub fn end_row(&self) -> u32 {
        self.area.end.row
    }

    pub fn column_count(&self) -> u16 {
        self.area.column_count()
    }

    /// Number of data rows, header excluded.
    pub fn data_row_count(&self) -> u32 {
        self.area.row_count() - 1
    }

    /// Grow or shrink the declared data area to exactly `rows` data rows.
    pub fn set_data_row_count(&mut self, rows: u32) {
        self.area.end.row = self.area.start.row + rows;
    }
}

/// Validation rule text plus every region it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataValidation {
    pub rule: String,
    pub regions: Vec<CellArea>,
}

/// Conditional-formatting rule text plus every region it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalFormat {
    pub rule: String,
    pub regions: Vec<CellArea>,
}

/// Sheet protection flags, matching what template workbooks lock down:
/// structural edits are blocked while cell selection stays free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetProtection {
    pub password: Option<String>,
    pub lock_row_edits: bool,
    pub lock_column_edits: bool,
    pub lock_objects: bool,
    pub select_locked_cells: bool,
    pub select_unlocked_cells: bool,
}

impl Default for SheetProtection {
    fn default() -> Self {
        Self {
            password: None,
            lock_row_edits: true,
            lock_column_edits: true,
            lock_objects: true,
            select_locked_cells: true,
            select_unlocked_cells: true,
        }
    }
}

/// One worksheet: a sparse cell grid plus its tables, validations,
/// conditional formatting and tab metadata.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    name: String,
    cells: BTreeMap<(u32, u16), Cell>,
    tables: Vec<TableDef>,
    pub validations: Vec<DataValidation>,
    pub conditional_formats: Vec<ConditionalFormat>,
    pub tab_color: Option<Rgb>,
    pub protection: Option<SheetProtection>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cell(&self, row: u32, col: u16) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    /// Get a cell, creating it blank if it does not exist yet.
    pub fn cell_mut(&mut self, row: u32, col: u16) -> &mut Cell {
        self.cells.entry((row, col)).or_default()
    }

    /// Mutable access to a cell only if it already exists.
    pub fn existing_cell_mut(&mut self, row: u32, col: u16) -> Option<&mut Cell> {
        self.cells.get_mut(&(row, col))
    }

    pub fn set_value(&mut self, row: u32, col: u16, value: CellValue) {
        self.cell_mut(row, col).value = value;
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellRef, &Cell)> {
        self.cells
            .iter()
            .map(|(&(row, col), cell)| (CellRef::new(row, col), cell))
    }

    pub fn max_row(&self) -> Option<u32> {
        self.cells.keys().map(|&(row, _)| row).max()
    }

    /// Delete every cell in `col` and shift all cells to the right of it one
    /// column left.
    pub fn remove_column(&mut self, col: u16) {
        let mut shifted = BTreeMap::new();
        for ((row, c), cell) in std::mem::take(&mut self.cells) {
            match c.cmp(&col) {
                std::cmp::Ordering::Less => {
                    shifted.insert((row, c), cell);
                }
                std::cmp::Ordering::Equal => {}
                std::cmp::Ordering::Greater => {
                    shifted.insert((row, c - 1), cell);
                }
            }
        }
        self.cells = shifted;
    }

    /// Shift every cell at or right of `col` one column right, opening a gap.
    pub fn insert_column(&mut self, col: u16) {
        let mut shifted = BTreeMap::new();
        for ((row, c), cell) in std::mem::take(&mut self.cells) {
            if c >= col {
                shifted.insert((row, c + 1), cell);
            } else {
                shifted.insert((row, c), cell);
            }
        }
        self.cells = shifted;
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn add_table(&mut self, table: TableDef) {
        self.tables.push(table);
    }

    /// Remove a table definition from this sheet and hand it back. The cells
    /// the table covered are untouched.
    pub fn detach_table(&mut self, name: &str) -> Option<TableDef> {
        let pos = self.tables.iter().position(|t| t.name == name)?;
        Some(self.tables.remove(pos))
    }

    pub fn detach_all_tables(&mut self) -> Vec<TableDef> {
        std::mem::take(&mut self.tables)
    }
}

/// The workbook handle: sheets in tab order plus workbook-level names.
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    names: Vec<NamedRange>,
    force_recalculation: bool,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name == name)
    }

    pub fn sheet_at(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn add_sheet(&mut self, name: impl Into<String>) -> &mut Sheet {
        self.sheets.push(Sheet::new(name));
        self.sheets.last_mut().unwrap()
    }

    /// Clone the sheet at `index` under a new name, appended at the end of the
    /// tab order. Tables are not carried over.
    pub fn clone_sheet(&mut self, index: usize, new_name: &str) -> SheetPortResult<usize> {
        if self.sheet(new_name).is_some() {
            return Err(SheetPortError::Engine(format!(
                "workbook already contains a sheet named [{new_name}]"
            )));
        }
        let source = self.sheets.get(index).ok_or_else(|| {
            SheetPortError::Engine(format!("no sheet at index [{index}]"))
        })?;
        let mut clone = source.clone();
        clone.name = new_name.to_string();
        clone.tables.clear();
        self.sheets.push(clone);
        Ok(self.sheets.len() - 1)
    }

    /// Move the named sheet to position `index` in the tab order.
    pub fn set_sheet_order(&mut self, name: &str, index: usize) -> SheetPortResult<()> {
        let current = self
            .sheet_index(name)
            .ok_or_else(|| SheetPortError::Engine(format!("sheet [{name}] was not found")))?;
        let sheet = self.sheets.remove(current);
        let index = index.min(self.sheets.len());
        self.sheets.insert(index, sheet);
        Ok(())
    }

    pub fn remove_sheet(&mut self, name: &str) -> SheetPortResult<()> {
        let index = self
            .sheet_index(name)
            .ok_or_else(|| SheetPortError::Engine(format!("sheet [{name}] was not found")))?;
        self.sheets.remove(index);
        Ok(())
    }

    pub fn names(&self) -> &[NamedRange] {
        &self.names
    }

    /// All definitions carrying `name`; the same name may repeat across sheet
    /// scopes.
    pub fn names_matching(&self, name: &str) -> Vec<&NamedRange> {
        self.names.iter().filter(|n| n.name == name).collect()
    }

    pub fn create_name(&mut self, name: NamedRange) {
        self.names.push(name);
    }

    /// Remove every definition matching one of the `(name, scope)` keys.
    pub fn remove_names(&mut self, keys: &[(String, Option<String>)]) {
        self.names
            .retain(|n| !keys.iter().any(|(name, scope)| n.name == *name && n.sheet_scope == *scope));
    }

    /// Find a table by display name across all sheets.
    pub fn table(&self, name: &str) -> Option<(&Sheet, &TableDef)> {
        self.sheets
            .iter()
            .find_map(|s| s.table(name).map(|t| (s, t)))
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableDef> {
        self.sheets
            .iter_mut()
            .find_map(|s| s.tables.iter_mut().find(|t| t.name == name))
    }

    /// Every table in the workbook, in sheet order, with its sheet name.
    pub fn all_tables(&self) -> Vec<(&str, &TableDef)> {
        self.sheets
            .iter()
            .flat_map(|s| s.tables.iter().map(move |t| (s.name.as_str(), t)))
            .collect()
    }

    pub fn cell(&self, sheet: &str, row: u32, col: u16) -> Option<&Cell> {
        self.sheet(sheet)?.cell(row, col)
    }

    /// Force-get a cell, creating it if it does not exist. Errors only when
    /// the sheet itself is missing.
    pub fn cell_mut(&mut self, sheet: &str, row: u32, col: u16) -> SheetPortResult<&mut Cell> {
        let sheet = self
            .sheet_mut(sheet)
            .ok_or_else(|| SheetPortError::Engine(format!("Sheet [{sheet}] was not found")))?;
        Ok(sheet.cell_mut(row, col))
    }

    /// Full-workbook recalculation. The engine carries no formula evaluator,
    /// so cached formula results stay authoritative; this walks formula cells
    /// for diagnostics only.
    pub fn evaluate_all(&mut self) {
        let mut formulas = 0usize;
        let mut uncached = 0usize;
        for sheet in &self.sheets {
            for (_, cell) in sheet.cells() {
                if let CellValue::Formula { cached, .. } = &cell.value {
                    formulas += 1;
                    if cached.is_none() {
                        uncached += 1;
                    }
                }
            }
        }
        debug!(formulas, uncached, "recalculation pass");
    }

    pub fn set_force_recalculation(&mut self, force: bool) {
        self.force_recalculation = force;
    }

    pub fn force_recalculation(&self) -> bool {
        self.force_recalculation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_mut_creates_blank() {
        let mut wb = Workbook::new();
        wb.add_sheet("Sheet1");
        assert!(wb.cell("Sheet1", 2, 1).is_none());
        wb.cell_mut("Sheet1", 2, 1).unwrap();
        assert!(matches!(
            wb.cell("Sheet1", 2, 1).unwrap().value,
            CellValue::Blank
        ));
        assert!(wb.cell_mut("Missing", 0, 0).is_err());
    }

    #[test]
    fn test_clone_sheet_skips_tables() {
        let mut wb = Workbook::new();
        let sheet = wb.add_sheet("T");
        sheet.set_value(0, 0, CellValue::String("Header".into()));
        sheet.add_table(TableDef::new("Items", CellArea::parse("A1:B3").unwrap()));
        sheet.validations.push(DataValidation {
            rule: "list".into(),
            regions: vec![CellArea::parse("A2:A3").unwrap()],
        });

        let idx = wb.clone_sheet(0, "Copy").unwrap();
        let copy = wb.sheet_at(idx).unwrap();
        assert_eq!(copy.name(), "Copy");
        assert!(copy.tables().is_empty());
        assert_eq!(copy.validations.len(), 1);
        assert!(matches!(
            copy.cell(0, 0).unwrap().value,
            CellValue::String(_)
        ));

        assert!(wb.clone_sheet(0, "Copy").is_err());
    }

    #[test]
    fn test_sheet_order() {
        let mut wb = Workbook::new();
        wb.add_sheet("A");
        wb.add_sheet("B");
        wb.add_sheet("C");
        wb.set_sheet_order("C", 0).unwrap();
        assert_eq!(wb.sheet_names(), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_remove_and_insert_column() {
        let mut wb = Workbook::new();
        let sheet = wb.add_sheet("S");
        for col in 0..3u16 {
            sheet.set_value(0, col, CellValue::Number(col as f64));
        }
        sheet.remove_column(1);
        assert_eq!(sheet.cell(0, 0).unwrap().value, CellValue::Number(0.0));
        assert_eq!(sheet.cell(0, 1).unwrap().value, CellValue::Number(2.0));
        assert!(sheet.cell(0, 2).is_none());

        sheet.insert_column(1);
        assert!(sheet.cell(0, 1).is_none());
        assert_eq!(sheet.cell(0, 2).unwrap().value, CellValue::Number(2.0));
    }

    #[test]
    fn test_table_resize() {
        let mut table = TableDef::new("T", CellArea::parse("B2:D6").unwrap());
        assert_eq!(table.data_row_count(), 4);
        table.set_data_row_count(2);
        assert_eq!(table.area.to_string(), "B2:D4");
        table.set_data_row_count(10);
        assert_eq!(table.end_row(), 11);
    }

    #[test]
    fn test_evaluate_cell() {
        let mut cell = Cell::default();
        cell.value = CellValue::Formula {
            text: "A1+1".into(),
            cached: Some(Box::new(CellValue::Number(5.0))),
        };
        assert_eq!(evaluate_cell(&cell).unwrap(), CellValue::Number(5.0));

        cell.value = CellValue::Formula {
            text: "A1+1".into(),
            cached: None,
        };
        assert!(evaluate_cell(&cell).is_err());

        cell.value = CellValue::Bool(true);
        assert_eq!(evaluate_cell(&cell).unwrap(), CellValue::Bool(true));
    }

    #[test]
    fn test_date_format_detection() {
        let mut style = Style::default();
        assert!(!style.is_date_format());
        style.number_format = Some("yyyy-mm-dd".into());
        assert!(style.is_date_format());
        style.number_format = Some("#,##0.00".into());
        assert!(!style.is_date_format());
        style.number_format = Some("0.00 \"years\"".into());
        assert!(!style.is_date_format());
    }

    #[test]
    fn test_rgb_parse() {
        assert_eq!(Rgb::parse_hex("#00B050"), Some(Rgb::new(0, 176, 80)));
        assert_eq!(Rgb::parse_hex("FF0000"), Some(Rgb::new(255, 0, 0)));
        assert_eq!(Rgb::parse_hex("#FFF"), None);
        assert_eq!(Rgb::parse_hex("zzzzzz"), None);
    }
}
