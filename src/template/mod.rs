//! Template item model
//!
//! A loaded template is a workbook plus a registry of addressable items: named
//! ranges resolve to single-cell "properties", tables resolve to header-mapped
//! areas. Items are keyed globally, with a second map for sheet-scoped items
//! created dynamically when template sheets are instantiated.

mod names;
mod store;

pub use names::{collapse_name, expand_name};
pub use store::{DirectoryStore, TemplateStore};

use crate::codec::formatted_cell_text;
use crate::engine::{addr, CellValue, SheetProtection, TableDef, Workbook};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

/// One addressable unit inside a template: a named single cell or a table.
///
/// Spreadsheet name rules constrain what `name` can carry: it starts with a
/// letter or underscore, and continues with letters, numbers, periods and
/// underscores.
#[derive(Debug, Clone)]
pub struct TemplateItem {
    pub name: String,
    /// `SheetName!CellRef` or `SheetName!TopLeft:BottomRight`; sheet names
    /// containing space, hyphen or plus are quoted.
    pub reference: String,
    pub sheet_scope: Option<String>,
    starting_column: Option<u16>,
    headers: HashMap<String, (u32, u16)>,
    formulas: HashMap<String, String>,
}

impl TemplateItem {
    /// A single-cell property item.
    pub fn property(
        name: impl Into<String>,
        reference: impl Into<String>,
        sheet_scope: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            sheet_scope,
            starting_column: None,
            headers: HashMap::new(),
            formulas: HashMap::new(),
        }
    }

    /// A table item, with headers read from the table's header row and the
    /// per-header formula template captured from the first data row.
    pub fn from_table(workbook: &Workbook, sheet_name: &str, table: &TableDef) -> Self {
        let mut item = Self {
            name: table.name.clone(),
            reference: format!(
                "{}!{}",
                addr::quote_sheet_name(sheet_name),
                table.area
            ),
            sheet_scope: Some(sheet_name.to_string()),
            starting_column: None,
            headers: HashMap::new(),
            formulas: HashMap::new(),
        };
        let header_row = table.header_row();
        for col in table.start_col()..=table.end_col() {
            let header = formatted_cell_text(workbook.cell(sheet_name, header_row, col));
            item.add_header(header.clone(), header_row, col);
            if let Some(cell) = workbook.cell(sheet_name, header_row + 1, col) {
                if let CellValue::Formula { text, .. } = &cell.value {
                    item.formulas.insert(header, format!("={text}"));
                }
            }
        }
        item
    }

    fn add_header(&mut self, header: String, row: u32, col: u16) {
        self.headers.insert(header, (row, col));
        self.starting_column = Some(match self.starting_column {
            Some(existing) => existing.min(col),
            None => col,
        });
    }

    pub fn headers(&self) -> impl Iterator<Item = &String> {
        self.headers.keys()
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    pub fn header_cell(&self, header: &str) -> Option<(u32, u16)> {
        self.headers.get(header).copied()
    }

    pub fn formula_for_header(&self, header: &str) -> Option<&str> {
        self.formulas.get(header).map(String::as_str)
    }

    /// Leftmost header column of a table item.
    pub fn starting_column(&self) -> Option<u16> {
        self.starting_column
    }

    pub fn is_table(&self) -> bool {
        !self.headers.is_empty()
    }

    /// Tables whose template rows carry formulas are populated last so the
    /// data those formulas look at lands first.
    pub fn is_table_with_formulas(&self) -> bool {
        !self.formulas.is_empty()
    }
}

/// A loaded template: the workbook plus the item registry.
#[derive(Debug, Default)]
pub struct Template {
    pub workbook: Workbook,
    pub original_file_name: Option<String>,
    pub items: HashMap<String, TemplateItem>,
    /// Items created per generated sheet; only visible when processing data
    /// nested under that sheet's JSON object.
    pub sheet_scoped_items: HashMap<String, HashMap<String, TemplateItem>>,
}

impl Template {
    /// Build the item registry from every named range and table in the
    /// workbook, then run the non-fatal reference validation.
    pub fn from_workbook(workbook: Workbook, original_file_name: Option<String>) -> Self {
        let started = Instant::now();
        let mut template = Self {
            workbook,
            original_file_name,
            items: HashMap::new(),
            sheet_scoped_items: HashMap::new(),
        };

        for name in template.workbook.names().to_vec() {
            template.add_item(TemplateItem::property(
                name.name,
                name.formula,
                name.sheet_scope,
            ));
        }
        let tables: Vec<TemplateItem> = template
            .workbook
            .all_tables()
            .into_iter()
            .map(|(sheet, table)| TemplateItem::from_table(&template.workbook, sheet, table))
            .collect();
        for item in tables {
            template.add_item(item);
        }

        template.validate();
        info!(
            template = template.original_file_name.as_deref().unwrap_or("<memory>"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "template processed and ready"
        );
        template
    }

    /// Diagnostic pass over item references; warnings only, never fatal.
    fn validate(&self) {
        for item in self.items.values() {
            if item.reference.is_empty() {
                warn!("{} does not refer to any cell range", item.name);
            } else if item.reference.find(':') != item.reference.rfind(':') {
                warn!(
                    "{} refers to multiple ranges [{}] which is undefined and not allowed",
                    item.name, item.reference
                );
            } else if item.reference.contains('(') {
                warn!(
                    "{} refers to a formula [{}] which is undefined and not allowed",
                    item.name, item.reference
                );
            }
        }
    }

    pub fn add_item(&mut self, item: TemplateItem) {
        self.items.insert(item.name.clone(), item);
    }

    pub fn add_item_scoped(&mut self, item: TemplateItem, sheet: &str) {
        self.sheet_scoped_items
            .entry(sheet.to_string())
            .or_default()
            .insert(item.name.clone(), item);
    }

    /// Resolve a key against the global map, or against a sheet's scoped map
    /// when the data being processed is nested under that sheet.
    pub fn item(&self, key: &str, sheet: Option<&str>) -> Option<&TemplateItem> {
        match sheet {
            None => self.items.get(key),
            Some(sheet) => self
                .sheet_scoped_items
                .get(sheet)
                .and_then(|scoped| scoped.get(key)),
        }
    }

    pub fn original_file_suffix(&self) -> String {
        let Some(name) = &self.original_file_name else {
            return String::new();
        };
        match name.find('.') {
            Some(dot) if dot + 1 < name.len() => name[dot + 1..].to_string(),
            _ => String::new(),
        }
    }

    /// Lock down structural edits on every sheet, with an optional password,
    /// leaving cell selection free.
    pub fn protect_workbook(&mut self, password: Option<&str>) {
        let password = password.filter(|p| !p.is_empty()).map(str::to_string);
        let sheet_names = self.workbook.sheet_names();
        for name in sheet_names {
            if let Some(sheet) = self.workbook.sheet_mut(&name) {
                sheet.protection = Some(SheetProtection {
                    password: password.clone(),
                    select_locked_cells: false,
                    select_unlocked_cells: false,
                    ..Default::default()
                });
            }
        }
    }
}
