//! sheetport - declarative JSON <-> spreadsheet mapping
//!
//! This library populates spreadsheet templates with structured JSON data and
//! extracts structured JSON back out of populated workbooks. Templates
//! address their data declaratively: named ranges resolve single-cell
//! "properties", tables resolve header-mapped row arrays, and designated
//! template sheets can be instantiated any number of times from a JSON
//! sheet-spec list.
//!
//! # Features
//!
//! - Named ranges and tables as addressable template items
//! - Sheet templating: clone template sheets, re-scope their named ranges,
//!   re-create their tables, and promote per-sheet data under collapsed names
//! - Table population with style, data-validation and conditional-formatting
//!   replication from the first data row
//! - Extraction with wildcards, blank-row scan termination and fill-color
//!   driven multi-value decoding
//!
//! # Example
//!
//! ```no_run
//! use sheetport::engine::io;
//! use sheetport::template::Template;
//! use sheetport::export::export_to_excel;
//! use serde_json::json;
//!
//! let workbook = io::load_workbook_from_path("order-template.xlsx".as_ref())?;
//! let mut template = Template::from_workbook(workbook, Some("order-template.xlsx".into()));
//!
//! let mut data = json!({
//!     "Title": "Order 1",
//!     "Items": [{"SKU": "A", "Qty": 2}, {"SKU": "B", "Qty": null}],
//! });
//! let errors = export_to_excel(data.as_object_mut().unwrap(), &mut template, true);
//! assert!(errors.is_empty());
//! io::save_workbook_to_path(&template.workbook, "populated.xlsx".as_ref())?;
//! # Ok::<(), sheetport::error::SheetPortError>(())
//! ```

pub mod cli;
pub mod codec;
pub mod engine;
pub mod error;
pub mod export;
pub mod import;
pub mod roles;
pub mod sheets;
pub mod template;

// Re-export commonly used types
pub use error::{SheetPortError, SheetPortResult};
pub use export::export_to_excel;
pub use import::{import_all_data, import_data};
pub use template::{Template, TemplateItem, TemplateStore};
