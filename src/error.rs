use thiserror::Error;

pub type SheetPortResult<T> = Result<T, SheetPortError>;

#[derive(Error, Debug)]
pub enum SheetPortError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Spreadsheet engine error: {0}")]
    Engine(String),

    #[error("Reference parse error: {0}")]
    Reference(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Import error: {0}")]
    Import(String),
}
