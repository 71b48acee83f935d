//! Template resolution
//!
//! Where templates come from is irrelevant to the mapping engines; callers
//! hand in any [`TemplateStore`]. The directory store covers the local-disk
//! case; remote object stores and document services live outside this crate.

use super::Template;
use crate::engine::io;
use crate::error::{SheetPortError, SheetPortResult};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Resolves a template identifier to a loaded, processed template.
pub trait TemplateStore {
    fn load(&self, id: &str) -> SheetPortResult<Template>;
}

/// Loads templates from files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateStore for DirectoryStore {
    fn load(&self, id: &str) -> SheetPortResult<Template> {
        // Identifiers are file names, never paths
        if id.contains("..") || id.contains('/') || id.contains('\\') {
            return Err(SheetPortError::Template(format!(
                "template id [{id}] is not a plain file name"
            )));
        }
        let started = Instant::now();
        let path = self.root.join(id);
        let workbook = io::load_workbook_from_path(&path)?;
        info!(
            template = id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "template read"
        );
        Ok(Template::from_workbook(workbook, Some(id.to_string())))
    }
}
