use crate::engine::{diff, io};
use crate::error::{SheetPortError, SheetPortResult};
use crate::export::export_to_excel;
use crate::import::{import_all_data, import_data};
use crate::template::Template;
use colored::Colorize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Execute the export command: populate a template with JSON data
pub fn export(
    template_path: PathBuf,
    data_path: PathBuf,
    output: PathBuf,
    values_only: bool,
) -> SheetPortResult<()> {
    println!("{}", "Populating template".bold().green());
    println!("   Template: {}", template_path.display());
    println!("   Data:     {}", data_path.display());
    println!();

    let workbook = io::load_workbook_from_path(&template_path)?;
    let mut template = Template::from_workbook(workbook, file_name(&template_path));

    let text = fs::read_to_string(&data_path)?;
    let mut data: Map<String, Value> = serde_json::from_str(&text).map_err(|e| {
        SheetPortError::Export(format!("payload must be a top-level JSON object: {e}"))
    })?;

    let errors = export_to_excel(&mut data, &mut template, !values_only);
    io::save_workbook_to_path(&template.workbook, &output)?;

    if errors.is_empty() {
        println!("{} {}", "Saved".bold().green(), output.display());
    } else {
        println!(
            "{} {} ({} problem{})",
            "Saved with problems:".bold().yellow(),
            output.display(),
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        );
        for error in &errors {
            println!("   {}", error.yellow());
        }
    }
    Ok(())
}

/// Execute the import command: extract JSON from a workbook
pub fn import(
    workbook_path: PathBuf,
    request_path: Option<PathBuf>,
    no_evaluate: bool,
    output: Option<PathBuf>,
) -> SheetPortResult<()> {
    let workbook = io::load_workbook_from_path(&workbook_path)?;

    let result = match request_path {
        Some(path) => {
            let request: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
            import_data(&request, &workbook, !no_evaluate)?
        }
        None => import_all_data(&workbook, !no_evaluate)?,
    };

    let rendered = serde_json::to_string_pretty(&result)?;
    match output {
        Some(path) => {
            fs::write(&path, rendered)?;
            println!("{} {}", "Wrote".bold().green(), path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Execute the inspect command: list template items, optionally diffing the
/// workbook against a reference
pub fn inspect(workbook_path: PathBuf, diff_path: Option<PathBuf>) -> SheetPortResult<()> {
    let workbook = io::load_workbook_from_path(&workbook_path)?;
    let template = Template::from_workbook(workbook, file_name(&workbook_path));

    println!("{}", "Template items".bold().green());
    let mut names: Vec<&String> = template.items.keys().collect();
    names.sort();
    for name in names {
        let item = &template.items[name];
        if item.is_table() {
            let mut headers: Vec<&String> = item.headers().collect();
            headers.sort();
            println!(
                "   {} {} -> {} ({} columns{})",
                "table".cyan(),
                name.bright_blue().bold(),
                item.reference,
                item.header_count(),
                if item.is_table_with_formulas() {
                    ", has formulas"
                } else {
                    ""
                }
            );
            for header in headers {
                match item.formula_for_header(header) {
                    Some(formula) => println!("      {header} = {formula}"),
                    None => println!("      {header}"),
                }
            }
        } else {
            println!(
                "   {} {} -> {}",
                "cell ".cyan(),
                name.bright_blue().bold(),
                item.reference
            );
        }
    }

    if let Some(diff_path) = diff_path {
        let other = io::load_workbook_from_path(&diff_path)?;
        let differences = diff::diff_workbooks(&template.workbook, &other);
        println!();
        if differences.is_empty() {
            println!("{}", "Workbooks match".bold().green());
        } else {
            println!("{}", "Workbooks differ".bold().yellow());
            for difference in differences {
                println!("   {}", difference.yellow());
            }
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
