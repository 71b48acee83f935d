//! Sheet templating tests: cloning template sheets, re-scoping names,
//! re-creating tables and promoting per-sheet data

use serde_json::json;
use sheetport::engine::{CellArea, CellValue, NamedRange, Rgb, TableDef, Workbook};
use sheetport::export::export_to_excel;
use sheetport::import::import_all_data;
use sheetport::template::Template;

/// A workbook with one template sheet "Month" (a title cell and an Expenses
/// table) plus a Summary sheet that stays.
fn monthly_template() -> Template {
    let mut wb = Workbook::new();
    {
        let sheet = wb.add_sheet("Month");
        sheet.set_value(1, 1, CellValue::String("Item".into()));
        sheet.set_value(1, 2, CellValue::String("Cost".into()));
        sheet.add_table(TableDef::new("Expenses", CellArea::parse("B2:C3").unwrap()));
    }
    wb.add_sheet("Summary");
    wb.create_name(NamedRange {
        name: "MonthTitle".into(),
        formula: "Month!$A$1".into(),
        sheet_scope: None,
    });
    Template::from_workbook(wb, None)
}

fn monthly_payload() -> serde_json::Value {
    json!({
        "sheets": [
            {
                "name": "Jan",
                "fromTemplateSheet": "Month",
                "tabColor": "FF0000",
                "data": {
                    "MonthTitle": "January",
                    "Expenses": [{"Item": "rent", "Cost": 100}]
                }
            },
            {
                "name": "Feb",
                "fromTemplateSheet": "Month",
                "data": {
                    "MonthTitle": "February",
                    "Expenses": [{"Item": "rent", "Cost": 110}, {"Item": "food", "Cost": 50}]
                }
            }
        ]
    })
}

#[test]
fn template_sheet_instantiated_twice_and_removed() {
    let mut template = monthly_template();
    let mut data = monthly_payload();
    let errors = export_to_excel(data.as_object_mut().unwrap(), &mut template, true);
    assert!(errors.is_empty(), "{errors:?}");

    let wb = &template.workbook;
    assert_eq!(wb.sheet_names(), vec!["Jan", "Feb", "Summary"]);

    // Each clone carries its own table under a collapsed name
    let (_, jan_table) = wb.table("_Jan_Expenses").expect("Jan table");
    assert_eq!(jan_table.data_row_count(), 1);
    let (_, feb_table) = wb.table("_Feb_Expenses").expect("Feb table");
    assert_eq!(feb_table.data_row_count(), 2);

    // Sheet-scoped properties landed on their own sheets
    assert_eq!(
        wb.cell("Jan", 0, 0).unwrap().value,
        CellValue::String("January".into())
    );
    assert_eq!(
        wb.cell("Feb", 0, 0).unwrap().value,
        CellValue::String("February".into())
    );

    // Table rows landed per sheet
    assert_eq!(
        wb.cell("Jan", 2, 1).unwrap().value,
        CellValue::String("rent".into())
    );
    assert_eq!(wb.cell("Jan", 2, 2).unwrap().value, CellValue::Number(100.0));
    assert_eq!(wb.cell("Feb", 3, 1).unwrap().value, CellValue::String("food".into()));
    assert_eq!(wb.cell("Feb", 3, 2).unwrap().value, CellValue::Number(50.0));

    assert_eq!(wb.sheet("Jan").unwrap().tab_color, Some(Rgb::new(255, 0, 0)));
    assert_eq!(wb.sheet("Feb").unwrap().tab_color, None);

    // The template's own name is gone; each clone has a scoped copy
    let names: Vec<_> = wb.names_matching("MonthTitle").into_iter().collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|n| n.sheet_scope.is_some()));
}

#[test]
fn round_trip_through_import_nests_per_sheet() {
    let mut template = monthly_template();
    let mut data = monthly_payload();
    let errors = export_to_excel(data.as_object_mut().unwrap(), &mut template, true);
    assert!(errors.is_empty(), "{errors:?}");

    let result = import_all_data(&template.workbook, true).unwrap();

    assert_eq!(
        result["tables"]["Jan"]["Expenses"],
        json!([{"Item": "rent", "Cost": 100.0}])
    );
    assert_eq!(
        result["tables"]["Feb"]["Expenses"],
        json!([
            {"Item": "rent", "Cost": 110.0},
            {"Item": "food", "Cost": 50.0}
        ])
    );
    assert_eq!(result["properties"]["Jan"]["MonthTitle"], json!("January"));
    assert_eq!(result["properties"]["Feb"]["MonthTitle"], json!("February"));
}

#[test]
fn column_spec_rewrites_the_cloned_table() {
    let mut template = monthly_template();
    let mut data = json!({
        "sheets": [{
            "name": "Jan",
            "fromTemplateSheet": "Month",
            "data": {
                "Expenses": {
                    "data": [{"Cost 2024": 7, "Item": "rent"}],
                    "columns": [
                        {"name": "Item"},
                        {"name": "Cost 2024", "fromTemplateColumn": "Cost", "format": "0.00"}
                    ]
                }
            }
        }]
    });
    let errors = export_to_excel(data.as_object_mut().unwrap(), &mut template, true);
    assert!(errors.is_empty(), "{errors:?}");

    let wb = &template.workbook;
    let sheet = wb.sheet("Jan").unwrap();
    assert_eq!(sheet.cell(1, 1).unwrap().value, CellValue::String("Item".into()));
    assert_eq!(
        sheet.cell(1, 2).unwrap().value,
        CellValue::String("Cost 2024".into())
    );
    assert_eq!(sheet.cell(2, 2).unwrap().value, CellValue::Number(7.0));
    // The column-spec format seeded the first data row and got replicated
    assert_eq!(
        sheet.cell(2, 2).unwrap().style.number_format.as_deref(),
        Some("0.00")
    );

    let item = &template.items["_Jan_Expenses"];
    assert!(item.header_cell("Cost 2024").is_some());
    assert!(item.header_cell("Cost").is_none());
}

#[test]
fn missing_template_sheet_is_reported_and_skipped() {
    let mut template = monthly_template();
    let mut data = json!({
        "sheets": [
            {"name": "Bad", "fromTemplateSheet": "Nope", "data": {}},
            {"name": "Jan", "fromTemplateSheet": "Month", "data": {"MonthTitle": "January"}}
        ]
    });
    let errors = export_to_excel(data.as_object_mut().unwrap(), &mut template, true);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Nope"));
    assert!(errors[0].contains("Bad"));

    // The healthy spec still went through
    let wb = &template.workbook;
    assert!(wb.sheet("Jan").is_some());
    assert!(wb.sheet("Bad").is_none());
    assert!(wb.sheet("Month").is_none());
}

#[test]
fn sheets_key_is_consumed_from_the_payload() {
    let mut template = monthly_template();
    let mut payload = monthly_payload();
    let data = payload.as_object_mut().unwrap();
    export_to_excel(data, &mut template, true);
    assert!(data.get("sheets").is_none());
    // Promoted keys are visible in the rewritten payload
    assert!(data.contains_key("_Jan_Expenses"));
    assert!(data.contains_key("Jan"));
}
