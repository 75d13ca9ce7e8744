//! XLS/XLSX reference tables read as plain row/column tables.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{PipelineError, Result};
use crate::io::tabular::RawTable;

/// Read the first worksheet of a spreadsheet, treating row `header_row`
/// (zero-based) as the header and everything below it as data. The UN
/// population workbook buries its header sixteen rows deep.
pub fn read_sheet(path: &Path, header_row: usize) -> Result<RawTable> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names = workbook.sheet_names().to_vec();
    let first = sheet_names.first().ok_or_else(|| {
        PipelineError::Integrity(format!("workbook '{}' contains no sheets", path.display()))
    })?;
    let range = workbook.worksheet_range(first)?;

    let mut table = RawTable::default();
    for (i, row) in range.rows().enumerate() {
        if i < header_row {
            continue;
        }
        let fields: Vec<String> = row.iter().map(cell_to_string).collect();
        if i == header_row {
            table.headers = fields;
        } else {
            table.rows.push(fields);
        }
    }
    Ok(table)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => format_float(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("{:?}", e),
        Data::DateTime(dt) => format_float(dt.as_f64()),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}
