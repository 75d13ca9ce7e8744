//! Plain string-table reading for delimited text sources.
//!
//! Every reader in this module produces a [`RawTable`]; the schema
//! harmonizer and the enrichment loaders decide what the columns mean.

use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// An untyped table of rows and columns, as read from disk.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Index of a column by exact header name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell value, empty string for ragged rows.
    pub fn cell<'a>(&'a self, row: &'a [String], col: usize) -> &'a str {
        row.get(col).map(String::as_str).unwrap_or("")
    }
}

/// Read a CSV file into a raw table.
pub fn read_csv(path: &Path) -> Result<RawTable> {
    read_csv_with_offset(path, 0)
}

/// Read a CSV file whose header row sits below `skip_rows` preamble lines
/// (World Bank exports carry four lines of boilerplate before the header).
pub fn read_csv_with_offset(path: &Path, skip_rows: usize) -> Result<RawTable> {
    let file = std::fs::File::open(path)?;
    read_csv_reader(file, skip_rows)
}

pub fn read_csv_reader<R: Read>(reader: R, skip_rows: usize) -> Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut table = RawTable::default();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        if i < skip_rows {
            continue;
        }
        let fields: Vec<String> = record.iter().map(|f| f.trim().to_string()).collect();
        if i == skip_rows {
            table.headers = fields;
        } else {
            table.rows.push(fields);
        }
    }
    Ok(table)
}
