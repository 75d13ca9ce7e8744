//! Schema harmonization: raw source columns into the canonical dyadic shape.
//!
//! Column handling is declarative: a schema mapping lists every canonical
//! field with its accepted source names, and construction fails fast with
//! the field name when a source vintage dropped or renamed a column.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use tracing::{debug, info};

use crate::config::MeasurementCategory;
use crate::constants;
use crate::domain::FlowRecord;
use crate::error::{PipelineError, Result};
use crate::io::RawTable;
use crate::pipeline::audit::AuditLog;
use crate::reference::{Hint, ReferenceRepository};

/// Substring substitutions applied to raw headers before field matching.
/// These absorb the suffix conventions that drifted across source vintages.
const HEADER_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("_from", "_orig"),
    ("_to", "_dest"),
    ("linkedin", ""),
    ("number_people_who_indicated", "flow"),
    ("query_time_round", "query_time"),
];

/// One canonical field and the source names it may arrive under.
pub struct FieldSpec {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
}

/// The canonical dyadic schema for raw survey exports.
pub const DYADIC_FIELDS: &[FieldSpec] = &[
    FieldSpec { canonical: constants::COL_COUNTRY_ORIG, aliases: &["origin_country"] },
    FieldSpec { canonical: constants::COL_COUNTRY_DEST, aliases: &["destination_country"] },
    FieldSpec { canonical: constants::COL_FLOW, aliases: &["indicated_count"] },
    FieldSpec { canonical: constants::COL_USERS_ORIG, aliases: &["members_orig"] },
    FieldSpec { canonical: constants::COL_USERS_DEST, aliases: &["members_dest"] },
    FieldSpec { canonical: constants::COL_QUERY_TIME, aliases: &["query_date"] },
    FieldSpec { canonical: constants::COL_QUERY_INFO, aliases: &["query_category"] },
];

/// A row reshaped into the canonical schema but not yet identity-resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizedRow {
    pub origin_raw: String,
    pub destination_raw: String,
    pub collection_date: NaiveDate,
    pub flow: f64,
    pub users_origin: f64,
    pub users_destination: f64,
}

fn canonicalize_header(raw: &str) -> String {
    let mut name = raw.trim().to_lowercase();
    for (pattern, replacement) in HEADER_SUBSTITUTIONS {
        name = name.replace(pattern, replacement);
    }
    name
}

/// Resolved column positions for one raw table.
#[derive(Debug)]
pub struct Harmonizer {
    category: MeasurementCategory,
    country_orig: usize,
    country_dest: usize,
    flow: usize,
    users_orig: usize,
    users_dest: usize,
    query_time: usize,
    query_info: usize,
}

impl Harmonizer {
    /// Validate the raw header against the dyadic schema. A missing source
    /// column errors here, with the canonical field named, instead of
    /// surfacing as a bad index deep in the pipeline.
    pub fn new(table: &RawTable, category: MeasurementCategory) -> Result<Self> {
        let canonical_headers: Vec<String> =
            table.headers.iter().map(|h| canonicalize_header(h)).collect();

        let locate = |field: &'static str| -> Result<usize> {
            let spec = DYADIC_FIELDS
                .iter()
                .find(|s| s.canonical == field)
                .expect("field is declared in DYADIC_FIELDS");
            canonical_headers
                .iter()
                .position(|h| h == field || spec.aliases.contains(&h.as_str()))
                .ok_or_else(|| PipelineError::MissingColumn {
                    field,
                    aliases: spec.aliases.iter().map(|a| a.to_string()).collect(),
                })
        };

        Ok(Self {
            category,
            country_orig: locate("country_orig")?,
            country_dest: locate("country_dest")?,
            flow: locate("flow")?,
            users_orig: locate("users_orig")?,
            users_dest: locate("users_dest")?,
            query_time: locate("query_time")?,
            query_info: locate("query_info")?,
        })
    }

    /// Reshape one raw row. Returns `None` for rows belonging to the other
    /// measurement category; mixing categories is the data-integrity bug
    /// this stage exists to prevent.
    pub fn harmonize_row(&self, table: &RawTable, row: &[String]) -> Result<Option<HarmonizedRow>> {
        if table.cell(row, self.query_info) != self.category.raw_label() {
            return Ok(None);
        }
        Ok(Some(HarmonizedRow {
            origin_raw: table.cell(row, self.country_orig).to_string(),
            destination_raw: table.cell(row, self.country_dest).to_string(),
            collection_date: parse_collection_date(table.cell(row, self.query_time))?,
            flow: parse_number(table.cell(row, self.flow), "flow")?,
            users_origin: parse_number(table.cell(row, self.users_orig), "users_orig")?,
            users_destination: parse_number(table.cell(row, self.users_dest), "users_dest")?,
        }))
    }

    pub fn harmonize(&self, table: &RawTable) -> Result<Vec<HarmonizedRow>> {
        let mut rows = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            if let Some(harmonized) = self.harmonize_row(table, row)? {
                rows.push(harmonized);
            }
        }
        info!(
            kept = rows.len(),
            total = table.rows.len(),
            category = self.category.raw_label(),
            "harmonized raw table"
        );
        Ok(rows)
    }
}

/// Truncate the raw query timestamp to calendar-date granularity.
fn parse_collection_date(raw: &str) -> Result<NaiveDate> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.date());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| PipelineError::MalformedValue {
        column: "query_time".to_string(),
        value: raw.to_string(),
        reason: "expected a date or timestamp".to_string(),
    })
}

fn parse_number(raw: &str, column: &str) -> Result<f64> {
    raw.parse::<f64>().map_err(|_| PipelineError::MalformedValue {
        column: column.to_string(),
        value: raw.to_string(),
        reason: "expected a number".to_string(),
    })
}

/// Resolve raw country names into canonical identities, turning harmonized
/// rows into flow records. Rows whose identity cannot be resolved are
/// collected for the audit side-channel; resolution never guesses.
pub fn resolve_rows(
    rows: Vec<HarmonizedRow>,
    repo: &ReferenceRepository,
) -> (Vec<FlowRecord>, AuditLog) {
    let mut records = Vec::with_capacity(rows.len());
    let mut audit = AuditLog::default();
    for row in rows {
        let origin = match repo.resolve(&row.origin_raw, Hint::Name) {
            Ok(identity) => identity,
            Err(e) => {
                debug!(raw = %row.origin_raw, error = %e, "dropping row with unresolvable origin");
                audit.record(
                    "resolve",
                    e.to_string(),
                    json!({ "origin": row.origin_raw, "destination": row.destination_raw,
                            "date": row.collection_date.to_string() }),
                );
                continue;
            }
        };
        let destination = match repo.resolve(&row.destination_raw, Hint::Name) {
            Ok(identity) => identity,
            Err(e) => {
                debug!(raw = %row.destination_raw, error = %e, "dropping row with unresolvable destination");
                audit.record(
                    "resolve",
                    e.to_string(),
                    json!({ "origin": row.origin_raw, "destination": row.destination_raw,
                            "date": row.collection_date.to_string() }),
                );
                continue;
            }
        };
        records.push(FlowRecord {
            origin: origin.iso3.clone(),
            destination: destination.iso3.clone(),
            origin_name: origin.name.clone(),
            destination_name: destination.name.clone(),
            collection_date: row.collection_date,
            flow: row.flow.max(0.0) as u64,
            users_origin: row.users_origin.max(0.0) as u64,
            users_destination: row.users_destination.max(0.0) as u64,
            date_centered: 0,
            by_date_reciprocal: false,
            cross_date_reciprocal: false,
        });
    }
    (records, audit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tabular::read_csv_reader;

    fn raw_table() -> RawTable {
        let data = "\
country_from,country_to,number_people_who_indicated,query_time_round,query_info,linkedinusers_from,linkedinusers_to
United States,United Kingdom,120,2021-03-30 14:02:11,r4,1000,2000
United States,United Kingdom,340,2021-03-30 14:02:11,r6_remote,1000,2000
France,Germany,55,2021-03-30 14:02:11,r4,500,800
";
        read_csv_reader(data.as_bytes(), 0).unwrap()
    }

    #[test]
    fn test_header_substitutions() {
        assert_eq!(canonicalize_header("country_from"), "country_orig");
        assert_eq!(canonicalize_header("linkedinusers_to"), "users_dest");
        assert_eq!(canonicalize_header("number_people_who_indicated"), "flow");
        assert_eq!(canonicalize_header("query_time_round"), "query_time");
    }

    #[test]
    fn test_category_filter_is_exclusive() {
        let table = raw_table();
        let harmonizer = Harmonizer::new(&table, MeasurementCategory::Relocate).unwrap();
        let rows = harmonizer.harmonize(&table).unwrap();
        // The r6_remote row must be excluded, never averaged in
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].flow, 120.0);
        assert_eq!(
            rows[0].collection_date,
            NaiveDate::from_ymd_opt(2021, 3, 30).unwrap()
        );
    }

    #[test]
    fn test_missing_column_fails_with_field_name() {
        let data = "country_from,query_time_round,query_info\nUnited States,2021-03-30 14:02:11,r4\n";
        let table = read_csv_reader(data.as_bytes(), 0).unwrap();
        let err = Harmonizer::new(&table, MeasurementCategory::Relocate).unwrap_err();
        match err {
            PipelineError::MissingColumn { field, .. } => assert_eq!(field, "country_dest"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_resolve_rows_drops_unknowns_with_audit() {
        let repo = ReferenceRepository::from_embedded().unwrap();
        let table = raw_table();
        let harmonizer = Harmonizer::new(&table, MeasurementCategory::Relocate).unwrap();
        let mut rows = harmonizer.harmonize(&table).unwrap();
        rows.push(HarmonizedRow {
            origin_raw: "Atlantis".to_string(),
            destination_raw: "France".to_string(),
            collection_date: NaiveDate::from_ymd_opt(2021, 3, 30).unwrap(),
            flow: 5.0,
            users_origin: 10.0,
            users_destination: 10.0,
        });

        let (records, audit) = resolve_rows(rows, &repo);
        assert_eq!(records.len(), 2);
        assert_eq!(audit.len(), 1);
        assert_eq!(records[0].origin.as_str(), "usa");
        assert_eq!(records[0].origin_name, "United States");
    }
}
