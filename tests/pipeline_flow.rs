//! End-to-end exercise of the in-memory pipeline stages: harmonize a raw
//! survey table, resolve identities, validate, flag reciprocity, and
//! aggregate, without touching the filesystem or the network.

use chrono::NaiveDate;
use intentflow::config::{MeasurementCategory, ValidationConfig};
use intentflow::io::tabular::read_csv_reader;
use intentflow::pipeline::aggregate::{variation, GroupBy, ValueColumn};
use intentflow::pipeline::enrich::{enrich, EnrichmentTables};
use intentflow::pipeline::harmonize::{resolve_rows, Harmonizer};
use intentflow::pipeline::reciprocity::flag_reciprocals;
use intentflow::pipeline::validate::validate;
use intentflow::reference::ReferenceRepository;

fn raw_survey() -> &'static str {
    // raw export headers in the source system's vocabulary, two
    // measurement categories interleaved, one exact duplicate row
    "country_from,country_to,number_people_who_indicated,linkedinusers_from,linkedinusers_to,query_time_round,query_info\n\
     United States of America,Korea (the Republic of),120,1000,900,2021-01-04 00:00:00,r4\n\
     Korea (the Republic of),United States of America,80,900,1000,2021-01-04 00:00:00,r4\n\
     Korea (the Republic of),United States of America,80,900,1000,2021-01-04 00:00:00,r4\n\
     United States of America,Kosovo,30,1000,50,2021-01-04 00:00:00,r4\n\
     United States of America,Korea (the Republic of),999,1000,900,2021-01-04 00:00:00,r6_remote\n\
     United States of America,Korea (the Republic of),130,1000,900,2021-02-01 00:00:00,r4\n\
     Korea (the Republic of),United States of America,85,900,1000,2021-02-01 00:00:00,r4\n"
}

#[test]
fn test_raw_table_to_variation_summary() {
    let table = read_csv_reader(raw_survey().as_bytes(), 0).unwrap();
    let harmonizer = Harmonizer::new(&table, MeasurementCategory::Relocate).unwrap();
    let rows = harmonizer.harmonize(&table).unwrap();
    // the r6_remote row never enters the relocate panel
    assert_eq!(rows.len(), 6);

    let repo = ReferenceRepository::from_embedded().unwrap();
    let (records, resolve_audit) = resolve_rows(rows, &repo);
    assert_eq!(records.len(), 6);
    assert!(resolve_audit.is_empty());
    assert!(records.iter().any(|r| r.destination.as_str() == "kor"));
    assert!(records.iter().any(|r| r.destination.as_str() == "xkx"));

    let outcome = validate(records, &ValidationConfig::default()).unwrap();
    // the exact duplicate collapsed
    assert_eq!(outcome.records.len(), 5);
    assert!(outcome.dropped.is_empty());

    let mut records = outcome.records;
    flag_reciprocals(&mut records, &[]);
    for record in &records {
        let usa_kor = (record.origin.as_str(), record.destination.as_str()) != ("usa", "xkx");
        assert_eq!(record.by_date_reciprocal, usa_kor);
        assert_eq!(record.cross_date_reciprocal, usa_kor);
    }

    let panel = enrich(records, &EnrichmentTables::default());
    let rows = variation(&panel, GroupBy::Dyad, &[ValueColumn::Flow]).unwrap();
    let usa_kor = rows
        .iter()
        .find(|r| r.group_orig == "usa" && r.group_dest == "kor")
        .unwrap();
    assert_eq!(usa_kor.summary.count, 2);
    assert_eq!(usa_kor.summary.mean, 125.0);
    let kosovo = rows
        .iter()
        .find(|r| r.group_orig == "usa" && r.group_dest == "xkx")
        .unwrap();
    assert_eq!(kosovo.summary.count, 1);
    assert_eq!(kosovo.summary.std, None);
}

#[test]
fn test_collection_dates_truncate_timestamps() {
    let table = read_csv_reader(raw_survey().as_bytes(), 0).unwrap();
    let harmonizer = Harmonizer::new(&table, MeasurementCategory::Relocate).unwrap();
    let rows = harmonizer.harmonize(&table).unwrap();
    assert!(rows
        .iter()
        .all(|r| r.collection_date == NaiveDate::from_ymd_opt(2021, 1, 4).unwrap()
            || r.collection_date == NaiveDate::from_ymd_opt(2021, 2, 1).unwrap()));
}
