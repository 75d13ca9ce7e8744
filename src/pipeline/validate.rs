//! Deduplication and integrity validation.
//!
//! The philosophy is "fail loud, don't guess": identical duplicate
//! measurements collapse, conflicting ones are surfaced as a named error in
//! strict mode or dropped with an audit entry in best-effort mode. Nothing
//! is fixed up silently.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{ValidationConfig, ValidationMode};
use crate::domain::{FlowRecord, Iso3};
use crate::error::{PipelineError, Result};
use crate::pipeline::audit::AuditLog;
use crate::pipeline::harmonize::HarmonizedRow;

#[derive(Debug)]
pub struct ValidationOutcome {
    pub records: Vec<FlowRecord>,
    pub audit: AuditLog,
    /// Rows removed from the panel, for the dropped-rows side-channel file
    pub dropped: Vec<FlowRecord>,
}

/// Counts must be integral before they become `FlowRecord`s; a fractional
/// flow means an upstream aggregation already mangled the data.
pub fn check_integral_counts(
    rows: Vec<HarmonizedRow>,
    mode: ValidationMode,
    audit: &mut AuditLog,
) -> Result<Vec<HarmonizedRow>> {
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        if row.flow.fract() != 0.0 || row.flow < 0.0 {
            let reason = format!(
                "non-integral flow count {} for ({}, {})",
                row.flow, row.origin_raw, row.destination_raw
            );
            if mode == ValidationMode::Strict {
                return Err(PipelineError::Integrity(reason));
            }
            audit.record(
                "validate",
                reason,
                json!({ "origin": row.origin_raw, "destination": row.destination_raw,
                        "date": row.collection_date.to_string(), "flow": row.flow }),
            );
            continue;
        }
        kept.push(row);
    }
    Ok(kept)
}

/// Remap collection dates split by timeout errors: dates closer together
/// than the cutoff belong to one collection run and collapse onto the
/// earlier date. Also recomputes the centered-date offset for every record.
pub fn coalesce_collection_dates(records: &mut [FlowRecord], cutoff_days: i64, audit: &mut AuditLog) {
    let mut dates: Vec<NaiveDate> = records
        .iter()
        .map(|r| r.collection_date)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    dates.sort();

    let mut remap: BTreeMap<NaiveDate, NaiveDate> = BTreeMap::new();
    for window in dates.windows(2) {
        let (earlier, later) = (window[0], window[1]);
        if (later - earlier).num_days() < cutoff_days {
            // chains collapse onto the first date of the run
            let target = remap.get(&earlier).copied().unwrap_or(earlier);
            remap.insert(later, target);
        }
    }
    for (from, to) in &remap {
        audit.record(
            "validate",
            "collection date remapped (timeout correction)",
            json!({ "from": from.to_string(), "to": to.to_string() }),
        );
    }
    for record in records.iter_mut() {
        if let Some(target) = remap.get(&record.collection_date) {
            record.collection_date = *target;
        }
    }

    let mut final_dates: Vec<NaiveDate> = records
        .iter()
        .map(|r| r.collection_date)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    final_dates.sort();
    if final_dates.is_empty() {
        return;
    }
    let midpoint = final_dates[final_dates.len() / 2];
    for record in records.iter_mut() {
        record.date_centered = (record.collection_date - midpoint).num_days();
    }
}

/// Full validation pass: self-loops, known-bad rows, date coalescing, then
/// duplicate collapse/conflict handling. Idempotent on already-clean input.
pub fn validate(records: Vec<FlowRecord>, config: &ValidationConfig) -> Result<ValidationOutcome> {
    let mut audit = AuditLog::default();
    let mut dropped = Vec::new();
    let mut kept: Vec<FlowRecord> = Vec::with_capacity(records.len());

    for record in records {
        if record.origin == record.destination {
            audit.record(
                "validate",
                "origin equals destination",
                json!({ "iso3": record.origin.as_str(), "date": record.collection_date.to_string() }),
            );
            dropped.push(record);
            continue;
        }
        if is_known_bad(&record, config) {
            audit.record(
                "validate",
                "known-bad dyad/date combination",
                json!({ "origin": record.origin.as_str(), "destination": record.destination.as_str(),
                        "date": record.collection_date.to_string() }),
            );
            dropped.push(record);
            continue;
        }
        kept.push(record);
    }

    coalesce_collection_dates(&mut kept, config.date_coalesce_days, &mut audit);

    // Group by identity key; zero-variance duplicates collapse keep-first,
    // disagreeing duplicates are a measurement conflict.
    let mut groups: BTreeMap<(Iso3, Iso3, NaiveDate), Vec<FlowRecord>> = BTreeMap::new();
    for record in kept {
        groups.entry(record.dated_key()).or_default().push(record);
    }

    let mut records = Vec::with_capacity(groups.len());
    for ((origin, destination, date), group) in groups {
        if group.len() == 1 {
            records.extend(group);
            continue;
        }
        let values: Vec<u64> = group.iter().map(|r| r.flow).collect();
        let identical = values.windows(2).all(|w| w[0] == w[1]);
        if identical {
            audit.record(
                "validate",
                "identical duplicates collapsed",
                json!({ "origin": origin.as_str(), "destination": destination.as_str(),
                        "date": date.to_string(), "copies": group.len() }),
            );
            let mut group = group;
            records.push(group.swap_remove(0));
            continue;
        }
        match config.mode {
            ValidationMode::Strict => {
                return Err(PipelineError::DuplicateConflict {
                    origin: origin.as_str().to_string(),
                    destination: destination.as_str().to_string(),
                    date,
                    values,
                });
            }
            ValidationMode::BestEffort => {
                warn!(
                    origin = origin.as_str(),
                    destination = destination.as_str(),
                    date = %date,
                    ?values,
                    "dropping conflicting duplicate group"
                );
                audit.record(
                    "validate",
                    "conflicting duplicate group dropped",
                    json!({ "origin": origin.as_str(), "destination": destination.as_str(),
                            "date": date.to_string(), "values": values }),
                );
                dropped.extend(group);
            }
        }
    }

    info!(
        kept = records.len(),
        dropped = dropped.len(),
        interventions = audit.len(),
        "validation pass complete"
    );
    Ok(ValidationOutcome {
        records,
        audit,
        dropped,
    })
}

fn is_known_bad(record: &FlowRecord, config: &ValidationConfig) -> bool {
    config.known_bad.iter().any(|rule| {
        rule.date == record.collection_date
            && Iso3::new(&rule.destination) == record.destination
            && rule
                .origins
                .iter()
                .any(|origin| Iso3::new(origin) == record.origin)
    })
}

/// Sanity bound against unit-conversion bugs in per-country reference data.
/// Strict mode aborts; best-effort drops the offending value with an audit
/// entry so the join later reports it as missing rather than absurd.
pub fn apply_magnitude_cap(
    label: &'static str,
    values: &mut HashMap<Iso3, f64>,
    cap: f64,
    mode: ValidationMode,
    audit: &mut AuditLog,
) -> Result<()> {
    let offenders: Vec<Iso3> = values
        .iter()
        .filter(|(_, &v)| v > cap)
        .map(|(k, _)| k.clone())
        .collect();
    if offenders.is_empty() {
        return Ok(());
    }
    if mode == ValidationMode::Strict {
        return Err(PipelineError::Integrity(format!(
            "{} exceeds physical maximum {} for {:?}",
            label, cap, offenders
        )));
    }
    for iso3 in offenders {
        let value = values.remove(&iso3);
        audit.record(
            "validate",
            format!("{} above physical maximum dropped", label),
            json!({ "iso3": iso3.as_str(), "value": value, "cap": cap }),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnownBadRule;

    fn record(origin: &str, dest: &str, date: (i32, u32, u32), flow: u64) -> FlowRecord {
        FlowRecord {
            origin: Iso3::new(origin),
            destination: Iso3::new(dest),
            origin_name: origin.to_uppercase(),
            destination_name: dest.to_uppercase(),
            collection_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            flow,
            users_origin: 100,
            users_destination: 100,
            date_centered: 0,
            by_date_reciprocal: false,
            cross_date_reciprocal: false,
        }
    }

    #[test]
    fn test_identical_duplicates_collapse_to_one() {
        let records = vec![
            record("usa", "gbr", (2021, 1, 1), 10),
            record("usa", "gbr", (2021, 1, 1), 10),
        ];
        let outcome = validate(records, &ValidationConfig::default()).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].flow, 10);
    }

    #[test]
    fn test_conflicting_duplicates_abort_strict_with_named_key() {
        let records = vec![
            record("usa", "gbr", (2021, 1, 1), 10),
            record("usa", "gbr", (2021, 1, 1), 12),
        ];
        let err = validate(records, &ValidationConfig::default()).unwrap_err();
        match err {
            PipelineError::DuplicateConflict { origin, destination, values, .. } => {
                assert_eq!(origin, "usa");
                assert_eq!(destination, "gbr");
                assert_eq!(values, vec![10, 12]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_conflicting_duplicates_dropped_best_effort() {
        let config = ValidationConfig {
            mode: ValidationMode::BestEffort,
            ..ValidationConfig::default()
        };
        let records = vec![
            record("usa", "gbr", (2021, 1, 1), 10),
            record("usa", "gbr", (2021, 1, 1), 12),
            record("fra", "deu", (2021, 1, 1), 5),
        ];
        let outcome = validate(records, &config).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].origin.as_str(), "fra");
        assert_eq!(outcome.dropped.len(), 2);
        assert!(!outcome.audit.is_empty());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let records = vec![
            record("usa", "gbr", (2021, 1, 1), 10),
            record("usa", "gbr", (2021, 1, 1), 10),
            record("gbr", "usa", (2021, 1, 15), 7),
        ];
        let config = ValidationConfig::default();
        let first = validate(records, &config).unwrap();
        let second = validate(first.records.clone(), &config).unwrap();
        assert_eq!(first.records.len(), second.records.len());
        for (a, b) in first.records.iter().zip(second.records.iter()) {
            assert_eq!(a.dated_key(), b.dated_key());
            assert_eq!(a.flow, b.flow);
        }
        // the second pass made no interventions
        assert!(second.dropped.is_empty());
    }

    #[test]
    fn test_self_loops_dropped() {
        let records = vec![record("usa", "usa", (2021, 1, 1), 10)];
        let outcome = validate(records, &ValidationConfig::default()).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.dropped.len(), 1);
    }

    #[test]
    fn test_known_bad_rows_filtered() {
        let config = ValidationConfig {
            known_bad: vec![KnownBadRule {
                date: NaiveDate::from_ymd_opt(2020, 10, 8).unwrap(),
                destination: "caf".to_string(),
                origins: vec!["usa".to_string(), "gbr".to_string()],
                rationale: "implausible spike".to_string(),
            }],
            ..ValidationConfig::default()
        };
        let records = vec![
            record("usa", "caf", (2020, 10, 8), 9999),
            record("fra", "caf", (2020, 10, 8), 12),
        ];
        let outcome = validate(records, &config).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].origin.as_str(), "fra");
    }

    #[test]
    fn test_nearby_dates_coalesce_to_earlier() {
        let mut records = vec![
            record("usa", "gbr", (2021, 3, 20), 10),
            record("fra", "deu", (2021, 3, 24), 5),
            record("usa", "gbr", (2021, 5, 1), 11),
        ];
        let mut audit = AuditLog::default();
        coalesce_collection_dates(&mut records, 10, &mut audit);
        assert_eq!(
            records[1].collection_date,
            NaiveDate::from_ymd_opt(2021, 3, 20).unwrap()
        );
        assert_eq!(
            records[2].collection_date,
            NaiveDate::from_ymd_opt(2021, 5, 1).unwrap()
        );
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_integral_check_strict_errors() {
        let row = HarmonizedRow {
            origin_raw: "United States".to_string(),
            destination_raw: "France".to_string(),
            collection_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            flow: 10.5,
            users_origin: 1.0,
            users_destination: 1.0,
        };
        let mut audit = AuditLog::default();
        assert!(check_integral_counts(vec![row.clone()], ValidationMode::Strict, &mut audit).is_err());
        let kept =
            check_integral_counts(vec![row], ValidationMode::BestEffort, &mut audit).unwrap();
        assert!(kept.is_empty());
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_magnitude_cap() {
        let mut values = HashMap::new();
        values.insert(Iso3::new("rus"), 17_098_246.0);
        values.insert(Iso3::new("usa"), 9.8e13); // unit bug: m^2 not km^2
        let mut audit = AuditLog::default();
        assert!(apply_magnitude_cap(
            "area",
            &mut values.clone(),
            17_100_000.0,
            ValidationMode::Strict,
            &mut audit
        )
        .is_err());
        apply_magnitude_cap("area", &mut values, 17_100_000.0, ValidationMode::BestEffort, &mut audit)
            .unwrap();
        assert_eq!(values.len(), 1);
        assert!(values.contains_key(&Iso3::new("rus")));
    }
}
