//! Reciprocal-pair resolution.
//!
//! A dyad is reciprocal on a date when both directions of the corridor were
//! measured on that date. The cross-date flag is stricter: the pair must be
//! reciprocal on every retained collection date, so the panel restricted to
//! it is balanced over time.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::domain::{DyadKey, FlowRecord};

/// Canonical undirected form of a corridor, so (a, b) and (b, a) agree.
fn unordered(dyad: &DyadKey) -> DyadKey {
    let mirror = dyad.mirrored();
    if *dyad <= mirror {
        dyad.clone()
    } else {
        mirror
    }
}

/// Per-date sets of corridors measured in both directions.
pub fn pairs_by_date(records: &[FlowRecord]) -> BTreeMap<NaiveDate, HashSet<DyadKey>> {
    let mut directed: BTreeMap<NaiveDate, HashSet<DyadKey>> = BTreeMap::new();
    for record in records {
        directed
            .entry(record.collection_date)
            .or_default()
            .insert(record.dyad());
    }
    directed
        .into_iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(date, dyads)| {
            let pairs = dyads
                .iter()
                .filter(|dyad| dyads.contains(&dyad.mirrored()))
                .map(unordered)
                .collect();
            (date, pairs)
        })
        .collect()
}

/// Corridors reciprocal on every date except the excluded ones.
pub fn cross_date_pairs(
    by_date: &BTreeMap<NaiveDate, HashSet<DyadKey>>,
    excluded_dates: &[NaiveDate],
) -> HashSet<DyadKey> {
    let mut iter = by_date
        .iter()
        .filter(|(date, _)| !excluded_dates.contains(date))
        .map(|(_, pairs)| pairs);
    let Some(first) = iter.next() else {
        return HashSet::new();
    };
    let mut intersection = first.clone();
    for pairs in iter {
        intersection.retain(|pair| pairs.contains(pair));
    }
    intersection
}

/// Sets both reciprocity flags on every record in place. Records on an
/// excluded date never carry the cross-date flag, since those dates do not
/// take part in the balanced panel.
pub fn flag_reciprocals(records: &mut [FlowRecord], excluded_dates: &[NaiveDate]) {
    let by_date = pairs_by_date(records);
    let cross = cross_date_pairs(&by_date, excluded_dates);
    let mut by_date_count = 0usize;
    let mut cross_count = 0usize;
    for record in records.iter_mut() {
        let pair = unordered(&record.dyad());
        record.by_date_reciprocal = by_date
            .get(&record.collection_date)
            .is_some_and(|pairs| pairs.contains(&pair));
        record.cross_date_reciprocal =
            !excluded_dates.contains(&record.collection_date) && cross.contains(&pair);
        by_date_count += record.by_date_reciprocal as usize;
        cross_count += record.cross_date_reciprocal as usize;
    }
    info!(
        cross_date_pairs = cross.len(),
        by_date_records = by_date_count,
        cross_date_records = cross_count,
        "reciprocity flags set"
    );
}

/// One row of the leave-one-date-out diagnostic.
#[derive(Debug, Serialize)]
pub struct SensitivityEntry {
    /// `None` is the baseline with every retained date included.
    pub removed_date: Option<NaiveDate>,
    pub pair_count: usize,
}

/// Shows how much each collection date constrains the balanced panel: a
/// date whose removal inflates the pair count is a date with poor coverage.
pub fn sensitivity(records: &[FlowRecord], excluded_dates: &[NaiveDate]) -> Vec<SensitivityEntry> {
    let by_date = pairs_by_date(records);
    let mut entries = vec![SensitivityEntry {
        removed_date: None,
        pair_count: cross_date_pairs(&by_date, excluded_dates).len(),
    }];
    for date in by_date.keys() {
        if excluded_dates.contains(date) {
            continue;
        }
        let mut without = excluded_dates.to_vec();
        without.push(*date);
        entries.push(SensitivityEntry {
            removed_date: Some(*date),
            pair_count: cross_date_pairs(&by_date, &without).len(),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Iso3;

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
    fn test_by_date_flag_requires_both_directions_same_date() {
        let mut records = vec![
            record("usa", "gbr", (2021, 1, 1), 10),
            record("gbr", "usa", (2021, 1, 1), 8),
            record("fra", "deu", (2021, 1, 1), 5),
            // reverse direction exists, but only on a different date
            record("deu", "fra", (2021, 2, 1), 4),
        ];
        flag_reciprocals(&mut records, &[]);
        assert!(records[0].by_date_reciprocal);
        assert!(records[1].by_date_reciprocal);
        assert!(!records[2].by_date_reciprocal);
        assert!(!records[3].by_date_reciprocal);
    }

    #[test]
    fn test_cross_date_flag_requires_every_date() {
        let mut records = vec![
            record("usa", "gbr", (2021, 1, 1), 10),
            record("gbr", "usa", (2021, 1, 1), 8),
            record("usa", "gbr", (2021, 2, 1), 11),
            record("gbr", "usa", (2021, 2, 1), 9),
            // reciprocal in january only
            record("fra", "deu", (2021, 1, 1), 5),
            record("deu", "fra", (2021, 1, 1), 4),
            record("fra", "deu", (2021, 2, 1), 6),
        ];
        flag_reciprocals(&mut records, &[]);
        for record in &records[..4] {
            assert!(record.cross_date_reciprocal);
        }
        for record in &records[4..] {
            assert!(!record.cross_date_reciprocal);
        }
    }

    #[test]
    fn test_excluded_dates_do_not_constrain_the_panel() {
        let bad_date = NaiveDate::from_ymd_opt(2021, 2, 8).unwrap();
        let mut records = vec![
            record("usa", "gbr", (2021, 1, 1), 10),
            record("gbr", "usa", (2021, 1, 1), 8),
            // the pair is one-directional on the excluded date
            record("usa", "gbr", (2021, 2, 8), 3),
        ];
        flag_reciprocals(&mut records, &[bad_date]);
        assert!(records[0].cross_date_reciprocal);
        assert!(records[1].cross_date_reciprocal);
        // records on an excluded date never carry the flag
        assert!(!records[2].cross_date_reciprocal);
    }

    #[test]
    fn test_sensitivity_reports_baseline_and_leave_one_out() {
        let records = vec![
            record("usa", "gbr", (2021, 1, 1), 10),
            record("gbr", "usa", (2021, 1, 1), 8),
            record("usa", "gbr", (2021, 2, 1), 11),
            record("gbr", "usa", (2021, 2, 1), 9),
            record("fra", "deu", (2021, 1, 1), 5),
            record("deu", "fra", (2021, 1, 1), 4),
        ];
        let entries = sensitivity(&records, &[]);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].removed_date, None);
        assert_eq!(entries[0].pair_count, 1);
        // dropping february admits the fra-deu pair
        let feb = NaiveDate::from_ymd_opt(2021, 2, 1).unwrap();
        let without_feb = entries
            .iter()
            .find(|e| e.removed_date == Some(feb))
            .unwrap();
        assert_eq!(without_feb.pair_count, 2);
    }

    /// Pseudo-random corridor sample, deterministic so failures reproduce.
    fn scrambled_records() -> Vec<FlowRecord> {
        let countries = ["usa", "gbr", "fra", "deu", "esp", "ita", "nld", "pol"];
        let mut records = Vec::new();
        let mut state = 0x2545f49_u64;
        for day in 0..6u32 {
            for (i, origin) in countries.iter().enumerate() {
                for dest in &countries[i + 1..] {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    // roughly half the corridors get both directions
                    records.push(record(origin, dest, (2021, 3, 1 + day), 10));
                    if state & 1 == 0 {
                        records.push(record(dest, origin, (2021, 3, 1 + day), 8));
                    }
                }
            }
            // one corridor is reciprocal on every date no matter the draw
            records.push(record("can", "mex", (2021, 3, 1 + day), 5));
            records.push(record("mex", "can", (2021, 3, 1 + day), 4));
        }
        records
    }

    #[test]
    fn test_cross_date_pairs_are_reciprocal_on_every_retained_date() {
        let records = scrambled_records();
        let excluded = [NaiveDate::from_ymd_opt(2021, 3, 3).unwrap()];
        let by_date = pairs_by_date(&records);
        let cross = cross_date_pairs(&by_date, &excluded);
        assert!(cross.contains(&DyadKey::new(Iso3::new("can"), Iso3::new("mex"))));
        for (date, pairs) in &by_date {
            if excluded.contains(date) {
                continue;
            }
            assert!(
                cross.is_subset(pairs),
                "pair set balanced across dates must be reciprocal on {date}"
            );
        }
    }

    #[test]
    fn test_excluding_more_dates_never_shrinks_the_pair_set() {
        let records = scrambled_records();
        let by_date = pairs_by_date(&records);
        let mut excluded: Vec<NaiveDate> = Vec::new();
        let mut previous = cross_date_pairs(&by_date, &excluded);
        let dates: Vec<NaiveDate> = by_date.keys().copied().collect();
        // leave the last date retained so the intersection stays meaningful
        for date in &dates[..dates.len() - 1] {
            excluded.push(*date);
            let current = cross_date_pairs(&by_date, &excluded);
            assert!(
                previous.is_subset(&current),
                "dropping {date} from the panel must not remove pairs"
            );
            previous = current;
        }
    }

    #[test]
    fn test_no_dates_yields_empty_pair_set() {
        let by_date = BTreeMap::new();
        assert!(cross_date_pairs(&by_date, &[]).is_empty());
    }
}
