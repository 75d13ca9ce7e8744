//! Derived measures over the enriched panel: net migration balances,
//! within-destination flow ranks, and per-dyad percent change between
//! consecutive collection dates.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{DyadKey, Iso3};
use crate::pipeline::enrich::EnrichedRecord;

/// Net migration of a row: the destination's total intended inflow minus
/// the origin's total intended outflow on the same date, computed
/// separately inside and outside the balanced reciprocal panel so the two
/// are never mixed.
pub fn net_migration(records: &mut [EnrichedRecord]) {
    type Key = (Iso3, NaiveDate, bool);
    let mut inflow: HashMap<Key, i64> = HashMap::new();
    let mut outflow: HashMap<Key, i64> = HashMap::new();
    for record in records.iter() {
        let flag = record.flow.cross_date_reciprocal;
        let date = record.flow.collection_date;
        *inflow
            .entry((record.flow.destination.clone(), date, flag))
            .or_default() += record.flow.flow as i64;
        *outflow
            .entry((record.flow.origin.clone(), date, flag))
            .or_default() += record.flow.flow as i64;
    }
    for record in records.iter_mut() {
        let date = record.flow.collection_date;
        let flag = record.flow.cross_date_reciprocal;
        let key_in = (record.flow.destination.clone(), date, flag);
        let key_out = (record.flow.origin.clone(), date, flag);
        let net = inflow.get(&key_in).copied().unwrap_or(0)
            - outflow.get(&key_out).copied().unwrap_or(0);
        record.net_flow = Some(net);
        record.net_rate_100 = if record.flow.users_origin > 0 {
            Some(net as f64 / record.flow.users_origin as f64 * 100.0)
        } else {
            None
        };
    }
}

/// Rank of each origin within (destination, date) by descending flow,
/// ties broken by input order, plus the percentile form rank / group size.
pub fn flow_ranks(records: &mut [EnrichedRecord]) {
    let mut groups: BTreeMap<(Iso3, NaiveDate), Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        groups
            .entry((record.flow.destination.clone(), record.flow.collection_date))
            .or_default()
            .push(i);
    }
    for indices in groups.into_values() {
        let mut ordered = indices;
        ordered.sort_by_key(|&i| std::cmp::Reverse(records[i].flow.flow));
        let size = ordered.len() as f64;
        for (position, &i) in ordered.iter().enumerate() {
            let rank = position as u32 + 1;
            records[i].rank = Some(rank);
            records[i].rank_norm = Some(rank as f64 / size);
        }
    }
}

/// One output row of the percent-change table.
#[derive(Debug, Clone, Serialize)]
pub struct PctChangeRow {
    pub origin: Iso3,
    pub destination: Iso3,
    pub date: NaiveDate,
    pub previous_date: NaiveDate,
    pub flow_pct_change: Option<f64>,
    pub users_orig_pct_change: Option<f64>,
    pub users_dest_pct_change: Option<f64>,
}

impl PctChangeRow {
    pub fn csv_headers() -> Vec<&'static str> {
        vec![
            "country_orig", "country_dest", "query_date", "previous_date",
            "flow_pct_change", "users_orig_pct_change", "users_dest_pct_change",
        ]
    }

    pub fn to_csv_row(&self) -> Vec<String> {
        let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        vec![
            self.origin.to_string(),
            self.destination.to_string(),
            self.date.to_string(),
            self.previous_date.to_string(),
            opt(self.flow_pct_change),
            opt(self.users_orig_pct_change),
            opt(self.users_dest_pct_change),
        ]
    }
}

fn pct(previous: u64, current: u64) -> Option<f64> {
    if previous == 0 {
        return None;
    }
    Some((current as f64 - previous as f64) / previous as f64 * 100.0)
}

/// Percent change per dyad between consecutive observed collection dates.
/// A dyad's first observation has no row; a zero base yields an empty cell
/// rather than an infinity.
pub fn pct_change(records: &[EnrichedRecord]) -> Vec<PctChangeRow> {
    let mut by_dyad: BTreeMap<DyadKey, BTreeMap<NaiveDate, (u64, u64, u64)>> = BTreeMap::new();
    for record in records {
        by_dyad.entry(record.flow.dyad()).or_default().insert(
            record.flow.collection_date,
            (
                record.flow.flow,
                record.flow.users_origin,
                record.flow.users_destination,
            ),
        );
    }
    let mut rows = Vec::new();
    for (dyad, by_date) in by_dyad {
        let ordered: Vec<_> = by_date.into_iter().collect();
        for pair in ordered.windows(2) {
            let (prev_date, (prev_flow, prev_uo, prev_ud)) = pair[0];
            let (date, (flow, uo, ud)) = pair[1];
            rows.push(PctChangeRow {
                origin: dyad.origin.clone(),
                destination: dyad.destination.clone(),
                date,
                previous_date: prev_date,
                flow_pct_change: pct(prev_flow, flow),
                users_orig_pct_change: pct(prev_uo, uo),
                users_dest_pct_change: pct(prev_ud, ud),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FlowRecord;
    use crate::pipeline::enrich::{enrich, EnrichmentTables};

    fn enriched(origin: &str, dest: &str, date: (i32, u32, u32), flow: u64) -> EnrichedRecord {
        let record = FlowRecord {
            origin: Iso3::new(origin),
            destination: Iso3::new(dest),
            origin_name: origin.to_uppercase(),
            destination_name: dest.to_uppercase(),
            collection_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            flow,
            users_origin: 1000,
            users_destination: 1000,
            date_centered: 0,
            by_date_reciprocal: true,
            cross_date_reciprocal: true,
        };
        enrich(vec![record], &EnrichmentTables::default()).remove(0)
    }

    #[test]
    fn test_net_migration_is_dest_inflow_minus_orig_outflow() {
        let mut records = vec![
            enriched("usa", "gbr", (2021, 1, 1), 10),
            enriched("gbr", "usa", (2021, 1, 1), 4),
            enriched("usa", "fra", (2021, 1, 1), 6),
        ];
        net_migration(&mut records);
        // usa -> gbr: inflow(gbr) = 10, outflow(usa) = 16
        assert_eq!(records[0].net_flow, Some(-6));
        let rate = records[0].net_rate_100.unwrap();
        assert!((rate - (-0.6)).abs() < 1e-12);
        // gbr -> usa: inflow(usa) = 4, outflow(gbr) = 4
        assert_eq!(records[1].net_flow, Some(0));
        // usa -> fra: inflow(fra) = 6, outflow(usa) = 16
        assert_eq!(records[2].net_flow, Some(-10));
    }

    #[test]
    fn test_net_migration_keeps_panels_separate() {
        let inside = enriched("usa", "gbr", (2021, 1, 1), 10);
        let mut outside = enriched("fra", "gbr", (2021, 1, 1), 7);
        outside.flow.cross_date_reciprocal = false;
        let mut records = vec![inside, outside];
        net_migration(&mut records);
        // inflow(gbr) inside the reciprocal panel is 10, not 17: the
        // non-reciprocal fra flow never enters the reciprocal balance
        assert_eq!(records[0].net_flow, Some(0));
        assert_eq!(records[1].net_flow, Some(0));
    }

    #[test]
    fn test_ranks_within_destination_and_date() {
        let mut records = vec![
            enriched("usa", "gbr", (2021, 1, 1), 10),
            enriched("fra", "gbr", (2021, 1, 1), 30),
            enriched("deu", "gbr", (2021, 1, 1), 20),
            enriched("usa", "fra", (2021, 1, 1), 1),
        ];
        flow_ranks(&mut records);
        assert_eq!(records[1].rank, Some(1));
        assert_eq!(records[2].rank, Some(2));
        assert_eq!(records[0].rank, Some(3));
        assert_eq!(records[0].rank_norm, Some(1.0));
        // a group of one is its own top
        assert_eq!(records[3].rank, Some(1));
    }

    #[test]
    fn test_pct_change_consecutive_dates_only() {
        let records = vec![
            enriched("usa", "gbr", (2021, 1, 1), 10),
            enriched("usa", "gbr", (2021, 2, 1), 15),
            enriched("usa", "gbr", (2021, 3, 1), 12),
        ];
        let rows = pct_change(&records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].flow_pct_change, Some(50.0));
        assert_eq!(rows[0].previous_date, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(rows[1].flow_pct_change, Some(-20.0));
    }

    #[test]
    fn test_pct_change_zero_base_is_empty() {
        let records = vec![
            enriched("usa", "gbr", (2021, 1, 1), 0),
            enriched("usa", "gbr", (2021, 2, 1), 5),
        ];
        let rows = pct_change(&records);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].flow_pct_change, None);
    }
}
