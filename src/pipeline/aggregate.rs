//! Variation aggregation across collection dates, and the quantile
//! binning that produces the coarse GDP group keys.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::constants::{BIN_COUNT, BIN_LABELS};
use crate::domain::VariationSummary;
use crate::error::{PipelineError, Result};
use crate::pipeline::enrich::EnrichedRecord;

/// Quantile-bins a series into exactly [`BIN_COUNT`] groups labeled Low
/// through High, returning one label per input value. Fewer than five
/// distinct values, or quantile edges that collapse, are an error rather
/// than a silently smaller bin set: downstream charts assume the full five.
pub fn bin_continuous(values: &[f64]) -> Result<Vec<&'static str>> {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut distinct = sorted.clone();
    distinct.dedup();
    if distinct.len() < BIN_COUNT {
        return Err(PipelineError::Precondition(format!(
            "quantile binning needs at least {} distinct values, got {}",
            BIN_COUNT,
            distinct.len()
        )));
    }

    let edges: Vec<f64> = (1..BIN_COUNT)
        .map(|i| quantile(&sorted, i as f64 / BIN_COUNT as f64))
        .collect();
    if edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(PipelineError::Precondition(
            "quantile edges collapsed; the distribution is too concentrated for 5 bins".to_string(),
        ));
    }

    Ok(values
        .iter()
        .map(|&value| {
            let bin = edges.iter().take_while(|&&edge| value > edge).count();
            BIN_LABELS[bin]
        })
        .collect())
}

/// Linear-interpolated quantile of a sorted slice, pandas default.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Quantile-bins the panel's GDP columns over its rows, each side
/// separately, so every bin holds roughly the same number of panel rows.
/// Rows missing a GDP value keep an empty bin.
pub fn apply_gdp_bins(records: &mut [EnrichedRecord]) -> Result<()> {
    bin_column(records, |r| r.gdp_orig, |r, label| r.gdp_bin_orig = Some(label))?;
    bin_column(records, |r| r.gdp_dest, |r, label| r.gdp_bin_dest = Some(label))
}

fn bin_column(
    records: &mut [EnrichedRecord],
    get: impl Fn(&EnrichedRecord) -> Option<f64>,
    set: impl Fn(&mut EnrichedRecord, String),
) -> Result<()> {
    let mut indices = Vec::new();
    let mut values = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if let Some(value) = get(record) {
            indices.push(i);
            values.push(value);
        }
    }
    if values.is_empty() {
        return Ok(());
    }
    let labels = bin_continuous(&values)?;
    for (i, label) in indices.into_iter().zip(labels) {
        set(&mut records[i], label.to_string());
    }
    Ok(())
}

/// Grouping key for the variation summaries. `Dyad` is the finest level;
/// the others pre-sum flows into coarser corridors before aggregating
/// across dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupBy {
    Dyad,
    GdpBin,
    Midregion,
    Subregion,
}

impl GroupBy {
    pub fn label(self) -> &'static str {
        match self {
            GroupBy::Dyad => "dyad",
            GroupBy::GdpBin => "gdp_bin",
            GroupBy::Midregion => "midregion",
            GroupBy::Subregion => "subregion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueColumn {
    Flow,
    UsersOrigin,
    UsersDestination,
    NetFlow,
    NetRate100,
    Rank,
    RankNorm,
}

impl ValueColumn {
    pub const ALL: [ValueColumn; 7] = [
        ValueColumn::Flow,
        ValueColumn::UsersOrigin,
        ValueColumn::UsersDestination,
        ValueColumn::NetFlow,
        ValueColumn::NetRate100,
        ValueColumn::Rank,
        ValueColumn::RankNorm,
    ];

    fn name(self) -> &'static str {
        match self {
            ValueColumn::Flow => "flow",
            ValueColumn::UsersOrigin => "users_orig",
            ValueColumn::UsersDestination => "users_dest",
            ValueColumn::NetFlow => "net_flow",
            ValueColumn::NetRate100 => "net_rate_100",
            ValueColumn::Rank => "rank",
            ValueColumn::RankNorm => "rank_norm",
        }
    }

    /// `None` for derived columns the run has not (or cannot) fill,
    /// e.g. `net_rate_100` with zero platform users.
    fn of(self, record: &EnrichedRecord) -> Option<f64> {
        match self {
            ValueColumn::Flow => Some(record.flow.flow as f64),
            ValueColumn::UsersOrigin => Some(record.flow.users_origin as f64),
            ValueColumn::UsersDestination => Some(record.flow.users_destination as f64),
            ValueColumn::NetFlow => record.net_flow.map(|v| v as f64),
            ValueColumn::NetRate100 => record.net_rate_100,
            ValueColumn::Rank => record.rank.map(|v| v as f64),
            ValueColumn::RankNorm => record.rank_norm,
        }
    }
}

/// A variation summary for one (group, value column), long format.
#[derive(Debug, Clone, Serialize)]
pub struct VariationRow {
    pub group_orig: String,
    pub group_dest: String,
    pub summary: VariationSummary,
}

impl VariationRow {
    pub fn csv_headers() -> Vec<&'static str> {
        vec!["group_orig", "group_dest", "column", "count", "mean", "median", "std", "cv"]
    }

    pub fn to_csv_row(&self) -> Vec<String> {
        let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        vec![
            self.group_orig.clone(),
            self.group_dest.clone(),
            self.summary.column.clone(),
            self.summary.count.to_string(),
            self.summary.mean.to_string(),
            self.summary.median.to_string(),
            opt(self.summary.std),
            opt(self.summary.coefficient_of_variation),
        ]
    }
}

fn group_key(record: &EnrichedRecord, group: GroupBy) -> Option<(String, String)> {
    match group {
        GroupBy::Dyad => Some((
            record.flow.origin.to_string(),
            record.flow.destination.to_string(),
        )),
        GroupBy::GdpBin => Some((record.gdp_bin_orig.clone()?, record.gdp_bin_dest.clone()?)),
        GroupBy::Midregion => Some((record.midregion_orig.clone()?, record.midregion_dest.clone()?)),
        GroupBy::Subregion => Some((record.subregion_orig.clone()?, record.subregion_dest.clone()?)),
    }
}

/// Variation of the given value columns per group across collection dates.
///
/// At the dyad level a second record for the same (dyad, date) means the
/// deduplication upstream failed, which is always fatal. Coarser group
/// keys legitimately cover many dyads, so their per-date values are summed
/// first. Rows whose group key is unknown (no bin/region match) are left
/// out of that grouping; a column missing on a date is left out of that
/// column's series.
pub fn variation(
    records: &[EnrichedRecord],
    group: GroupBy,
    columns: &[ValueColumn],
) -> Result<Vec<VariationRow>> {
    let mut per_date: BTreeMap<(String, String), BTreeMap<NaiveDate, Vec<Option<f64>>>> =
        BTreeMap::new();
    for record in records {
        let Some(key) = group_key(record, group) else {
            continue;
        };
        let date_map = per_date.entry(key.clone()).or_default();
        let values = date_map.entry(record.flow.collection_date).or_default();
        if values.is_empty() {
            if group == GroupBy::Dyad {
                values.extend(columns.iter().map(|c| c.of(record)));
                continue;
            }
            values.resize(columns.len(), None);
        } else if group == GroupBy::Dyad {
            return Err(PipelineError::Precondition(format!(
                "duplicate observation for ({}, {}) on {}",
                key.0, key.1, record.flow.collection_date
            )));
        }
        for (slot, column) in values.iter_mut().zip(columns.iter()) {
            *slot = match (*slot, column.of(record)) {
                (Some(a), Some(b)) => Some(a + b),
                (Some(a), None) => Some(a),
                (None, b) => b,
            };
        }
    }

    let mut rows = Vec::new();
    for ((group_orig, group_dest), date_map) in per_date {
        for (i, column) in columns.iter().enumerate() {
            let series: Vec<f64> = date_map.values().filter_map(|values| values[i]).collect();
            if series.is_empty() {
                continue;
            }
            rows.push(VariationRow {
                group_orig: group_orig.clone(),
                group_dest: group_dest.clone(),
                summary: summarize(column.name(), &series),
            });
        }
    }
    Ok(rows)
}

fn summarize(column: &str, series: &[f64]) -> VariationSummary {
    let count = series.len();
    let mean = series.iter().sum::<f64>() / count as f64;
    let std = sample_std(series, mean);
    VariationSummary {
        column: column.to_string(),
        count,
        mean,
        median: median(series),
        std,
        coefficient_of_variation: std.and_then(|s| (mean != 0.0).then(|| s / mean)),
    }
}

fn median(series: &[f64]) -> f64 {
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn sample_std(series: &[f64], mean: f64) -> Option<f64> {
    if series.len() < 2 {
        return None;
    }
    let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (series.len() - 1) as f64;
    Some(variance.sqrt())
}
