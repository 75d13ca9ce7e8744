use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::country::Iso3;

/// Ordered (origin, destination) country pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DyadKey {
    pub origin: Iso3,
    pub destination: Iso3,
}

impl DyadKey {
    pub fn new(origin: Iso3, destination: Iso3) -> Self {
        Self { origin, destination }
    }

    /// The same corridor measured in the opposite direction.
    pub fn mirrored(&self) -> DyadKey {
        DyadKey {
            origin: self.destination.clone(),
            destination: self.origin.clone(),
        }
    }
}

/// One observed measurement of migration intent for a dyad on a collection
/// date. Invariants: origin != destination; at most one record per
/// (origin, destination, collection_date) after deduplication; counts are
/// integral and non-negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub origin: Iso3,
    pub destination: Iso3,
    /// Canonical display names, re-derived from the resolved identity so
    /// name variants of the same country collapse
    pub origin_name: String,
    pub destination_name: String,
    pub collection_date: NaiveDate,
    /// Number of people in the origin open to moving to the destination
    pub flow: u64,
    pub users_origin: u64,
    pub users_destination: u64,
    /// Days from the midpoint of the collection window (set after date
    /// coalescing)
    pub date_centered: i64,
    /// True iff the mirrored dyad was observed on this same date.
    /// Always a concrete boolean so downstream filters are unambiguous.
    pub by_date_reciprocal: bool,
    /// True iff the dyad is reciprocal on every retained collection date
    pub cross_date_reciprocal: bool,
}

impl FlowRecord {
    pub fn dyad(&self) -> DyadKey {
        DyadKey::new(self.origin.clone(), self.destination.clone())
    }

    /// Grouping/join key for deduplication.
    pub fn dated_key(&self) -> (Iso3, Iso3, NaiveDate) {
        (
            self.origin.clone(),
            self.destination.clone(),
            self.collection_date,
        )
    }
}

/// Per-group aggregate over repeated observations across collection dates.
/// Derived, recomputed on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationSummary {
    /// The value column this summary describes
    pub column: String,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; `None` for singleton groups
    pub std: Option<f64>,
    /// std / mean; `None` when undefined
    pub coefficient_of_variation: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirrored_dyad_swaps_direction() {
        let key = DyadKey::new(Iso3::new("usa"), Iso3::new("gbr"));
        let mirror = key.mirrored();
        assert_eq!(mirror.origin, Iso3::new("gbr"));
        assert_eq!(mirror.destination, Iso3::new("usa"));
        assert_eq!(mirror.mirrored(), key);
    }
}
