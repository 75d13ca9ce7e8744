//! Canonical column names and fixed labels shared across the pipeline.

// Canonical dyadic schema fields
pub const COL_COUNTRY_ORIG: &str = "country_orig";
pub const COL_COUNTRY_DEST: &str = "country_dest";
pub const COL_FLOW: &str = "flow";
pub const COL_USERS_ORIG: &str = "users_orig";
pub const COL_USERS_DEST: &str = "users_dest";
pub const COL_QUERY_TIME: &str = "query_time";
pub const COL_QUERY_INFO: &str = "query_info";

// Measurement categories carried by the long-format `query_info` column.
// "relocate" is people open to relocating; "relocate_remote" additionally
// requires openness to remote work. The two must never be mixed.
pub const CATEGORY_RELOCATE: &str = "r4";
pub const CATEGORY_RELOCATE_REMOTE: &str = "r6_remote";

/// Quantile bin labels, ordered low to high. Downstream consumers assume
/// exactly these five categories.
pub const BIN_LABELS: [&str; 5] = ["Low", "Low-middle", "Middle", "Middle-high", "High"];

/// Number of quantile bins. Fixed, not a free parameter.
pub const BIN_COUNT: usize = 5;

// Output file stems
pub const OUTPUT_PANEL: &str = "model_input";
pub const OUTPUT_VARIATION: &str = "variation";
pub const OUTPUT_VARIATION_RECIP: &str = "variation_recip_pairs";
pub const OUTPUT_PCT_CHANGE: &str = "pct_change";
pub const OUTPUT_DROPPED: &str = "dropped_rows";
pub const OUTPUT_AUDIT: &str = "audit_report";
