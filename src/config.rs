use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Run-wide configuration. All empirically-tuned policy (excluded dates,
/// known-bad rows, magnitude caps, manual overrides) lives here as data,
/// supplied per deployment rather than hard-coded.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub directories: Directories,
    #[serde(default)]
    pub harmonize: HarmonizeConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub reciprocity: ReciprocityConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Directories {
    /// Raw survey exports and reference tables
    pub raw: PathBuf,
    /// Pipeline outputs (current + `_archive` copies)
    pub output: PathBuf,
    /// On-disk cache for network-sourced reference data
    pub cache: PathBuf,
}

/// Which measurement category to keep from the long-format `query_info`
/// column. Deterministic and configured, never auto-detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasurementCategory {
    Relocate,
    RelocateRemote,
}

impl MeasurementCategory {
    pub fn raw_label(self) -> &'static str {
        match self {
            MeasurementCategory::Relocate => crate::constants::CATEGORY_RELOCATE,
            MeasurementCategory::RelocateRemote => crate::constants::CATEGORY_RELOCATE_REMOTE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarmonizeConfig {
    pub category: MeasurementCategory,
    /// Raw survey filename pattern; `{date}` is replaced with the collection date
    pub raw_file_pattern: String,
}

impl Default for HarmonizeConfig {
    fn default() -> Self {
        Self {
            category: MeasurementCategory::Relocate,
            raw_file_pattern: "{date}_recruiter_dyadic_merged.csv".to_string(),
        }
    }
}

/// How integrity violations are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationMode {
    /// Any integrity violation aborts the run
    Strict,
    /// Violating groups are dropped and logged to the audit side-channel
    BestEffort,
}

/// A dyad/date combination known to be bad, discovered empirically.
/// Every entry must carry a rationale for auditability.
#[derive(Debug, Clone, Deserialize)]
pub struct KnownBadRule {
    pub date: NaiveDate,
    pub destination: String,
    pub origins: Vec<String>,
    pub rationale: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub mode: ValidationMode,
    /// Collection dates closer together than this are treated as one
    /// timeout-split collection run and remapped to the earlier date
    pub date_coalesce_days: i64,
    /// Sanity bound for country land area (sq km); Russia is ~17.1M
    pub max_area_sq_km: f64,
    /// Sanity bound for country population
    pub max_population: f64,
    pub known_bad: Vec<KnownBadRule>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Strict,
            date_coalesce_days: 10,
            max_area_sq_km: 17_100_000.0,
            max_population: 1_500_000_000.0,
            known_bad: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReciprocityConfig {
    /// Collection dates excluded from the cross-date intersection because
    /// they systematically under-sampled one direction. Explicit
    /// configuration; the `sensitivity` subcommand supports the operator's
    /// run-to-run decision but never updates this list itself.
    pub excluded_dates: Vec<NaiveDate>,
}

/// A manually-sourced per-country value filling a gap in a reference table.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueOverride {
    pub iso3: String,
    pub value: f64,
    pub rationale: String,
}

/// Region hierarchy entry for a country missing from the primary source.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionOverride {
    pub iso3: String,
    pub region: String,
    pub subregion: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Remote land-borders table (CSV over HTTP), used to backfill
    /// contiguity for dyads missing from the primary distance table
    pub borders_url: String,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
    pub files: EnrichmentFiles,
    /// Internet-share values missing from the ITU table, sourced manually
    pub internet_overrides: Vec<ValueOverride>,
    /// Countries missing from the UNSD region hierarchy
    pub region_overrides: Vec<RegionOverride>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            borders_url: "https://raw.githubusercontent.com/geodatasource/country-borders/master/GEODATASOURCE-COUNTRY-BORDERS.CSV".to_string(),
            fetch_timeout_secs: 30,
            fetch_retries: 3,
            files: EnrichmentFiles::default(),
            internet_overrides: Vec::new(),
            region_overrides: Vec::new(),
        }
    }
}

/// Reference table filenames, relative to the raw data directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentFiles {
    pub gdp: String,
    pub area: String,
    pub internet: String,
    pub population: String,
    pub region_unsd: String,
    pub region_abel: String,
    pub eu_membership: String,
    pub distance_primary: String,
    pub distance_secondary: String,
    pub language: String,
}

impl Default for EnrichmentFiles {
    fn default() -> Self {
        Self {
            gdp: "worldbank_gdp.csv".to_string(),
            area: "fao_country_area.csv".to_string(),
            internet: "itu_internet_share.csv".to_string(),
            population: "wpp_total_population.xlsx".to_string(),
            region_unsd: "unsd_methodology.csv".to_string(),
            region_abel: "abel_regions.csv".to_string(),
            eu_membership: "eu_countries.csv".to_string(),
            distance_primary: "cepii_distance.xls".to_string(),
            distance_secondary: "secondary_distance.csv".to_string(),
            language: "cepii_language.dta".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Absolute path of a reference file under the raw data directory.
    pub fn raw_path(&self, filename: &str) -> PathBuf {
        self.directories.raw.join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_strict() {
        let v = ValidationConfig::default();
        assert_eq!(v.mode, ValidationMode::Strict);
        assert_eq!(v.date_coalesce_days, 10);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [directories]
            raw = "data/raw"
            output = "data/outputs"
            cache = "data/cache"

            [harmonize]
            category = "relocate"

            [validation]
            mode = "best-effort"

            [[validation.known_bad]]
            date = "2020-10-08"
            destination = "caf"
            origins = ["usa", "gbr"]
            rationale = "implausible spike found via standard deviation check"

            [reciprocity]
            excluded_dates = ["2021-02-08", "2021-03-22"]
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.validation.mode, ValidationMode::BestEffort);
        assert_eq!(config.reciprocity.excluded_dates.len(), 2);
        assert_eq!(config.validation.known_bad[0].origins.len(), 2);
        assert_eq!(config.harmonize.category, MeasurementCategory::Relocate);
    }
}
