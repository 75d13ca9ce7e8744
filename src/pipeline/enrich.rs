//! Metadata enrichment: joins per-country and per-dyad reference tables
//! onto the validated panel.
//!
//! Every join is a left join from the panel; a missing match stays `None`
//! in the output, never zero. The one documented exception is the
//! contiguity backfill from the secondary borders table, which can assert
//! a positive (the pair shares a border) or a definite negative (the
//! country is listed borderless).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{Config, EnrichmentConfig};
use crate::domain::{DyadKey, FlowRecord, Iso3};
use crate::error::Result;
use crate::io::fetch::fetch_cached;
use crate::io::{excel, stata, tabular, RawTable};
use crate::pipeline::audit::AuditLog;
use crate::pipeline::validate::apply_magnitude_cap;
use crate::reference::{Hint, ReferenceRepository};

/// The WPP export puts its header on this row and mixes aggregates into
/// the country rows; only `Type == "Country/Area"` rows are countries.
const WPP_HEADER_ROW: usize = 16;
const WPP_COUNTRY_TYPE: &str = "Country/Area";

/// Only this source survey in the secondary distance table is trusted.
const SECONDARY_GEO_SOURCE: &str = "maps{R}&geosphere{R}";

#[derive(Debug, Clone, Default)]
pub struct RegionInfo {
    pub region: String,
    pub subregion: String,
    pub midregion: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Membership {
    pub eu: bool,
    pub eea: bool,
    pub schengen: bool,
}

/// Per-dyad geography from the primary (CEPII) distance table.
#[derive(Debug, Clone, Default)]
pub struct DyadGeo {
    pub contiguity: Option<f64>,
    pub comcol: Option<f64>,
    pub colony: Option<f64>,
    pub col45: Option<f64>,
    pub curcol: Option<f64>,
    pub dist_unweighted: Option<f64>,
    pub dist_biggest_cities: Option<f64>,
    pub dist_pop_weighted: Option<f64>,
}

/// Per-dyad linguistic proximity from the CEPII language table.
#[derive(Debug, Clone, Default)]
pub struct LanguageLinks {
    pub col: Option<f64>,
    pub csl: Option<f64>,
    pub cnl: Option<f64>,
    pub prox1: Option<f64>,
    pub lp1: Option<f64>,
    pub prox2: Option<f64>,
    pub lp2: Option<f64>,
}

/// Land borders scraped from the remote table: who touches whom, and who
/// is explicitly listed as having no land border at all.
#[derive(Debug, Clone, Default)]
pub struct BordersTable {
    pub neighbors: HashSet<DyadKey>,
    pub borderless: HashSet<Iso3>,
}

#[derive(Debug, Default)]
pub struct EnrichmentTables {
    pub gdp: HashMap<Iso3, f64>,
    pub area: HashMap<Iso3, f64>,
    pub internet: HashMap<Iso3, f64>,
    pub population: HashMap<Iso3, f64>,
    pub regions: HashMap<Iso3, RegionInfo>,
    pub membership: HashMap<Iso3, Membership>,
    pub geo: HashMap<DyadKey, DyadGeo>,
    pub language: HashMap<DyadKey, LanguageLinks>,
    pub borders: BordersTable,
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, ',' | ' ')).collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

fn resolve_quiet(repo: &ReferenceRepository, raw: &str, hint: Hint) -> Option<Iso3> {
    match repo.resolve(raw, hint) {
        Ok(identity) => Some(identity.iso3.clone()),
        Err(_) => {
            // reference tables carry aggregates (WLD, EUU) that are not
            // countries; skipping them is expected
            debug!(raw, "reference row without a canonical country, skipped");
            None
        }
    }
}

/// Year columns of a wide table, left to right.
fn year_columns(table: &RawTable) -> Vec<usize> {
    table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.parse::<i32>().is_ok())
        .map(|(i, _)| i)
        .collect()
}

/// Latest non-empty year value of a wide-format row.
fn latest_year_value(table: &RawTable, row: &[String], years: &[usize]) -> Option<f64> {
    years
        .iter()
        .rev()
        .find_map(|&col| parse_number(table.cell(row, col)))
}

/// World Bank wide export: one row per country keyed by alpha-3 code, one
/// column per year; the freshest available year wins.
pub fn parse_worldbank_wide(table: &RawTable, repo: &ReferenceRepository) -> Result<HashMap<Iso3, f64>> {
    let code_col = table
        .column_index("Country Code")
        .ok_or_else(|| crate::error::PipelineError::MissingColumn {
            field: "Country Code",
            aliases: vec![],
        })?;
    let years = year_columns(table);
    let mut values = HashMap::new();
    for row in &table.rows {
        let Some(iso3) = resolve_quiet(repo, table.cell(row, code_col), Hint::Alpha3) else {
            continue;
        };
        if let Some(value) = latest_year_value(table, row, &years) {
            values.insert(iso3, value);
        }
    }
    Ok(values)
}

/// FAOSTAT country area, reported in 1000 hectares; converted to sq km.
pub fn parse_area(table: &RawTable, repo: &ReferenceRepository) -> Result<HashMap<Iso3, f64>> {
    let code_col = require_column(table, "Area Code (ISO3)")?;
    let year_col = require_column(table, "Year")?;
    let value_col = require_column(table, "Value")?;
    let mut latest: HashMap<Iso3, (i32, f64)> = HashMap::new();
    for row in &table.rows {
        let Some(iso3) = resolve_quiet(repo, table.cell(row, code_col), Hint::Alpha3) else {
            continue;
        };
        let Some(year) = table.cell(row, year_col).parse::<i32>().ok() else {
            continue;
        };
        let Some(value) = parse_number(table.cell(row, value_col)) else {
            continue;
        };
        let entry = latest.entry(iso3).or_insert((year, value));
        if year >= entry.0 {
            *entry = (year, value);
        }
    }
    Ok(latest
        .into_iter()
        .map(|(iso3, (_, thousand_ha))| (iso3, thousand_ha * 10.0))
        .collect())
}

/// WPP total population workbook: country rows only, thousands of people.
pub fn parse_population(table: &RawTable, repo: &ReferenceRepository) -> Result<HashMap<Iso3, f64>> {
    let name_col = require_column(table, "Region, subregion, country or area *")?;
    let type_col = require_column(table, "Type")?;
    let years = year_columns(table);
    let mut values = HashMap::new();
    for row in &table.rows {
        if table.cell(row, type_col) != WPP_COUNTRY_TYPE {
            continue;
        }
        let Some(iso3) = resolve_quiet(repo, table.cell(row, name_col), Hint::Name) else {
            continue;
        };
        if let Some(thousands) = latest_year_value(table, row, &years) {
            values.insert(iso3, thousands * 1000.0);
        }
    }
    Ok(values)
}

/// UNSD M49 hierarchy plus the coarser mid-region grouping keyed by
/// sub-region name.
pub fn parse_regions(
    unsd: &RawTable,
    midregions: &RawTable,
    repo: &ReferenceRepository,
) -> Result<HashMap<Iso3, RegionInfo>> {
    let sub_col = require_column(midregions, "subregion")?;
    let mid_col = require_column(midregions, "midregion")?;
    let mid_by_sub: HashMap<&str, &str> = midregions
        .rows
        .iter()
        .map(|row| (midregions.cell(row, sub_col), midregions.cell(row, mid_col)))
        .collect();

    let region_col = require_column(unsd, "Region Name")?;
    let subregion_col = require_column(unsd, "Sub-region Name")?;
    let code_col = require_column(unsd, "ISO-alpha3 Code")?;
    let mut regions = HashMap::new();
    for row in &unsd.rows {
        let Some(iso3) = resolve_quiet(repo, unsd.cell(row, code_col), Hint::Alpha3) else {
            continue;
        };
        let region = unsd.cell(row, region_col).to_string();
        let subregion = unsd.cell(row, subregion_col).to_string();
        let midregion = mid_by_sub
            .get(subregion.as_str())
            .map(|m| m.to_string())
            .unwrap_or_else(|| region.clone());
        regions.insert(
            iso3,
            RegionInfo {
                region,
                subregion,
                midregion,
            },
        );
    }
    Ok(regions)
}

pub fn parse_membership(table: &RawTable, repo: &ReferenceRepository) -> Result<HashMap<Iso3, Membership>> {
    let iso_col = require_column(table, "iso3")?;
    let eu_col = require_column(table, "eu_member")?;
    let eea_col = require_column(table, "eea_member")?;
    let schengen_col = require_column(table, "schengen_member")?;
    let truthy = |s: &str| matches!(s.trim(), "1" | "true" | "True" | "TRUE" | "yes");
    let mut membership = HashMap::new();
    for row in &table.rows {
        let Some(iso3) = resolve_quiet(repo, table.cell(row, iso_col), Hint::Alpha3) else {
            continue;
        };
        membership.insert(
            iso3,
            Membership {
                eu: truthy(table.cell(row, eu_col)),
                eea: truthy(table.cell(row, eea_col)),
                schengen: truthy(table.cell(row, schengen_col)),
            },
        );
    }
    Ok(membership)
}

/// Primary CEPII distance table, one row per directed dyad.
pub fn parse_geo_primary(table: &RawTable, repo: &ReferenceRepository) -> Result<HashMap<DyadKey, DyadGeo>> {
    let iso_o = require_column(table, "iso_o")?;
    let iso_d = require_column(table, "iso_d")?;
    let metric = |name: &str| table.column_index(name);
    let cols = [
        ("contig", metric("contig")),
        ("comcol", metric("comcol")),
        ("colony", metric("colony")),
        ("col45", metric("col45")),
        ("curcol", metric("curcol")),
        ("dist", metric("dist")),
        ("distwces", metric("distwces")),
    ];
    let mut geo = HashMap::new();
    for row in &table.rows {
        let Some(origin) = resolve_quiet(repo, table.cell(row, iso_o), Hint::Alpha3) else {
            continue;
        };
        let Some(destination) = resolve_quiet(repo, table.cell(row, iso_d), Hint::Alpha3) else {
            continue;
        };
        let value = |name: &str| {
            cols.iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, col)| *col)
                .and_then(|col| parse_number(table.cell(row, col)))
        };
        geo.insert(
            DyadKey::new(origin, destination),
            DyadGeo {
                contiguity: value("contig"),
                comcol: value("comcol"),
                colony: value("colony"),
                col45: value("col45"),
                curcol: value("curcol"),
                // CES-aggregated population weighting stands in for the
                // city-level measure too; it is the better-populated column
                dist_unweighted: value("dist"),
                dist_biggest_cities: value("distwces"),
                dist_pop_weighted: value("distwces"),
            },
        );
    }
    Ok(geo)
}

/// Secondary distance table: long format, one (dyad, measure) per row,
/// restricted to the trusted source survey, then pivoted. Used only to
/// fill dyads and metrics the primary table lacks.
pub fn parse_geo_secondary(
    table: &RawTable,
    repo: &ReferenceRepository,
) -> Result<HashMap<DyadKey, HashMap<String, f64>>> {
    let iso_o = require_column(table, "iso_o")?;
    let iso_d = require_column(table, "iso_d")?;
    let measure_col = require_column(table, "measure")?;
    let value_col = require_column(table, "value")?;
    let source_col = require_column(table, "src_ref_db")?;
    let mut pivoted: HashMap<DyadKey, HashMap<String, f64>> = HashMap::new();
    for row in &table.rows {
        if table.cell(row, source_col) != SECONDARY_GEO_SOURCE {
            continue;
        }
        let Some(origin) = resolve_quiet(repo, table.cell(row, iso_o), Hint::Alpha3) else {
            continue;
        };
        let Some(destination) = resolve_quiet(repo, table.cell(row, iso_d), Hint::Alpha3) else {
            continue;
        };
        let Some(value) = parse_number(table.cell(row, value_col)) else {
            continue;
        };
        pivoted
            .entry(DyadKey::new(origin, destination))
            .or_default()
            .insert(table.cell(row, measure_col).to_string(), value);
    }
    Ok(pivoted)
}

/// Fixed fallback from the secondary table onto the primary metrics:
/// per-metric, primary wins; otherwise the secondary's most-similar
/// measure fills in.
pub fn merge_geo(
    mut primary: HashMap<DyadKey, DyadGeo>,
    secondary: HashMap<DyadKey, HashMap<String, f64>>,
) -> HashMap<DyadKey, DyadGeo> {
    for (dyad, measures) in secondary {
        let entry = primary.entry(dyad).or_default();
        let distwces = measures.get("distwces").copied();
        let dist = measures.get("dist").copied();
        if entry.dist_pop_weighted.is_none() {
            entry.dist_pop_weighted = distwces;
        }
        if entry.dist_biggest_cities.is_none() {
            entry.dist_biggest_cities = distwces;
        }
        if entry.dist_unweighted.is_none() {
            entry.dist_unweighted = dist;
        }
    }
    primary
}

/// CEPII language table (Stata export). Composite joint entries (the
/// historical Belgium/Luxembourg `BLX` rows) are split into each
/// constituent, and the corridor between the constituents is added as a
/// shared-language pair.
pub fn parse_language(table: &RawTable, repo: &ReferenceRepository) -> Result<HashMap<DyadKey, LanguageLinks>> {
    let iso_o = require_column(table, "iso_o")?;
    let iso_d = require_column(table, "iso_d")?;
    let metric_cols: Vec<(&str, Option<usize>)> = ["col", "csl", "cnl", "prox1", "lp1", "prox2", "lp2"]
        .iter()
        .map(|name| (*name, table.column_index(name)))
        .collect();

    let expand = |raw: &str| -> Vec<Iso3> {
        if let Some(parts) = repo.expand_composite(raw) {
            return parts.to_vec();
        }
        resolve_quiet(repo, raw, Hint::Alpha3).into_iter().collect()
    };

    let mut language = HashMap::new();
    for row in &table.rows {
        let origins = expand(table.cell(row, iso_o));
        let destinations = expand(table.cell(row, iso_d));
        if origins.is_empty() || destinations.is_empty() {
            continue;
        }
        let value = |name: &str| {
            metric_cols
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, col)| *col)
                .and_then(|col| parse_number(table.cell(row, col)))
        };
        let links = LanguageLinks {
            col: value("col"),
            csl: value("csl"),
            cnl: value("cnl"),
            prox1: value("prox1"),
            lp1: value("lp1"),
            prox2: value("prox2"),
            lp2: value("lp2"),
        };
        for origin in &origins {
            for destination in &destinations {
                if origin == destination {
                    continue;
                }
                language.insert(DyadKey::new(origin.clone(), destination.clone()), links.clone());
            }
        }
        intra_composite_links(&origins, &mut language);
        intra_composite_links(&destinations, &mut language);
    }
    Ok(language)
}

/// Constituents of a joint entry share an official language by definition;
/// the finer proximity measures are not defined for the synthetic corridor.
fn intra_composite_links(parts: &[Iso3], language: &mut HashMap<DyadKey, LanguageLinks>) {
    if parts.len() < 2 {
        return;
    }
    let links = LanguageLinks {
        col: Some(1.0),
        csl: Some(1.0),
        cnl: Some(1.0),
        prox1: Some(0.0),
        lp1: Some(0.0),
        prox2: Some(0.0),
        lp2: Some(0.0),
    };
    for a in parts {
        for b in parts {
            if a == b {
                continue;
            }
            language
                .entry(DyadKey::new(a.clone(), b.clone()))
                .or_insert_with(|| links.clone());
        }
    }
}

/// Remote land-borders table keyed by alpha-2 codes. An empty border code
/// marks a country as borderless.
pub fn parse_borders(table: &RawTable, repo: &ReferenceRepository) -> Result<BordersTable> {
    let code_col = require_column(table, "country_code")?;
    let border_col = require_column(table, "country_border_code")?;
    let mut borders = BordersTable::default();
    for row in &table.rows {
        let Some(country) = resolve_quiet(repo, table.cell(row, code_col), Hint::Alpha2) else {
            continue;
        };
        let border_code = table.cell(row, border_col);
        if border_code.is_empty() {
            borders.borderless.insert(country);
            continue;
        }
        let Some(neighbor) = resolve_quiet(repo, border_code, Hint::Alpha2) else {
            continue;
        };
        borders
            .neighbors
            .insert(DyadKey::new(country.clone(), neighbor.clone()));
        borders.neighbors.insert(DyadKey::new(neighbor, country));
    }
    Ok(borders)
}

fn require_column(table: &RawTable, name: &'static str) -> Result<usize> {
    table
        .column_index(name)
        .ok_or(crate::error::PipelineError::MissingColumn {
            field: name,
            aliases: vec![],
        })
}

impl EnrichmentTables {
    /// Loads every reference table, file-backed tables in parallel, then
    /// applies the configured overrides and magnitude caps.
    pub fn load(config: &Config, repo: &ReferenceRepository, audit: &mut AuditLog) -> Result<Self> {
        let files = &config.enrichment.files;
        let path = |name: &str| config.raw_path(name);

        let ((gdp, area), (internet, population)) = rayon::join(
            || {
                rayon::join(
                    || {
                        parse_worldbank_wide(&tabular::read_csv_with_offset(&path(&files.gdp), 4)?, repo)
                    },
                    || { parse_area(&tabular::read_csv(&path(&files.area))?, repo) },
                )
            },
            || {
                rayon::join(
                    || {
                        parse_worldbank_wide(&tabular::read_csv_with_offset(&path(&files.internet), 4)?, repo)
                    },
                    || {
                        parse_population(&excel::read_sheet(&path(&files.population), WPP_HEADER_ROW)?, repo)
                    },
                )
            },
        );
        let ((regions, membership), (geo_primary, (geo_secondary, language))) = rayon::join(
            || {
                rayon::join(
                    || {
                        parse_regions(
                            &tabular::read_csv(&path(&files.region_unsd))?,
                            &tabular::read_csv(&path(&files.region_abel))?,
                            repo,
                        )
                    },
                    || { parse_membership(&tabular::read_csv(&path(&files.eu_membership))?, repo) },
                )
            },
            || {
                rayon::join(
                    || {
                        parse_geo_primary(&excel::read_sheet(&path(&files.distance_primary), 0)?, repo)
                    },
                    || {
                        rayon::join(
                            || {
                                parse_geo_secondary(&tabular::read_csv(&path(&files.distance_secondary))?, repo)
                            },
                            || { parse_language(&stata::read_dta(&path(&files.language))?, repo) },
                        )
                    },
                )
            },
        );

        let mut tables = EnrichmentTables {
            gdp: gdp?,
            area: area?,
            internet: internet?,
            population: population?,
            regions: regions?,
            membership: membership?,
            geo: merge_geo(geo_primary?, geo_secondary?),
            language: language?,
            borders: load_borders(&config.enrichment, config, repo)?,
        };

        // ITU shares are percentages; store proportions
        for value in tables.internet.values_mut() {
            *value /= 100.0;
        }
        for over in &config.enrichment.internet_overrides {
            tables.internet.insert(Iso3::new(&over.iso3), over.value);
        }
        for over in &config.enrichment.region_overrides {
            tables.regions.insert(
                Iso3::new(&over.iso3),
                RegionInfo {
                    region: over.region.clone(),
                    subregion: over.subregion.clone(),
                    midregion: over.region.clone(),
                },
            );
        }

        apply_magnitude_cap(
            "area",
            &mut tables.area,
            config.validation.max_area_sq_km,
            config.validation.mode,
            audit,
        )?;
        apply_magnitude_cap(
            "population",
            &mut tables.population,
            config.validation.max_population,
            config.validation.mode,
            audit,
        )?;
        Ok(tables)
    }
}

fn load_borders(enrichment: &EnrichmentConfig, config: &Config, repo: &ReferenceRepository) -> Result<BordersTable> {
    let body = fetch_cached(
        &enrichment.borders_url,
        &config.directories.cache,
        Duration::from_secs(enrichment.fetch_timeout_secs),
        enrichment.fetch_retries,
    )?;
    parse_borders(&tabular::read_csv_reader(body.as_bytes(), 0)?, repo)
}

/// One row of the model-input panel: the validated flow record plus every
/// joined covariate. Optional fields stay empty in the CSV when the join
/// found no match.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub flow: FlowRecord,
    pub gdp_orig: Option<f64>,
    pub gdp_dest: Option<f64>,
    pub area_orig: Option<f64>,
    pub area_dest: Option<f64>,
    pub internet_orig: Option<f64>,
    pub internet_dest: Option<f64>,
    pub pop_orig: Option<f64>,
    pub pop_dest: Option<f64>,
    /// Platform users as a share of population
    pub prop_users_orig: Option<f64>,
    pub prop_users_dest: Option<f64>,
    pub region_orig: Option<String>,
    pub region_dest: Option<String>,
    pub subregion_orig: Option<String>,
    pub subregion_dest: Option<String>,
    pub midregion_orig: Option<String>,
    pub midregion_dest: Option<String>,
    pub eu_both: bool,
    pub eea_both: bool,
    pub schengen_both: bool,
    pub contiguity: Option<f64>,
    pub comcol: Option<f64>,
    pub colony: Option<f64>,
    pub col45: Option<f64>,
    pub curcol: Option<f64>,
    pub dist_unweighted: Option<f64>,
    pub dist_biggest_cities: Option<f64>,
    pub dist_pop_weighted: Option<f64>,
    pub lang_official: Option<f64>,
    pub lang_spoken: Option<f64>,
    pub lang_native: Option<f64>,
    pub lang_prox1: Option<f64>,
    pub lang_lp1: Option<f64>,
    pub lang_prox2: Option<f64>,
    pub lang_lp2: Option<f64>,
    /// Filled by the aggregator's quantile binning
    pub gdp_bin_orig: Option<String>,
    pub gdp_bin_dest: Option<String>,
    /// Filled by the derived-measures pass
    pub net_flow: Option<i64>,
    pub net_rate_100: Option<f64>,
    pub rank: Option<u32>,
    pub rank_norm: Option<f64>,
}

impl EnrichedRecord {
    pub fn csv_headers() -> Vec<&'static str> {
        vec![
            "country_orig", "country_dest", "name_orig", "name_dest", "query_date",
            "date_centered", "flow", "users_orig", "users_dest",
            "recip_pair_by_date", "recip_pair", "gdp_orig", "gdp_dest", "area_orig",
            "area_dest", "internet_orig", "internet_dest", "pop_orig", "pop_dest",
            "prop_users_orig", "prop_users_dest", "region_orig", "region_dest",
            "subregion_orig", "subregion_dest", "midregion_orig", "midregion_dest",
            "eu_both", "eea_both", "schengen_both", "contiguity", "comcol", "colony",
            "col45", "curcol", "dist_unweighted", "dist_biggest_cities",
            "dist_pop_weighted", "lang_official", "lang_spoken", "lang_native",
            "lang_prox1", "lang_lp1", "lang_prox2", "lang_lp2", "gdp_bin_orig",
            "gdp_bin_dest", "net_flow", "net_rate_100", "rank", "rank_norm",
        ]
    }

    pub fn to_csv_row(&self) -> Vec<String> {
        fn opt_f(v: Option<f64>) -> String {
            v.map(|v| v.to_string()).unwrap_or_default()
        }
        fn opt_s(v: &Option<String>) -> String {
            v.clone().unwrap_or_default()
        }
        fn flag(v: bool) -> String {
            (v as u8).to_string()
        }
        vec![
            self.flow.origin.to_string(),
            self.flow.destination.to_string(),
            self.flow.origin_name.clone(),
            self.flow.destination_name.clone(),
            self.flow.collection_date.to_string(),
            self.flow.date_centered.to_string(),
            self.flow.flow.to_string(),
            self.flow.users_origin.to_string(),
            self.flow.users_destination.to_string(),
            flag(self.flow.by_date_reciprocal),
            flag(self.flow.cross_date_reciprocal),
            opt_f(self.gdp_orig),
            opt_f(self.gdp_dest),
            opt_f(self.area_orig),
            opt_f(self.area_dest),
            opt_f(self.internet_orig),
            opt_f(self.internet_dest),
            opt_f(self.pop_orig),
            opt_f(self.pop_dest),
            opt_f(self.prop_users_orig),
            opt_f(self.prop_users_dest),
            opt_s(&self.region_orig),
            opt_s(&self.region_dest),
            opt_s(&self.subregion_orig),
            opt_s(&self.subregion_dest),
            opt_s(&self.midregion_orig),
            opt_s(&self.midregion_dest),
            flag(self.eu_both),
            flag(self.eea_both),
            flag(self.schengen_both),
            opt_f(self.contiguity),
            opt_f(self.comcol),
            opt_f(self.colony),
            opt_f(self.col45),
            opt_f(self.curcol),
            opt_f(self.dist_unweighted),
            opt_f(self.dist_biggest_cities),
            opt_f(self.dist_pop_weighted),
            opt_f(self.lang_official),
            opt_f(self.lang_spoken),
            opt_f(self.lang_native),
            opt_f(self.lang_prox1),
            opt_f(self.lang_lp1),
            opt_f(self.lang_prox2),
            opt_f(self.lang_lp2),
            opt_s(&self.gdp_bin_orig),
            opt_s(&self.gdp_bin_dest),
            self.net_flow.map(|v| v.to_string()).unwrap_or_default(),
            opt_f(self.net_rate_100),
            self.rank.map(|v| v.to_string()).unwrap_or_default(),
            opt_f(self.rank_norm),
        ]
    }
}

/// Joins every table onto the panel. Pure except for the
/// join-completeness log lines.
pub fn enrich(records: Vec<FlowRecord>, tables: &EnrichmentTables) -> Vec<EnrichedRecord> {
    let mut missing_gdp: HashSet<Iso3> = HashSet::new();
    let mut missing_pop: HashSet<Iso3> = HashSet::new();
    let mut missing_region: HashSet<Iso3> = HashSet::new();

    let enriched = records
        .into_iter()
        .map(|record| {
            let origin = record.origin.clone();
            let destination = record.destination.clone();
            let per_country = |map: &HashMap<Iso3, f64>, missing: Option<&mut HashSet<Iso3>>| {
                let o = map.get(&origin).copied();
                let d = map.get(&destination).copied();
                if let Some(missing) = missing {
                    if o.is_none() {
                        missing.insert(origin.clone());
                    }
                    if d.is_none() {
                        missing.insert(destination.clone());
                    }
                }
                (o, d)
            };

            let (gdp_orig, gdp_dest) = per_country(&tables.gdp, Some(&mut missing_gdp));
            let (area_orig, area_dest) = per_country(&tables.area, None);
            let (internet_orig, internet_dest) = per_country(&tables.internet, None);
            let (pop_orig, pop_dest) = per_country(&tables.population, Some(&mut missing_pop));

            let region = |iso3: &Iso3, missing: &mut HashSet<Iso3>| {
                let info = tables.regions.get(iso3);
                if info.is_none() {
                    missing.insert(iso3.clone());
                }
                info
            };
            let region_o = region(&origin, &mut missing_region).cloned();
            let region_d = region(&destination, &mut missing_region).cloned();

            let membership = |iso3: &Iso3| tables.membership.get(iso3).copied().unwrap_or_default();
            let (member_o, member_d) = (membership(&origin), membership(&destination));

            let dyad = record.dyad();
            let geo = tables.geo.get(&dyad).cloned().unwrap_or_default();
            let contiguity = geo
                .contiguity
                .or_else(|| backfill_contiguity(&dyad, &tables.borders));
            let language = tables.language.get(&dyad).cloned().unwrap_or_default();

            let prop = |users: u64, pop: Option<f64>| {
                pop.filter(|p| *p > 0.0).map(|p| users as f64 / p)
            };
            let prop_users_orig = prop(record.users_origin, pop_orig);
            let prop_users_dest = prop(record.users_destination, pop_dest);

            EnrichedRecord {
                gdp_orig,
                gdp_dest,
                area_orig,
                area_dest,
                internet_orig,
                internet_dest,
                pop_orig,
                pop_dest,
                prop_users_orig,
                prop_users_dest,
                region_orig: region_o.as_ref().map(|r| r.region.clone()),
                region_dest: region_d.as_ref().map(|r| r.region.clone()),
                subregion_orig: region_o.as_ref().map(|r| r.subregion.clone()),
                subregion_dest: region_d.as_ref().map(|r| r.subregion.clone()),
                midregion_orig: region_o.map(|r| r.midregion),
                midregion_dest: region_d.map(|r| r.midregion),
                eu_both: member_o.eu && member_d.eu,
                eea_both: member_o.eea && member_d.eea,
                schengen_both: member_o.schengen && member_d.schengen,
                contiguity,
                comcol: geo.comcol,
                colony: geo.colony,
                col45: geo.col45,
                curcol: geo.curcol,
                dist_unweighted: geo.dist_unweighted,
                dist_biggest_cities: geo.dist_biggest_cities,
                dist_pop_weighted: geo.dist_pop_weighted,
                lang_official: language.col,
                lang_spoken: language.csl,
                lang_native: language.cnl,
                lang_prox1: language.prox1,
                lang_lp1: language.lp1,
                lang_prox2: language.prox2,
                lang_lp2: language.lp2,
                gdp_bin_orig: None,
                gdp_bin_dest: None,
                net_flow: None,
                net_rate_100: None,
                rank: None,
                rank_norm: None,
                flow: record,
            }
        })
        .collect();

    for (label, missing) in [
        ("gdp", &missing_gdp),
        ("population", &missing_pop),
        ("region", &missing_region),
    ] {
        if !missing.is_empty() {
            let mut codes: Vec<&str> = missing.iter().map(Iso3::as_str).collect();
            codes.sort_unstable();
            warn!(table = label, countries = ?codes, "join incomplete");
        }
    }
    enriched
}

/// Documented exception to "missing match stays None": the borders table
/// can assert the pair touches, or that the country touches nothing.
fn backfill_contiguity(dyad: &DyadKey, borders: &BordersTable) -> Option<f64> {
    if borders.neighbors.contains(dyad) {
        return Some(1.0);
    }
    if borders.borderless.contains(&dyad.origin) || borders.borderless.contains(&dyad.destination) {
        return Some(0.0);
    }
    None
}
