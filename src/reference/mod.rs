//! Immutable reference repository for country identity resolution.
//!
//! Built once per run from embedded static tables and passed by reference to
//! every component that needs it; never accessed as ambient global state.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{CountryIdentity, Iso3};

mod tables;

pub use tables::{CompositeEntry, OverrideEntry};

/// What kind of identifier the caller believes it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Name,
    Alpha2,
    Alpha3,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no canonical country for identifier '{0}'")]
    NoMatch(String),

    #[error("ambiguous country identifier '{raw}': candidates {candidates:?}")]
    Ambiguous { raw: String, candidates: Vec<String> },

    #[error("reference table error: {0}")]
    BadTable(String),
}

/// Lookup tables for canonical country identities. Read-only after
/// construction; safe for concurrent shared reads.
pub struct ReferenceRepository {
    countries: Vec<CountryIdentity>,
    by_iso3: HashMap<String, usize>,
    by_alpha2: HashMap<String, usize>,
    /// Normalized names and aliases, exact-match tier
    by_name: HashMap<String, usize>,
    /// Manual per-source quirks, consulted after the primary paths.
    /// Every entry carries a rationale string.
    overrides: HashMap<String, (Iso3, String)>,
    /// Composite historical entries that expand into several identities
    /// (e.g. a joint Belgium/Luxembourg code)
    composites: HashMap<String, Vec<Iso3>>,
}

static PAREN_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<base>.*?)\s*\((?P<clause>[^)]*)\)\s*$").unwrap());
static COMMA_REORDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<base>[^,]+),\s*(?P<rest>.+)$").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a free-text country name for matching.
///
/// Handles the irregular forms seen in the sources: parenthetical clauses
/// ("Korea (the Republic of)"), suffix reorderings ("Korea, Republic of"),
/// curly apostrophes, and stray punctuation. Applied identically to table
/// names and query strings so both sides land in the same space.
pub fn normalize_name(raw: &str) -> String {
    let mut s = raw.trim().to_lowercase();
    s = s.replace('\u{2019}', "'");
    // "x (the y of)" -> "the y of x", same shape as the comma form
    if let Some(caps) = PAREN_CLAUSE.captures(&s) {
        let base = caps.name("base").unwrap().as_str().trim();
        let clause = caps.name("clause").unwrap().as_str().trim();
        // Clauses that read as a trailing qualifier get reordered in front;
        // anything else (e.g. "(drc)") is appended so it still disambiguates.
        if clause.ends_with("of") || clause.ends_with("the") {
            s = format!("{} {}", clause, base);
        } else {
            s = format!("{} {}", base, clause);
        }
    }
    // "korea, republic of" -> "republic of korea"
    if let Some(caps) = COMMA_REORDER.captures(&s) {
        s = format!(
            "{} {}",
            caps.name("rest").unwrap().as_str().trim(),
            caps.name("base").unwrap().as_str().trim()
        );
    }
    s = s.replace(['\'', '.'], "");
    s = MULTI_SPACE.replace_all(&s, " ").trim().to_string();
    // leading articles carry no signal
    if let Some(stripped) = s.strip_prefix("the ") {
        s = stripped.to_string();
    }
    s
}

#[derive(Debug, Deserialize)]
struct CountryRow {
    alpha3: String,
    alpha2: String,
    name: String,
    aliases: String,
    #[serde(default)]
    synthetic: Option<u8>,
    #[serde(default)]
    historic: Option<u8>,
}

impl ReferenceRepository {
    /// Build the repository from the embedded static tables.
    pub fn from_embedded() -> Result<Self, ResolutionError> {
        Self::from_tables(
            tables::COUNTRIES_CSV,
            tables::override_entries(),
            tables::composite_entries(),
        )
    }

    fn from_tables(
        countries_csv: &str,
        override_rows: Vec<OverrideEntry>,
        composite_rows: Vec<CompositeEntry>,
    ) -> Result<Self, ResolutionError> {
        let mut countries: Vec<CountryIdentity> = Vec::new();
        let mut by_iso3 = HashMap::new();
        let mut by_alpha2 = HashMap::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(countries_csv.as_bytes());
        for row in reader.deserialize::<CountryRow>() {
            let row = row.map_err(|e| ResolutionError::BadTable(e.to_string()))?;
            let idx = countries.len();
            let iso3 = Iso3::new(&row.alpha3);
            let aliases: Vec<String> = row
                .aliases
                .split(';')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();

            if by_iso3.insert(iso3.as_str().to_string(), idx).is_some() {
                return Err(ResolutionError::BadTable(format!(
                    "duplicate alpha-3 code '{}'",
                    iso3
                )));
            }
            if !row.alpha2.trim().is_empty() {
                by_alpha2.insert(row.alpha2.trim().to_lowercase(), idx);
            }
            for name in std::iter::once(row.name.as_str()).chain(aliases.iter().map(String::as_str))
            {
                let key = normalize_name(name);
                if let Some(prev) = by_name.insert(key.clone(), idx) {
                    // Same normalized name pointing at two countries would
                    // make exact-match resolution nondeterministic.
                    if prev != idx {
                        return Err(ResolutionError::BadTable(format!(
                            "name '{}' maps to both '{}' and '{}'",
                            key,
                            countries[prev].iso3,
                            iso3
                        )));
                    }
                }
            }

            countries.push(CountryIdentity {
                iso3,
                name: row.name,
                alpha2: if row.alpha2.trim().is_empty() {
                    None
                } else {
                    Some(row.alpha2.trim().to_uppercase())
                },
                aliases,
                synthetic: row.synthetic.unwrap_or(0) == 1,
                historic: row.historic.unwrap_or(0) == 1,
            });
        }

        let mut overrides = HashMap::new();
        for entry in override_rows {
            let iso3 = Iso3::new(entry.iso3);
            if !by_iso3.contains_key(iso3.as_str()) {
                return Err(ResolutionError::BadTable(format!(
                    "override '{}' targets unknown code '{}'",
                    entry.raw, iso3
                )));
            }
            overrides.insert(
                normalize_name(entry.raw),
                (iso3, entry.rationale.to_string()),
            );
        }

        let mut composites = HashMap::new();
        for entry in composite_rows {
            let parts: Vec<Iso3> = entry.parts.iter().map(|p| Iso3::new(p)).collect();
            for part in &parts {
                if !by_iso3.contains_key(part.as_str()) {
                    return Err(ResolutionError::BadTable(format!(
                        "composite '{}' references unknown code '{}'",
                        entry.code, part
                    )));
                }
            }
            composites.insert(entry.code.to_lowercase(), parts);
        }

        Ok(Self {
            countries,
            by_iso3,
            by_alpha2,
            by_name,
            overrides,
            composites,
        })
    }

    /// Resolve a raw identifier to a canonical identity.
    ///
    /// Resolution never guesses: an identifier that matches nothing, or
    /// whose fuzzy search is ambiguous, returns a `ResolutionError` carrying
    /// the original string, and the caller decides whether to drop the row
    /// or abort the run.
    pub fn resolve(&self, raw: &str, hint: Hint) -> Result<&CountryIdentity, ResolutionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResolutionError::NoMatch(raw.to_string()));
        }
        match hint {
            Hint::Alpha3 => self.resolve_alpha3(trimmed),
            Hint::Alpha2 => self.resolve_alpha2(trimmed),
            Hint::Name => self.resolve_name(trimmed),
        }
    }

    fn resolve_alpha3(&self, raw: &str) -> Result<&CountryIdentity, ResolutionError> {
        let key = raw.to_lowercase();
        if let Some(&idx) = self.by_iso3.get(key.as_str()) {
            return Ok(&self.countries[idx]);
        }
        self.resolve_override(&key)
            .ok_or_else(|| ResolutionError::NoMatch(raw.to_string()))
    }

    fn resolve_alpha2(&self, raw: &str) -> Result<&CountryIdentity, ResolutionError> {
        let key = raw.to_lowercase();
        if let Some(&idx) = self.by_alpha2.get(key.as_str()) {
            return Ok(&self.countries[idx]);
        }
        self.resolve_override(&key)
            .ok_or_else(|| ResolutionError::NoMatch(raw.to_string()))
    }

    fn resolve_name(&self, raw: &str) -> Result<&CountryIdentity, ResolutionError> {
        let key = normalize_name(raw);
        if let Some(&idx) = self.by_name.get(key.as_str()) {
            return Ok(&self.countries[idx]);
        }
        if let Some(identity) = self.resolve_override(&key) {
            return Ok(identity);
        }
        self.fuzzy_search(raw, &key)
    }

    fn resolve_override(&self, normalized: &str) -> Option<&CountryIdentity> {
        self.overrides.get(normalized).map(|(iso3, rationale)| {
            let idx = self.by_iso3[iso3.as_str()];
            tracing::debug!(raw = normalized, iso3 = %iso3, rationale, "resolved via override table");
            &self.countries[idx]
        })
    }

    /// Last-resort token-subset search. Succeeds only on exactly one
    /// candidate; zero or several is a hard error.
    fn fuzzy_search(&self, raw: &str, key: &str) -> Result<&CountryIdentity, ResolutionError> {
        let query_tokens: Vec<&str> = key.split(' ').filter(|t| !t.is_empty()).collect();
        if query_tokens.is_empty() {
            return Err(ResolutionError::NoMatch(raw.to_string()));
        }
        let mut candidates: Vec<usize> = Vec::new();
        for (name, &idx) in &self.by_name {
            let name_tokens: Vec<&str> = name.split(' ').collect();
            let query_in_name = query_tokens.iter().all(|t| name_tokens.contains(t));
            let name_in_query = name_tokens.iter().all(|t| query_tokens.contains(t));
            if (query_in_name || name_in_query) && !candidates.contains(&idx) {
                candidates.push(idx);
            }
        }
        match candidates.len() {
            0 => Err(ResolutionError::NoMatch(raw.to_string())),
            1 => Ok(&self.countries[candidates[0]]),
            _ => {
                let mut names: Vec<String> = candidates
                    .iter()
                    .map(|&idx| self.countries[idx].iso3.as_str().to_string())
                    .collect();
                names.sort();
                Err(ResolutionError::Ambiguous {
                    raw: raw.to_string(),
                    candidates: names,
                })
            }
        }
    }

    /// Identities a composite code expands into, in table order, or `None`
    /// if the code is not a known composite.
    pub fn expand_composite(&self, code: &str) -> Option<&[Iso3]> {
        self.composites.get(&code.to_lowercase()).map(Vec::as_slice)
    }

    pub fn get(&self, iso3: &Iso3) -> Option<&CountryIdentity> {
        self.by_iso3.get(iso3.as_str()).map(|&idx| &self.countries[idx])
    }

    /// All canonical identities, including synthetic and historic entries.
    pub fn all(&self) -> &[CountryIdentity] {
        &self.countries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ReferenceRepository {
        ReferenceRepository::from_embedded().unwrap()
    }

    #[test]
    fn test_embedded_tables_build() {
        let repo = repo();
        assert!(repo.all().len() > 150);
    }

    #[test]
    fn test_normalize_name_reorders_and_strips() {
        assert_eq!(normalize_name("Korea (the Republic of)"), "republic of korea");
        assert_eq!(normalize_name("Korea, Republic of"), "republic of korea");
        assert_eq!(normalize_name("Gambia, The"), "gambia");
        assert_eq!(normalize_name("  Viet   Nam "), "viet nam");
    }

    #[test]
    fn test_resolve_alpha3_exact() {
        let repo = repo();
        let usa = repo.resolve("USA", Hint::Alpha3).unwrap();
        assert_eq!(usa.iso3, Iso3::new("usa"));
        assert_eq!(usa.name, "United States");
    }

    #[test]
    fn test_resolve_alpha2_including_historic() {
        let repo = repo();
        assert_eq!(repo.resolve("GB", Hint::Alpha2).unwrap().iso3, Iso3::new("gbr"));
        // Netherlands Antilles dissolved in 2010 but still appears in the
        // secondary distance source
        let ant = repo.resolve("AN", Hint::Alpha2).unwrap();
        assert_eq!(ant.iso3, Iso3::new("ant"));
        assert!(ant.historic);
    }

    #[test]
    fn test_resolve_synthetic_kosovo() {
        let repo = repo();
        let via_alpha2 = repo.resolve("XK", Hint::Alpha2).unwrap();
        assert_eq!(via_alpha2.iso3, Iso3::new("xkx"));
        assert!(via_alpha2.synthetic);
        let via_name = repo.resolve("Kosovo", Hint::Name).unwrap();
        assert_eq!(via_name.iso3, Iso3::new("xkx"));
    }

    #[test]
    fn test_resolve_korea_parenthetical() {
        let repo = repo();
        let kor = repo.resolve("Korea (the Republic of)", Hint::Name).unwrap();
        assert_eq!(kor.iso3, Iso3::new("kor"));
        assert_eq!(repo.resolve("South Korea", Hint::Name).unwrap().iso3, Iso3::new("kor"));
    }

    #[test]
    fn test_resolve_micronesia_variants_agree() {
        let repo = repo();
        let by_name = repo.resolve("Micronesia", Hint::Name).unwrap().iso3.clone();
        let by_alpha2 = repo.resolve("FM", Hint::Alpha2).unwrap().iso3.clone();
        // MIC is a non-standard code one distance source uses for FM
        let by_quirk = repo.resolve("MIC", Hint::Alpha2).unwrap().iso3.clone();
        assert_eq!(by_name, Iso3::new("fsm"));
        assert_eq!(by_alpha2, by_name);
        assert_eq!(by_quirk, by_name);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let repo = repo();
        for identity in repo.all() {
            let again = repo.resolve(identity.iso3.as_str(), Hint::Alpha3).unwrap();
            assert_eq!(again.iso3, identity.iso3);
            let by_name = repo.resolve(&identity.name, Hint::Name).unwrap();
            assert_eq!(by_name.iso3, identity.iso3, "name '{}' round-trip", identity.name);
        }
    }

    #[test]
    fn test_codes_are_unique_across_table() {
        let repo = repo();
        let mut seen = std::collections::HashSet::new();
        for identity in repo.all() {
            assert!(seen.insert(identity.iso3.clone()), "duplicate {}", identity.iso3);
            assert_eq!(identity.iso3.as_str(), identity.iso3.as_str().to_lowercase());
            assert_eq!(identity.iso3.as_str().len(), 3);
        }
    }

    #[test]
    fn test_ambiguous_name_fails_rather_than_guessing() {
        let repo = repo();
        // bare "korea" could be either Korea; must not silently pick one
        let err = repo.resolve("Korea", Hint::Name).unwrap_err();
        assert!(matches!(err, ResolutionError::Ambiguous { .. }));
    }

    #[test]
    fn test_unknown_identifier_carries_original_string() {
        let repo = repo();
        let err = repo.resolve("Atlantis", Hint::Name).unwrap_err();
        assert_eq!(err, ResolutionError::NoMatch("Atlantis".to_string()));
    }

    #[test]
    fn test_composite_expansion() {
        let repo = repo();
        let parts = repo.expand_composite("BLX").unwrap();
        assert_eq!(parts, &[Iso3::new("bel"), Iso3::new("lux")]);
        assert!(repo.expand_composite("usa").is_none());
    }
}
