use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical lowercase ISO-3166 alpha-3 code, extended by documented
/// synthetic codes for territories without an ISO entry (e.g. `xkx`).
///
/// This is the join key used everywhere downstream of identity resolution;
/// no component other than the resolver ever holds raw country text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Iso3(String);

impl Iso3 {
    pub fn new(code: &str) -> Self {
        Iso3(code.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Iso3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A canonical country entry. Built once per run from the static reference
/// tables and read-only thereafter; owned by the `ReferenceRepository`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryIdentity {
    pub iso3: Iso3,
    /// Display name, used for the harmonized `country_*` columns
    pub name: String,
    pub alpha2: Option<String>,
    /// Alternate spellings and historical names seen in the sources
    pub aliases: Vec<String>,
    /// True for project-defined codes outside ISO-3166
    pub synthetic: bool,
    /// True for superseded/defunct states still referenced by some sources
    pub historic: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso3_normalizes_case_and_whitespace() {
        assert_eq!(Iso3::new(" USA ").as_str(), "usa");
        assert_eq!(Iso3::new("gbr"), Iso3::new("GBR"));
    }
}
