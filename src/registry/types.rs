use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

use crate::error::CoreError;

/// Industry tag of a company entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Industry {
    Technology,
    Finance,
    Healthcare,
    Education,
    Retail,
    Manufacturing,
    Transportation,
    Telecom,
    Government,
}

impl Industry {
    pub const ALL: [Industry; 9] = [
        Industry::Technology,
        Industry::Finance,
        Industry::Healthcare,
        Industry::Education,
        Industry::Retail,
        Industry::Manufacturing,
        Industry::Transportation,
        Industry::Telecom,
        Industry::Government,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Industry::Technology => "technology",
            Industry::Finance => "finance",
            Industry::Healthcare => "healthcare",
            Industry::Education => "education",
            Industry::Retail => "retail",
            Industry::Manufacturing => "manufacturing",
            Industry::Transportation => "transportation",
            Industry::Telecom => "telecom",
            Industry::Government => "government",
        }
    }
}

impl fmt::Display for Industry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Industry {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(CoreError::invalid("industry must not be empty"));
        }
        Industry::ALL
            .iter()
            .copied()
            .find(|industry| industry.as_str() == wanted)
            .ok_or_else(|| CoreError::invalid(format!("unknown industry '{}'", s.trim())))
    }
}

/// Vietnamese region tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    North,
    Central,
    South,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::North, Region::Central, Region::South];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::North => "north",
            Region::Central => "central",
            Region::South => "south",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Region {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => Err(CoreError::invalid("region must not be empty")),
            "north" => Ok(Region::North),
            "central" => Ok(Region::Central),
            "south" => Ok(Region::South),
            other => Err(CoreError::invalid(format!("unknown region '{}'", other))),
        }
    }
}

/// A registered company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyEntry {
    pub name: String,
    pub industry: Industry,
    pub region: Region,
    pub aliases: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub added_date: DateTime<FixedOffset>,

    // Insertion order, used to keep the persisted sequence stable
    #[serde(skip)]
    pub(crate) ordinal: u64,
}

impl CompanyEntry {
    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }

    /// Canonical name followed by every alias
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Input to `Registry::add`
#[derive(Debug, Clone, Deserialize)]
pub struct NewCompany {
    pub name: String,
    pub industry: Industry,
    pub region: Region,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewCompany {
    pub fn new(name: &str, industry: Industry, region: Region) -> Self {
        NewCompany {
            name: name.to_string(),
            industry,
            region,
            aliases: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Filters for `Registry::search`; all supplied filters must match
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    #[serde(default, alias = "q")]
    pub query: Option<String>,
    #[serde(default)]
    pub industry: Option<Industry>,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

pub const DEFAULT_SEARCH_LIMIT: usize = 50;

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

impl Default for SearchQuery {
    fn default() -> Self {
        SearchQuery {
            query: None,
            industry: None,
            region: None,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl SearchQuery {
    pub fn text(query: &str) -> Self {
        SearchQuery {
            query: Some(query.to_string()),
            ..Default::default()
        }
    }
}

/// Result of a (re)load
#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub company_count: usize,
    pub industry_count: usize,
    pub regions: BTreeSet<Region>,
    pub timestamp: DateTime<FixedOffset>,
}

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_companies: usize,
    pub total_aliases: usize,
    pub by_industry: BTreeMap<Industry, usize>,
    pub by_region: BTreeMap<Region, usize>,
}

/// Case-normalized lookup key: NFC, lowercase, trimmed
pub fn normalize_key(name: &str) -> String {
    name.nfc().collect::<String>().to_lowercase().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Vietcombank "), "vietcombank");
        assert_eq!(normalize_key("VCB"), "vcb");
        // Decomposed and precomposed diacritics collapse to the same key
        assert_eq!(normalize_key("Ngân Hàng"), normalize_key("Nga\u{0302}n Ha\u{0300}ng"));
    }

    #[test]
    fn test_industry_parsing() {
        assert_eq!("Finance".parse::<Industry>().unwrap(), Industry::Finance);
        assert_eq!(" telecom ".parse::<Industry>().unwrap(), Industry::Telecom);
        assert!("".parse::<Industry>().is_err());
        assert!("mining".parse::<Industry>().is_err());
    }

    #[test]
    fn test_region_parsing() {
        assert_eq!("SOUTH".parse::<Region>().unwrap(), Region::South);
        assert!("west".parse::<Region>().is_err());
        assert!(" ".parse::<Region>().is_err());
    }
}
