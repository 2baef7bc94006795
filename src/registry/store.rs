//! Persisted registry format: industry -> region -> ordered entries.
//!
//! ```json
//! {
//!   "finance": {
//!     "north": [
//!       { "name": "Vietcombank", "aliases": ["VCB"], "metadata": {}, "added_date": "2025-01-01T00:00:00+07:00" }
//!     ]
//!   }
//! }
//! ```

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::snapshot::RegistrySnapshot;
use super::types::{CompanyEntry, Industry, Region};
use crate::error::{CoreError, Result};
use crate::util::vietnam_offset;
use crate::TARGET_REGISTRY;

pub type RegistryDocument = BTreeMap<String, BTreeMap<String, Vec<PersistedCompany>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCompany {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, deserialize_with = "deserialize_added_date")]
    pub added_date: Option<DateTime<FixedOffset>>,
}

/// Accepts RFC 3339 timestamps as well as naive ISO-8601 timestamps, which
/// are taken to be regional time.
fn deserialize_added_date<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed));
    }
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(serde::de::Error::custom)?;
    vietnam_offset()
        .from_local_datetime(&naive)
        .single()
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("ambiguous timestamp '{}'", raw)))
}

/// Stand-in for entries persisted without `added_date`. Fixed so that
/// loading the same document twice yields the same entries.
pub fn undated() -> DateTime<FixedOffset> {
    DateTime::<Utc>::UNIX_EPOCH.with_timezone(&vietnam_offset())
}

/// Flatten a persisted document into entries, in document order.
pub fn entries_from_document(document: &RegistryDocument) -> Result<Vec<CompanyEntry>> {
    let mut entries = Vec::new();
    for (industry_key, regions) in document {
        let industry: Industry = industry_key
            .parse()
            .map_err(|e: CoreError| CoreError::ConfigInvalid(e.to_string()))?;
        for (region_key, companies) in regions {
            let region: Region = region_key
                .parse()
                .map_err(|e: CoreError| CoreError::ConfigInvalid(e.to_string()))?;
            for company in companies {
                let name = company.name.trim();
                if name.is_empty() {
                    return Err(CoreError::ConfigInvalid(format!(
                        "empty company name under {}/{}",
                        industry, region
                    )));
                }
                entries.push(CompanyEntry {
                    name: name.to_string(),
                    industry,
                    region,
                    aliases: company.aliases.iter().map(|a| a.trim().to_string()).collect(),
                    metadata: company.metadata.clone(),
                    added_date: company.added_date.unwrap_or_else(undated),
                    ordinal: 0,
                });
            }
        }
    }
    Ok(entries)
}

/// Group a snapshot back into the persisted shape, keeping insertion order
/// inside each region.
pub fn document_from_snapshot(snapshot: &RegistrySnapshot) -> RegistryDocument {
    let mut document = RegistryDocument::new();
    for entry in snapshot.entries() {
        document
            .entry(entry.industry.to_string())
            .or_default()
            .entry(entry.region.to_string())
            .or_default()
            .push(PersistedCompany {
                name: entry.name.clone(),
                aliases: entry.aliases.clone(),
                metadata: entry.metadata.clone(),
                added_date: Some(entry.added_date),
            });
    }
    document
}

pub fn parse_document(raw: &str) -> Result<RegistryDocument> {
    serde_json::from_str(raw).map_err(|e| CoreError::ConfigInvalid(e.to_string()))
}

pub fn read_document(path: &Path) -> Result<RegistryDocument> {
    debug!(target: TARGET_REGISTRY, "Reading company registry from {}", path.display());
    let raw = fs::read_to_string(path)
        .map_err(|e| CoreError::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
    parse_document(&raw)
}

/// Write the whole document next to `path` and rename it into place.
pub fn write_document(path: &Path, document: &RegistryDocument) -> Result<()> {
    let body = serde_json::to_string_pretty(document)
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

    let tmp_path = temp_path_for(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persistence_error(parent, e))?;
    }

    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(body.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(persistence_error(path, e));
    }

    info!(target: TARGET_REGISTRY, "Persisted company registry to {}", path.display());
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "company_registry.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn persistence_error(path: &Path, e: std::io::Error) -> CoreError {
    CoreError::PersistenceFailure(format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "finance": {
            "north": [
                {"name": "Vietcombank", "aliases": ["VCB"], "metadata": {"ticker": "VCB"}, "added_date": "2025-03-01T09:00:00+07:00"},
                {"name": "Ngân hàng Công Thương", "aliases": ["VietinBank"], "added_date": "2025-03-01T09:30:00.123456"}
            ]
        },
        "telecom": {
            "north": [{"name": "Viettel", "aliases": [], "added_date": "2025-03-02T08:00:00+07:00"}]
        }
    }"#;

    #[test]
    fn test_parse_document_flattens_in_order() {
        let document = parse_document(SAMPLE).unwrap();
        let entries = entries_from_document(&document).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Vietcombank", "Ngân hàng Công Thương", "Viettel"]);
        assert_eq!(entries[0].industry, Industry::Finance);
        assert_eq!(entries[2].industry, Industry::Telecom);
        assert_eq!(entries[1].added_date.offset().local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn test_missing_added_date_is_stable_across_loads() {
        let raw = r#"{"retail": {"south": [{"name": "Tiki"}]}}"#;
        let first = entries_from_document(&parse_document(raw).unwrap()).unwrap();
        let second = entries_from_document(&parse_document(raw).unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].added_date, undated());
        assert_eq!(first[0].added_date.timestamp(), 0);
    }

    #[test]
    fn test_unknown_industry_is_config_invalid() {
        let document = parse_document(r#"{"mining": {"north": []}}"#).unwrap();
        let err = entries_from_document(&document).unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn test_malformed_json_is_config_invalid() {
        assert!(matches!(
            parse_document("{ not json").unwrap_err(),
            CoreError::ConfigInvalid(_)
        ));
    }

    #[test]
    fn test_write_preserves_vietnamese_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let document = parse_document(SAMPLE).unwrap();

        write_document(&path, &document).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Ngân hàng Công Thương"));
        assert!(!path.with_file_name("registry.json.tmp").exists());

        let reread = read_document(&path).unwrap();
        assert_eq!(
            entries_from_document(&reread).unwrap(),
            entries_from_document(&document).unwrap()
        );
    }
}
