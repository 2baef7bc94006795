//! Entity registry of known Vietnamese companies.
//!
//! The registry holds one `Arc<RegistrySnapshot>` behind a `RwLock`. Writers
//! keep the write guard for the whole mutation including the persistence
//! write, then swap in a new snapshot; readers only hold the read guard long
//! enough to clone the `Arc`.

pub mod snapshot;
pub mod store;
pub mod types;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, instrument, warn};

pub use snapshot::{RegistrySnapshot, TermMatcher};
pub use store::{PersistedCompany, RegistryDocument};
pub use types::*;

use crate::error::{CoreError, Result};
use crate::util::now_in_vietnam;
use crate::TARGET_REGISTRY;

pub struct Registry {
    path: Option<PathBuf>,
    state: RwLock<Arc<RegistrySnapshot>>,
}

impl Registry {
    /// Empty registry without a backing file
    pub fn in_memory() -> Self {
        Registry {
            path: None,
            state: RwLock::new(Arc::new(RegistrySnapshot::empty())),
        }
    }

    /// Registry backed by `path`. A missing file starts an empty registry; a
    /// malformed one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let registry = Registry {
            path: Some(path.into()),
            state: RwLock::new(Arc::new(RegistrySnapshot::empty())),
        };
        match registry.path.as_deref() {
            Some(path) if path.exists() => {
                registry.reload()?;
            }
            Some(path) => {
                warn!(target: TARGET_REGISTRY, "Company registry {} not found, starting empty", path.display());
            }
            None => {}
        }
        Ok(registry)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Arc<RegistrySnapshot>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Arc<RegistrySnapshot>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Immutable view of every entry
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.read_state())
    }

    /// Replace in-memory state with `document`. Prior state survives a failure.
    #[instrument(target = "registry", level = "debug", skip_all)]
    pub fn load(&self, document: &RegistryDocument) -> Result<LoadSummary> {
        let entries = store::entries_from_document(document)?;
        let snapshot = RegistrySnapshot::from_entries(entries).map_err(|key| {
            CoreError::ConfigInvalid(format!("duplicate or empty registry key '{}'", key))
        })?;

        let summary = summarize(&snapshot);
        *self.write_state() = Arc::new(snapshot);

        info!(
            target: TARGET_REGISTRY,
            "Loaded {} companies across {} industries",
            summary.company_count, summary.industry_count
        );
        Ok(summary)
    }

    pub fn load_str(&self, raw: &str) -> Result<LoadSummary> {
        self.load(&store::parse_document(raw)?)
    }

    /// Rebuild everything from the backing file.
    pub fn reload(&self) -> Result<LoadSummary> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| CoreError::ConfigInvalid("no backing file configured".to_string()))?;
        let document = store::read_document(path)?;
        self.load(&document)
    }

    /// Insert a new company. On a persistence failure the registry is left
    /// exactly as it was.
    #[instrument(target = "registry", level = "debug", skip(self, company), fields(name = %company.name))]
    pub fn add(&self, company: NewCompany, persist: bool) -> Result<CompanyEntry> {
        let name = company.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::invalid("company name must not be empty"));
        }
        let canonical_key = normalize_key(&name);

        // Drop blank, repeated and self-referencing aliases
        let mut seen = HashSet::from([canonical_key.clone()]);
        let aliases: Vec<String> = company
            .aliases
            .iter()
            .map(|alias| alias.trim().to_string())
            .filter(|alias| !alias.is_empty() && seen.insert(normalize_key(alias)))
            .collect();

        let entry = CompanyEntry {
            name,
            industry: company.industry,
            region: company.region,
            aliases,
            metadata: company.metadata,
            added_date: now_in_vietnam(),
            ordinal: 0,
        };

        let mut state = self.write_state();
        let keys: Vec<String> = entry.terms().map(normalize_key).collect();
        if let Some(conflict) = state.find_conflict(keys.iter().map(String::as_str)) {
            return Err(CoreError::DuplicateEntity {
                name: entry.name,
                key: conflict,
            });
        }

        let next = state
            .with_added(entry)
            .map_err(|key| CoreError::DuplicateEntity {
                name: company.name.clone(),
                key,
            })?;
        if persist {
            self.persist(&next)?;
        }
        let added = next
            .get_by_key(&canonical_key)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(canonical_key.clone()))?;
        *state = Arc::new(next);

        info!(
            target: TARGET_REGISTRY,
            "Added company '{}' ({}/{}) with {} aliases",
            added.name, added.industry, added.region, added.aliases.len()
        );
        Ok(added)
    }

    /// Delete the entry resolved from a canonical name or alias.
    #[instrument(target = "registry", level = "debug", skip(self))]
    pub fn remove(&self, name: &str, persist: bool) -> Result<CompanyEntry> {
        let mut state = self.write_state();
        let canonical_key = state
            .resolve_key(name)
            .map(str::to_string)
            .ok_or_else(|| CoreError::NotFound(name.trim().to_string()))?;
        let (next, removed) = state
            .without(&canonical_key)
            .ok_or_else(|| CoreError::NotFound(name.trim().to_string()))?;
        if persist {
            self.persist(&next)?;
        }
        *state = Arc::new(next);

        info!(target: TARGET_REGISTRY, "Removed company '{}'", removed.name);
        Ok(removed)
    }

    fn persist(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let path = self.path.as_deref().ok_or_else(|| {
            CoreError::PersistenceFailure("no backing file configured".to_string())
        })?;
        store::write_document(path, &store::document_from_snapshot(snapshot))
    }

    /// Canonical name for a canonical name or alias
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.read_state().resolve(name).map(|entry| entry.name.clone())
    }

    pub fn get(&self, name: &str) -> Option<CompanyEntry> {
        self.read_state().resolve(name).cloned()
    }

    /// Entries matching all supplied filters, ordered by canonical key.
    pub fn search(&self, query: &SearchQuery) -> Vec<CompanyEntry> {
        let snapshot = self.snapshot();
        let needle = query
            .query
            .as_deref()
            .map(normalize_key)
            .filter(|needle| !needle.is_empty());

        let mut matches: Vec<&CompanyEntry> = snapshot
            .entries()
            .into_iter()
            .filter(|entry| query.industry.map_or(true, |industry| entry.industry == industry))
            .filter(|entry| query.region.map_or(true, |region| entry.region == region))
            .filter(|entry| match &needle {
                Some(needle) => entry.terms().any(|term| normalize_key(term).contains(needle)),
                None => true,
            })
            .collect();
        matches.sort_by_key(|entry| entry.key());
        matches.into_iter().take(query.limit).cloned().collect()
    }

    pub fn list_by_industry(&self, industry: Industry) -> Vec<CompanyEntry> {
        self.snapshot()
            .entries()
            .into_iter()
            .filter(|entry| entry.industry == industry)
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> RegistryStats {
        let snapshot = self.snapshot();
        let mut by_industry = BTreeMap::new();
        let mut by_region = BTreeMap::new();
        for entry in snapshot.entries() {
            *by_industry.entry(entry.industry).or_insert(0) += 1;
            *by_region.entry(entry.region).or_insert(0) += 1;
        }
        RegistryStats {
            total_companies: snapshot.len(),
            total_aliases: snapshot.alias_count(),
            by_industry,
            by_region,
        }
    }

    /// Current state in the persisted format
    pub fn export(&self) -> RegistryDocument {
        store::document_from_snapshot(&self.snapshot())
    }
}

fn summarize(snapshot: &RegistrySnapshot) -> LoadSummary {
    let entries = snapshot.entries();
    LoadSummary {
        company_count: entries.len(),
        industry_count: entries
            .iter()
            .map(|entry| entry.industry)
            .collect::<BTreeSet<_>>()
            .len(),
        regions: entries.iter().map(|entry| entry.region).collect(),
        timestamp: now_in_vietnam(),
    }
}
