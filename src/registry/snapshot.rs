//! Immutable point-in-time view of the registry.
//!
//! Every mutation builds a fresh snapshot; readers keep whichever `Arc` they
//! obtained and never observe a partial update. The compiled term matchers
//! used by the normalizer are cached per snapshot, so a mutation implicitly
//! invalidates them.

use once_cell::sync::OnceCell;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::types::{normalize_key, CompanyEntry};
use crate::TARGET_REGISTRY;

/// A canonical name or alias compiled for case-insensitive scanning
#[derive(Debug)]
pub struct TermMatcher {
    pub term: String,
    pub canonical_key: String,
    pub char_len: usize,
    pub pattern: Regex,
}

#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    // canonical key -> entry
    companies: HashMap<String, CompanyEntry>,
    // alias key -> canonical key
    aliases: HashMap<String, String>,
    next_ordinal: u64,
    terms: OnceCell<Vec<TermMatcher>>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from entries in order. Returns the first conflicting
    /// key on failure.
    pub(crate) fn from_entries(entries: Vec<CompanyEntry>) -> Result<Self, String> {
        let mut snapshot = Self::empty();
        for entry in entries {
            snapshot.insert(entry)?;
        }
        Ok(snapshot)
    }

    /// Copy of this snapshot with `entry` appended.
    pub(crate) fn with_added(&self, entry: CompanyEntry) -> Result<Self, String> {
        let mut next = self.clone_maps();
        next.insert(entry)?;
        Ok(next)
    }

    /// Copy of this snapshot without the entry stored under `canonical_key`.
    pub(crate) fn without(&self, canonical_key: &str) -> Option<(Self, CompanyEntry)> {
        let mut next = self.clone_maps();
        let removed = next.companies.remove(canonical_key)?;
        next.aliases.retain(|_, target| target != canonical_key);
        Some((next, removed))
    }

    fn clone_maps(&self) -> Self {
        RegistrySnapshot {
            companies: self.companies.clone(),
            aliases: self.aliases.clone(),
            next_ordinal: self.next_ordinal,
            terms: OnceCell::new(),
        }
    }

    /// Returns the first key of `keys` already used by a canonical name or alias.
    pub fn find_conflict<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Option<String> {
        keys.into_iter()
            .find(|key| self.companies.contains_key(*key) || self.aliases.contains_key(*key))
            .map(str::to_string)
    }

    fn insert(&mut self, mut entry: CompanyEntry) -> Result<(), String> {
        let canonical_key = entry.key();
        if canonical_key.is_empty() {
            return Err(String::new());
        }
        let alias_keys: Vec<String> = entry.aliases.iter().map(|a| normalize_key(a)).collect();

        let mut seen = vec![canonical_key.as_str()];
        for key in &alias_keys {
            if key.is_empty() || seen.contains(&key.as_str()) {
                return Err(key.clone());
            }
            seen.push(key);
        }
        if let Some(conflict) = self.find_conflict(seen.iter().copied()) {
            return Err(conflict);
        }

        for key in alias_keys {
            self.aliases.insert(key, canonical_key.clone());
        }
        entry.ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.companies.insert(canonical_key, entry);
        Ok(())
    }

    /// Canonical key for a canonical name or alias, case-insensitive.
    pub fn resolve_key(&self, name: &str) -> Option<&str> {
        let key = normalize_key(name);
        if let Some((canonical, _)) = self.companies.get_key_value(&key) {
            return Some(canonical.as_str());
        }
        self.aliases.get(&key).map(String::as_str)
    }

    pub fn resolve(&self, name: &str) -> Option<&CompanyEntry> {
        self.resolve_key(name).and_then(|key| self.companies.get(key))
    }

    pub fn get_by_key(&self, canonical_key: &str) -> Option<&CompanyEntry> {
        self.companies.get(canonical_key)
    }

    /// Entries in insertion order
    pub fn entries(&self) -> Vec<&CompanyEntry> {
        let mut entries: Vec<&CompanyEntry> = self.companies.values().collect();
        entries.sort_by_key(|entry| entry.ordinal);
        entries
    }

    pub fn len(&self) -> usize {
        self.companies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Every canonical name and alias, longest term first.
    pub fn terms(&self) -> &[TermMatcher] {
        self.terms.get_or_init(|| {
            let mut terms = Vec::with_capacity(self.companies.len() + self.aliases.len());
            for (canonical_key, entry) in &self.companies {
                for term in entry.terms() {
                    let term = term.trim();
                    if term.is_empty() {
                        continue;
                    }
                    match RegexBuilder::new(&regex::escape(term))
                        .case_insensitive(true)
                        .build()
                    {
                        Ok(pattern) => terms.push(TermMatcher {
                            term: term.to_string(),
                            canonical_key: canonical_key.clone(),
                            char_len: term.chars().count(),
                            pattern,
                        }),
                        Err(e) => {
                            warn!(target: TARGET_REGISTRY, "Skipping unmatchable term '{}': {}", term, e);
                        }
                    }
                }
            }
            terms.sort_by(|a, b| b.char_len.cmp(&a.char_len).then_with(|| a.term.cmp(&b.term)));
            debug!(target: TARGET_REGISTRY, "Compiled {} registry terms", terms.len());
            terms
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::types::{Industry, Region};
    use crate::util::now_in_vietnam;

    fn entry(name: &str, aliases: &[&str]) -> CompanyEntry {
        CompanyEntry {
            name: name.to_string(),
            industry: Industry::Technology,
            region: Region::North,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            metadata: serde_json::Map::new(),
            added_date: now_in_vietnam(),
            ordinal: 0,
        }
    }

    #[test]
    fn test_terms_sorted_longest_first() {
        let snapshot = RegistrySnapshot::from_entries(vec![
            entry("FPT", &[]),
            entry("FPT Software", &["FSoft"]),
        ])
        .unwrap();
        let terms: Vec<&str> = snapshot.terms().iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["FPT Software", "FSoft", "FPT"]);
    }

    #[test]
    fn test_alias_conflicts_rejected() {
        let snapshot = RegistrySnapshot::from_entries(vec![entry("Vietcombank", &["VCB"])]).unwrap();
        assert_eq!(
            snapshot.with_added(entry("VCB", &[])).unwrap_err(),
            "vcb".to_string()
        );
        assert_eq!(
            snapshot.with_added(entry("Other Bank", &["vietcombank"])).unwrap_err(),
            "vietcombank".to_string()
        );
        // Original snapshot untouched
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.alias_count(), 1);
    }

    #[test]
    fn test_without_drops_aliases() {
        let snapshot = RegistrySnapshot::from_entries(vec![
            entry("Vietcombank", &["VCB"]),
            entry("Viettel", &[]),
        ])
        .unwrap();
        let (next, removed) = snapshot.without("vietcombank").unwrap();
        assert_eq!(removed.name, "Vietcombank");
        assert!(next.resolve("VCB").is_none());
        assert_eq!(next.alias_count(), 0);
        assert!(snapshot.resolve("VCB").is_some());
    }

    #[test]
    fn test_entries_keep_insertion_order() {
        let snapshot = RegistrySnapshot::from_entries(vec![
            entry("Zalo", &[]),
            entry("An Phat", &[]),
            entry("Masan", &[]),
        ])
        .unwrap();
        let names: Vec<&str> = snapshot.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Zalo", "An Phat", "Masan"]);
    }
}
