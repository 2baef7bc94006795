//! Text normalizer: replaces registry-known company mentions (and optionally
//! person names) with placeholder tokens before classification.
//!
//! One registry snapshot is used for a whole call. Terms are tried longest
//! first, each canonical company is replaced at most once per input, and
//! existing placeholder literals are never rewritten.

pub mod person;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::registry::{Industry, Region, Registry, RegistrySnapshot};
use crate::TARGET_NORMALIZER;

pub const COMPANY_PLACEHOLDER: &str = "[COMPANY]";
pub const PERSON_PLACEHOLDER: &str = "[PERSON]";

pub const DEFAULT_MIN_LENGTH_RATIO: f64 = 0.3;
pub const DEFAULT_MAX_LENGTH_RATIO: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Company,
    Person,
}

impl EntityKind {
    pub fn placeholder(&self) -> &'static str {
        match self {
            EntityKind::Company => COMPANY_PLACEHOLDER,
            EntityKind::Person => PERSON_PLACEHOLDER,
        }
    }
}

/// Registry facts attached to a company detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalCompany {
    pub name: String,
    pub industry: Industry,
    pub region: Region,
}

/// One replaced span. `start` and `end` are byte offsets into the original text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedEntity {
    pub surface: String,
    pub placeholder: String,
    pub kind: EntityKind,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical: Option<CanonicalCompany>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NormalizeOptions {
    #[serde(default = "default_true")]
    pub normalize_companies: bool,
    #[serde(default)]
    pub normalize_persons: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            normalize_companies: true,
            normalize_persons: false,
        }
    }
}

impl NormalizeOptions {
    pub fn with_persons(mut self, enabled: bool) -> Self {
        self.normalize_persons = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationResult {
    pub original_text: String,
    pub normalized_text: String,
    /// Ordered by position in the original text
    pub entities: Vec<DetectedEntity>,
    pub company_count: usize,
    pub person_count: usize,
}

impl NormalizationResult {
    fn unchanged(text: &str) -> Self {
        NormalizationResult {
            original_text: text.to_string(),
            normalized_text: text.to_string(),
            entities: Vec::new(),
            company_count: 0,
            person_count: 0,
        }
    }

    /// Distinct canonical company names in order of appearance
    pub fn detected_companies(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entities
            .iter()
            .filter_map(|entity| entity.canonical.as_ref())
            .filter(|canonical| seen.insert(canonical.name.as_str()))
            .map(|canonical| canonical.name.clone())
            .collect()
    }

    pub fn normalization_count(&self) -> usize {
        self.company_count + self.person_count
    }
}

/// Diagnostic report from [`Normalizer::validate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub company_tokens: usize,
    pub person_tokens: usize,
    pub length_ratio: f64,
    pub contains_placeholder_input: bool,
    pub valid: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerSettings {
    pub min_length_ratio: f64,
    pub max_length_ratio: f64,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        NormalizerSettings {
            min_length_ratio: DEFAULT_MIN_LENGTH_RATIO,
            max_length_ratio: DEFAULT_MAX_LENGTH_RATIO,
        }
    }
}

pub struct Normalizer {
    registry: Arc<Registry>,
    settings: NormalizerSettings,
}

impl Normalizer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_settings(registry, NormalizerSettings::default())
    }

    pub fn with_settings(registry: Arc<Registry>, settings: NormalizerSettings) -> Self {
        Normalizer { registry, settings }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> NormalizerSettings {
        self.settings
    }

    pub fn normalize(&self, text: &str, options: &NormalizeOptions) -> NormalizationResult {
        normalize_with_snapshot(&self.registry.snapshot(), text, options)
    }

    /// Rewritten text only, with default options
    pub fn normalize_for_inference(&self, text: &str) -> String {
        self.normalize(text, &NormalizeOptions::default())
            .normalized_text
    }

    /// Normalize several texts against a single registry snapshot.
    pub fn normalize_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        options: &NormalizeOptions,
    ) -> Vec<NormalizationResult> {
        let snapshot = self.registry.snapshot();
        texts
            .iter()
            .map(|text| normalize_with_snapshot(&snapshot, text.as_ref(), options))
            .collect()
    }

    /// Count placeholders in `normalized` and sanity-check it against
    /// `original`. Never blocks normalization.
    pub fn validate(&self, original: &str, normalized: &str) -> ValidationReport {
        let company_tokens = normalized.matches(COMPANY_PLACEHOLDER).count();
        let person_tokens = normalized.matches(PERSON_PLACEHOLDER).count();
        let contains_placeholder_input =
            original.contains(COMPANY_PLACEHOLDER) || original.contains(PERSON_PLACEHOLDER);

        let original_len = original.chars().count();
        let normalized_len = normalized.chars().count();
        let length_ratio = match (original_len, normalized_len) {
            (0, 0) => 1.0,
            (0, _) => f64::INFINITY,
            (o, n) => n as f64 / o as f64,
        };

        let mut warnings = Vec::new();
        if contains_placeholder_input {
            warnings.push("input already contains a placeholder token".to_string());
        }
        if length_ratio < self.settings.min_length_ratio
            || length_ratio > self.settings.max_length_ratio
        {
            warnings.push(format!(
                "length ratio {:.2} outside [{}, {}]",
                length_ratio, self.settings.min_length_ratio, self.settings.max_length_ratio
            ));
        }
        if !warnings.is_empty() {
            warn!(target: TARGET_NORMALIZER, "Normalization check failed: {}", warnings.join("; "));
        }

        ValidationReport {
            company_tokens,
            person_tokens,
            length_ratio,
            contains_placeholder_input,
            valid: warnings.is_empty(),
            warnings,
        }
    }
}

/// Normalize `text` against a fixed snapshot.
pub fn normalize_with_snapshot(
    snapshot: &RegistrySnapshot,
    text: &str,
    options: &NormalizeOptions,
) -> NormalizationResult {
    if text.is_empty() {
        return NormalizationResult::unchanged(text);
    }

    let mut claimed = placeholder_spans(text);
    let mut entities = Vec::new();

    if options.normalize_companies {
        let mut replaced: HashSet<&str> = HashSet::new();
        for matcher in snapshot.terms() {
            if replaced.contains(matcher.canonical_key.as_str()) {
                continue;
            }
            let found = matcher.pattern.find_iter(text).find(|m| {
                on_word_boundary(text, m.range()) && !overlaps_any(&claimed, &m.range())
            });
            let (Some(found), Some(entry)) = (found, snapshot.get_by_key(&matcher.canonical_key))
            else {
                continue;
            };

            entities.push(DetectedEntity {
                surface: found.as_str().to_string(),
                placeholder: COMPANY_PLACEHOLDER.to_string(),
                kind: EntityKind::Company,
                start: found.start(),
                end: found.end(),
                canonical: Some(CanonicalCompany {
                    name: entry.name.clone(),
                    industry: entry.industry,
                    region: entry.region,
                }),
            });
            claimed.push(found.range());
            replaced.insert(matcher.canonical_key.as_str());
        }
    }

    if options.normalize_persons {
        for span in person::find_person_spans(text, &claimed) {
            entities.push(DetectedEntity {
                surface: text[span.clone()].to_string(),
                placeholder: PERSON_PLACEHOLDER.to_string(),
                kind: EntityKind::Person,
                start: span.start,
                end: span.end,
                canonical: None,
            });
        }
    }

    if entities.is_empty() {
        return NormalizationResult::unchanged(text);
    }

    entities.sort_by_key(|entity| entity.start);
    let normalized_text = splice(text, &entities);
    let company_count = entities
        .iter()
        .filter(|e| e.kind == EntityKind::Company)
        .count();
    let person_count = entities.len() - company_count;

    debug!(
        target: TARGET_NORMALIZER,
        "Replaced {} company and {} person mentions", company_count, person_count
    );

    NormalizationResult {
        original_text: text.to_string(),
        normalized_text,
        entities,
        company_count,
        person_count,
    }
}

/// Byte ranges of placeholder literals already present in `text`
fn placeholder_spans(text: &str) -> Vec<Range<usize>> {
    [COMPANY_PLACEHOLDER, PERSON_PLACEHOLDER]
        .iter()
        .flat_map(|literal| {
            text.match_indices(literal)
                .map(|(start, found)| start..start + found.len())
        })
        .collect()
}

fn overlaps_any(claimed: &[Range<usize>], span: &Range<usize>) -> bool {
    claimed
        .iter()
        .any(|c| span.start < c.end && c.start < span.end)
}

/// A match must not continue an alphanumeric word on either side.
fn on_word_boundary(text: &str, span: Range<usize>) -> bool {
    let matched = &text[span.clone()];
    let clear = |edge: Option<char>, neighbour: Option<char>| match (edge, neighbour) {
        (Some(edge), Some(neighbour)) if edge.is_alphanumeric() => !neighbour.is_alphanumeric(),
        _ => true,
    };
    clear(matched.chars().next(), text[..span.start].chars().next_back())
        && clear(matched.chars().next_back(), text[span.end..].chars().next())
}

/// `entities` must be sorted and non-overlapping.
fn splice(text: &str, entities: &[DetectedEntity]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for entity in entities {
        out.push_str(&text[cursor..entity.start]);
        out.push_str(&entity.placeholder);
        cursor = entity.end;
    }
    out.push_str(&text[cursor..]);
    out
}
