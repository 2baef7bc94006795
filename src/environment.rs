use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::model::{ArtifactSettings, DevicePreference, TaskVariant};
use crate::normalizer::NormalizerSettings;

pub const DEFAULT_REGISTRY_PATH: &str = "config/company_registry.json";
pub const DEFAULT_PORT: u16 = 8000;

/// Splits a delimited list, dropping blank entries.
fn split_list(raw: &str, delimiter: char) -> Vec<String> {
    raw.split(delimiter)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Process configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub registry_path: PathBuf,
    pub artifacts: ArtifactSettings,
    pub preload_tasks: Vec<TaskVariant>,
    pub normalizer: NormalizerSettings,
    /// HS256 secret; a random one is generated when unset
    pub jwt_secret: Option<String>,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            artifacts: ArtifactSettings::default(),
            preload_tasks: Vec::new(),
            normalizer: NormalizerSettings::default(),
            jwt_secret: None,
            port: DEFAULT_PORT,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();
        let artifact_defaults = defaults.artifacts;

        let artifacts = ArtifactSettings {
            models_dir: var("VERIAIDPO_MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or(artifact_defaults.models_dir),
            hub_endpoint: var("VERIAIDPO_MODEL_HUB_ENDPOINT")
                .map(|raw| hub_endpoint(&raw))
                .transpose()?
                .unwrap_or(artifact_defaults.hub_endpoint),
            hub_namespace: var("VERIAIDPO_MODEL_HUB_NAMESPACE")
                .unwrap_or(artifact_defaults.hub_namespace),
            hub_token: var("HF_TOKEN"),
            language: var("VERIAIDPO_MODEL_LANGUAGE")
                .map(|l| l.to_uppercase())
                .unwrap_or(artifact_defaults.language),
            version: parse_var(&var, "VERIAIDPO_MODEL_VERSION")?.unwrap_or(artifact_defaults.version),
            max_length: parse_var(&var, "VERIAIDPO_MAX_LENGTH")?.unwrap_or(artifact_defaults.max_length),
            device: var("VERIAIDPO_DEVICE")
                .map(|d| d.parse::<DevicePreference>())
                .transpose()
                .context("Invalid VERIAIDPO_DEVICE")?
                .unwrap_or(artifact_defaults.device),
        };

        let preload_tasks = split_list(&var("VERIAIDPO_PRELOAD_TASKS").unwrap_or_default(), ',')
            .iter()
            .map(|task| task.parse::<TaskVariant>())
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid VERIAIDPO_PRELOAD_TASKS")?;

        let normalizer = NormalizerSettings {
            min_length_ratio: parse_var(&var, "VERIAIDPO_MIN_LENGTH_RATIO")?
                .unwrap_or(defaults.normalizer.min_length_ratio),
            max_length_ratio: parse_var(&var, "VERIAIDPO_MAX_LENGTH_RATIO")?
                .unwrap_or(defaults.normalizer.max_length_ratio),
        };
        if normalizer.min_length_ratio > normalizer.max_length_ratio {
            anyhow::bail!(
                "VERIAIDPO_MIN_LENGTH_RATIO ({}) exceeds VERIAIDPO_MAX_LENGTH_RATIO ({})",
                normalizer.min_length_ratio,
                normalizer.max_length_ratio
            );
        }

        Ok(Settings {
            registry_path: var("VERIAIDPO_REGISTRY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.registry_path),
            artifacts,
            preload_tasks,
            normalizer,
            jwt_secret: var("JWT_SECRET"),
            port: parse_var(&var, "PORT")?.unwrap_or(defaults.port),
        })
    }
}

/// Hub base URL without a trailing slash; only http(s) is accepted.
fn hub_endpoint(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .with_context(|| format!("Invalid VERIAIDPO_MODEL_HUB_ENDPOINT '{}'", raw))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("VERIAIDPO_MODEL_HUB_ENDPOINT must be http or https, got '{}'", raw);
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", name, raw, e))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.registry_path, PathBuf::from(DEFAULT_REGISTRY_PATH));
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.artifacts.max_length, 256);
        assert_eq!(settings.artifacts.language, "VI");
        assert!(settings.preload_tasks.is_empty());
        assert!(settings.jwt_secret.is_none());
        assert_eq!(settings.normalizer, NormalizerSettings::default());
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("VERIAIDPO_MODELS_DIR", "/srv/models"),
            ("VERIAIDPO_PRELOAD_TASKS", "principles, legal_basis,,"),
            ("VERIAIDPO_DEVICE", "cpu"),
            ("VERIAIDPO_MAX_LENGTH", "128"),
            ("VERIAIDPO_MODEL_LANGUAGE", "en"),
            ("VERIAIDPO_MAX_LENGTH_RATIO", "4.5"),
            ("HF_TOKEN", "hf_secret"),
            ("PORT", "9000"),
        ])
        .unwrap();
        assert_eq!(settings.artifacts.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(
            settings.preload_tasks,
            vec![TaskVariant::Principles, TaskVariant::LegalBasis]
        );
        assert_eq!(settings.artifacts.device, DevicePreference::Cpu);
        assert_eq!(settings.artifacts.max_length, 128);
        assert_eq!(settings.artifacts.language, "EN");
        assert_eq!(settings.artifacts.hub_token.as_deref(), Some("hf_secret"));
        assert_eq!(settings.normalizer.max_length_ratio, 4.5);
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(settings(&[("PORT", "eighty")]).is_err());
        assert!(settings(&[("VERIAIDPO_PRELOAD_TASKS", "principles,sentiment")]).is_err());
        assert!(settings(&[("VERIAIDPO_DEVICE", "tpu")]).is_err());
        assert!(settings(&[("VERIAIDPO_MODEL_HUB_ENDPOINT", "not a url")]).is_err());
        assert!(settings(&[("VERIAIDPO_MODEL_HUB_ENDPOINT", "ftp://hub.local")]).is_err());
        assert!(settings(&[
            ("VERIAIDPO_MIN_LENGTH_RATIO", "2.0"),
            ("VERIAIDPO_MAX_LENGTH_RATIO", "1.0")
        ])
        .is_err());
    }

    #[test]
    fn test_hub_endpoint_is_trimmed() {
        let settings = settings(&[("VERIAIDPO_MODEL_HUB_ENDPOINT", "http://127.0.0.1:8080/")]).unwrap();
        assert_eq!(settings.artifacts.hub_endpoint, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_split_list_skips_blanks() {
        assert_eq!(split_list(" a ; ;b", ';'), vec!["a", "b"]);
        assert!(split_list("", ',').is_empty());
    }
}
