//! Locating and fetching classification artifacts.
//!
//! Each task variant lives in `<models_dir>/VeriAIDPO_<Task>_<LANG>_v<N>`.
//! Missing files are pulled from the model hub at
//! `<endpoint>/<namespace>/<dir>/resolve/main/<file>`.

use anyhow::{Context, Result};
use candle_core::Device;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::bert;
use super::{ArtifactLoader, LoadedModel, TaskVariant};
use crate::error::CoreError;
use crate::TARGET_MODEL;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const VOCAB_FILE: &str = "vocab.txt";
pub const LABEL_MAP_FILE: &str = "label_map.json";

pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_HUB_NAMESPACE: &str = "veriaidpo";
pub const DEFAULT_MAX_LENGTH: usize = 256;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DevicePreference {
    /// Pick the device once, at load time.
    pub fn select(&self) -> Result<Device> {
        match self {
            DevicePreference::Auto => Ok(Device::cuda_if_available(0)?),
            DevicePreference::Cpu => Ok(Device::Cpu),
            DevicePreference::Cuda => Device::new_cuda(0).context("CUDA device requested but unavailable"),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            other => Err(CoreError::invalid(format!("unknown device '{}'", other))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Cuda => "cuda",
        };
        write!(f, "{}", name)
    }
}

pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub models_dir: PathBuf,
    pub hub_endpoint: String,
    pub hub_namespace: String,
    pub hub_token: Option<String>,
    pub language: String,
    pub version: u32,
    pub max_length: usize,
    pub device: DevicePreference,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        ArtifactSettings {
            models_dir: PathBuf::from("models"),
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            hub_namespace: DEFAULT_HUB_NAMESPACE.to_string(),
            hub_token: None,
            language: "VI".to_string(),
            version: 1,
            max_length: DEFAULT_MAX_LENGTH,
            device: DevicePreference::Auto,
        }
    }
}

impl ArtifactSettings {
    pub fn artifact_dir(&self, task: TaskVariant) -> PathBuf {
        self.models_dir
            .join(task.artifact_dir_name(&self.language, self.version))
    }

    pub fn file_url(&self, task: TaskVariant, file: &str) -> String {
        format!(
            "{}/{}/{}/resolve/main/{}",
            self.hub_endpoint.trim_end_matches('/'),
            self.hub_namespace.trim_matches('/'),
            task.artifact_dir_name(&self.language, self.version),
            file
        )
    }
}

/// Required files absent from `dir`. Either vocabulary form satisfies the
/// vocabulary requirement.
pub fn missing_files(dir: &Path) -> Vec<&'static str> {
    let mut missing: Vec<&'static str> = [WEIGHTS_FILE, CONFIG_FILE, TOKENIZER_CONFIG_FILE]
        .into_iter()
        .filter(|file| !dir.join(file).is_file())
        .collect();
    if !dir.join(TOKENIZER_FILE).is_file() && !dir.join(VOCAB_FILE).is_file() {
        missing.push(TOKENIZER_FILE);
    }
    missing
}

/// Loads BERT sequence classifiers from local or hub artifacts.
pub struct CandleArtifactLoader {
    settings: ArtifactSettings,
    client: reqwest::Client,
}

impl CandleArtifactLoader {
    pub fn new(settings: ArtifactSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("Failed to build model hub client")?;
        Ok(CandleArtifactLoader { settings, client })
    }

    pub fn settings(&self) -> &ArtifactSettings {
        &self.settings
    }

    /// Make sure every required file is on disk, downloading what is missing.
    pub async fn acquire(&self, task: TaskVariant) -> Result<PathBuf> {
        let dir = self.settings.artifact_dir(task);
        let missing = missing_files(&dir);
        if missing.is_empty() {
            debug!(target: TARGET_MODEL, "Using local artifact {}", dir.display());
            return Ok(dir);
        }

        info!(
            target: TARGET_MODEL,
            "Artifact for {} incomplete at {} (missing {}), fetching from hub",
            task,
            dir.display(),
            missing.join(", ")
        );
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        for file in missing {
            if file == TOKENIZER_FILE {
                // Fall back to a WordPiece vocabulary when the hub has no tokenizer.json
                if let Err(e) = self.download(task, &dir, TOKENIZER_FILE).await {
                    warn!(target: TARGET_MODEL, "No {} for {}: {:#}, trying {}", TOKENIZER_FILE, task, e, VOCAB_FILE);
                    self.download(task, &dir, VOCAB_FILE).await?;
                }
            } else {
                self.download(task, &dir, file).await?;
            }
        }

        if !dir.join(LABEL_MAP_FILE).exists() {
            if let Err(e) = self.download(task, &dir, LABEL_MAP_FILE).await {
                debug!(target: TARGET_MODEL, "No label map override for {}: {:#}", task, e);
            }
        }

        let still_missing = missing_files(&dir);
        if !still_missing.is_empty() {
            anyhow::bail!("artifact still missing {}", still_missing.join(", "));
        }
        Ok(dir)
    }

    async fn download(&self, task: TaskVariant, dir: &Path, file: &str) -> Result<()> {
        let url = self.settings.file_url(task, file);
        info!(target: TARGET_MODEL, "Downloading {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.settings.hub_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Hub refused {}", url))?;

        let target = dir.join(file);
        let partial = dir.join(format!("{}.part", file));
        let mut out = fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;

        let mut written = 0usize;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read body of {}", url))?;
            out.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", partial.display()))?;
            written += chunk.len();
        }
        out.flush().await?;
        drop(out);

        fs::rename(&partial, &target)
            .await
            .with_context(|| format!("Failed to move {} into place", target.display()))?;

        info!(target: TARGET_MODEL, "Downloaded {} ({} bytes)", target.display(), written);
        Ok(())
    }
}

impl ArtifactLoader for CandleArtifactLoader {
    fn load(&self, task: TaskVariant) -> BoxFuture<'_, Result<LoadedModel, CoreError>> {
        Box::pin(async move {
            let dir = self
                .acquire(task)
                .await
                .map_err(|e| CoreError::ArtifactUnavailable {
                    task,
                    reason: format!("{:#}", e),
                })?;

            let settings = self.settings.clone();
            tokio::task::spawn_blocking(move || bert::load_artifact(&dir, &settings, task))
                .await
                .map_err(|e| CoreError::ArtifactUnavailable {
                    task,
                    reason: format!("loader task failed: {}", e),
                })?
        })
    }
}
