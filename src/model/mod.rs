//! Model host: owns one classification artifact per task variant.
//!
//! Per task the lifecycle is `Unknown -> Loading -> Ready -> Unloading ->
//! Unknown`; a failed load returns to `Unknown` so the next request retries.
//! Inference on one artifact is serialized behind an async lease and runs on
//! a blocking worker; different tasks run in parallel.

pub mod artifact;
pub mod bert;
pub mod labels;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, FixedOffset};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use artifact::{ArtifactSettings, CandleArtifactLoader, DevicePreference};
pub use labels::{Label, LabelMap, Language};
pub use task::TaskVariant;

use crate::error::{CoreError, Result};
use crate::util::now_in_vietnam;
use crate::TARGET_MODEL;

/// Something that turns text into one logit per class. Implementations may
/// keep mutable state; the host never calls one concurrently.
pub trait SequenceClassifier: Send {
    fn logits(&mut self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Metadata recorded when an artifact is loaded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactInfo {
    pub directory: Option<PathBuf>,
    pub device: String,
    pub max_length: usize,
    pub num_labels: usize,
    pub vocab_size: usize,
}

pub struct LoadedModel {
    pub classifier: Box<dyn SequenceClassifier>,
    pub info: ArtifactInfo,
    /// Overrides the built-in label map when present
    pub labels: Option<LabelMap>,
}

/// Produces a ready classifier for a task variant.
pub trait ArtifactLoader: Send + Sync {
    fn load(&self, task: TaskVariant) -> BoxFuture<'_, Result<LoadedModel>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Unknown,
    Loading,
    Ready,
    Unloading,
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub task: TaskVariant,
    pub class_id: usize,
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    pub label: Label,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelDescription {
    pub task: TaskVariant,
    pub status: LoadStatus,
    pub class_count: usize,
    pub labels: LabelMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<FixedOffset>>,
}

struct Resident {
    classifier: Arc<Mutex<Box<dyn SequenceClassifier>>>,
    info: ArtifactInfo,
    labels: LabelMap,
    loaded_at: DateTime<FixedOffset>,
}

enum SlotState {
    Unknown,
    Loading,
    Ready(Arc<Resident>),
    Unloading,
}

struct Slot {
    state: RwLock<SlotState>,
    // Serializes load and unload of this task
    transition: Mutex<()>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            state: RwLock::new(SlotState::Unknown),
            transition: Mutex::new(()),
        }
    }

    fn set(&self, state: SlotState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn status(&self) -> LoadStatus {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            SlotState::Unknown => LoadStatus::Unknown,
            SlotState::Loading => LoadStatus::Loading,
            SlotState::Ready(_) => LoadStatus::Ready,
            SlotState::Unloading => LoadStatus::Unloading,
        }
    }

    fn resident(&self) -> Option<Arc<Resident>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            SlotState::Ready(resident) => Some(Arc::clone(resident)),
            _ => None,
        }
    }
}

/// Puts a slot back to `Unknown` if a load or unload is abandoned midway,
/// including when its future is dropped.
struct TransitionGuard<'a> {
    slot: &'a Slot,
    armed: bool,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.set(SlotState::Unknown);
        }
    }
}

pub struct ModelHost {
    loader: Arc<dyn ArtifactLoader>,
    slots: HashMap<TaskVariant, Slot>,
}

impl ModelHost {
    pub fn new(loader: Arc<dyn ArtifactLoader>) -> Self {
        ModelHost {
            loader,
            slots: TaskVariant::ALL
                .iter()
                .map(|task| (*task, Slot::new()))
                .collect(),
        }
    }

    fn slot(&self, task: TaskVariant) -> &Slot {
        &self.slots[&task]
    }

    pub fn status(&self, task: TaskVariant) -> LoadStatus {
        self.slot(task).status()
    }

    pub fn loaded_tasks(&self) -> Vec<TaskVariant> {
        TaskVariant::ALL
            .iter()
            .copied()
            .filter(|task| self.status(*task) == LoadStatus::Ready)
            .collect()
    }

    /// Load the artifact for `task` unless it is already resident.
    pub async fn ensure_loaded(&self, task: TaskVariant) -> Result<()> {
        let slot = self.slot(task);
        if slot.resident().is_some() {
            return Ok(());
        }

        let _transition = slot.transition.lock().await;
        // Another caller may have finished the load while we waited
        if slot.resident().is_some() {
            return Ok(());
        }

        slot.set(SlotState::Loading);
        let mut guard = TransitionGuard { slot, armed: true };
        info!(target: TARGET_MODEL, "Loading model for {}", task);

        let loaded = match self.loader.load(task).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(target: TARGET_MODEL, "Failed to load model for {}: {}", task, e);
                return Err(e);
            }
        };

        let expected = task.class_count();
        if loaded.info.num_labels != expected {
            return Err(CoreError::ArtifactMismatch {
                task,
                expected,
                actual: loaded.info.num_labels,
            });
        }
        let labels = loaded.labels.unwrap_or_else(|| LabelMap::builtin(task));
        if labels.len() != loaded.info.num_labels {
            return Err(CoreError::ArtifactMismatch {
                task,
                expected: loaded.info.num_labels,
                actual: labels.len(),
            });
        }

        info!(
            target: TARGET_MODEL,
            "Model for {} ready on {} ({} classes)", task, loaded.info.device, expected
        );
        slot.set(SlotState::Ready(Arc::new(Resident {
            classifier: Arc::new(Mutex::new(loaded.classifier)),
            info: loaded.info,
            labels,
            loaded_at: now_in_vietnam(),
        })));
        guard.armed = false;
        Ok(())
    }

    /// Load every task in `tasks`, logging failures. Returns how many are ready.
    pub async fn preload(&self, tasks: &[TaskVariant]) -> usize {
        let mut ready = 0;
        for task in tasks {
            match self.ensure_loaded(*task).await {
                Ok(()) => ready += 1,
                Err(e) => warn!(target: TARGET_MODEL, "Preloading {} failed: {}", task, e),
            }
        }
        ready
    }

    /// Classify already-normalized text with the resident artifact.
    pub async fn predict(&self, task: TaskVariant, text: &str) -> Result<Prediction> {
        let resident = self
            .slot(task)
            .resident()
            .ok_or(CoreError::NotReady(task))?;

        let lease = Arc::clone(&resident.classifier).lock_owned().await;
        let input = text.to_string();
        let logits = tokio::task::spawn_blocking(move || {
            let mut lease = lease;
            lease.logits(&input)
        })
        .await
        .map_err(|e| CoreError::InferenceFailed {
            task,
            reason: format!("inference worker failed: {}", e),
        })?
        .map_err(|e| CoreError::InferenceFailed {
            task,
            reason: format!("{:#}", e),
        })?;

        if logits.len() != resident.labels.len() {
            return Err(CoreError::InferenceFailed {
                task,
                reason: format!(
                    "model produced {} logits for {} classes",
                    logits.len(),
                    resident.labels.len()
                ),
            });
        }
        let probabilities = softmax(&logits).ok_or_else(|| CoreError::InferenceFailed {
            task,
            reason: "non-finite logits".to_string(),
        })?;

        let (class_id, confidence) = argmax(&probabilities);
        let label = resident
            .labels
            .get(class_id)
            .cloned()
            .ok_or_else(|| CoreError::InferenceFailed {
                task,
                reason: format!("no label for class {}", class_id),
            })?;

        debug!(
            target: TARGET_MODEL,
            "{} -> class {} ({:.3})", task, class_id, confidence
        );
        Ok(Prediction {
            task,
            class_id,
            confidence,
            probabilities,
            label,
        })
    }

    pub fn describe(&self, task: TaskVariant) -> ModelDescription {
        let slot = self.slot(task);
        let status = slot.status();
        match slot.resident() {
            Some(resident) => ModelDescription {
                task,
                status,
                class_count: resident.info.num_labels,
                labels: resident.labels.clone(),
                artifact: Some(resident.info.clone()),
                loaded_at: Some(resident.loaded_at),
            },
            None => ModelDescription {
                task,
                status,
                class_count: task.class_count(),
                labels: LabelMap::builtin(task),
                artifact: None,
                loaded_at: None,
            },
        }
    }

    /// Drop the resident artifact. The slot reports `Unloading` until
    /// in-flight predictions release their lease; new predictions get
    /// `NotReady`. Returns whether anything was resident.
    pub async fn unload(&self, task: TaskVariant) -> bool {
        let slot = self.slot(task);
        let _transition = slot.transition.lock().await;
        let Some(resident) = slot.resident() else {
            return false;
        };

        slot.set(SlotState::Unloading);
        // Back to Unknown once the lease is drained, or if this future is dropped
        let _reset = TransitionGuard { slot, armed: true };
        debug!(target: TARGET_MODEL, "Waiting for in-flight inference on {}", task);
        drop(resident.classifier.lock().await);
        drop(resident);

        info!(target: TARGET_MODEL, "Unloaded model for {}", task);
        true
    }
}

/// Numerically stable softmax; `None` when any logit is not finite.
pub fn softmax(logits: &[f32]) -> Option<Vec<f32>> {
    if logits.is_empty() || logits.iter().any(|l| !l.is_finite()) {
        return None;
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits.iter().map(|&l| f64::from(l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return None;
    }
    Some(exps.iter().map(|e| (e / sum) as f32).collect())
}

/// Index and value of the largest probability; ties go to the lower index.
fn argmax(probabilities: &[f32]) -> (usize, f32) {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
            if p > best.1 {
                (i, p)
            } else {
                best
            }
        })
}

#[cfg(test)]
mod tests {
    use super::testing::FixedLogitsLoader;
    use super::*;

    fn host() -> (ModelHost, Arc<FixedLogitsLoader>) {
        let loader = Arc::new(FixedLogitsLoader::default());
        (ModelHost::new(loader.clone()), loader)
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(probs.windows(2).all(|w| w[0] < w[1]));

        // Large logits must not overflow
        let probs = softmax(&[1000.0, 1000.0]).unwrap();
        assert!((probs[0] - 0.5).abs() < 1e-6);

        assert!(softmax(&[f32::NAN, 1.0]).is_none());
        assert!(softmax(&[]).is_none());
    }

    #[test]
    fn test_argmax_prefers_first_of_ties() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), (1, 0.4));
    }

    #[tokio::test]
    async fn test_predict_requires_load() {
        let (host, _) = host();
        let err = host.predict(TaskVariant::LegalBasis, "x").await.unwrap_err();
        assert!(matches!(err, CoreError::NotReady(TaskVariant::LegalBasis)));
        assert_eq!(host.status(TaskVariant::LegalBasis), LoadStatus::Unknown);
    }

    #[tokio::test]
    async fn test_ensure_loaded_is_idempotent() {
        let (host, loader) = host();
        host.ensure_loaded(TaskVariant::Principles).await.unwrap();
        host.ensure_loaded(TaskVariant::Principles).await.unwrap();
        assert_eq!(loader.load_count(TaskVariant::Principles), 1);
        assert_eq!(host.loaded_tasks(), vec![TaskVariant::Principles]);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_artifact() {
        let (host, loader) = host();
        let (a, b) = tokio::join!(
            host.ensure_loaded(TaskVariant::RiskLevel),
            host.ensure_loaded(TaskVariant::RiskLevel)
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(loader.load_count(TaskVariant::RiskLevel), 1);
    }

    #[tokio::test]
    async fn test_prediction_shape() {
        let (host, _) = host();
        for task in TaskVariant::ALL {
            host.ensure_loaded(task).await.unwrap();
            let prediction = host.predict(task, "dữ liệu khách hàng").await.unwrap();
            assert_eq!(prediction.probabilities.len(), task.class_count());
            assert!(prediction.class_id < task.class_count());
            assert!((0.0..=1.0).contains(&prediction.confidence));
            let sum: f32 = prediction.probabilities.iter().sum();
            assert!((0.999..=1.001).contains(&sum));
            assert_eq!(
                host.describe(task).labels.len(),
                host.describe(task).class_count
            );
        }
    }

    #[tokio::test]
    async fn test_load_failure_returns_to_unknown_and_retries() {
        let (host, loader) = host();
        loader.fail(TaskVariant::CrossBorder);
        let err = host.ensure_loaded(TaskVariant::CrossBorder).await.unwrap_err();
        assert!(matches!(err, CoreError::ArtifactUnavailable { .. }));
        assert_eq!(host.status(TaskVariant::CrossBorder), LoadStatus::Unknown);

        loader.recover(TaskVariant::CrossBorder);
        host.ensure_loaded(TaskVariant::CrossBorder).await.unwrap();
        assert_eq!(host.status(TaskVariant::CrossBorder), LoadStatus::Ready);
        assert_eq!(loader.load_count(TaskVariant::CrossBorder), 2);
    }

    #[tokio::test]
    async fn test_class_count_mismatch_is_not_loaded() {
        let (host, loader) = host();
        loader.declare_classes(TaskVariant::Principles, 7);
        let err = host.ensure_loaded(TaskVariant::Principles).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::ArtifactMismatch {
                expected: 8,
                actual: 7,
                ..
            }
        ));
        assert_eq!(host.status(TaskVariant::Principles), LoadStatus::Unknown);
        assert!(matches!(
            host.predict(TaskVariant::Principles, "x").await.unwrap_err(),
            CoreError::NotReady(_)
        ));
    }

    #[tokio::test]
    async fn test_inference_failure_keeps_model_ready() {
        let (host, _) = host();
        host.ensure_loaded(TaskVariant::BreachTriage).await.unwrap();
        let err = host
            .predict(TaskVariant::BreachTriage, testing::FAIL_MARKER)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InferenceFailed { .. }));
        assert!(host.predict(TaskVariant::BreachTriage, "ok").await.is_ok());
    }

    #[tokio::test]
    async fn test_unload_is_idempotent() {
        let (host, loader) = host();
        host.ensure_loaded(TaskVariant::Industry).await.unwrap();
        assert!(host.unload(TaskVariant::Industry).await);
        assert!(!host.unload(TaskVariant::Industry).await);
        assert_eq!(host.describe(TaskVariant::Industry).status, LoadStatus::Unknown);
        assert!(host.describe(TaskVariant::Industry).artifact.is_none());

        host.ensure_loaded(TaskVariant::Industry).await.unwrap();
        assert_eq!(loader.load_count(TaskVariant::Industry), 2);
    }

    #[tokio::test]
    async fn test_preload_counts_successes() {
        let (host, loader) = host();
        loader.fail(TaskVariant::Regional);
        let ready = host
            .preload(&[TaskVariant::Principles, TaskVariant::Regional, TaskVariant::LegalBasis])
            .await;
        assert_eq!(ready, 2);
    }

    #[tokio::test]
    async fn test_long_input_is_truncated() {
        let (host, _) = host();
        host.ensure_loaded(TaskVariant::LegalBasis).await.unwrap();
        let long = "dữ liệu ".repeat(5_000);
        let prediction = host.predict(TaskVariant::LegalBasis, &long).await.unwrap();
        assert!(prediction.class_id < 4);
    }

    fn paced_host() -> (Arc<ModelHost>, Arc<testing::PacedLoader>) {
        let loader = Arc::new(testing::PacedLoader::new(std::time::Duration::from_millis(100)));
        (Arc::new(ModelHost::new(loader.clone())), loader)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_task_inference_is_serialized() {
        let (host, loader) = paced_host();
        host.ensure_loaded(TaskVariant::Principles).await.unwrap();

        let (a, b, c) = tokio::join!(
            host.predict(TaskVariant::Principles, "một"),
            host.predict(TaskVariant::Principles, "hai"),
            host.predict(TaskVariant::Principles, "ba"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(loader.occupancy.peak(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_tasks_infer_in_parallel() {
        let (host, loader) = paced_host();
        host.ensure_loaded(TaskVariant::Principles).await.unwrap();
        host.ensure_loaded(TaskVariant::RiskLevel).await.unwrap();

        let (a, b) = tokio::join!(
            host.predict(TaskVariant::Principles, "một"),
            host.predict(TaskVariant::RiskLevel, "hai"),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(loader.occupancy.peak(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unloading_waits_for_in_flight_inference() {
        let (host, _) = paced_host();
        host.ensure_loaded(TaskVariant::Industry).await.unwrap();

        let in_flight = tokio::spawn({
            let host = Arc::clone(&host);
            async move { host.predict(TaskVariant::Industry, "dữ liệu").await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let unloading = tokio::spawn({
            let host = Arc::clone(&host);
            async move { host.unload(TaskVariant::Industry).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(host.status(TaskVariant::Industry), LoadStatus::Unloading);
        assert!(matches!(
            host.predict(TaskVariant::Industry, "x").await,
            Err(CoreError::NotReady(TaskVariant::Industry))
        ));

        assert!(in_flight.await.unwrap().is_ok());
        assert!(unloading.await.unwrap());
        assert_eq!(host.status(TaskVariant::Industry), LoadStatus::Unknown);
    }
}
