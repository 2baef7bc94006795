//! Weight-free artifacts for exercising the host and the service.

use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ArtifactInfo, ArtifactLoader, LoadedModel, SequenceClassifier, TaskVariant};
use crate::error::CoreError;

/// Input that makes the fake classifier fail
pub const FAIL_MARKER: &str = "<<inference-failure>>";

pub const MAX_LENGTH: usize = 16;

/// Deterministic logits: the class picked is the number of (truncated)
/// whitespace tokens modulo the class count.
pub struct FakeClassifier {
    classes: usize,
}

impl SequenceClassifier for FakeClassifier {
    fn logits(&mut self, text: &str) -> anyhow::Result<Vec<f32>> {
        if text.contains(FAIL_MARKER) {
            anyhow::bail!("tensor shape mismatch");
        }
        let tokens = text.split_whitespace().take(MAX_LENGTH).count();
        let winner = tokens % self.classes;
        Ok((0..self.classes)
            .map(|class| if class == winner { 3.0 } else { 0.5 })
            .collect())
    }
}

#[derive(Default)]
pub struct FixedLogitsLoader {
    failing: Mutex<HashSet<TaskVariant>>,
    declared: Mutex<HashMap<TaskVariant, usize>>,
    loads: Mutex<HashMap<TaskVariant, usize>>,
}

impl FixedLogitsLoader {
    pub fn fail(&self, task: TaskVariant) {
        self.failing.lock().unwrap().insert(task);
    }

    pub fn recover(&self, task: TaskVariant) {
        self.failing.lock().unwrap().remove(&task);
    }

    /// Make the artifact for `task` declare `classes` outputs.
    pub fn declare_classes(&self, task: TaskVariant, classes: usize) {
        self.declared.lock().unwrap().insert(task, classes);
    }

    pub fn load_count(&self, task: TaskVariant) -> usize {
        self.loads.lock().unwrap().get(&task).copied().unwrap_or(0)
    }
}

impl ArtifactLoader for FixedLogitsLoader {
    fn load(&self, task: TaskVariant) -> BoxFuture<'_, Result<LoadedModel, CoreError>> {
        Box::pin(async move {
            *self.loads.lock().unwrap().entry(task).or_insert(0) += 1;
            // Yield so concurrent callers really overlap
            tokio::task::yield_now().await;

            if self.failing.lock().unwrap().contains(&task) {
                return Err(CoreError::ArtifactUnavailable {
                    task,
                    reason: "artifact directory not found".to_string(),
                });
            }
            let classes = self
                .declared
                .lock()
                .unwrap()
                .get(&task)
                .copied()
                .unwrap_or_else(|| task.class_count());

            Ok(LoadedModel {
                classifier: Box::new(FakeClassifier { classes }),
                info: ArtifactInfo {
                    directory: None,
                    device: "cpu".to_string(),
                    max_length: MAX_LENGTH,
                    num_labels: classes,
                    vocab_size: 64,
                },
                labels: None,
            })
        })
    }
}

/// Counts callers inside `logits` across every artifact it hands out.
#[derive(Default)]
pub struct Occupancy {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Sleeps through every call so overlapping inference is observable.
pub struct PacedClassifier {
    classes: usize,
    delay: Duration,
    occupancy: Arc<Occupancy>,
}

impl SequenceClassifier for PacedClassifier {
    fn logits(&mut self, _text: &str) -> anyhow::Result<Vec<f32>> {
        let inside = self.occupancy.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.occupancy.peak.fetch_max(inside, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.occupancy.current.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![1.0; self.classes])
    }
}

pub struct PacedLoader {
    pub delay: Duration,
    pub occupancy: Arc<Occupancy>,
}

impl PacedLoader {
    pub fn new(delay: Duration) -> Self {
        PacedLoader {
            delay,
            occupancy: Arc::new(Occupancy::default()),
        }
    }
}

impl ArtifactLoader for PacedLoader {
    fn load(&self, task: TaskVariant) -> BoxFuture<'_, Result<LoadedModel, CoreError>> {
        Box::pin(async move {
            let classes = task.class_count();
            Ok(LoadedModel {
                classifier: Box::new(PacedClassifier {
                    classes,
                    delay: self.delay,
                    occupancy: Arc::clone(&self.occupancy),
                }),
                info: ArtifactInfo {
                    directory: None,
                    device: "cpu".to_string(),
                    max_length: MAX_LENGTH,
                    num_labels: classes,
                    vocab_size: 64,
                },
                labels: None,
            })
        })
    }
}
