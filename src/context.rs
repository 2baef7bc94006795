//! Process-wide construction context: one registry, one normalizer, one
//! model host, one classification service.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::classification::ClassificationService;
use crate::environment::Settings;
use crate::model::{ArtifactLoader, CandleArtifactLoader, ModelHost};
use crate::normalizer::Normalizer;
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppContext {
    pub registry: Arc<Registry>,
    pub normalizer: Arc<Normalizer>,
    pub models: Arc<ModelHost>,
    pub classifier: Arc<ClassificationService>,
}

impl AppContext {
    /// Wire the components from `settings` using the candle artifact loader.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let registry = Registry::open(&settings.registry_path).with_context(|| {
            format!(
                "Failed to open company registry {}",
                settings.registry_path.display()
            )
        })?;
        let loader = CandleArtifactLoader::new(settings.artifacts.clone())?;
        Ok(Self::assemble(settings, Arc::new(registry), Arc::new(loader)))
    }

    pub fn assemble(
        settings: &Settings,
        registry: Arc<Registry>,
        loader: Arc<dyn ArtifactLoader>,
    ) -> Self {
        let normalizer = Arc::new(Normalizer::with_settings(
            Arc::clone(&registry),
            settings.normalizer,
        ));
        let models = Arc::new(ModelHost::new(loader));
        let classifier = Arc::new(ClassificationService::new(
            Arc::clone(&normalizer),
            Arc::clone(&models),
        ));
        info!(
            "Context ready with {} registered companies",
            registry.snapshot().len()
        );
        AppContext {
            registry,
            normalizer,
            models,
            classifier,
        }
    }

    /// Load the configured task variants before serving.
    pub async fn preload(&self, settings: &Settings) -> usize {
        if settings.preload_tasks.is_empty() {
            return 0;
        }
        self.models.preload(&settings.preload_tasks).await
    }
}
