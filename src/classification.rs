//! Classification service: normalize, predict, annotate.
//!
//! The model only ever sees normalizer output, so company names never reach
//! it and newly registered companies need no retraining.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::model::{Language, ModelHost, TaskVariant};
use crate::normalizer::{NormalizeOptions, Normalizer};
use crate::util::now_in_vietnam;
use crate::TARGET_CLASSIFICATION;

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub task_variant: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
}

fn default_language() -> String {
    Language::default().to_string()
}

fn default_include_metadata() -> bool {
    true
}

impl ClassificationRequest {
    pub fn new(text: &str, task: TaskVariant) -> Self {
        ClassificationRequest {
            text: text.to_string(),
            task_variant: task.to_string(),
            language: default_language(),
            include_metadata: true,
        }
    }

    pub fn in_language(mut self, language: Language) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingMetadata {
    pub duration_ms: f64,
    pub timestamp: DateTime<FixedOffset>,
    pub task_variant: TaskVariant,
    pub companies_detected: usize,
    pub model_categories: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResponse {
    pub prediction: String,
    pub confidence: f32,
    pub category_id: usize,
    pub model_type: String,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_companies: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_probabilities: Option<BTreeMap<String, f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_metadata: Option<ProcessingMetadata>,
}

pub struct ClassificationService {
    normalizer: Arc<Normalizer>,
    models: Arc<ModelHost>,
}

impl ClassificationService {
    pub fn new(normalizer: Arc<Normalizer>, models: Arc<ModelHost>) -> Self {
        ClassificationService { normalizer, models }
    }

    pub fn normalizer(&self) -> &Arc<Normalizer> {
        &self.normalizer
    }

    pub fn models(&self) -> &Arc<ModelHost> {
        &self.models
    }

    #[instrument(target = "classification", level = "debug", skip_all, fields(task = %request.task_variant))]
    pub async fn classify(&self, request: &ClassificationRequest) -> Result<ClassificationResponse> {
        let started = Instant::now();
        let task: TaskVariant = request.task_variant.parse()?;
        let language: Language = request.language.parse()?;

        let normalized = self
            .normalizer
            .normalize(&request.text, &NormalizeOptions::default());
        let detected_companies = normalized.detected_companies();

        self.models.ensure_loaded(task).await?;
        let prediction = self.models.predict(task, &normalized.normalized_text).await?;

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            target: TARGET_CLASSIFICATION,
            "Classified {} chars as {}/{} ({:.3}) with {} companies in {:.1}ms",
            request.text.chars().count(),
            task,
            prediction.class_id,
            prediction.confidence,
            detected_companies.len(),
            duration_ms
        );
        debug!(target: TARGET_CLASSIFICATION, "Normalized text: {}", normalized.normalized_text);

        let mut response = ClassificationResponse {
            prediction: prediction.label.name(language).to_string(),
            confidence: prediction.confidence,
            category_id: prediction.class_id,
            model_type: format!("VeriAIDPO_{}", task.pascal_name()),
            language,
            normalized_text: None,
            detected_companies: None,
            all_probabilities: None,
            processing_metadata: None,
        };

        if request.include_metadata {
            response.processing_metadata = Some(ProcessingMetadata {
                duration_ms,
                timestamp: now_in_vietnam(),
                task_variant: task,
                companies_detected: detected_companies.len(),
                model_categories: prediction.probabilities.len(),
            });
            response.all_probabilities = Some(
                prediction
                    .probabilities
                    .iter()
                    .enumerate()
                    .map(|(class_id, p)| (class_id.to_string(), *p))
                    .collect(),
            );
            response.normalized_text = Some(normalized.normalized_text);
            response.detected_companies = Some(detected_companies);
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::testing::{FixedLogitsLoader, MAX_LENGTH};
    use crate::registry::tests::seeded;
    use crate::registry::{Industry, NewCompany, Region};

    fn service() -> (ClassificationService, Arc<FixedLogitsLoader>) {
        let loader = Arc::new(FixedLogitsLoader::default());
        let normalizer = Arc::new(Normalizer::new(Arc::new(seeded())));
        let models = Arc::new(ModelHost::new(loader.clone()));
        (ClassificationService::new(normalizer, models), loader)
    }

    fn request(text: &str, task: &str) -> ClassificationRequest {
        ClassificationRequest {
            text: text.to_string(),
            task_variant: task.to_string(),
            language: "vi".to_string(),
            include_metadata: true,
        }
    }

    #[tokio::test]
    async fn test_onboarding_without_retraining() {
        let (service, loader) = service();
        let text = "Apple Vietnam thu thap email dua tren hop dong";

        let before = service.classify(&request(text, "legal_basis")).await.unwrap();
        assert_eq!(before.normalized_text.as_deref(), Some(text));
        assert_eq!(before.detected_companies, Some(vec![]));

        service
            .normalizer()
            .registry()
            .add(
                NewCompany::new("Apple Vietnam", Industry::Technology, Region::South)
                    .with_aliases(&["Apple VN"]),
                false,
            )
            .unwrap();

        let after = service.classify(&request(text, "legal_basis")).await.unwrap();
        assert_eq!(
            after.normalized_text.as_deref(),
            Some("[COMPANY] thu thap email dua tren hop dong")
        );
        assert_eq!(after.detected_companies, Some(vec!["Apple Vietnam".to_string()]));
        // Same artifact served both requests
        assert_eq!(loader.load_count(TaskVariant::LegalBasis), 1);
    }

    #[tokio::test]
    async fn test_alias_resolution() {
        let (service, _) = service();
        let response = service
            .classify(&request("VCB thu thap thong tin khach hang de mo tai khoan", "legal_basis"))
            .await
            .unwrap();
        let normalized = response.normalized_text.unwrap();
        assert_eq!(normalized.matches("[COMPANY]").count(), 1);
        assert_eq!(response.detected_companies, Some(vec!["Vietcombank".to_string()]));
        let metadata = response.processing_metadata.unwrap();
        assert_eq!(metadata.companies_detected, 1);
        assert_eq!(metadata.model_categories, 4);
        assert_eq!(metadata.timestamp.offset().local_minus_utc(), 7 * 3600);
    }

    #[tokio::test]
    async fn test_model_sees_normalized_text() {
        let (service, _) = service();
        // Three raw tokens, two after normalization
        let response = service
            .classify(&request("Shopee Vietnam tuyển", "legal_basis"))
            .await
            .unwrap();
        assert_eq!(response.category_id, 2);
    }

    #[tokio::test]
    async fn test_probabilities_sum_to_one() {
        let (service, _) = service();
        for task in TaskVariant::ALL {
            let response = service
                .classify(&request("FPT chia sẻ dữ liệu với Viettel", task.as_str()))
                .await
                .unwrap();
            let probabilities = response.all_probabilities.unwrap();
            assert_eq!(probabilities.len(), task.class_count());
            let sum: f32 = probabilities.values().sum();
            assert!((0.999..=1.001).contains(&sum), "{}: {}", task, sum);
            assert!(response.category_id < task.class_count());
            assert!((0.0..=1.0).contains(&response.confidence));
        }
    }

    #[tokio::test]
    async fn test_empty_text_is_classified() {
        let (service, _) = service();
        let response = service.classify(&request("", "principles")).await.unwrap();
        assert_eq!(response.normalized_text.as_deref(), Some(""));
        assert_eq!(response.detected_companies, Some(vec![]));
        assert_eq!(response.processing_metadata.unwrap().companies_detected, 0);
        assert!(!response.prediction.is_empty());
    }

    #[tokio::test]
    async fn test_long_text_is_truncated() {
        let (service, _) = service();
        let text = "khách hàng ".repeat(MAX_LENGTH * 50);
        let response = service.classify(&request(&text, "risk_level")).await.unwrap();
        assert_eq!(response.category_id, MAX_LENGTH % 4);
    }

    #[tokio::test]
    async fn test_language_selects_label() {
        let (service, _) = service();
        let base = ClassificationRequest::new("Viettel", TaskVariant::LegalBasis);
        let vi = service.classify(&base.clone()).await.unwrap();
        let en = service
            .classify(&base.in_language(Language::En))
            .await
            .unwrap();
        // "[COMPANY]" is one token -> class 1
        assert_eq!(vi.prediction, "Thực hiện hợp đồng");
        assert_eq!(en.prediction, "Contract performance");
        assert_eq!(en.language, Language::En);
        assert_eq!(en.model_type, "VeriAIDPO_LegalBasis");
    }

    #[tokio::test]
    async fn test_metadata_can_be_omitted() {
        let (service, _) = service();
        let response = service
            .classify(&ClassificationRequest::new("VCB", TaskVariant::RiskLevel).with_metadata(false))
            .await
            .unwrap();
        assert!(response.normalized_text.is_none());
        assert!(response.detected_companies.is_none());
        assert!(response.all_probabilities.is_none());
        assert!(response.processing_metadata.is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("normalized_text").is_none());
        assert!(json.get("prediction").is_some());
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (service, loader) = service();
        let err = service.classify(&request("x", "sentiment")).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));

        let mut bad_language = request("x", "principles");
        bad_language.language = "fr".to_string();
        let err = service.classify(&bad_language).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(loader.load_count(TaskVariant::Principles), 0);
    }

    #[tokio::test]
    async fn test_unavailable_artifact_propagates() {
        let (service, loader) = service();
        loader.fail(TaskVariant::DpoTasks);
        let err = service.classify(&request("x", "dpo_tasks")).await.unwrap_err();
        assert!(err.kind().is_retriable());
        assert!(matches!(err, CoreError::ArtifactUnavailable { .. }));
    }
}
