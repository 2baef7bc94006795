use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::auth::Claims;
use super::error::{ApiError, ApiJson, ApiQuery};
use super::ApiState;
use crate::classification::{ClassificationRequest, ClassificationResponse};
use crate::model::{ModelDescription, TaskVariant};
use crate::normalizer::{DetectedEntity, NormalizeOptions, ValidationReport};
use crate::registry::{
    CompanyEntry, Industry, LoadSummary, NewCompany, Region, RegistryDocument, RegistryStats,
    SearchQuery,
};
use crate::util::now_in_vietnam;
use crate::TARGET_WEB_REQUEST;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "companies": state.ctx.registry.snapshot().len(),
        "loaded_models": state.ctx.models.loaded_tasks(),
        "timestamp": now_in_vietnam(),
    }))
}

pub async fn classify(
    State(state): State<ApiState>,
    ApiJson(request): ApiJson<ClassificationRequest>,
) -> ApiResult<Json<ClassificationResponse>> {
    Ok(Json(state.ctx.classifier.classify(&request).await?))
}

/// Body of the per-task convenience endpoints
#[derive(Debug, Deserialize)]
pub struct TaskClassifyBody {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub include_metadata: Option<bool>,
}

pub async fn classify_task(
    State(state): State<ApiState>,
    Path(task_variant): Path<String>,
    ApiJson(body): ApiJson<TaskClassifyBody>,
) -> ApiResult<Json<ClassificationResponse>> {
    let task: TaskVariant = task_variant.parse()?;
    let mut request = ClassificationRequest::new(&body.text, task);
    if let Some(language) = body.language {
        request.language = language;
    }
    if let Some(include) = body.include_metadata {
        request.include_metadata = include;
    }
    Ok(Json(state.ctx.classifier.classify(&request).await?))
}

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub options: NormalizeOptions,
}

#[derive(Debug, Serialize)]
pub struct NormalizeResponse {
    pub original_text: String,
    pub normalized_text: String,
    pub entities: Vec<DetectedEntity>,
    pub detected_companies: Vec<String>,
    pub company_count: usize,
    pub person_count: usize,
    pub normalization_count: usize,
    pub validation: ValidationReport,
}

pub async fn normalize(
    State(state): State<ApiState>,
    ApiJson(request): ApiJson<NormalizeRequest>,
) -> Json<NormalizeResponse> {
    let normalizer = &state.ctx.normalizer;
    let result = normalizer.normalize(&request.text, &request.options);
    let validation = normalizer.validate(&result.original_text, &result.normalized_text);
    Json(NormalizeResponse {
        detected_companies: result.detected_companies(),
        normalization_count: result.normalization_count(),
        company_count: result.company_count,
        person_count: result.person_count,
        original_text: result.original_text,
        normalized_text: result.normalized_text,
        entities: result.entities,
        validation,
    })
}

pub async fn describe_model(
    State(state): State<ApiState>,
    Path(task_variant): Path<String>,
) -> ApiResult<Json<ModelDescription>> {
    let task: TaskVariant = task_variant.parse()?;
    Ok(Json(state.ctx.models.describe(task)))
}

pub async fn load_model(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(task_variant): Path<String>,
) -> ApiResult<Json<ModelDescription>> {
    let task: TaskVariant = task_variant.parse()?;
    info!(target: TARGET_WEB_REQUEST, "{} requested load of {}", claims.sub, task);
    state.ctx.models.ensure_loaded(task).await?;
    Ok(Json(state.ctx.models.describe(task)))
}

pub async fn unload_model(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(task_variant): Path<String>,
) -> ApiResult<Json<Value>> {
    let task: TaskVariant = task_variant.parse()?;
    info!(target: TARGET_WEB_REQUEST, "{} requested unload of {}", claims.sub, task);
    let unloaded = state.ctx.models.unload(task).await;
    Ok(Json(json!({ "task_variant": task, "unloaded": unloaded })))
}

pub async fn search_companies(
    State(state): State<ApiState>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Json<Value> {
    let companies = state.ctx.registry.search(&query);
    Json(json!({ "count": companies.len(), "companies": companies }))
}

pub async fn list_by_industry(
    State(state): State<ApiState>,
    Path(industry): Path<String>,
) -> ApiResult<Json<Value>> {
    let industry: Industry = industry.parse()?;
    let companies = state.ctx.registry.list_by_industry(industry);
    Ok(Json(json!({
        "industry": industry,
        "count": companies.len(),
        "companies": companies,
    })))
}

pub async fn statistics(State(state): State<ApiState>) -> Json<RegistryStats> {
    Json(state.ctx.registry.statistics())
}

pub async fn resolve_company(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let canonical = state
        .ctx
        .registry
        .resolve(&name)
        .ok_or_else(|| crate::CoreError::NotFound(name.clone()))?;
    Ok(Json(json!({ "query": name, "canonical_name": canonical })))
}

fn default_persist() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AddCompanyRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default = "default_persist")]
    pub persist: bool,
}

pub async fn add_company(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    ApiJson(request): ApiJson<AddCompanyRequest>,
) -> ApiResult<(StatusCode, Json<CompanyEntry>)> {
    let industry: Industry = request.industry.parse()?;
    let region: Region = request.region.parse()?;
    let company = NewCompany {
        name: request.name,
        industry,
        region,
        aliases: request.aliases,
        metadata: request.metadata,
    };
    let entry = state.ctx.registry.add(company, request.persist)?;
    info!(
        target: TARGET_WEB_REQUEST,
        "{} added company '{}' ({} aliases)", claims.sub, entry.name, entry.aliases.len()
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
pub struct PersistQuery {
    #[serde(default = "default_persist")]
    pub persist: bool,
}

pub async fn remove_company(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(name): Path<String>,
    ApiQuery(query): ApiQuery<PersistQuery>,
) -> ApiResult<Json<CompanyEntry>> {
    let removed = state.ctx.registry.remove(&name, query.persist)?;
    info!(target: TARGET_WEB_REQUEST, "{} removed company '{}'", claims.sub, removed.name);
    Ok(Json(removed))
}

pub async fn export_registry(State(state): State<ApiState>) -> Json<RegistryDocument> {
    Json(state.ctx.registry.export())
}

pub async fn reload_registry(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<LoadSummary>> {
    let summary = state.ctx.registry.reload()?;
    info!(
        target: TARGET_WEB_REQUEST,
        "{} reloaded the registry ({} companies)", claims.sub, summary.company_count
    );
    Ok(Json(summary))
}
