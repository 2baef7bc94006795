//! Bilingual error body: `{"detail": {"error", "error_vi", "code", ...}}`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use super::auth::Permission;
use crate::error::CoreError;
use crate::TARGET_WEB_REQUEST;

#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    /// Missing, malformed or expired token
    Unauthenticated,
    /// Valid token without the route group's permission
    Forbidden(Permission),
    /// Body or query string could not be decoded
    BadRequest(String),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::Core(e)
    }
}

pub fn status_for(e: &CoreError) -> StatusCode {
    match e {
        CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        CoreError::DuplicateEntity { .. } => StatusCode::CONFLICT,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::ConfigInvalid(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::ArtifactUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::ArtifactMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::InferenceFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn core_context(e: &CoreError, detail: &mut Map<String, Value>) {
    match e {
        CoreError::DuplicateEntity { name, key } => {
            detail.insert("name".into(), json!(name));
            detail.insert("conflicting_key".into(), json!(key));
        }
        CoreError::NotFound(name) => {
            detail.insert("name".into(), json!(name));
        }
        CoreError::ArtifactUnavailable { task, .. }
        | CoreError::NotReady(task)
        | CoreError::InferenceFailed { task, .. } => {
            detail.insert("task_variant".into(), json!(task));
        }
        CoreError::ArtifactMismatch {
            task,
            expected,
            actual,
        } => {
            detail.insert("task_variant".into(), json!(task));
            detail.insert("expected_classes".into(), json!(expected));
            detail.insert("actual_classes".into(), json!(actual));
        }
        _ => {}
    }
    if e.kind().is_retriable() {
        detail.insert("retriable".into(), json!(true));
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut detail = Map::new();
        let (status, code, english, vietnamese) = match &self {
            ApiError::Core(e) => {
                core_context(e, &mut detail);
                (status_for(e), e.code(), e.to_string(), e.message_vi())
            }
            ApiError::Unauthenticated => (
                StatusCode::FORBIDDEN,
                "not_authenticated".to_string(),
                "Not authenticated: a valid bearer token is required".to_string(),
                "Chưa xác thực: cần mã thông báo hợp lệ".to_string(),
            ),
            ApiError::Forbidden(permission) => {
                detail.insert("required_permission".into(), json!(permission.as_str()));
                (
                    StatusCode::FORBIDDEN,
                    "permission_denied".to_string(),
                    format!("Permission denied: '{}' is required", permission),
                    format!("Không có quyền truy cập: cần quyền '{}'", permission),
                )
            }
            ApiError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request".to_string(),
                format!("Invalid request: {}", reason),
                format!("Yêu cầu không hợp lệ: {}", reason),
            ),
        };

        if status.is_server_error() {
            error!(target: TARGET_WEB_REQUEST, "{} ({}): {}", status, code, english);
        } else {
            warn!(target: TARGET_WEB_REQUEST, "{} ({}): {}", status, code, english);
        }

        detail.insert("error".into(), json!(english));
        detail.insert("error_vi".into(), json!(vietnamese));
        detail.insert("code".into(), json!(code));
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// `Json` extractor whose rejection uses the bilingual error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state)
            .await
            .map_err(|e: JsonRejection| ApiError::BadRequest(e.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// `Query` extractor whose rejection uses the bilingual error body.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e: QueryRejection| ApiError::BadRequest(e.body_text()))?;
        Ok(ApiQuery(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskVariant;

    async fn body(error: ApiError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_core_errors_are_bilingual() {
        let (status, json) = body(ApiError::Core(CoreError::DuplicateEntity {
            name: "VCB".to_string(),
            key: "vcb".to_string(),
        }))
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["detail"]["code"], "duplicate_entity");
        assert_eq!(json["detail"]["conflicting_key"], "vcb");
        assert!(json["detail"]["error"].as_str().unwrap().contains("VCB"));
        assert!(json["detail"]["error_vi"].as_str().unwrap().contains("trùng"));
    }

    #[tokio::test]
    async fn test_retriable_errors_are_marked() {
        let (status, json) = body(ApiError::Core(CoreError::NotReady(TaskVariant::Principles))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["detail"]["task_variant"], "principles");
        assert_eq!(json["detail"]["retriable"], true);
    }

    #[tokio::test]
    async fn test_forbidden_names_permission() {
        let (status, json) = body(ApiError::Forbidden(Permission::Classify)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["detail"]["required_permission"], "veriaidpo.classify");
        assert!(json["detail"]["error_vi"].as_str().unwrap().contains("veriaidpo.classify"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&CoreError::invalid("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CoreError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&CoreError::ArtifactUnavailable {
                task: TaskVariant::Industry,
                reason: "x".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&CoreError::InferenceFailed {
                task: TaskVariant::Industry,
                reason: "x".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
