//! Error taxonomy shared by the registry, normalizer, model host and
//! classification service.
//!
//! Every variant renders an English message through `Display` and a
//! Vietnamese one through [`CoreError::message_vi`]. The HTTP boundary sends
//! both to the caller.

use std::fmt;

use crate::model::TaskVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    DuplicateEntity,
    NotFound,
    ConfigInvalid,
    PersistenceFailure,
    ArtifactUnavailable,
    ArtifactMismatch,
    NotReady,
    InferenceFailed,
}

impl ErrorKind {
    /// Whether the same request may succeed later without caller changes.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::ArtifactUnavailable | ErrorKind::NotReady)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::DuplicateEntity => "duplicate_entity",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConfigInvalid => "config_invalid",
            ErrorKind::PersistenceFailure => "persistence_failure",
            ErrorKind::ArtifactUnavailable => "artifact_unavailable",
            ErrorKind::ArtifactMismatch => "artifact_mismatch",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::InferenceFailed => "inference_failed",
        };
        write!(f, "{}", code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Company '{name}' conflicts with existing registry key '{key}'")]
    DuplicateEntity { name: String, key: String },

    #[error("Company '{0}' not found in registry")]
    NotFound(String),

    #[error("Company registry configuration is invalid: {0}")]
    ConfigInvalid(String),

    #[error("Failed to persist company registry: {0}")]
    PersistenceFailure(String),

    #[error("Model artifact for '{task}' is unavailable: {reason}")]
    ArtifactUnavailable { task: TaskVariant, reason: String },

    #[error("Model artifact for '{task}' declares {actual} classes, expected {expected}")]
    ArtifactMismatch {
        task: TaskVariant,
        expected: usize,
        actual: usize,
    },

    #[error("Model for '{0}' is not loaded")]
    NotReady(TaskVariant),

    #[error("Inference failed for '{task}': {reason}")]
    InferenceFailed { task: TaskVariant, reason: String },
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CoreError::DuplicateEntity { .. } => ErrorKind::DuplicateEntity,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            CoreError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            CoreError::ArtifactUnavailable { .. } => ErrorKind::ArtifactUnavailable,
            CoreError::ArtifactMismatch { .. } => ErrorKind::ArtifactMismatch,
            CoreError::NotReady(_) => ErrorKind::NotReady,
            CoreError::InferenceFailed { .. } => ErrorKind::InferenceFailed,
        }
    }

    /// Stable machine-readable code, e.g. `duplicate_entity`
    pub fn code(&self) -> String {
        self.kind().to_string()
    }

    /// Vietnamese rendering of the same condition.
    pub fn message_vi(&self) -> String {
        match self {
            CoreError::InvalidArgument(detail) => {
                format!("Tham số không hợp lệ: {}", detail)
            }
            CoreError::DuplicateEntity { name, key } => format!(
                "Công ty '{}' trùng với khóa đã tồn tại trong danh mục '{}'",
                name, key
            ),
            CoreError::NotFound(name) => {
                format!("Không tìm thấy công ty '{}' trong danh mục", name)
            }
            CoreError::ConfigInvalid(detail) => {
                format!("Cấu hình danh mục công ty không hợp lệ: {}", detail)
            }
            CoreError::PersistenceFailure(detail) => {
                format!("Không thể lưu danh mục công ty: {}", detail)
            }
            CoreError::ArtifactUnavailable { task, reason } => format!(
                "Không thể tải mô hình cho tác vụ '{}': {}",
                task, reason
            ),
            CoreError::ArtifactMismatch {
                task,
                expected,
                actual,
            } => format!(
                "Mô hình cho tác vụ '{}' có {} lớp, yêu cầu {} lớp",
                task, actual, expected
            ),
            CoreError::NotReady(task) => {
                format!("Mô hình cho tác vụ '{}' chưa được tải", task)
            }
            CoreError::InferenceFailed { task, reason } => {
                format!("Phân loại thất bại cho tác vụ '{}': {}", task, reason)
            }
        }
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        CoreError::InvalidArgument(detail.into())
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_bilingual() {
        let err = CoreError::NotFound("Vietcombank".to_string());
        assert_eq!(err.to_string(), "Company 'Vietcombank' not found in registry");
        assert!(err.message_vi().contains("Không tìm thấy"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_retriable_kinds() {
        assert!(ErrorKind::ArtifactUnavailable.is_retriable());
        assert!(ErrorKind::NotReady.is_retriable());
        assert!(!ErrorKind::ArtifactMismatch.is_retriable());
        assert!(!ErrorKind::DuplicateEntity.is_retriable());
    }
}
