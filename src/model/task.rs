use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Closed set of classification tasks. Each one has its own artifact and
/// label map; adding a variant means adding both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskVariant {
    Principles,
    LegalBasis,
    BreachTriage,
    CrossBorder,
    ConsentType,
    DataSensitivity,
    DpoTasks,
    RiskLevel,
    ComplianceStatus,
    Regional,
    Industry,
}

impl TaskVariant {
    pub const ALL: [TaskVariant; 11] = [
        TaskVariant::Principles,
        TaskVariant::LegalBasis,
        TaskVariant::BreachTriage,
        TaskVariant::CrossBorder,
        TaskVariant::ConsentType,
        TaskVariant::DataSensitivity,
        TaskVariant::DpoTasks,
        TaskVariant::RiskLevel,
        TaskVariant::ComplianceStatus,
        TaskVariant::Regional,
        TaskVariant::Industry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskVariant::Principles => "principles",
            TaskVariant::LegalBasis => "legal_basis",
            TaskVariant::BreachTriage => "breach_triage",
            TaskVariant::CrossBorder => "cross_border",
            TaskVariant::ConsentType => "consent_type",
            TaskVariant::DataSensitivity => "data_sensitivity",
            TaskVariant::DpoTasks => "dpo_tasks",
            TaskVariant::RiskLevel => "risk_level",
            TaskVariant::ComplianceStatus => "compliance_status",
            TaskVariant::Regional => "regional",
            TaskVariant::Industry => "industry",
        }
    }

    /// Number of output classes the artifact must declare
    pub fn class_count(&self) -> usize {
        match self {
            TaskVariant::Principles => 8,
            TaskVariant::LegalBasis => 4,
            TaskVariant::BreachTriage => 4,
            TaskVariant::CrossBorder => 5,
            TaskVariant::ConsentType => 4,
            TaskVariant::DataSensitivity => 4,
            TaskVariant::DpoTasks => 5,
            TaskVariant::RiskLevel => 4,
            TaskVariant::ComplianceStatus => 4,
            TaskVariant::Regional => 3,
            TaskVariant::Industry => 4,
        }
    }

    /// `legal_basis` -> `LegalBasis`
    pub fn pascal_name(&self) -> String {
        self.as_str()
            .split('_')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect()
    }

    /// Artifact directory name, e.g. `VeriAIDPO_LegalBasis_VI_v1`
    pub fn artifact_dir_name(&self, language: &str, version: u32) -> String {
        format!(
            "VeriAIDPO_{}_{}_v{}",
            self.pascal_name(),
            language.to_uppercase(),
            version
        )
    }
}

impl fmt::Display for TaskVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskVariant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        TaskVariant::ALL
            .iter()
            .copied()
            .find(|task| task.as_str() == wanted)
            .ok_or_else(|| {
                CoreError::invalid(format!(
                    "unknown task variant '{}', expected one of: {}",
                    s.trim(),
                    TaskVariant::ALL
                        .iter()
                        .map(TaskVariant::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}
