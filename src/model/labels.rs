//! Bilingual label maps, index -> {Vietnamese name, English name, description}.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::TaskVariant;
use crate::error::CoreError;

/// Output language of a classification response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Vi,
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Vi => "vi",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vi" => Ok(Language::Vi),
            "en" => Ok(Language::En),
            other => Err(CoreError::invalid(format!(
                "unsupported language '{}', expected 'vi' or 'en'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(alias = "vi")]
    pub name_vi: String,
    #[serde(alias = "en")]
    pub name_en: String,
    #[serde(default)]
    pub description: String,
}

impl Label {
    pub fn name(&self, language: Language) -> &str {
        match language {
            Language::Vi => &self.name_vi,
            Language::En => &self.name_en,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LabelMap(Vec<Label>);

impl LabelMap {
    pub fn builtin(task: TaskVariant) -> Self {
        let rows: &[(&str, &str, &str)] = match task {
            TaskVariant::Principles => PRINCIPLES,
            TaskVariant::LegalBasis => LEGAL_BASIS,
            TaskVariant::BreachTriage => BREACH_TRIAGE,
            TaskVariant::CrossBorder => CROSS_BORDER,
            TaskVariant::ConsentType => CONSENT_TYPE,
            TaskVariant::DataSensitivity => DATA_SENSITIVITY,
            TaskVariant::DpoTasks => DPO_TASKS,
            TaskVariant::RiskLevel => RISK_LEVEL,
            TaskVariant::ComplianceStatus => COMPLIANCE_STATUS,
            TaskVariant::Regional => REGIONAL,
            TaskVariant::Industry => INDUSTRY,
        };
        LabelMap(
            rows.iter()
                .map(|(vi, en, description)| Label {
                    name_vi: vi.to_string(),
                    name_en: en.to_string(),
                    description: description.to_string(),
                })
                .collect(),
        )
    }

    /// Parse a `label_map.json` override: either a list of labels or an
    /// object keyed by class index. Indices must be contiguous from zero.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.is_array() {
            return Ok(LabelMap(serde_json::from_value(value)?));
        }

        let keyed: BTreeMap<String, Label> = serde_json::from_value(value)?;
        let mut indexed = BTreeMap::new();
        for (key, label) in keyed {
            let index: usize = key
                .parse()
                .map_err(|_| anyhow::anyhow!("label map key '{}' is not a class index", key))?;
            indexed.insert(index, label);
        }
        if indexed.keys().copied().ne(0..indexed.len()) {
            anyhow::bail!("label map indices must run from 0 without gaps");
        }
        Ok(LabelMap(indexed.into_values().collect()))
    }

    pub fn get(&self, class_id: usize) -> Option<&Label> {
        self.0.get(class_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }
}

const PRINCIPLES: &[(&str, &str, &str)] = &[
    (
        "Tính hợp pháp, công bằng và minh bạch",
        "Lawfulness, fairness and transparency",
        "Processing has a lawful basis and data subjects are informed",
    ),
    (
        "Giới hạn mục đích",
        "Purpose limitation",
        "Data is used only for the purposes stated at collection",
    ),
    (
        "Tối thiểu hóa dữ liệu",
        "Data minimisation",
        "Only data necessary for the purpose is collected",
    ),
    (
        "Tính chính xác",
        "Accuracy",
        "Data is kept accurate and up to date",
    ),
    (
        "Giới hạn lưu trữ",
        "Storage limitation",
        "Data is retained no longer than necessary",
    ),
    (
        "Tính toàn vẹn và bảo mật",
        "Integrity and confidentiality",
        "Data is protected against unauthorised access and loss",
    ),
    (
        "Trách nhiệm giải trình",
        "Accountability",
        "The controller can demonstrate compliance",
    ),
    (
        "Quyền của chủ thể dữ liệu",
        "Data subject rights",
        "Access, correction, deletion and objection requests are honoured",
    ),
];

const LEGAL_BASIS: &[(&str, &str, &str)] = &[
    ("Sự đồng ý", "Consent", "The data subject agreed to the processing"),
    (
        "Thực hiện hợp đồng",
        "Contract performance",
        "Processing is needed to perform a contract with the data subject",
    ),
    (
        "Nghĩa vụ pháp lý",
        "Legal obligation",
        "Processing is required by law",
    ),
    (
        "Lợi ích hợp pháp",
        "Legitimate interests",
        "Processing serves a legitimate interest that is not overridden",
    ),
];

const BREACH_TRIAGE: &[(&str, &str, &str)] = &[
    ("Thấp", "Low", "Limited impact, no notification expected"),
    ("Trung bình", "Medium", "Internal review and containment"),
    ("Cao", "High", "Notify the authority within 72 hours"),
    (
        "Nghiêm trọng",
        "Critical",
        "Immediate notification of the authority and data subjects",
    ),
];

const CROSS_BORDER: &[(&str, &str, &str)] = &[
    ("Chỉ trong nước", "Domestic only", "Data stays in Vietnam"),
    (
        "Quốc gia có mức bảo vệ tương đương",
        "Adequate jurisdiction",
        "Transfer to a jurisdiction with adequate protection",
    ),
    (
        "Điều khoản hợp đồng mẫu",
        "Standard contractual clauses",
        "Transfer covered by contractual safeguards",
    ),
    (
        "Đồng ý chuyển giao",
        "Consent-based transfer",
        "Transfer relies on explicit consent of the data subject",
    ),
    (
        "Chuyển giao bị cấm",
        "Prohibited transfer",
        "Transfer is not permitted",
    ),
];

const CONSENT_TYPE: &[(&str, &str, &str)] = &[
    (
        "Đồng ý rõ ràng",
        "Explicit consent",
        "Affirmative, specific agreement",
    ),
    (
        "Đồng ý ngầm định",
        "Implied consent",
        "Agreement inferred from conduct",
    ),
    (
        "Đồng ý của cha mẹ",
        "Parental consent",
        "Consent given for a child by a parent or guardian",
    ),
    (
        "Rút lại đồng ý",
        "Consent withdrawal",
        "The data subject withdrew consent",
    ),
];

const DATA_SENSITIVITY: &[(&str, &str, &str)] = &[
    ("Công khai", "Public", "Information that is already public"),
    ("Nội bộ", "Internal", "Non-personal internal information"),
    (
        "Dữ liệu cá nhân cơ bản",
        "Basic personal data",
        "Name, contact details, identifiers",
    ),
    (
        "Dữ liệu cá nhân nhạy cảm",
        "Sensitive personal data",
        "Health, biometric, financial, political or religious data",
    ),
];

const DPO_TASKS: &[(&str, &str, &str)] = &[
    (
        "Giám sát tuân thủ",
        "Compliance monitoring",
        "Ongoing review of processing activities",
    ),
    (
        "Đánh giá tác động",
        "Impact assessment",
        "Data protection impact assessment",
    ),
    (
        "Xử lý yêu cầu chủ thể dữ liệu",
        "Data subject requests",
        "Handling access, correction and deletion requests",
    ),
    (
        "Thông báo vi phạm",
        "Breach notification",
        "Reporting incidents to the authority",
    ),
    (
        "Đào tạo và nâng cao nhận thức",
        "Training and awareness",
        "Staff training on data protection",
    ),
];

const RISK_LEVEL: &[(&str, &str, &str)] = &[
    ("Thấp", "Low", "Minimal risk to data subjects"),
    ("Trung bình", "Medium", "Manageable risk with standard controls"),
    ("Cao", "High", "Significant risk requiring mitigation"),
    (
        "Rất cao",
        "Very high",
        "Severe risk, processing should not proceed without review",
    ),
];

const COMPLIANCE_STATUS: &[(&str, &str, &str)] = &[
    ("Tuân thủ", "Compliant", "Meets the applicable requirements"),
    (
        "Tuân thủ một phần",
        "Partially compliant",
        "Some requirements are not yet met",
    ),
    (
        "Không tuân thủ",
        "Non-compliant",
        "Requirements are not met",
    ),
    (
        "Cần xem xét",
        "Needs review",
        "Not enough information to decide",
    ),
];

const REGIONAL: &[(&str, &str, &str)] = &[
    ("Miền Bắc", "North", "Northern Vietnam"),
    ("Miền Trung", "Central", "Central Vietnam"),
    ("Miền Nam", "South", "Southern Vietnam"),
];

const INDUSTRY: &[(&str, &str, &str)] = &[
    ("Tài chính - Ngân hàng", "Finance and banking", "Banks, insurers, payment providers"),
    ("Công nghệ", "Technology", "Software, telecom and platforms"),
    ("Y tế", "Healthcare", "Hospitals, clinics, pharmacies"),
    ("Thương mại điện tử", "E-commerce", "Online retail and marketplaces"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_maps_match_class_counts() {
        for task in TaskVariant::ALL {
            let labels = LabelMap::builtin(task);
            assert_eq!(labels.len(), task.class_count(), "{}", task);
            assert!(labels.labels().iter().all(|l| !l.name_vi.is_empty() && !l.name_en.is_empty()));
        }
    }

    #[test]
    fn test_label_name_by_language() {
        let labels = LabelMap::builtin(TaskVariant::LegalBasis);
        let consent = labels.get(0).unwrap();
        assert_eq!(consent.name(Language::Vi), "Sự đồng ý");
        assert_eq!(consent.name(Language::En), "Consent");
        assert!(labels.get(4).is_none());
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("VI".parse::<Language>().unwrap(), Language::Vi);
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_label_map_override_formats() {
        let keyed = LabelMap::from_json(
            r#"{"1": {"vi": "Cao", "en": "High"}, "0": {"vi": "Thấp", "en": "Low"}}"#,
        )
        .unwrap();
        assert_eq!(keyed.len(), 2);
        assert_eq!(keyed.get(0).unwrap().name_en, "Low");

        let listed =
            LabelMap::from_json(r#"[{"name_vi": "A", "name_en": "A", "description": "x"}]"#).unwrap();
        assert_eq!(listed.len(), 1);

        assert!(LabelMap::from_json(r#"{"0": {"vi": "A", "en": "A"}, "2": {"vi": "B", "en": "B"}}"#).is_err());
        assert!(LabelMap::from_json(r#"{"zero": {"vi": "A", "en": "A"}}"#).is_err());
    }
}
