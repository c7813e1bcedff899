//! Mô hình dữ liệu và logic lõi cho phân tích nguy cơ xét nghiệm.

pub mod aggregate;
pub mod clock;
pub mod scoring;
pub mod validate;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub use aggregate::aggregate;
pub use clock::{Clock, FixedClock, SystemClock};
pub use scoring::{score_patient, score_patient_at};
pub use validate::validate;

/// Danh mục cố định của mọi kết quả xét nghiệm đã chuẩn hoá.
pub const LAB_CATEGORY: &str = "laboratory";

/// Cấu hình cho một lượt phân tích toàn bộ quần thể.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Số bệnh nhân được xử lý đồng thời trong một nhóm.
    pub batch_size: usize,
    /// Số lỗi tối đa trả về trong báo cáo của một lượt chạy.
    pub max_reported_errors: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_reported_errors: 10,
        }
    }
}

/// Trạng thái lâm sàng suy ra từ khoảng tham chiếu.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    Normal,
    Abnormal,
    Critical,
}

/// Khoảng tham chiếu đầu tiên của một observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReferenceRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub text: Option<String>,
}

/// Kết quả xét nghiệm đã chuẩn hoá.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabResult {
    pub id: String,
    pub code: String,
    pub name: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub reference_range: Option<ReferenceRange>,
    pub status: LabStatus,
    pub effective_date_time: Option<String>,
    pub category: String,
    pub interpretation: Option<String>,
}

impl LabResult {
    /// Thời điểm hiệu lực đã parse, `None` nếu thiếu hoặc sai định dạng.
    pub fn effective_at(&self) -> Option<DateTime<Utc>> {
        self.effective_date_time
            .as_deref()
            .and_then(parse_fhir_datetime)
    }
}

/// Mức nguy cơ, sắp xếp từ nặng nhất.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Moderate,
    Low,
}

impl RiskLevel {
    /// Ngưỡng điểm cho mức `High` (bao gồm).
    pub const HIGH_THRESHOLD: u64 = 100;
    /// Ngưỡng điểm cho mức `Moderate` (bao gồm).
    pub const MODERATE_THRESHOLD: u64 = 30;

    /// Phân loại thuần tuý theo điểm và số kết quả nguy kịch.
    pub fn classify(risk_score: u64, critical_count: usize) -> Self {
        if critical_count > 0 {
            RiskLevel::Critical
        } else if risk_score >= Self::HIGH_THRESHOLD {
            RiskLevel::High
        } else if risk_score >= Self::MODERATE_THRESHOLD {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

/// Đánh giá nguy cơ cho một bệnh nhân.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientAnalysis {
    pub patient_id: String,
    pub risk_level: RiskLevel,
    pub risk_score: u64,
    pub critical_count: usize,
    pub abnormal_count: usize,
    pub total_lab_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_critical_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_abnormal_date: Option<String>,
    pub analysis_date: DateTime<Utc>,
    pub data_completeness: f64,
}

impl PatientAnalysis {
    /// Bản ghi rỗng nguy cơ thấp, dùng khi không có dữ liệu xét nghiệm.
    pub fn empty(patient_id: impl Into<String>, analysis_date: DateTime<Utc>) -> Self {
        Self {
            patient_id: patient_id.into(),
            risk_level: RiskLevel::Low,
            risk_score: 0,
            critical_count: 0,
            abnormal_count: 0,
            total_lab_count: 0,
            last_critical_date: None,
            last_abnormal_date: None,
            analysis_date,
            data_completeness: 0.0,
        }
    }
}

/// Tổng hợp thống kê trên toàn quần thể.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSummary {
    pub total_patients: usize,
    pub critical_count: usize,
    pub high_risk_count: usize,
    pub moderate_risk_count: usize,
    pub low_risk_count: usize,
    /// Số bệnh nhân có ít nhất một kết quả bất thường.
    pub abnormal_count: usize,
    pub incomplete_data_count: usize,
    pub analysis_timestamp: Option<DateTime<Utc>>,
    pub data_quality_score: f64,
}

/// Thông tin nhận dạng bệnh nhân từ resource `Patient`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: String,
    pub name: String,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub mrn: String,
}

/// Lỗi chung của pipeline phân tích.
#[derive(Debug, thiserror::Error)]
pub enum LabRiskError {
    #[error("Dữ liệu đầu vào thiếu thông tin tối thiểu")]
    MissingData,
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
    #[error("Không lấy được xét nghiệm của bệnh nhân {patient_id}: {reason}")]
    Fetch { patient_id: String, reason: String },
    #[error("Không tìm thấy bệnh nhân nào")]
    NoPatients,
    #[error("Lỗi khác: {0}")]
    Other(String),
}

/// Parse thời điểm FHIR: RFC 3339, ngày giờ không múi giờ (UTC), chỉ ngày,
/// hoặc ngày thiếu (`YYYY-MM`, `YYYY`) lấy thời điểm đầu kỳ.
pub fn parse_fhir_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_partial_date(value))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_partial_date(value: &str) -> Option<NaiveDate> {
    let (year, month) = match value.split_once('-') {
        Some((year, month)) if month.len() == 2 => (year, month.parse().ok()?),
        Some(_) => return None,
        None => (value, 1),
    };
    if year.len() != 4 {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, 1)
}
