//! Tổng hợp đánh giá nguy cơ thành thống kê quần thể.

use crate::{AggregateSummary, PatientAnalysis, RiskLevel};

/// Ngưỡng dưới của độ đầy đủ dữ liệu được coi là đủ.
pub const COMPLETE_DATA_THRESHOLD: f64 = 0.8;

/// Tính lại toàn bộ thống kê; không phụ thuộc thứ tự đầu vào.
///
/// Đầu vào rỗng cho `data_quality_score = 0` và không có `analysis_timestamp`.
pub fn aggregate(analyses: &[PatientAnalysis]) -> AggregateSummary {
    let count_level = |level: RiskLevel| {
        analyses
            .iter()
            .filter(|analysis| analysis.risk_level == level)
            .count()
    };

    let data_quality_score = if analyses.is_empty() {
        0.0
    } else {
        analyses
            .iter()
            .map(|analysis| analysis.data_completeness)
            .sum::<f64>()
            / analyses.len() as f64
    };

    AggregateSummary {
        total_patients: analyses.len(),
        critical_count: count_level(RiskLevel::Critical),
        high_risk_count: count_level(RiskLevel::High),
        moderate_risk_count: count_level(RiskLevel::Moderate),
        low_risk_count: count_level(RiskLevel::Low),
        abnormal_count: analyses
            .iter()
            .filter(|analysis| analysis.abnormal_count > 0)
            .count(),
        incomplete_data_count: analyses
            .iter()
            .filter(|analysis| analysis.data_completeness < COMPLETE_DATA_THRESHOLD)
            .count(),
        analysis_timestamp: analyses.iter().map(|analysis| analysis.analysis_date).max(),
        data_quality_score,
    }
}
