//! Chấm điểm nguy cơ trên toàn bộ lịch sử xét nghiệm của một bệnh nhân.

use chrono::{DateTime, Duration, Utc};

use crate::{Clock, LabResult, LabStatus, PatientAnalysis, RiskLevel};

const CRITICAL_WEIGHT: u64 = 50;
const ABNORMAL_WEIGHT: u64 = 5;
const RECENT_CRITICAL_WEIGHT: u64 = 25;
const RECENT_ABNORMAL_WEIGHT: u64 = 10;

/// Cửa sổ (ngày) coi là "gần đây".
pub const RECENT_WINDOW_DAYS: i64 = 7;

/// Chấm điểm theo thời điểm lấy từ `clock`.
///
/// `labs` phải là toàn bộ kết quả của bệnh nhân; cắt bớt đầu vào làm sai lệch
/// điểm số.
pub fn score_patient(patient_id: &str, labs: &[LabResult], clock: &dyn Clock) -> PatientAnalysis {
    score_patient_at(patient_id, labs, clock.now())
}

/// Chấm điểm với thời điểm tính toán `now` cho trước.
pub fn score_patient_at(patient_id: &str, labs: &[LabResult], now: DateTime<Utc>) -> PatientAnalysis {
    if labs.is_empty() {
        return PatientAnalysis::empty(patient_id, now);
    }

    let critical: Vec<&LabResult> = labs
        .iter()
        .filter(|lab| lab.status == LabStatus::Critical)
        .collect();
    let abnormal: Vec<&LabResult> = labs
        .iter()
        .filter(|lab| lab.status == LabStatus::Abnormal)
        .collect();

    let window_start = now - Duration::days(RECENT_WINDOW_DAYS);
    let recent_critical = count_recent(&critical, window_start);
    let recent_abnormal = count_recent(&abnormal, window_start);

    let risk_score = CRITICAL_WEIGHT * critical.len() as u64
        + ABNORMAL_WEIGHT * abnormal.len() as u64
        + RECENT_CRITICAL_WEIGHT * recent_critical
        + RECENT_ABNORMAL_WEIGHT * recent_abnormal;

    PatientAnalysis {
        patient_id: patient_id.to_string(),
        risk_level: RiskLevel::classify(risk_score, critical.len()),
        risk_score,
        critical_count: critical.len(),
        abnormal_count: abnormal.len(),
        total_lab_count: labs.len(),
        last_critical_date: latest_effective(&critical),
        last_abnormal_date: latest_effective(&abnormal),
        analysis_date: now,
        data_completeness: data_completeness(labs),
    }
}

/// Tỉ lệ trường mô tả có mặt: giá trị, đơn vị, khoảng tham chiếu, thời điểm.
pub fn data_completeness(labs: &[LabResult]) -> f64 {
    if labs.is_empty() {
        return 0.0;
    }

    let present: usize = labs
        .iter()
        .map(|lab| {
            usize::from(lab.value.is_some())
                + usize::from(lab.unit.is_some())
                + usize::from(lab.reference_range.is_some())
                + usize::from(lab.effective_date_time.is_some())
        })
        .sum();

    present as f64 / (4 * labs.len()) as f64
}

fn count_recent(labs: &[&LabResult], window_start: DateTime<Utc>) -> u64 {
    labs.iter()
        .filter(|lab| matches!(lab.effective_at(), Some(at) if at > window_start))
        .count() as u64
}

fn latest_effective(labs: &[&LabResult]) -> Option<String> {
    labs.iter()
        .max_by_key(|lab| lab.effective_at())
        .and_then(|lab| lab.effective_date_time.clone())
}
