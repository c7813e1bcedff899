//! Kiểm tra tính nhất quán của một đánh giá; chỉ cảnh báo, không chặn lưu trữ.

use crate::PatientAnalysis;

const LOW_COMPLETENESS: f64 = 0.5;

pub fn validate(analysis: &PatientAnalysis) -> Vec<String> {
    let id = &analysis.patient_id;
    let mut warnings = Vec::new();

    if analysis.data_completeness < LOW_COMPLETENESS {
        warnings.push(format!(
            "Patient {id}: Low data completeness ({:.1}%)",
            analysis.data_completeness * 100.0
        ));
    }

    if analysis.total_lab_count == 0 {
        warnings.push(format!("Patient {id}: No lab results available"));
    }

    if analysis.critical_count > 0 && analysis.last_critical_date.is_none() {
        warnings.push(format!(
            "Patient {id}: Critical labs detected but no date available"
        ));
    }

    // critical > 50% of total
    if analysis.critical_count * 2 > analysis.total_lab_count {
        warnings.push(format!(
            "Patient {id}: Unusually high percentage of critical labs ({}/{})",
            analysis.critical_count, analysis.total_lab_count
        ));
    }

    warnings
}
