use chrono::{DateTime, Duration, TimeZone, Utc};
use labrisk_core::{
    parse_fhir_datetime, score_patient, score_patient_at, FixedClock, LabResult, LabStatus, ReferenceRange, RiskLevel,
    LAB_CATEGORY,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

fn lab(id: &str, status: LabStatus, effective: Option<DateTime<Utc>>) -> LabResult {
    LabResult {
        id: id.to_string(),
        code: "2345-7".to_string(),
        name: "Glucose".to_string(),
        value: Some(100.0),
        unit: Some("mg/dL".to_string()),
        reference_range: Some(ReferenceRange {
            low: Some(70.0),
            high: Some(110.0),
            text: None,
        }),
        status,
        effective_date_time: effective.map(|at| at.to_rfc3339()),
        category: LAB_CATEGORY.to_string(),
        interpretation: None,
    }
}

fn old() -> Option<DateTime<Utc>> {
    Some(now() - Duration::days(30))
}

#[test]
fn empty_history_scores_as_zero_low_risk() {
    let analysis = score_patient_at("p-1", &[], now());

    assert_eq!(analysis.patient_id, "p-1");
    assert_eq!(analysis.risk_level, RiskLevel::Low);
    assert_eq!(analysis.risk_score, 0);
    assert_eq!(analysis.critical_count, 0);
    assert_eq!(analysis.abnormal_count, 0);
    assert_eq!(analysis.total_lab_count, 0);
    assert_eq!(analysis.data_completeness, 0.0);
    assert!(analysis.last_critical_date.is_none());
    assert!(analysis.last_abnormal_date.is_none());
    assert_eq!(analysis.analysis_date, now());
}

#[test]
fn any_critical_result_forces_critical_level() {
    let labs = vec![
        lab("a", LabStatus::Critical, old()),
        lab("b", LabStatus::Abnormal, old()),
        lab("c", LabStatus::Normal, old()),
    ];

    let analysis = score_patient_at("p-1", &labs, now());

    assert_eq!(analysis.risk_score, 55);
    assert_eq!(analysis.risk_level, RiskLevel::Critical);
    assert_eq!(analysis.critical_count, 1);
    assert_eq!(analysis.abnormal_count, 1);
    assert_eq!(analysis.total_lab_count, 3);
}

#[test]
fn moderate_and_high_thresholds_are_inclusive() {
    let seven_abnormal: Vec<LabResult> = (0..7)
        .map(|i| lab(&format!("a{i}"), LabStatus::Abnormal, old()))
        .collect();
    let analysis = score_patient_at("p-1", &seven_abnormal, now());
    assert_eq!(analysis.risk_score, 35);
    assert_eq!(analysis.risk_level, RiskLevel::Moderate);

    let twenty_abnormal: Vec<LabResult> = (0..20)
        .map(|i| lab(&format!("a{i}"), LabStatus::Abnormal, old()))
        .collect();
    let analysis = score_patient_at("p-1", &twenty_abnormal, now());
    assert_eq!(analysis.risk_score, 100);
    assert_eq!(analysis.risk_level, RiskLevel::High);

    let six_abnormal = &seven_abnormal[..6];
    let analysis = score_patient_at("p-1", six_abnormal, now());
    assert_eq!(analysis.risk_score, 30);
    assert_eq!(analysis.risk_level, RiskLevel::Moderate);

    let five_abnormal = &seven_abnormal[..5];
    let analysis = score_patient_at("p-1", five_abnormal, now());
    assert_eq!(analysis.risk_score, 25);
    assert_eq!(analysis.risk_level, RiskLevel::Low);
}

#[test]
fn recent_results_add_weight_within_trailing_week() {
    let labs = vec![
        lab("c1", LabStatus::Critical, Some(now() - Duration::days(2))),
        lab("a1", LabStatus::Abnormal, Some(now() - Duration::hours(1))),
        lab("a2", LabStatus::Abnormal, Some(now() - Duration::days(8))),
        lab("a3", LabStatus::Abnormal, None),
    ];

    let analysis = score_patient_at("p-1", &labs, now());

    // 50 + 3*5 + 25 + 10
    assert_eq!(analysis.risk_score, 100);
    assert_eq!(analysis.risk_level, RiskLevel::Critical);
}

#[test]
fn recency_follows_the_injected_clock() {
    let labs = vec![lab("a1", LabStatus::Abnormal, Some(now() - Duration::days(1)))];
    let clock = FixedClock::new(now());

    assert_eq!(score_patient("p-1", &labs, &clock).risk_score, 15);

    clock.advance(Duration::days(7));
    assert_eq!(score_patient("p-1", &labs, &clock).risk_score, 5);
}

#[test]
fn last_dates_pick_most_recent_entry() {
    let newest = now() - Duration::days(1);
    let labs = vec![
        lab("c1", LabStatus::Critical, Some(now() - Duration::days(40))),
        lab("c2", LabStatus::Critical, Some(newest)),
        lab("c3", LabStatus::Critical, Some(now() - Duration::days(3))),
        lab("n1", LabStatus::Normal, Some(now())),
    ];

    let analysis = score_patient_at("p-1", &labs, now());

    assert_eq!(analysis.last_critical_date, Some(newest.to_rfc3339()));
    assert!(analysis.last_abnormal_date.is_none());
}

#[test]
fn completeness_counts_each_field_independently() {
    let full = lab("full", LabStatus::Normal, old());
    let bare = LabResult {
        value: None,
        unit: None,
        reference_range: None,
        effective_date_time: None,
        ..full.clone()
    };
    let half = LabResult {
        value: None,
        unit: None,
        ..full.clone()
    };

    let analysis = score_patient_at("p-1", &[full, bare, half], now());

    // (4 + 0 + 2) / 12
    assert!((analysis.data_completeness - 0.5).abs() < f64::EPSILON);
}

#[test]
fn date_only_timestamps_are_recognised() {
    let mut recent = lab("a1", LabStatus::Abnormal, None);
    recent.effective_date_time = Some("2024-06-14".to_string());

    let analysis = score_patient_at("p-1", &[recent], now());

    assert_eq!(analysis.risk_score, 15);
    assert_eq!(analysis.last_abnormal_date.as_deref(), Some("2024-06-14"));
}

#[test]
fn partial_dates_start_at_the_beginning_of_the_period() {
    assert_eq!(
        parse_fhir_datetime("2024-06"),
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(
        parse_fhir_datetime("2023"),
        Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(parse_fhir_datetime("2024-13"), None);
    assert_eq!(parse_fhir_datetime("24-06"), None);
    assert_eq!(parse_fhir_datetime("2024-6"), None);

    let mut older = lab("a1", LabStatus::Abnormal, None);
    older.effective_date_time = Some("2023".to_string());
    let mut newer = lab("a2", LabStatus::Abnormal, None);
    newer.effective_date_time = Some("2024-06".to_string());

    let analysis = score_patient_at("p-1", &[newer, older], now());

    assert_eq!(analysis.last_abnormal_date.as_deref(), Some("2024-06"));
    // 2024-06-01 is two weeks before `now`
    assert_eq!(analysis.risk_score, 10);
}
