//! Population analysis over a lab data source, tolerant of per-patient failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use labrisk_core::{
    score_patient, validate, AnalysisConfig, Clock, LabResult, LabRiskError, PatientAnalysis,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Where patient ids and lab histories come from.
///
/// `fetch_labs` must return the patient's complete history; scoring a sample
/// gives a different risk level.
#[async_trait]
pub trait LabSource: Send + Sync {
    async fn list_patients(&self) -> Result<Vec<String>, LabRiskError>;

    async fn fetch_labs(&self, patient_id: &str) -> Result<Vec<LabResult>, LabRiskError>;
}

/// Result of analysing one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PatientOutcome {
    Scored(PatientAnalysis),
    #[serde(rename_all = "camelCase")]
    Failed {
        patient_id: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl PatientOutcome {
    pub fn patient_id(&self) -> &str {
        match self {
            PatientOutcome::Scored(analysis) => &analysis.patient_id,
            PatientOutcome::Failed { patient_id, .. } => patient_id,
        }
    }

    /// The analysis, or the zero-value low-risk record for a failure.
    pub fn to_analysis(&self) -> PatientAnalysis {
        match self {
            PatientOutcome::Scored(analysis) => analysis.clone(),
            PatientOutcome::Failed {
                patient_id,
                failed_at,
                ..
            } => PatientAnalysis::empty(patient_id.clone(), *failed_at),
        }
    }
}

/// Outcomes of a batch run, in patient order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<PatientOutcome>,
    /// Validator warnings for the scored patients.
    pub warnings: Vec<String>,
}

impl BatchReport {
    /// One record per patient, failures flattened to the zero-value shape.
    pub fn analyses(&self) -> Vec<PatientAnalysis> {
        self.outcomes.iter().map(PatientOutcome::to_analysis).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                PatientOutcome::Failed {
                    patient_id, reason, ..
                } => Some(format!("Failed to analyze patient {patient_id}: {reason}")),
                PatientOutcome::Scored(_) => None,
            })
            .collect()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, PatientOutcome::Failed { .. }))
            .count()
    }
}

/// Score every patient, `config.batch_size` at a time.
///
/// A failed fetch never aborts the run; it is recorded as
/// [`PatientOutcome::Failed`].
pub async fn analyze_patients<S>(
    source: &S,
    patient_ids: &[String],
    config: &AnalysisConfig,
    clock: &dyn Clock,
) -> BatchReport
where
    S: LabSource + ?Sized,
{
    let batch_size = config.batch_size.max(1);
    let batch_total = patient_ids.len().div_ceil(batch_size);
    let mut report = BatchReport::default();

    for (index, batch) in patient_ids.chunks(batch_size).enumerate() {
        info!("Processing batch {}/{}", index + 1, batch_total);

        let outcomes = join_all(
            batch
                .iter()
                .map(|patient_id| analyze_one(source, patient_id, clock)),
        )
        .await;

        for outcome in outcomes {
            if let PatientOutcome::Scored(analysis) = &outcome {
                report.warnings.extend(validate(analysis));
            }
            report.outcomes.push(outcome);
        }
    }

    report
}

pub(crate) async fn analyze_one<S>(source: &S, patient_id: &str, clock: &dyn Clock) -> PatientOutcome
where
    S: LabSource + ?Sized,
{
    match source.fetch_labs(patient_id).await {
        Ok(labs) => PatientOutcome::Scored(score_patient(patient_id, &labs, clock)),
        Err(err) => {
            let reason = match err {
                LabRiskError::Fetch { reason, .. } => reason,
                other => other.to_string(),
            };
            warn!("Failed to analyze patient {patient_id}: {reason}");
            PatientOutcome::Failed {
                patient_id: patient_id.to_string(),
                reason,
                failed_at: clock.now(),
            }
        }
    }
}
