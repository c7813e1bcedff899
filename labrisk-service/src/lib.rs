//! Population analysis runs and the result cache that serves them.

pub mod batch;
pub mod cache;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use labrisk_core::{
    aggregate, validate, AggregateSummary, AnalysisConfig, Clock, LabRiskError, PatientAnalysis,
};
use log::info;
use serde::{Deserialize, Serialize};

pub use batch::{analyze_patients, BatchReport, LabSource, PatientOutcome};
pub use cache::{CacheSnapshot, CacheStats, CachedAnalysis, ResultCache, CACHE_TTL_MS};

/// Outcome of a full population run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub summary: AggregateSummary,
    pub patients_analyzed: usize,
    pub total_patients: usize,
    pub duration_ms: u64,
    pub error_count: usize,
    /// The first `max_reported_errors` fetch failures.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// What readers see of the cached analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStatus {
    pub has_analysis: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AggregateSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_stale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_timestamp: Option<DateTime<Utc>>,
    pub cache_stats: CacheStats,
}

/// A freshly scored patient written back into the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientRefresh {
    pub analysis: PatientAnalysis,
    pub warnings: Vec<String>,
    /// Whether the cache held a record for this patient.
    pub cached: bool,
}

pub struct AnalysisService<S> {
    source: S,
    cache: Arc<ResultCache>,
    config: AnalysisConfig,
    clock: Arc<dyn Clock>,
}

impl<S: LabSource> AnalysisService<S> {
    pub fn new(
        source: S,
        cache: Arc<ResultCache>,
        config: AnalysisConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            cache,
            config,
            clock,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Analyse every patient the source knows about and cache the result.
    pub async fn run(&self) -> Result<RunReport, LabRiskError> {
        let started = Instant::now();
        info!("Starting complete patient analysis...");

        let patient_ids = self.source.list_patients().await?;
        info!("Found {} patients to analyze", patient_ids.len());
        if patient_ids.is_empty() {
            return Err(LabRiskError::NoPatients);
        }

        let report =
            analyze_patients(&self.source, &patient_ids, &self.config, self.clock.as_ref()).await;
        let analyses = report.analyses();
        let summary = aggregate(&analyses);
        let patients_analyzed = analyses.len();
        self.cache.store(analyses, summary.clone());

        let duration_ms = started.elapsed().as_millis() as u64;
        info!("Analysis completed in {duration_ms}ms");
        info!(
            "Summary: {} critical, {} high risk, {} abnormal labs",
            summary.critical_count, summary.high_risk_count, summary.abnormal_count
        );

        let mut errors = report.errors();
        let error_count = errors.len();
        errors.truncate(self.config.max_reported_errors);

        Ok(RunReport {
            summary,
            patients_analyzed,
            total_patients: patient_ids.len(),
            duration_ms,
            error_count,
            errors,
            warnings: report.warnings,
        })
    }

    /// Status built from a single cache read.
    pub fn status(&self) -> AnalysisStatus {
        let cached = self.cache.read();
        let cache_stats = ResultCache::stats_for(cached.as_ref());
        match cached {
            Some(cached) => AnalysisStatus {
                has_analysis: true,
                summary: Some(cached.summary().clone()),
                is_stale: Some(cached.is_stale),
                analysis_timestamp: cached.summary().analysis_timestamp,
                cache_stats,
            },
            None => AnalysisStatus {
                has_analysis: false,
                summary: None,
                is_stale: None,
                analysis_timestamp: None,
                cache_stats,
            },
        }
    }

    pub fn patient_analysis(&self, patient_id: &str) -> Option<PatientAnalysis> {
        self.cache.patient(patient_id)
    }

    /// Re-score one patient from its complete history and write it to the cache.
    pub async fn refresh_patient(&self, patient_id: &str) -> Result<PatientRefresh, LabRiskError> {
        match batch::analyze_one(&self.source, patient_id, self.clock.as_ref()).await {
            PatientOutcome::Scored(analysis) => {
                let warnings = validate(&analysis);
                let cached = self.cache.update_one(analysis.clone());
                Ok(PatientRefresh {
                    analysis,
                    warnings,
                    cached,
                })
            }
            PatientOutcome::Failed {
                patient_id, reason, ..
            } => Err(LabRiskError::Fetch { patient_id, reason }),
        }
    }
}
