mod config;
mod source;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use labrisk_core::{validate, Clock, SystemClock};
use labrisk_service::{AnalysisService, ResultCache};
use log::warn;

use crate::source::DirectorySource;

#[derive(Parser, Debug)]
#[command(
    name = "labrisk-cli",
    about = "Score lab risk for every patient in a directory of FHIR Observation bundles."
)]
struct Args {
    /// Directory holding `<patient-id>.json` bundles and an optional `patients.json`.
    #[arg(short, long)]
    input: PathBuf,

    /// JSON file overriding `batchSize` / `maxReportedErrors`.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the cached analysis of one patient after the run.
    #[arg(short, long)]
    patient: Option<String>,

    /// Emit JSON instead of a text summary.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = config::load(args.config.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(ResultCache::new(clock.clone()));
    let service = AnalysisService::new(
        DirectorySource::new(&args.input),
        cache,
        config,
        clock,
    );

    let report = service
        .run()
        .await
        .with_context(|| format!("Analysis of {:?} failed", args.input))?;
    for error in &report.errors {
        warn!("{error}");
    }

    let patient = match &args.patient {
        Some(id) => {
            let analysis = service
                .patient_analysis(id)
                .with_context(|| format!("Patient {id} is not part of the analysis"))?;
            let record = service
                .source()
                .patient_record(id)
                .await
                .with_context(|| format!("Cannot read demographics of patient {id}"))?;
            Some((analysis, record))
        }
        None => None,
    };

    if args.json {
        let output = match &patient {
            Some((analysis, record)) => serde_json::json!({
                "patient": record,
                "analysis": analysis,
                "warnings": validate(analysis),
            }),
            None => serde_json::json!({
                "report": report,
                "status": service.status(),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let summary = &report.summary;
    println!(
        "Patients analyzed: {}/{} in {}ms\nCritical: {}\nHigh risk: {}\nModerate risk: {}\nLow risk: {}\nWith abnormal labs: {}\nIncomplete data: {}\nData quality: {:.1}%\nErrors: {}\nWarnings: {}",
        report.patients_analyzed,
        report.total_patients,
        report.duration_ms,
        summary.critical_count,
        summary.high_risk_count,
        summary.moderate_risk_count,
        summary.low_risk_count,
        summary.abnormal_count,
        summary.incomplete_data_count,
        summary.data_quality_score * 100.0,
        report.error_count,
        report.warnings.len()
    );

    if let Some((analysis, record)) = patient {
        println!(
            "\nPatient {}: {:?} (score {}), {} critical / {} abnormal of {} labs, completeness {:.0}%",
            analysis.patient_id,
            analysis.risk_level,
            analysis.risk_score,
            analysis.critical_count,
            analysis.abnormal_count,
            analysis.total_lab_count,
            analysis.data_completeness * 100.0
        );
        if let Some(record) = record {
            println!("  {} (MRN {})", record.name, record.mrn);
        }
        for warning in validate(&analysis) {
            println!("  warning: {warning}");
        }
    }

    Ok(())
}
