use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use labrisk_core::{LabResult, LabRiskError, PatientRecord};
use labrisk_fhir::{lab_results_from_bundle_str, patients_from_bundle_str};
use labrisk_service::LabSource;
use log::debug;

const PATIENT_BUNDLE: &str = "patients.json";

/// Lab data exported to disk: one Observation bundle per patient, named
/// `<patient-id>.json`, plus an optional `patients.json` Patient bundle.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Demographics of one patient, when `patients.json` lists it.
    pub async fn patient_record(
        &self,
        patient_id: &str,
    ) -> Result<Option<PatientRecord>, LabRiskError> {
        let patients = self.read_patient_bundle().await?.unwrap_or_default();
        Ok(patients.into_iter().find(|patient| patient.id == patient_id))
    }

    async fn read_patient_bundle(&self) -> Result<Option<Vec<PatientRecord>>, LabRiskError> {
        match tokio::fs::read_to_string(self.root.join(PATIENT_BUNDLE)).await {
            Ok(bundle) => patients_from_bundle_str(&bundle).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LabRiskError::Other(err.to_string())),
        }
    }

    /// `None` for ids that would resolve outside `root`.
    fn bundle_path(&self, patient_id: &str) -> Option<PathBuf> {
        let unsafe_id = patient_id.is_empty()
            || patient_id.contains(['/', '\\'])
            || patient_id.contains("..");
        (!unsafe_id).then(|| self.root.join(format!("{patient_id}.json")))
    }
}

#[async_trait]
impl LabSource for DirectorySource {
    async fn list_patients(&self) -> Result<Vec<String>, LabRiskError> {
        if let Some(patients) = self.read_patient_bundle().await? {
            debug!("Read {} patients from {PATIENT_BUNDLE}", patients.len());
            return Ok(patients.into_iter().map(|patient| patient.id).collect());
        }

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|err| LabRiskError::Other(format!("{}: {err}", self.root.display())))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| LabRiskError::Other(err.to_string()))?
        {
            if let Some(id) = patient_id_from_path(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn fetch_labs(&self, patient_id: &str) -> Result<Vec<LabResult>, LabRiskError> {
        let fetch_error = |reason: String| LabRiskError::Fetch {
            patient_id: patient_id.to_string(),
            reason,
        };
        let path = self
            .bundle_path(patient_id)
            .ok_or_else(|| fetch_error("patient id is not a plain file name".to_string()))?;

        let bundle = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| fetch_error(format!("{}: {err}", path.display())))?;
        lab_results_from_bundle_str(&bundle).map_err(|err| fetch_error(err.to_string()))
    }
}

fn patient_id_from_path(path: &Path) -> Option<String> {
    if path.extension()? != "json" || path.file_name()? == PATIENT_BUNDLE {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const OBSERVATIONS: &str = r#"{
        "resourceType": "Bundle",
        "entry": [
            { "resource": {
                "resourceType": "Observation",
                "id": "k1",
                "code": { "text": "Potassium" },
                "valueQuantity": { "value": 7.0, "unit": "mmol/L" },
                "referenceRange": [{ "low": { "value": 3.5 }, "high": { "value": 4.5 } }]
            } }
        ]
    }"#;

    #[tokio::test]
    async fn lists_bundle_files_when_no_patient_bundle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("p-2.json"), OBSERVATIONS).unwrap();
        fs::write(dir.path().join("p-1.json"), OBSERVATIONS).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = DirectorySource::new(dir.path());

        assert_eq!(source.list_patients().await.unwrap(), vec!["p-1", "p-2"]);
    }

    #[tokio::test]
    async fn patient_bundle_defines_the_population() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("p-1.json"), OBSERVATIONS).unwrap();
        fs::write(
            dir.path().join(PATIENT_BUNDLE),
            r#"{ "resourceType": "Bundle", "entry": [
                { "resource": { "resourceType": "Patient", "id": "p-1" } },
                { "resource": { "resourceType": "Patient", "id": "p-7" } }
            ] }"#,
        )
        .unwrap();

        let source = DirectorySource::new(dir.path());

        assert_eq!(source.list_patients().await.unwrap(), vec!["p-1", "p-7"]);
        let labs = source.fetch_labs("p-1").await.unwrap();
        assert_eq!(labs.len(), 1);
        assert_eq!(labs[0].status, labrisk_core::LabStatus::Critical);

        let err = source.fetch_labs("p-7").await.unwrap_err();
        assert!(matches!(err, LabRiskError::Fetch { patient_id, .. } if patient_id == "p-7"));
    }

    #[tokio::test]
    async fn ids_that_leave_the_directory_are_rejected() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("export");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.json"), OBSERVATIONS).unwrap();

        let source = DirectorySource::new(&root);

        for id in ["../secret", "sub/p-1", "..", ""] {
            let err = source.fetch_labs(id).await.unwrap_err();
            assert!(matches!(err, LabRiskError::Fetch { .. }), "{id:?} was accepted");
        }
        let absolute = outer.path().join("secret");
        let err = source
            .fetch_labs(absolute.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LabRiskError::Fetch { .. }));
    }

    #[tokio::test]
    async fn patient_record_comes_from_the_patient_bundle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PATIENT_BUNDLE),
            r#"{ "resourceType": "Bundle", "entry": [
                { "resource": {
                    "resourceType": "Patient",
                    "id": "p-1",
                    "name": [{ "given": ["Ada"], "family": "Lovelace" }],
                    "identifier": [{ "type": { "coding": [{ "code": "MR" }] }, "value": "MRN-77" }]
                } }
            ] }"#,
        )
        .unwrap();

        let source = DirectorySource::new(dir.path());

        let record = source.patient_record("p-1").await.unwrap().unwrap();
        assert_eq!(record.name, "Ada Lovelace");
        assert_eq!(record.mrn, "MRN-77");
        assert!(source.patient_record("p-2").await.unwrap().is_none());

        let bare = tempfile::tempdir().unwrap();
        assert!(DirectorySource::new(bare.path())
            .patient_record("p-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn malformed_bundle_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("p-1.json"), "{ broken").unwrap();

        let err = DirectorySource::new(dir.path())
            .fetch_labs("p-1")
            .await
            .unwrap_err();

        assert!(matches!(err, LabRiskError::Fetch { .. }));
    }
}
