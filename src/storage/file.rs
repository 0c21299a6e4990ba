//! File-backed fallback store for patient records.
//!
//! Keeps the assistant usable with no database: patients live in a single
//! `patients.json` under the EHR data directory. Writes rewrite the whole
//! file; the store is small and single-process by construction.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{NewPatient, PatientRecord, StorageError, apply_patient_updates, next_patient_id};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatientsFile {
    patients: Vec<PatientRecord>,
}

/// JSON-file patient store.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles across tasks
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (or initialize) the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let path = dir.join("patients.json");

        if !path.exists() {
            let empty = serde_json::to_string_pretty(&PatientsFile::default())?;
            fs::write(&path, empty)?;
            debug!("Initialized patient store at {}", path.display());
        }

        Ok(Self { path, lock: Mutex::new(()) })
    }

    fn read(&self) -> Result<PatientsFile, StorageError> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, data: &PatientsFile) -> Result<(), StorageError> {
        fs::write(&self.path, serde_json::to_string_pretty(data)?)?;
        Ok(())
    }

    pub fn find_patient(&self, query: &str) -> Result<Option<PatientRecord>, StorageError> {
        let _guard = self.lock.lock();
        let data = self.read()?;
        Ok(data
            .patients
            .into_iter()
            .find(|p| p.patient_id == query || p.name.eq_ignore_ascii_case(query)))
    }

    pub fn list_patients(&self) -> Result<Vec<PatientRecord>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.patients)
    }

    pub fn create_patient(&self, patient: NewPatient) -> Result<PatientRecord, StorageError> {
        let _guard = self.lock.lock();
        let mut data = self.read()?;

        let record = PatientRecord {
            patient_id: next_patient_id(data.patients.len()),
            name: patient.name,
            medical_history: patient.medical_history,
            medications: patient.medications,
            allergies: patient.allergies,
        };

        data.patients.push(record.clone());
        self.write(&data)?;

        Ok(record)
    }

    pub fn update_patient(&self, patient_id: &str, updates: &Map<String, Value>) -> Result<PatientRecord, StorageError> {
        let _guard = self.lock.lock();
        let mut data = self.read()?;

        let record = data
            .patients
            .iter_mut()
            .find(|p| p.patient_id == patient_id)
            .ok_or_else(|| StorageError::PatientNotFound(patient_id.to_string()))?;

        apply_patient_updates(record, updates);
        let updated = record.clone();
        self.write(&data)?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store(tag: &str) -> FileStore {
        let dir = std::env::temp_dir().join(format!("cva-ehr-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        FileStore::open(&dir).unwrap()
    }

    fn new_patient(name: &str) -> NewPatient {
        NewPatient { name: name.to_string(), ..Default::default() }
    }

    #[test]
    fn test_create_allocates_sequential_ids() {
        let store = temp_store("ids");
        let first = store.create_patient(new_patient("John Smith")).unwrap();
        let second = store.create_patient(new_patient("Jane Doe")).unwrap();
        assert_eq!(first.patient_id, "P001");
        assert_eq!(second.patient_id, "P002");
    }

    #[test]
    fn test_find_by_id_and_name() {
        let store = temp_store("find");
        store.create_patient(new_patient("John Smith")).unwrap();

        assert!(store.find_patient("P001").unwrap().is_some());
        assert!(store.find_patient("john smith").unwrap().is_some());
        assert!(store.find_patient("P999").unwrap().is_none());
    }

    #[test]
    fn test_update_round_trips() {
        let store = temp_store("update");
        store.create_patient(new_patient("John Smith")).unwrap();

        let updates = json!({"medical_history": "Type 2 Diabetes"});
        let updated = store.update_patient("P001", updates.as_object().unwrap()).unwrap();
        assert_eq!(updated.medical_history, vec!["Type 2 Diabetes"]);

        // The change survives a fresh read
        let reread = store.find_patient("P001").unwrap().unwrap();
        assert_eq!(reread.medical_history, vec!["Type 2 Diabetes"]);
    }

    #[test]
    fn test_update_missing_patient_errors() {
        let store = temp_store("missing");
        let updates = json!({"name": "Nobody"});
        let err = store.update_patient("P042", updates.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, StorageError::PatientNotFound(_)));
    }
}
