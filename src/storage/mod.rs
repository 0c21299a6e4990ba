//! Tiered persistence for clinical data.
//!
//! Patient records live in PostgreSQL when a host is configured and the
//! connection succeeds; otherwise a file-backed JSON store takes over so the
//! assistant keeps working without infrastructure. Transcriptions are
//! appended to a JSON log regardless of tier.

mod error;
mod file;
mod postgres;
mod transcripts;

pub use error::StorageError;
pub use file::FileStore;
pub use postgres::PgStore;
pub use transcripts::TranscriptLog;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A medication line on a patient record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientMedication {
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
}

/// A patient record as the EHR agent sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientRecord {
    pub patient_id: String,
    pub name: String,
    #[serde(default)]
    pub medical_history: Vec<String>,
    #[serde(default)]
    pub medications: Vec<PatientMedication>,
    #[serde(default)]
    pub allergies: Vec<String>,
}

/// Fields accepted when creating a patient record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPatient {
    pub name: String,
    #[serde(default)]
    pub medical_history: Vec<String>,
    #[serde(default)]
    pub medications: Vec<PatientMedication>,
    #[serde(default)]
    pub allergies: Vec<String>,
}

/// Patient record store: PostgreSQL, or the file-backed fallback.
pub enum EhrStore {
    Postgres(PgStore),
    File(FileStore),
}

impl EhrStore {
    /// Look up a patient by id (exact) or name (case-insensitive).
    pub async fn find_patient(&self, query: &str) -> Result<Option<PatientRecord>, StorageError> {
        match self {
            EhrStore::Postgres(store) => store.find_patient(query).await,
            EhrStore::File(store) => store.find_patient(query),
        }
    }

    /// List every patient record.
    pub async fn list_patients(&self) -> Result<Vec<PatientRecord>, StorageError> {
        match self {
            EhrStore::Postgres(store) => store.list_patients().await,
            EhrStore::File(store) => store.list_patients(),
        }
    }

    /// Create a patient, allocating the next sequential id.
    pub async fn create_patient(&self, patient: NewPatient) -> Result<PatientRecord, StorageError> {
        match self {
            EhrStore::Postgres(store) => store.create_patient(patient).await,
            EhrStore::File(store) => store.create_patient(patient),
        }
    }

    /// Apply whitelisted field updates to an existing patient.
    pub async fn update_patient(&self, patient_id: &str, updates: &Map<String, Value>) -> Result<PatientRecord, StorageError> {
        match self {
            EhrStore::Postgres(store) => store.update_patient(patient_id, updates).await,
            EhrStore::File(store) => store.update_patient(patient_id, updates),
        }
    }

    /// Human-readable tier label for logging.
    pub fn tier(&self) -> &'static str {
        match self {
            EhrStore::Postgres(_) => "postgres",
            EhrStore::File(_) => "file",
        }
    }
}

/// Format the next sequential patient id (`P001`, `P002`, ...).
pub(crate) fn next_patient_id(existing: usize) -> String {
    format!("P{:03}", existing + 1)
}

/// Merge whitelisted update fields into a patient record.
///
/// Unknown fields are ignored rather than rejected so a chatty LLM
/// extraction cannot poison the record. Returns the list of applied fields.
pub(crate) fn apply_patient_updates(record: &mut PatientRecord, updates: &Map<String, Value>) -> Vec<String> {
    let mut applied = Vec::new();

    for (field, value) in updates {
        match field.as_str() {
            "name" => {
                if let Some(name) = value.as_str() {
                    record.name = name.to_string();
                    applied.push(field.clone());
                }
            }
            "medical_history" => {
                if let Ok(history) = serde_json::from_value::<Vec<String>>(value.clone()) {
                    record.medical_history = history;
                    applied.push(field.clone());
                } else if let Some(entry) = value.as_str() {
                    // A single new diagnosis is appended, not replaced
                    record.medical_history.push(entry.to_string());
                    applied.push(field.clone());
                }
            }
            "medications" => {
                if let Ok(medications) = serde_json::from_value::<Vec<PatientMedication>>(value.clone()) {
                    record.medications = medications;
                    applied.push(field.clone());
                }
            }
            "allergies" => {
                if let Ok(allergies) = serde_json::from_value::<Vec<String>>(value.clone()) {
                    record.allergies = allergies;
                    applied.push(field.clone());
                } else if let Some(entry) = value.as_str() {
                    record.allergies.push(entry.to_string());
                    applied.push(field.clone());
                }
            }
            _ => {}
        }
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> PatientRecord {
        PatientRecord {
            patient_id: "P001".to_string(),
            name: "John Smith".to_string(),
            medical_history: vec!["Hypertension".to_string()],
            medications: vec![],
            allergies: vec![],
        }
    }

    #[test]
    fn test_next_patient_id_is_sequential() {
        assert_eq!(next_patient_id(0), "P001");
        assert_eq!(next_patient_id(41), "P042");
    }

    #[test]
    fn test_updates_append_single_diagnosis() {
        let mut record = sample_record();
        let updates = json!({"medical_history": "Type 2 Diabetes"});
        let applied = apply_patient_updates(&mut record, updates.as_object().unwrap());
        assert_eq!(applied, vec!["medical_history"]);
        assert_eq!(record.medical_history, vec!["Hypertension", "Type 2 Diabetes"]);
    }

    #[test]
    fn test_updates_ignore_unknown_fields() {
        let mut record = sample_record();
        let updates = json!({"patient_id": "P999", "ssn": "123"});
        let applied = apply_patient_updates(&mut record, updates.as_object().unwrap());
        assert!(applied.is_empty());
        assert_eq!(record.patient_id, "P001");
    }

    #[test]
    fn test_updates_replace_allergy_list() {
        let mut record = sample_record();
        let updates = json!({"allergies": ["Penicillin", "Latex"]});
        apply_patient_updates(&mut record, updates.as_object().unwrap());
        assert_eq!(record.allergies, vec!["Penicillin", "Latex"]);
    }
}
