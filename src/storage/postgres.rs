//! PostgreSQL-backed EHR store using sqlx.

use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::info;

use super::{NewPatient, PatientRecord, StorageError, apply_patient_updates, next_patient_id};

/// DDL executed at startup. `IF NOT EXISTS` keeps reconnects idempotent.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS patients (
        id SERIAL PRIMARY KEY,
        patient_id VARCHAR(50) UNIQUE NOT NULL,
        name VARCHAR(200) NOT NULL,
        medical_history JSONB NOT NULL DEFAULT '[]',
        medications JSONB NOT NULL DEFAULT '[]',
        allergies JSONB NOT NULL DEFAULT '[]',
        created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS medical_records (
        id SERIAL PRIMARY KEY,
        patient_id INTEGER REFERENCES patients(id),
        record_type VARCHAR(50),
        record_date TIMESTAMPTZ,
        provider VARCHAR(100),
        notes TEXT,
        data JSONB,
        created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS medications (
        id SERIAL PRIMARY KEY,
        patient_id INTEGER REFERENCES patients(id),
        medication_name VARCHAR(200),
        dosage VARCHAR(100),
        frequency VARCHAR(100),
        start_date DATE,
        end_date DATE,
        prescriber VARCHAR(100),
        status VARCHAR(50),
        created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS appointments (
        id SERIAL PRIMARY KEY,
        patient_id INTEGER REFERENCES patients(id),
        appointment_type VARCHAR(100),
        appointment_date TIMESTAMPTZ,
        provider VARCHAR(100),
        status VARCHAR(50),
        notes TEXT,
        created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
    )",
];

/// PostgreSQL patient store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new().max_connections(5).connect(database_url).await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PostgreSQL EHR store initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn record_from_row(row: &PgRow) -> Result<PatientRecord, StorageError> {
        Ok(PatientRecord {
            patient_id: row.get("patient_id"),
            name: row.get("name"),
            medical_history: serde_json::from_value(row.get::<Value, _>("medical_history"))?,
            medications: serde_json::from_value(row.get::<Value, _>("medications"))?,
            allergies: serde_json::from_value(row.get::<Value, _>("allergies"))?,
        })
    }

    pub async fn find_patient(&self, query: &str) -> Result<Option<PatientRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT patient_id, name, medical_history, medications, allergies
             FROM patients WHERE patient_id = $1 OR LOWER(name) = LOWER($1)",
        )
        .bind(query)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    pub async fn list_patients(&self) -> Result<Vec<PatientRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT patient_id, name, medical_history, medications, allergies
             FROM patients ORDER BY patient_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    pub async fn create_patient(&self, patient: NewPatient) -> Result<PatientRecord, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients").fetch_one(&self.pool).await?;

        let record = PatientRecord {
            patient_id: next_patient_id(count as usize),
            name: patient.name,
            medical_history: patient.medical_history,
            medications: patient.medications,
            allergies: patient.allergies,
        };

        sqlx::query(
            "INSERT INTO patients (patient_id, name, medical_history, medications, allergies)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&record.patient_id)
        .bind(&record.name)
        .bind(serde_json::to_value(&record.medical_history)?)
        .bind(serde_json::to_value(&record.medications)?)
        .bind(serde_json::to_value(&record.allergies)?)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    /// Fetch, merge the whitelisted updates, and write the record back.
    /// Field names never reach the SQL text, so no dynamic statements.
    pub async fn update_patient(&self, patient_id: &str, updates: &Map<String, Value>) -> Result<PatientRecord, StorageError> {
        let mut record = self
            .find_patient(patient_id)
            .await?
            .ok_or_else(|| StorageError::PatientNotFound(patient_id.to_string()))?;

        apply_patient_updates(&mut record, updates);

        sqlx::query(
            "UPDATE patients SET name = $2, medical_history = $3, medications = $4, allergies = $5
             WHERE patient_id = $1",
        )
        .bind(&record.patient_id)
        .bind(&record.name)
        .bind(serde_json::to_value(&record.medical_history)?)
        .bind(serde_json::to_value(&record.medications)?)
        .bind(serde_json::to_value(&record.allergies)?)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }
}
