//! EHR agent: patient record retrieval, update and creation.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;

use crate::llm::{JsonAgent, LlmClient};
use crate::storage::{EhrStore, NewPatient, StorageError};

use super::reply::AgentReply;

const SYSTEM_PROMPT: &str = r#"You are an EHR (Electronic Health Record) Agent responsible for managing patient information.
You can perform the following operations:
- retrieve: Look up a patient's record
- update: Apply changes to an existing patient's record
- create: Create a new patient record

Always respond in JSON format with the following structure:
{
    "operation": "<operation_type>",
    "status": "success" or "error",
    "data": {
        "patient_id": "<patient id, if mentioned>",
        "name": "<patient name, if mentioned>",
        "updates": {"medical_history": "<new diagnosis>", "allergies": ["..."]},
        "medical_history": ["<condition>"],
        "medications": [{"name": "<name>", "dosage": "<dosage>", "frequency": "<frequency>"}],
        "allergies": ["<allergy>"]
    },
    "error": null or error message
}

Only include the data fields relevant to the requested operation.
All string values must be properly quoted. No trailing commas, no comments."#;

/// Manages patient records through the configured EHR store.
pub struct EhrAgent {
    llm: JsonAgent,
    store: Arc<EhrStore>,
}

impl EhrAgent {
    pub fn new(llm: &LlmClient, store: Arc<EhrStore>) -> Self {
        Self { llm: llm.json_agent(SYSTEM_PROMPT), store }
    }

    pub async fn process(&self, utterance: &str) -> AgentReply {
        let value = match self.llm.request(utterance).await {
            Ok(value) => value,
            Err(e) => return AgentReply::failure("unknown", e.to_string()),
        };

        let reply = AgentReply::from_llm(value);
        if !reply.is_success() {
            return reply;
        }

        match reply.operation.as_str() {
            "retrieve" => self.handle_retrieve(reply).await,
            "update" => self.handle_update(reply).await,
            "create" => self.handle_create(reply).await,
            other => AgentReply::failure(other, format!("Unsupported operation: {}", other)),
        }
    }

    async fn handle_retrieve(&self, reply: AgentReply) -> AgentReply {
        let data = reply.data_object().cloned().unwrap_or_default();
        let query = data
            .get("patient_id")
            .or_else(|| data.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match query {
            Some(query) => match self.store.find_patient(&query).await {
                Ok(Some(record)) => match serde_json::to_value(record) {
                    Ok(value) => AgentReply::success("retrieve", value),
                    Err(e) => AgentReply::failure("retrieve", e.to_string()),
                },
                Ok(None) => AgentReply::failure("retrieve", format!("Patient {} not found", query)),
                Err(e) => store_failure("retrieve", e),
            },
            None => match self.store.list_patients().await {
                Ok(records) => AgentReply::success("retrieve", json!({"patients": records})),
                Err(e) => store_failure("retrieve", e),
            },
        }
    }

    async fn handle_update(&self, reply: AgentReply) -> AgentReply {
        let data = reply.data_object().cloned().unwrap_or_default();

        let Some(patient) = data.get("patient_id").or_else(|| data.get("name")).and_then(Value::as_str) else {
            return AgentReply::failure("update", "No patient specified for update");
        };

        let Some(updates) = data.get("updates").and_then(Value::as_object).filter(|u| !u.is_empty()) else {
            return AgentReply::failure("update", "No update fields provided");
        };

        // Resolve names to ids so the update targets a concrete record
        let resolved_id = match self.store.find_patient(patient).await {
            Ok(Some(record)) => record.patient_id,
            Ok(None) => return AgentReply::failure("update", format!("Patient {} not found", patient)),
            Err(e) => return store_failure("update", e),
        };

        match self.store.update_patient(&resolved_id, updates).await {
            Ok(record) => AgentReply::success("update", json!({"patient_id": record.patient_id, "updates": updates})),
            Err(e) => store_failure("update", e),
        }
    }

    async fn handle_create(&self, reply: AgentReply) -> AgentReply {
        let Some(data) = reply.data.clone() else {
            return AgentReply::failure("create", "No patient data provided");
        };

        let patient: NewPatient = match serde_json::from_value(data) {
            Ok(patient) => patient,
            Err(e) => return AgentReply::failure("create", format!("Malformed patient data: {}", e)),
        };

        if patient.name.trim().is_empty() {
            return AgentReply::failure("create", "Patient name is required");
        }

        match self.store.create_patient(patient).await {
            Ok(record) => match serde_json::to_value(record) {
                Ok(value) => AgentReply::success("create", value),
                Err(e) => AgentReply::failure("create", e.to_string()),
            },
            Err(e) => store_failure("create", e),
        }
    }
}

fn store_failure(operation: &str, error: StorageError) -> AgentReply {
    warn!("EHR store error: {}", error);
    AgentReply::failure(operation, error.to_string())
}

/// Render a successful EHR reply for the user.
pub fn format_reply(reply: &AgentReply) -> String {
    let Some(data) = reply.data_object() else {
        return "No patient data found.".to_string();
    };

    match reply.operation.as_str() {
        "retrieve" => {
            if let Some(patients) = data.get("patients").and_then(Value::as_array) {
                if patients.is_empty() {
                    return "No patient records on file.".to_string();
                }
                let mut lines = vec![format!("📋 {} patient record(s) on file:", patients.len())];
                for patient in patients {
                    lines.push(format!(
                        "- {} ({})",
                        patient.get("name").and_then(Value::as_str).unwrap_or("Unknown"),
                        patient.get("patient_id").and_then(Value::as_str).unwrap_or("N/A"),
                    ));
                }
                return lines.join("\n");
            }

            let mut lines = vec![
                format!("📋 Patient Information for {}", data.get("name").and_then(Value::as_str).unwrap_or("Unknown")),
                format!("ID: {}", data.get("patient_id").and_then(Value::as_str).unwrap_or("N/A")),
                "\nMedical History:".to_string(),
            ];
            for condition in data.get("medical_history").and_then(Value::as_array).into_iter().flatten() {
                lines.push(format!("- {}", condition.as_str().unwrap_or_default()));
            }
            lines.push("\nCurrent Medications:".to_string());
            for med in data.get("medications").and_then(Value::as_array).into_iter().flatten() {
                lines.push(format!(
                    "- {} ({}, {})",
                    med.get("name").and_then(Value::as_str).unwrap_or("Unknown"),
                    med.get("dosage").and_then(Value::as_str).unwrap_or("-"),
                    med.get("frequency").and_then(Value::as_str).unwrap_or("-"),
                ));
            }
            lines.push("\nAllergies:".to_string());
            for allergy in data.get("allergies").and_then(Value::as_array).into_iter().flatten() {
                lines.push(format!("- {}", allergy.as_str().unwrap_or_default()));
            }
            lines.join("\n")
        }
        "update" => {
            let mut lines = vec![
                format!("✅ Updated Patient {}", data.get("patient_id").and_then(Value::as_str).unwrap_or("Unknown")),
                "Changes made:".to_string(),
            ];
            for (field, value) in data.get("updates").and_then(Value::as_object).into_iter().flatten() {
                lines.push(format!("- {}: {}", field, value));
            }
            lines.join("\n")
        }
        "create" => format!(
            "✅ Created new patient record for {} (ID: {})",
            data.get("name").and_then(Value::as_str).unwrap_or("Unknown"),
            data.get("patient_id").and_then(Value::as_str).unwrap_or("N/A"),
        ),
        _ => serde_json::to_string(data).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_retrieve_single_patient() {
        let reply = AgentReply::success(
            "retrieve",
            json!({
                "patient_id": "P001",
                "name": "John Smith",
                "medical_history": ["Hypertension"],
                "medications": [{"name": "Lisinopril", "dosage": "10mg", "frequency": "daily"}],
                "allergies": ["Penicillin"]
            }),
        );

        let text = format_reply(&reply);
        assert!(text.contains("Patient Information for John Smith"));
        assert!(text.contains("- Lisinopril (10mg, daily)"));
        assert!(text.contains("- Penicillin"));
    }

    #[test]
    fn test_format_retrieve_patient_list() {
        let reply = AgentReply::success(
            "retrieve",
            json!({"patients": [{"patient_id": "P001", "name": "John Smith"}, {"patient_id": "P002", "name": "Jane Doe"}]}),
        );
        let text = format_reply(&reply);
        assert!(text.contains("2 patient record(s)"));
        assert!(text.contains("- Jane Doe (P002)"));
    }

    #[test]
    fn test_format_create() {
        let reply = AgentReply::success("create", json!({"patient_id": "P002", "name": "Jane Doe"}));
        assert_eq!(format_reply(&reply), "✅ Created new patient record for Jane Doe (ID: P002)");
    }

    #[test]
    fn test_format_update_lists_changes() {
        let reply = AgentReply::success("update", json!({"patient_id": "P001", "updates": {"medical_history": "Type 2 Diabetes"}}));
        let text = format_reply(&reply);
        assert!(text.contains("✅ Updated Patient P001"));
        assert!(text.contains("medical_history"));
    }
}
