//! Medication agent: interaction checks, dosage verification and drug info.
//!
//! The LLM extracts the medications named in the utterance; everything the
//! user is told about interactions comes from the local reference data, not
//! from the model.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::llm::{JsonAgent, LlmClient};

use super::reply::AgentReply;

const SYSTEM_PROMPT: &str = r#"You are a Medication Agent responsible for managing medication information and interactions.
You can perform the following operations:
- check_interactions: Check interactions between medications
- verify_dosage: Verify medication dosage
- get_info: Get medication information

IMPORTANT: You must respond with a valid JSON object. The response must be parseable JSON.
DO NOT include any escaped characters or newlines in string values.

Always respond in JSON format with the following structure:
{
    "operation": "<operation_type>",
    "status": "success" or "error",
    "data": {
        "medications": [
            {
                "name": "<medication_name>",
                "dosage": "<dosage, if mentioned>"
            }
        ]
    },
    "error": null or error_message
}

Remember:
1. All string values must be properly quoted
2. No escaped newlines in string values
3. No trailing commas
4. No comments
5. All arrays and objects must be properly closed"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MedicationEntry {
    name: String,
    #[serde(default)]
    class: String,
    #[serde(default)]
    indication: String,
    #[serde(default)]
    interactions: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MedicationData {
    medications: Vec<MedicationEntry>,
}

/// Medication reference agent backed by `medications.json`.
pub struct MedicationAgent {
    llm: JsonAgent,
    data: Mutex<MedicationData>,
}

impl MedicationAgent {
    pub fn new(llm: &LlmClient, data_dir: &Path) -> Self {
        let data = load_medication_data(&data_dir.join("medications.json"));
        Self { llm: llm.json_agent(SYSTEM_PROMPT), data: Mutex::new(data) }
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

        let named = named_medications(&reply);
        if named.is_empty() {
            return AgentReply::failure(reply.operation, "No medications specified");
        }

        match reply.operation.as_str() {
            "check_interactions" => self.check_interactions(&named),
            "verify_dosage" => self.verify_dosage(&named),
            "get_info" => self.get_info(&named),
            other => AgentReply::failure(other, format!("Unsupported operation: {}", other)),
        }
    }

    fn lookup(&self, name: &str) -> Option<MedicationEntry> {
        self.data.lock().medications.iter().find(|m| m.name.eq_ignore_ascii_case(name)).cloned()
    }

    fn check_interactions(&self, named: &[NamedMedication]) -> AgentReply {
        let mut interactions = Vec::new();
        let mut warnings = Vec::new();

        for med in named {
            let Some(entry) = self.lookup(&med.name) else { continue };

            for other in &entry.interactions {
                // Only surface interactions between the medications actually asked about
                let relevant = named.len() == 1 || named.iter().any(|m| m.name.eq_ignore_ascii_case(other));
                if relevant {
                    interactions.push(json!({
                        "severity": "Moderate",
                        "description": format!("Interaction between {} and {}", entry.name, other),
                    }));
                    warnings.push(format!("Monitor for adverse effects when taking {} with {}", entry.name, other));
                }
            }
        }

        AgentReply::success("check_interactions", json!({"medications": named, "interactions": interactions})).with_warnings(warnings)
    }

    fn verify_dosage(&self, named: &[NamedMedication]) -> AgentReply {
        let mut dosage_info = Vec::new();

        for med in named {
            if let Some(entry) = self.lookup(&med.name) {
                dosage_info.push(json!({
                    "name": entry.name,
                    "class": entry.class,
                    "indication": entry.indication,
                    "dosage": med.dosage.clone().unwrap_or_else(|| "Standard dosage".to_string()),
                }));
            }
        }

        if dosage_info.is_empty() {
            return AgentReply::failure("verify_dosage", format!("Medication {} not found", named[0].name));
        }

        AgentReply::success("verify_dosage", json!({"medications": dosage_info}))
    }

    fn get_info(&self, named: &[NamedMedication]) -> AgentReply {
        let mut info = Vec::new();

        for med in named {
            if let Some(entry) = self.lookup(&med.name) {
                info.push(json!({
                    "name": entry.name,
                    "class": entry.class,
                    "indication": entry.indication,
                    "interactions": entry.interactions,
                }));
            }
        }

        if info.is_empty() {
            return AgentReply::failure("get_info", format!("Medication {} not found", named[0].name));
        }

        AgentReply::success("get_info", json!({"medications": info}))
    }
}

#[derive(Debug, Clone, Serialize)]
struct NamedMedication {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dosage: Option<String>,
}

/// Pull the medication names the LLM extracted from the utterance.
fn named_medications(reply: &AgentReply) -> Vec<NamedMedication> {
    reply
        .data_object()
        .and_then(|data| data.get("medications"))
        .and_then(Value::as_array)
        .map(|meds| {
            meds.iter()
                .filter_map(|m| {
                    let name = m.get("name").and_then(Value::as_str)?.trim().to_string();
                    if name.is_empty() {
                        return None;
                    }
                    let dosage = m.get("dosage").and_then(Value::as_str).map(str::to_string);
                    Some(NamedMedication { name, dosage })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn load_medication_data(path: &PathBuf) -> MedicationData {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Malformed medication data at {}: {}", path.display(), e);
            MedicationData::default()
        }),
        Err(_) => {
            // Seed an empty reference file so operators can fill it in
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(raw) = serde_json::to_string_pretty(&MedicationData::default()) {
                let _ = fs::write(path, raw);
            }
            MedicationData::default()
        }
    }
}

/// Render a successful medication reply for the user.
pub fn format_reply(reply: &AgentReply) -> String {
    let data = reply.data_object();

    match reply.operation.as_str() {
        "get_info" => {
            let mut text = String::from("Current medication information:\n\n");
            for med in data.and_then(|d| d.get("medications")).and_then(Value::as_array).into_iter().flatten() {
                text.push_str(&format!(
                    "{} ({}) - Used for {}.\n",
                    med.get("name").and_then(Value::as_str).unwrap_or("Unknown"),
                    med.get("class").and_then(Value::as_str).unwrap_or("Unknown"),
                    med.get("indication").and_then(Value::as_str).unwrap_or("Unknown"),
                ));
            }
            if !reply.warnings.is_empty() {
                text.push_str("\nImportant considerations:\n");
                for warning in &reply.warnings {
                    text.push_str(&format!("- {}\n", warning));
                }
            }
            text
        }
        "check_interactions" => {
            let interactions = data.and_then(|d| d.get("interactions")).and_then(Value::as_array);
            match interactions {
                Some(interactions) if !interactions.is_empty() => {
                    let mut text = String::from("Medication interaction analysis:\n\n");
                    for interaction in interactions {
                        text.push_str(&format!(
                            "Severity: {}\nDescription: {}\n\n",
                            interaction.get("severity").and_then(Value::as_str).unwrap_or("Unknown"),
                            interaction.get("description").and_then(Value::as_str).unwrap_or(""),
                        ));
                    }
                    text
                }
                _ => "No significant interactions found between the specified medications.".to_string(),
            }
        }
        "verify_dosage" => {
            let mut lines = Vec::new();
            for med in data.and_then(|d| d.get("medications")).and_then(Value::as_array).into_iter().flatten() {
                lines.push(format!(
                    "{}: recommended dosage {}",
                    med.get("name").and_then(Value::as_str).unwrap_or("Unknown"),
                    med.get("dosage").and_then(Value::as_str).unwrap_or("Not specified"),
                ));
            }
            if lines.is_empty() { "Recommended dosage: Not specified".to_string() } else { lines.join("\n") }
        }
        _ => serde_json::to_string(&reply.data).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent_with_data() -> MedicationAgent {
        let config = test_config();
        let llm = LlmClient::new(&config).unwrap();

        let data = MedicationData {
            medications: vec![
                MedicationEntry {
                    name: "Metformin".to_string(),
                    class: "Biguanide".to_string(),
                    indication: "Type 2 Diabetes".to_string(),
                    interactions: vec!["Lisinopril".to_string()],
                },
                MedicationEntry {
                    name: "Lisinopril".to_string(),
                    class: "ACE inhibitor".to_string(),
                    indication: "Hypertension".to_string(),
                    interactions: vec![],
                },
            ],
        };

        MedicationAgent { llm: llm.json_agent(SYSTEM_PROMPT), data: Mutex::new(data) }
    }

    fn test_config() -> crate::config::AppConfig {
        use clap::Parser;
        crate::config::AppConfig::try_parse_from(["clinical-voice-assistant", "--groq-api-key", "test-key"]).unwrap()
    }

    fn named(names: &[&str]) -> Vec<NamedMedication> {
        names.iter().map(|n| NamedMedication { name: n.to_string(), dosage: None }).collect()
    }

    #[test]
    fn test_interaction_found_between_named_pair() {
        let agent = agent_with_data();
        let reply = agent.check_interactions(&named(&["Metformin", "Lisinopril"]));

        assert!(reply.is_success());
        let interactions = reply.data_object().unwrap()["interactions"].as_array().unwrap();
        assert_eq!(interactions.len(), 1);
        assert!(interactions[0]["description"].as_str().unwrap().contains("Metformin"));
        assert_eq!(reply.warnings.len(), 1);
    }

    #[test]
    fn test_no_interaction_for_unrelated_pair() {
        let agent = agent_with_data();
        let reply = agent.check_interactions(&named(&["Lisinopril", "Ibuprofen"]));
        let interactions = reply.data_object().unwrap()["interactions"].as_array().unwrap();
        assert!(interactions.is_empty());
    }

    #[test]
    fn test_get_info_unknown_medication_errors() {
        let agent = agent_with_data();
        let reply = agent.get_info(&named(&["Unobtainium"]));
        assert!(!reply.is_success());
        assert!(reply.error.unwrap().contains("Unobtainium"));
    }

    #[test]
    fn test_named_medications_extraction() {
        let reply = AgentReply::success(
            "check_interactions",
            json!({"medications": [{"name": "Metformin"}, {"name": "  "}, {"dosage": "10mg"}]}),
        );
        let named = named_medications(&reply);
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name, "Metformin");
    }

    #[test]
    fn test_format_interactions() {
        let reply = AgentReply::success(
            "check_interactions",
            json!({"interactions": [{"severity": "Moderate", "description": "Interaction between A and B"}]}),
        );
        let text = format_reply(&reply);
        assert!(text.contains("Severity: Moderate"));
        assert!(text.contains("Interaction between A and B"));
    }

    #[test]
    fn test_format_no_interactions() {
        let reply = AgentReply::success("check_interactions", json!({"interactions": []}));
        assert!(format_reply(&reply).contains("No significant interactions"));
    }
}
