//! Inspector agent: protocol validation and agent-state monitoring.
//!
//! Every reply passes through the inspector before it reaches the user.
//! Validation is deterministic - required fields, an operation whitelist per
//! agent, and an object-shaped payload - so a misbehaving model can never
//! argue its own output into compliance.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::AgentKind;
use super::reply::AgentReply;

/// Result of validating one agent reply.
#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    pub is_valid: bool,
    pub violations: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Validation {
    fn valid() -> Self {
        Self { is_valid: true, violations: Vec::new(), suggestions: Vec::new() }
    }

    fn invalid(violations: Vec<String>, suggestions: Vec<String>) -> Self {
        Self { is_valid: false, violations, suggestions }
    }
}

/// A recorded conflict between two agents.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictRecord {
    pub timestamp: String,
    pub agents: [String; 2],
    pub conflict_type: String,
}

/// A cross-agent context entry.
#[derive(Debug, Clone, Serialize)]
pub struct ContextEntry {
    pub value: Value,
    pub source_agent: String,
    pub timestamp: String,
}

/// Allowed operations per agent.
fn allowed_operations(kind: AgentKind) -> &'static [&'static str] {
    match kind {
        AgentKind::Ehr => &["retrieve", "update", "create"],
        AgentKind::Medication => &["check_interactions", "verify_dosage", "get_info"],
        AgentKind::Orders => &["create_order", "verify_order", "cancel_order"],
        AgentKind::ClinicalDecision => &["analyze_case", "check_guidelines", "assess_risk"],
        AgentKind::Scheduling => &[
            "search_appointments",
            "check_availability",
            "schedule_appointment",
            "reschedule_appointment",
            "cancel_appointment",
        ],
        AgentKind::Analytics => &["generate_metrics", "check_compliance", "analyze_trends"],
    }
}

/// Monitors and validates the other agents.
pub struct InspectorAgent {
    agent_states: Mutex<HashMap<AgentKind, Value>>,
    conflicts: Mutex<Vec<ConflictRecord>>,
    context: Mutex<HashMap<String, ContextEntry>>,
}

impl InspectorAgent {
    pub fn new() -> Self {
        Self { agent_states: Mutex::new(HashMap::new()), conflicts: Mutex::new(Vec::new()), context: Mutex::new(HashMap::new()) }
    }

    /// Validate a reply against the agent protocol.
    pub fn validate_reply(&self, kind: AgentKind, reply: &AgentReply) -> Validation {
        if !reply.is_success() {
            let message = reply.error.clone().unwrap_or_else(|| "Unknown error".to_string());
            return Validation::invalid(
                vec![format!("{} returned an error: {}", kind.name(), message)],
                vec!["Rephrase the request or check upstream connectivity".to_string()],
            );
        }

        if reply.operation.is_empty() {
            return Validation::invalid(
                vec!["Missing required field: operation".to_string()],
                vec!["Ensure all required fields are present in the response".to_string()],
            );
        }

        let allowed = allowed_operations(kind);
        if !allowed.contains(&reply.operation.as_str()) {
            return Validation::invalid(
                vec![format!("Invalid operation: {}", reply.operation)],
                vec![format!("Valid operations for {}: {}", kind.name(), allowed.join(", "))],
            );
        }

        match reply.data.as_ref() {
            Some(Value::Object(_)) => Validation::valid(),
            _ => Validation::invalid(
                vec!["Data field must be an object".to_string()],
                vec!["Ensure the data field is a valid JSON object".to_string()],
            ),
        }
    }

    /// Record a reply as the agent's new state, returning the previous one.
    pub fn monitor_state(&self, kind: AgentKind, reply: &AgentReply) -> Option<Value> {
        let snapshot = serde_json::to_value(reply).unwrap_or(Value::Null);
        self.agent_states.lock().insert(kind, snapshot)
    }

    /// Latest recorded state for an agent.
    pub fn agent_state(&self, kind: AgentKind) -> Option<Value> {
        self.agent_states.lock().get(&kind).cloned()
    }

    /// Record a conflict between two agents.
    pub fn resolve_conflict(&self, first: AgentKind, second: AgentKind, conflict_type: &str) -> String {
        self.conflicts.lock().push(ConflictRecord {
            timestamp: Utc::now().to_rfc3339(),
            agents: [first.name().to_string(), second.name().to_string()],
            conflict_type: conflict_type.to_string(),
        });

        format!("Conflict between {} and {} resolved", first.name(), second.name())
    }

    /// Number of recorded conflicts.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.lock().len()
    }

    /// Track a cross-agent context value.
    pub fn track_context(&self, key: &str, value: Value, source: AgentKind) {
        self.context.lock().insert(
            key.to_string(),
            ContextEntry { value, source_agent: source.name().to_string(), timestamp: Utc::now().to_rfc3339() },
        );
    }

    /// Read back a tracked context value.
    pub fn context_value(&self, key: &str) -> Option<Value> {
        self.context.lock().get(key).map(|entry| entry.value.clone())
    }

    /// Render a failed validation for the user.
    pub fn format_validation(validation: &Validation) -> String {
        if validation.is_valid {
            return "✅ Response validation successful".to_string();
        }

        let mut text = String::from("❌ Response validation failed:\n");
        for violation in &validation.violations {
            text.push_str(&format!("- {}\n", violation));
        }
        if !validation.suggestions.is_empty() {
            text.push_str("\nSuggestions:\n");
            for suggestion in &validation.suggestions {
                text.push_str(&format!("- {}\n", suggestion));
            }
        }
        text
    }
}

impl Default for InspectorAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_reply_passes() {
        let inspector = InspectorAgent::new();
        let reply = AgentReply::success("retrieve", json!({"patient_id": "P001"}));
        assert!(inspector.validate_reply(AgentKind::Ehr, &reply).is_valid);
    }

    #[test]
    fn test_error_reply_fails_with_message() {
        let inspector = InspectorAgent::new();
        let reply = AgentReply::failure("retrieve", "Patient P009 not found");
        let validation = inspector.validate_reply(AgentKind::Ehr, &reply);
        assert!(!validation.is_valid);
        assert!(validation.violations[0].contains("Patient P009 not found"));
    }

    #[test]
    fn test_operation_whitelist_is_per_agent() {
        let inspector = InspectorAgent::new();
        // check_interactions is a medication operation, not an EHR one
        let reply = AgentReply::success("check_interactions", json!({"medications": []}));
        assert!(inspector.validate_reply(AgentKind::Medication, &reply).is_valid);

        let validation = inspector.validate_reply(AgentKind::Ehr, &reply);
        assert!(!validation.is_valid);
        assert!(validation.suggestions[0].contains("retrieve"));
    }

    #[test]
    fn test_missing_operation_fails() {
        let inspector = InspectorAgent::new();
        let reply = AgentReply::success("", json!({"x": 1}));
        let validation = inspector.validate_reply(AgentKind::Scheduling, &reply);
        assert!(!validation.is_valid);
        assert!(validation.violations[0].contains("operation"));
    }

    #[test]
    fn test_non_object_data_fails() {
        let inspector = InspectorAgent::new();
        let reply = AgentReply::success("retrieve", json!(["a", "b"]));
        let validation = inspector.validate_reply(AgentKind::Ehr, &reply);
        assert!(!validation.is_valid);
        assert!(validation.violations[0].contains("object"));
    }

    #[test]
    fn test_monitor_state_returns_previous() {
        let inspector = InspectorAgent::new();
        let first = AgentReply::success("retrieve", json!({"n": 1}));
        let second = AgentReply::success("retrieve", json!({"n": 2}));

        assert!(inspector.monitor_state(AgentKind::Ehr, &first).is_none());
        let previous = inspector.monitor_state(AgentKind::Ehr, &second).unwrap();
        assert_eq!(previous["data"]["n"], 1);
        assert_eq!(inspector.agent_state(AgentKind::Ehr).unwrap()["data"]["n"], 2);
    }

    #[test]
    fn test_format_validation_failure() {
        let inspector = InspectorAgent::new();
        let reply = AgentReply::success("launch_rocket", json!({"x": 1}));
        let validation = inspector.validate_reply(AgentKind::Orders, &reply);
        let text = InspectorAgent::format_validation(&validation);
        assert!(text.starts_with("❌ Response validation failed:"));
        assert!(text.contains("- Invalid operation: launch_rocket"));
        assert!(text.contains("Suggestions:"));
    }

    #[test]
    fn test_conflicts_and_context_are_recorded() {
        let inspector = InspectorAgent::new();
        inspector.resolve_conflict(AgentKind::Scheduling, AgentKind::Orders, "double_booking");
        assert_eq!(inspector.conflict_count(), 1);

        inspector.track_context("active_patient", json!("P001"), AgentKind::Ehr);
        assert_eq!(inspector.context_value("active_patient").unwrap(), json!("P001"));
    }
}
