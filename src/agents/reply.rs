//! The response envelope every clinical agent produces.
//!
//! Agents prompt the LLM for a strict JSON object of the form
//! `{ operation, status, data, warnings, error }` and normalize whatever
//! comes back into an [`AgentReply`] before executing the operation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of an agent operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// One agent's reply to one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub operation: String,
    pub status: ReplyStatus,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentReply {
    /// A successful reply carrying `data`.
    pub fn success(operation: impl Into<String>, data: Value) -> Self {
        Self { operation: operation.into(), status: ReplyStatus::Success, data: Some(data), warnings: Vec::new(), error: None }
    }

    /// An error reply carrying a message.
    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self { operation: operation.into(), status: ReplyStatus::Error, data: None, warnings: Vec::new(), error: Some(error.into()) }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }

    /// Attach warnings, dropping empties.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings.into_iter().filter(|w| !w.trim().is_empty()).collect();
        self
    }

    /// Borrow the data payload as a JSON object, if it is one.
    pub fn data_object(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref().and_then(Value::as_object)
    }

    /// Normalize a raw LLM envelope.
    ///
    /// An envelope with an `error` set, or with missing/empty `data`, becomes
    /// an error reply; anything else becomes a success reply carrying the
    /// operation, data and warnings as given.
    pub fn from_llm(value: Value) -> Self {
        let operation = value.get("operation").and_then(Value::as_str).unwrap_or("").to_string();

        if let Some(error) = value.get("error").and_then(Value::as_str)
            && !error.is_empty()
        {
            return Self::failure(operation, error);
        }

        let data = value.get("data").cloned().filter(|d| !d.is_null());
        let empty = data.as_ref().and_then(Value::as_object).is_some_and(|o| o.is_empty());

        let Some(data) = data.filter(|_| !empty) else {
            let message = format!("No data provided for operation: {}", operation);
            return Self::failure(operation, message);
        };

        let warnings = value
            .get("warnings")
            .and_then(Value::as_array)
            .map(|w| w.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Self { operation, status: ReplyStatus::Success, data: Some(data), warnings, error: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_llm_success() {
        let reply = AgentReply::from_llm(json!({
            "operation": "get_info",
            "status": "success",
            "data": {"medications": [{"name": "Metformin"}]},
            "warnings": ["Monitor renal function"],
            "error": null
        }));
        assert!(reply.is_success());
        assert_eq!(reply.operation, "get_info");
        assert_eq!(reply.warnings, vec!["Monitor renal function"]);
    }

    #[test]
    fn test_from_llm_error_field_wins() {
        let reply = AgentReply::from_llm(json!({
            "operation": "retrieve",
            "data": {"ignored": true},
            "error": "patient ambiguous"
        }));
        assert!(!reply.is_success());
        assert_eq!(reply.error.as_deref(), Some("patient ambiguous"));
    }

    #[test]
    fn test_from_llm_missing_data_is_error() {
        let reply = AgentReply::from_llm(json!({"operation": "create_order"}));
        assert!(!reply.is_success());
        assert!(reply.error.unwrap().contains("create_order"));
    }

    #[test]
    fn test_from_llm_empty_object_data_is_error() {
        let reply = AgentReply::from_llm(json!({"operation": "retrieve", "data": {}}));
        assert!(!reply.is_success());
    }
}
